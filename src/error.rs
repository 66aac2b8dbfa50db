//! Error types.
//!
//! Construction-time problems (`GrammarSyntaxError`, `BuildError`,
//! `ScriptError`) are fatal for the thing being built. Turn-time problems are
//! reported as `TurnError` and leave the session untouched. Macro failures are
//! contained: the compilers turn a [`MacroFault`] into a failing fragment and
//! carry on, so it never surfaces from a turn.

use thiserror::Error;

use crate::{Grammar, Speaker};

/// A malformed matching or generation expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{grammar} expression `{source_text}`: {message} (at byte {position})")]
pub struct GrammarSyntaxError {
    pub grammar: Grammar,
    pub source_text: String,
    pub position: usize,
    pub message: String,
}

/// Error returned by a host macro body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MacroError(pub String);

impl MacroError {
    pub fn new(reason: impl Into<String>) -> Self {
        MacroError(reason.into())
    }
}

/// A contained macro failure, as observed by the compilers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroFault {
    #[error("macro #{name} is not registered")]
    Unknown { name: String },

    #[error("macro #{name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("macro #{name} panicked")]
    Panicked { name: String },

    #[error("macro #{name} returned an opaque value where text was required")]
    OpaqueOutput { name: String },
}

/// Errors raised while building a dialogue flow.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Grammar(#[from] GrammarSyntaxError),

    #[error("unknown state `{0}`")]
    UnknownState(String),

    #[error("state `{0}` is already defined")]
    DuplicateState(String),

    #[error("transition {source_state} -> {target} has non-finite score {score}")]
    InvalidScore { source_state: String, target: String, score: f64 },

    #[error("flow has no initial state")]
    MissingInitialState,
}

/// Fatal errors of a single turn.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TurnError {
    #[error("expected a {expected} turn but the {actual} holds the floor")]
    WrongSpeaker { expected: Speaker, actual: Speaker },

    #[error("no viable {speaker} transition out of state `{state}`")]
    NoViableTransition { state: String, speaker: Speaker },

    #[error("update rules did not converge after {iterations} rule applications (last rule: `{last_rule}`)")]
    RuleEngineNonConvergence { iterations: usize, last_rule: String },
}

/// Errors restoring a serialized session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session snapshot names unknown state `{0}`")]
    UnknownState(String),

    #[error("malformed session snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors loading a JSON dialogue script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed script: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Grammar(#[from] GrammarSyntaxError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
