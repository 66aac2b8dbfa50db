//! Pattern-driven dialogue engine.
//!
//! `parlance` compiles a small expression language two ways: into regexes that
//! interpret user input, and into stochastic text generators that produce
//! system output. A turn engine walks a graph of dialogue states whose edges
//! carry those expressions, choosing the best-scoring viable edge at each step.
//!
//! ```text
//! utterance ─> NgramContext ─┬─> update rules (rules.rs) ──> pending rule candidate
//!                            └─> user edges (matching)  ──> winning edge ─> state
//!                                                                     │
//!            system edges (generation) + pending rule candidate <─────┘
//!                         │
//!                         v
//!                    output text
//! ```
//!
//! # Example
//! ```
//! use parlance::{FlowBuilder, Speaker, Dialogue, TransitionSettings};
//! use std::sync::Arc;
//!
//! let mut builder = FlowBuilder::new();
//! builder.add_transition("start", "ask", Speaker::System, "{hi, hello}! what is your name?", TransitionSettings::default())?;
//! builder.add_transition("ask", "greet", Speaker::User, "[!{i am, my name is}?, $name=/\\w+/]", TransitionSettings::default())?;
//! builder.add_transition("greet", "end", Speaker::System, "nice to meet you $name.", TransitionSettings::default())?;
//! builder.set_initial("start")?;
//!
//! let mut dialogue = Dialogue::with_seed(Arc::new(builder.build()?), 7);
//! assert!(dialogue.system_turn()?.ends_with("what is your name?"));
//! dialogue.user_turn("my name is Ada")?;
//! assert_eq!(dialogue.system_turn()?, "nice to meet you ada.");
//! # Ok::<(), parlance::Error>(())
//! ```

extern crate self as parlance;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;
mod knowledge;
mod macro_registry;
mod natex;
mod ngrams;
mod script;
mod selector;

pub use api::{
    CandidateOutcome, CandidateTrace, Options, StepKind, StepTrace, TurnReport, generate, generate_with, matches,
    matches_with,
};
pub use engine::{
    Dialogue, Flow, FlowBuilder, GateEntry, GateKey, GateTable, SessionSnapshot, StateId, StateIdAllocator, StateKey,
    StateSettings, TurnMetrics, Transition, TransitionSettings,
};
pub use error::{
    BuildError, Error, GrammarSyntaxError, MacroError, MacroFault, Result, ScriptError, SessionError, TurnError,
};
pub use knowledge::{KnowledgeBase, MemoryKnowledgeBase, NodeId, OntologyMacro, RelationSpec};
pub use macro_registry::{GATE_KEY, Macro, MacroArg, MacroOutput, MacroRegistry, TARGET_KEY};
pub use natex::{CompiledPattern, Expr, Generated, GenerationExpr, Grammar, MatchingExpr, NodeKinds, ParseCache, parse};
pub use ngrams::{DEFAULT_NGRAM_MAX, NgramContext};
pub use script::Script;
pub use selector::{argmax_random, choose_uniform, select};

/// Variable bindings of one session, ordered by name.
pub type Bindings = BTreeMap<String, String>;

/// Who holds the floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    System,
    User,
}

impl Speaker {
    /// The speaker that takes the floor after this one.
    pub fn other(self) -> Speaker {
        match self {
            Speaker::System => Speaker::User,
            Speaker::User => Speaker::System,
        }
    }

    /// Grammar of the expressions on this speaker's edges.
    pub fn grammar(self) -> Grammar {
        match self {
            Speaker::System => Grammar::Generation,
            Speaker::User => Grammar::Matching,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::System => f.write_str("system"),
            Speaker::User => f.write_str("user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speakers_alternate_and_pick_their_grammar() {
        assert_eq!(Speaker::System.other(), Speaker::User);
        assert_eq!(Speaker::User.other().other(), Speaker::User);
        assert_eq!(Speaker::User.grammar(), Grammar::Matching);
        assert_eq!(Speaker::System.to_string(), "system");
        assert_eq!(serde_json::to_string(&Speaker::User).unwrap(), "\"user\"");
    }
}
