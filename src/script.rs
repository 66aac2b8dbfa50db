//! JSON dialogue scripts.
//!
//! A script describes a whole flow as data and builds it through the same
//! [`FlowBuilder`] calls host code would make.
//!
//! ```json
//! {
//!   "options": { "seed": 7 },
//!   "initial": "start",
//!   "states": {
//!     "greet": { "system_multi_hop": true, "enter": "#EXISTS($name)" }
//!   },
//!   "transitions": [
//!     { "source": "start", "target": "ask", "speaker": "system", "expr": "what is your name?" },
//!     { "source": "ask", "target": "greet", "speaker": "user", "expr": "[$name=/\\w+/]", "score": 2.0 }
//!   ],
//!   "rules": [
//!     { "precondition": "help", "postcondition": "ask me anything", "score": 5.0 }
//!   ]
//! }
//! ```
//!
//! Without an `initial` state the source of the first transition is used.

use crate::Speaker;
use crate::api::Options;
use crate::engine::{Flow, FlowBuilder, StateSettings, TransitionSettings};
use crate::error::{BuildError, ScriptError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A dialogue flow as data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub options: Options,
    pub initial: Option<String>,
    pub initial_speaker: Option<Speaker>,
    pub fallback: Option<String>,
    pub states: BTreeMap<String, StateSpec>,
    pub transitions: Vec<TransitionSpec>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    #[serde(flatten)]
    pub settings: StateSettings,
    /// Enter guard (generation grammar).
    #[serde(default)]
    pub enter: Option<String>,
    #[serde(default)]
    pub error_successor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub source: String,
    pub target: String,
    pub speaker: Speaker,
    pub expr: String,
    #[serde(flatten)]
    pub settings: TransitionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub precondition: String,
    #[serde(default)]
    pub postcondition: Option<String>,
    #[serde(default)]
    pub repeating: bool,
    #[serde(default = "default_rule_score")]
    pub score: f64,
}

fn default_rule_score() -> f64 {
    1.0
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let script = Self::from_json(&json)?;
        tracing::debug!(
            target: "parlance::engine",
            path = %path.display(),
            states = script.states.len(),
            transitions = script.transitions.len(),
            rules = script.rules.len(),
            "script loaded"
        );
        Ok(script)
    }

    /// Build with the built-in macros only.
    pub fn build(self) -> Result<Flow, ScriptError> {
        self.build_with(FlowBuilder::new())
    }

    /// Build on top of `builder`, typically one with host macros registered.
    pub fn build_with(self, mut builder: FlowBuilder) -> Result<Flow, ScriptError> {
        self.apply(&mut builder)?;
        Ok(builder.build()?)
    }

    /// Replay the script into `builder`.
    pub fn apply(self, builder: &mut FlowBuilder) -> Result<(), BuildError> {
        builder.options(self.options);

        for (name, spec) in &self.states {
            builder.add_state(name.as_str(), spec.settings)?;
        }
        let first_source = self.transitions.first().map(|t| t.source.clone());
        for t in self.transitions {
            builder.add_transition(t.source, t.target, t.speaker, &t.expr, t.settings)?;
        }
        for (name, spec) in &self.states {
            if let Some(guard) = &spec.enter {
                builder.set_enter_guard(name.as_str(), guard)?;
            }
            if let Some(successor) = &spec.error_successor {
                builder.set_error_successor(name.as_str(), successor.as_str())?;
            }
        }
        for rule in self.rules {
            builder.add_update_rule(&rule.precondition, rule.postcondition.as_deref(), rule.repeating, rule.score)?;
        }

        if let Some(initial) = self.initial.or(first_source) {
            builder.set_initial(initial)?;
        }
        if let Some(speaker) = self.initial_speaker {
            builder.set_initial_speaker(speaker);
        }
        if let Some(fallback) = self.fallback {
            builder.set_fallback(fallback)?;
        }
        Ok(())
    }
}
