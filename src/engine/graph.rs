//! Dialogue graph: states, transitions and their settings.
//!
//! States live in an arena indexed by [`StateId`]; transitions are stored once
//! and indexed by `(source, speaker)` so a step only looks at the edges the
//! active speaker may take:
//!
//! ```text
//! states:       [0: start] [1: ask] [2: greet]
//! transitions:  #0 start -system-> ask
//!               #1 ask   -user->   greet
//! adjacency:    (0, System) -> [#0]
//!               (1, User)   -> [#1]
//! ```
//!
//! ## Invariants
//!
//! - `StateId(n)` is an index into `DialogueGraph::states`; ids are handed out
//!   by one [`StateIdAllocator`] and never reused.
//! - A USER transition always carries a matching expression and a SYSTEM
//!   transition a generation expression.

use crate::Speaker;
use crate::natex::{GenerationExpr, MatchingExpr};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Interned state identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Monotonic id source owned by one graph builder.
#[derive(Debug, Clone, Default)]
pub struct StateIdAllocator {
    next: u32,
}

impl StateIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> StateId {
        let id = StateId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> usize {
        self.next as usize
    }
}

/// Human-facing state name: `name` or `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    Plain(String),
    Namespaced { namespace: String, name: String },
}

impl StateKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        StateKey::Namespaced { namespace: namespace.into(), name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            StateKey::Plain(name) | StateKey::Namespaced { name, .. } => name,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            StateKey::Plain(_) => None,
            StateKey::Namespaced { namespace, .. } => Some(namespace),
        }
    }
}

impl From<&str> for StateKey {
    fn from(s: &str) -> Self {
        match s.split_once(':') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                StateKey::namespaced(namespace, name)
            }
            _ => StateKey::Plain(s.to_string()),
        }
    }
}

impl From<String> for StateKey {
    fn from(s: String) -> Self {
        StateKey::from(s.as_str())
    }
}

impl From<&String> for StateKey {
    fn from(s: &String) -> Self {
        StateKey::from(s.as_str())
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Plain(name) => f.write_str(name),
            StateKey::Namespaced { namespace, name } => write!(f, "{namespace}:{name}"),
        }
    }
}

/// Per-state behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// The user may take another transition after arriving here.
    pub user_multi_hop: bool,
    /// The system may take another transition after arriving here.
    pub system_multi_hop: bool,
    /// Arriving here always hands the floor to the other speaker.
    pub switch: bool,
}

impl StateSettings {
    pub fn multi_hop(&self, speaker: Speaker) -> bool {
        match speaker {
            Speaker::System => self.system_multi_hop,
            Speaker::User => self.user_multi_hop,
        }
    }
}

/// Per-transition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    pub score: f64,
    /// Variables whose values close this transition once it has fired.
    pub gate: Option<Vec<String>>,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        TransitionSettings { score: 1.0, gate: None }
    }
}

impl TransitionSettings {
    pub fn scored(score: f64) -> Self {
        TransitionSettings { score, ..Self::default() }
    }

    pub fn gated<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gate = Some(vars.into_iter().map(Into::into).collect());
        self
    }
}

/// The expression on an edge, typed by the speaker that takes it.
#[derive(Debug, Clone)]
pub(crate) enum EdgeExpr {
    Matching(MatchingExpr),
    Generation(GenerationExpr),
}

impl EdgeExpr {
    pub(crate) fn source(&self) -> &str {
        match self {
            EdgeExpr::Matching(expr) => expr.source(),
            EdgeExpr::Generation(expr) => expr.source(),
        }
    }
}

/// A directed, speaker-labeled edge.
#[derive(Debug, Clone)]
pub struct Transition {
    pub(crate) source: StateId,
    pub(crate) target: StateId,
    pub(crate) speaker: Speaker,
    pub(crate) expr: EdgeExpr,
    pub(crate) settings: TransitionSettings,
}

impl Transition {
    pub fn source(&self) -> StateId {
        self.source
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    /// Expression source text.
    pub fn expression(&self) -> &str {
        self.expr.source()
    }

    pub fn settings(&self) -> &TransitionSettings {
        &self.settings
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StateNode {
    pub(crate) key: StateKey,
    pub(crate) settings: StateSettings,
    pub(crate) enter: Option<GenerationExpr>,
    pub(crate) error_successor: Option<StateId>,
}

impl StateNode {
    pub(crate) fn new(key: StateKey, settings: StateSettings) -> Self {
        StateNode { key, settings, enter: None, error_successor: None }
    }
}

/// Immutable state arena plus speaker-keyed adjacency.
#[derive(Debug, Clone, Default)]
pub(crate) struct DialogueGraph {
    states: Vec<StateNode>,
    index: HashMap<StateKey, StateId>,
    transitions: Vec<Transition>,
    adjacency: HashMap<(StateId, Speaker), Vec<usize>>,
}

impl DialogueGraph {
    pub(crate) fn new(states: Vec<StateNode>, transitions: Vec<Transition>) -> Self {
        let index = states.iter().enumerate().map(|(idx, node)| (node.key.clone(), StateId(idx as u32))).collect();
        let mut adjacency: HashMap<(StateId, Speaker), Vec<usize>> = HashMap::new();
        for (idx, t) in transitions.iter().enumerate() {
            adjacency.entry((t.source, t.speaker)).or_default().push(idx);
        }
        DialogueGraph { states, index, transitions, adjacency }
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn lookup(&self, key: &StateKey) -> Option<StateId> {
        self.index.get(key).copied()
    }

    pub(crate) fn node(&self, id: StateId) -> &StateNode {
        &self.states[id.index()]
    }

    pub(crate) fn key(&self, id: StateId) -> &StateKey {
        &self.node(id).key
    }

    pub(crate) fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Outgoing transitions of `state` for `speaker`, in registration order.
    pub(crate) fn outgoing(&self, state: StateId, speaker: Speaker) -> impl Iterator<Item = &Transition> {
        self.adjacency.get(&(state, speaker)).into_iter().flatten().map(|&idx| &self.transitions[idx])
    }
}
