//! Session snapshots.
//!
//! A snapshot is the serializable part of a [`Dialogue`](crate::Dialogue):
//! current state, floor holder, bindings and fired gates. States are stored
//! by name, so a snapshot survives rebuilding the flow as long as the named
//! states still exist.
//!
//! ```json
//! {
//!   "state": "intro:ask_name",
//!   "speaker": "user",
//!   "vars": { "name": "ada" },
//!   "gates": [ { "target": "ask_more", "config": [["topic", "music"]], "count": 1 } ]
//! }
//! ```
//!
//! A pending update-rule answer is transient and not part of a snapshot.

use super::flow::Flow;
use super::gate::{GateKey, GateTable};
use super::graph::StateId;
use crate::error::SessionError;
use crate::{Bindings, Speaker};
use serde::{Deserialize, Serialize};

/// One fired gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEntry {
    pub target: String,
    pub config: Vec<(String, Option<String>)>,
    pub count: u32,
}

/// Serializable session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: String,
    pub speaker: Speaker,
    #[serde(default)]
    pub vars: Bindings,
    #[serde(default)]
    pub gates: Vec<GateEntry>,
}

impl SessionSnapshot {
    pub(crate) fn capture(flow: &Flow, state: StateId, speaker: Speaker, vars: &Bindings, gates: &GateTable) -> Self {
        let gates = gates
            .iter()
            .map(|(key, count)| GateEntry {
                target: flow.graph.key(key.target()).to_string(),
                config: key.config().to_vec(),
                count,
            })
            .collect();
        SessionSnapshot { state: flow.graph.key(state).to_string(), speaker, vars: vars.clone(), gates }
    }

    /// Resolve names against `flow`; unknown states are rejected.
    pub(crate) fn resolve(&self, flow: &Flow) -> Result<(StateId, GateTable), SessionError> {
        let lookup =
            |name: &str| flow.graph.lookup(&name.into()).ok_or_else(|| SessionError::UnknownState(name.to_string()));

        let state = lookup(&self.state)?;
        let mut gates = GateTable::new();
        for entry in &self.gates {
            let key = GateKey { target: lookup(&entry.target)?, config: entry.config.clone() };
            gates.insert_count(key, entry.count);
        }
        Ok((state, gates))
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        Ok(serde_json::from_str(json)?)
    }
}
