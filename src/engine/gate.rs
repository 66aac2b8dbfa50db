//! Gate keys for one-shot transitions.
//!
//! A gated transition may fire once per *variable configuration*: after it
//! fires, the same target with the same values for the gated variables is
//! closed until the session is reset. Without the table a multi-hop system
//! turn would happily repeat itself on every visit.
//!
//! ## What counts as "the same offer"
//!
//! The key combines:
//!
//! - the target state;
//! - the gated variable names, sorted;
//! - each variable's value at the time of the offer (`None` when unbound).
//!
//! ```text
//! gate [topic] on -> ask_more   topic = "music"
//!   key = (ask_more, [("topic", Some("music"))])
//! ```

use super::graph::StateId;
use crate::Bindings;
use std::collections::BTreeMap;

/// Identity of a gated offer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateKey {
    pub(crate) target: StateId,
    pub(crate) config: Vec<(String, Option<String>)>,
}

impl GateKey {
    /// Key for offering `target` with the gated `names`, read from `vars`.
    pub fn new<'a, I>(target: StateId, names: I, vars: &Bindings) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config: Vec<(String, Option<String>)> =
            names.into_iter().map(|name| (name.to_string(), vars.get(name).cloned())).collect();
        config.sort();
        config.dedup();
        GateKey { target, config }
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    pub fn config(&self) -> &[(String, Option<String>)] {
        &self.config
    }
}

/// Fired gate configurations with their fire counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateTable {
    fired: BTreeMap<GateKey, u32>,
}

impl GateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self, key: &GateKey) -> bool {
        self.fired.contains_key(key)
    }

    pub fn record(&mut self, key: GateKey) {
        *self.fired.entry(key).or_insert(0) += 1;
    }

    pub(crate) fn insert_count(&mut self, key: GateKey, count: u32) {
        self.fired.insert(key, count);
    }

    pub fn count(&self, key: &GateKey) -> u32 {
        self.fired.get(key).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.fired.clear();
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GateKey, u32)> {
        self.fired.iter().map(|(key, &count)| (key, count))
    }
}
