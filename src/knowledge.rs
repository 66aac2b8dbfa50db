//! Knowledge-base query capability.
//!
//! The dialogue engine never talks to a graph store directly; macros do, through
//! the [`KnowledgeBase`] trait. [`MemoryKnowledgeBase`] is a small triple store
//! good enough for scripts and tests, and [`OntologyMacro`] exposes it to
//! expressions as `#ONT(category)`:
//!
//! ```text
//! poodle  -type-> dog -type-> animal
//! cat     -type-> animal
//!
//! #ONT(animal)  =>  Choices{cat, dog, poodle}
//! ```

use crate::Bindings;
use crate::error::MacroError;
use crate::macro_registry::{Macro, MacroArg, MacroOutput};
use crate::ngrams::NgramContext;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

pub type NodeId = String;

/// One hop of a knowledge-base query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    pub relation: String,
    /// Follow edges object → subject instead of subject → object.
    pub reversed: bool,
    /// Follow the relation repeatedly (transitive closure, start excluded).
    pub transitive: bool,
}

impl RelationSpec {
    pub fn forward(relation: impl Into<String>) -> Self {
        RelationSpec { relation: relation.into(), reversed: false, transitive: false }
    }

    pub fn reversed(relation: impl Into<String>) -> Self {
        RelationSpec { relation: relation.into(), reversed: true, transitive: false }
    }

    pub fn transitive(mut self) -> Self {
        self.transitive = true;
        self
    }
}

/// Typed query interface consumed by macros.
pub trait KnowledgeBase: Send + Sync {
    /// Apply `relations` in order, starting from `nodes`.
    fn query(&self, nodes: &BTreeSet<NodeId>, relations: &[RelationSpec]) -> BTreeSet<NodeId>;
}

/// In-memory `(subject, relation, object)` store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKnowledgeBase {
    forward: HashMap<(String, String), BTreeSet<NodeId>>,
    backward: HashMap<(String, String), BTreeSet<NodeId>>,
}

impl MemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subject: &str, relation: &str, object: &str) -> &mut Self {
        self.forward.entry((subject.to_string(), relation.to_string())).or_default().insert(object.to_string());
        self.backward.entry((object.to_string(), relation.to_string())).or_default().insert(subject.to_string());
        self
    }

    fn neighbors(&self, node: &str, spec: &RelationSpec) -> impl Iterator<Item = &NodeId> {
        let index = if spec.reversed { &self.backward } else { &self.forward };
        index.get(&(node.to_string(), spec.relation.clone())).into_iter().flatten()
    }

    fn hop(&self, frontier: &BTreeSet<NodeId>, spec: &RelationSpec) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        let mut queue: VecDeque<&str> = frontier.iter().map(String::as_str).collect();
        while let Some(node) = queue.pop_front() {
            for next in self.neighbors(node, spec) {
                if out.insert(next.clone()) && spec.transitive {
                    queue.push_back(next);
                }
            }
        }
        out
    }
}

impl KnowledgeBase for MemoryKnowledgeBase {
    fn query(&self, nodes: &BTreeSet<NodeId>, relations: &[RelationSpec]) -> BTreeSet<NodeId> {
        relations.iter().fold(nodes.clone(), |frontier, spec| self.hop(&frontier, spec))
    }
}

/// `#ONT(category)`: every transitive instance of `category`, as choices.
///
/// Node names are turned into expression form (`golden_retriever` becomes
/// `golden retriever`).
pub struct OntologyMacro {
    kb: Arc<dyn KnowledgeBase>,
    relation: String,
}

impl OntologyMacro {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self::with_relation(kb, "type")
    }

    pub fn with_relation(kb: Arc<dyn KnowledgeBase>, relation: impl Into<String>) -> Self {
        OntologyMacro { kb, relation: relation.into() }
    }
}

impl Macro for OntologyMacro {
    fn call(&self, _: &NgramContext, _: &mut Bindings, args: &[MacroArg]) -> Result<MacroOutput, MacroError> {
        if args.is_empty() {
            return Err(MacroError::new("#ONT needs at least one category"));
        }
        let mut roots = BTreeSet::new();
        for arg in args {
            let category = arg.as_text().ok_or_else(|| MacroError::new("#ONT category has no text"))?;
            roots.insert(category.replace(' ', "_"));
        }
        let spec = RelationSpec::reversed(self.relation.clone()).transitive();
        let found = self.kb.query(&roots, &[spec]);
        Ok(MacroOutput::choices(found.into_iter().map(|node| node.replace('_', " "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animals() -> MemoryKnowledgeBase {
        let mut kb = MemoryKnowledgeBase::new();
        kb.add("dog", "type", "animal")
            .add("cat", "type", "animal")
            .add("golden_retriever", "type", "dog")
            .add("dog", "likes", "bone");
        kb
    }

    fn set(items: &[&str]) -> BTreeSet<NodeId> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_and_transitive_hops() {
        let kb = animals();
        assert_eq!(kb.query(&set(&["dog"]), &[RelationSpec::forward("type")]), set(&["animal"]));
        assert_eq!(kb.query(&set(&["animal"]), &[RelationSpec::reversed("type")]), set(&["cat", "dog"]));
        assert_eq!(
            kb.query(&set(&["animal"]), &[RelationSpec::reversed("type").transitive()]),
            set(&["cat", "dog", "golden_retriever"])
        );
        // Chained: what do subtypes of dog's parent like?
        let chained = [RelationSpec::forward("type"), RelationSpec::reversed("type"), RelationSpec::forward("likes")];
        assert_eq!(kb.query(&set(&["cat"]), &chained), set(&["bone"]));
    }

    #[test]
    fn ontology_macro_returns_expression_forms() {
        let ont = OntologyMacro::new(Arc::new(animals()));
        let mut vars = Bindings::new();
        let out = ont.call(&NgramContext::empty(), &mut vars, &[MacroArg::Text("dog".into())]).unwrap();
        match out {
            MacroOutput::Choices(choices) => assert_eq!(choices, set(&["golden retriever"])),
            other => panic!("unexpected {other:?}"),
        }
        assert!(ont.call(&NgramContext::empty(), &mut vars, &[]).is_err());
    }
}
