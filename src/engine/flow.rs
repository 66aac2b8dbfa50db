//! Flow construction.
//!
//! A [`Flow`] is everything about a dialogue that does not change while it
//! runs: the graph, the update rules, the macros, the parse cache and the
//! options. It is built once through a [`FlowBuilder`] and shared between
//! sessions behind an `Arc`.
//!
//! Every expression is parsed while building, so a malformed expression fails
//! the build instead of a turn.

use super::graph::{DialogueGraph, EdgeExpr, StateId, StateIdAllocator, StateKey, StateNode, StateSettings};
use super::graph::{Transition, TransitionSettings};
use super::rules::{UpdateRule, UpdateRules};
use crate::Speaker;
use crate::api::Options;
use crate::error::{BuildError, GrammarSyntaxError};
use crate::macro_registry::{Macro, MacroRegistry};
use crate::natex::{GenerationExpr, Grammar, MatchingExpr, ParseCache};
use std::collections::HashMap;

/// Immutable dialogue definition shared by sessions.
#[derive(Debug)]
pub struct Flow {
    pub(crate) graph: DialogueGraph,
    pub(crate) rules: UpdateRules,
    pub(crate) macros: MacroRegistry,
    pub(crate) cache: ParseCache,
    pub(crate) options: Options,
    pub(crate) initial: StateId,
    pub(crate) initial_speaker: Speaker,
    pub(crate) fallback: Option<StateId>,
}

impl Flow {
    pub fn builder() -> FlowBuilder {
        FlowBuilder::new()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn macros(&self) -> &MacroRegistry {
        &self.macros
    }

    pub fn parse_cache(&self) -> &ParseCache {
        &self.cache
    }

    pub fn initial_state(&self) -> &StateKey {
        self.graph.key(self.initial)
    }

    pub fn initial_speaker(&self) -> Speaker {
        self.initial_speaker
    }

    pub fn state_count(&self) -> usize {
        self.graph.len()
    }

    pub fn transitions(&self) -> &[Transition] {
        self.graph.transitions()
    }

    pub fn update_rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Name of the state with this id.
    pub fn state_key(&self, id: StateId) -> Option<&StateKey> {
        (id.index() < self.graph.len()).then(|| self.graph.key(id))
    }

    pub fn state_id(&self, key: impl Into<StateKey>) -> Option<StateId> {
        self.graph.lookup(&key.into())
    }

    /// Warm the parse cache with extra sources (for example, expressions a
    /// host evaluates ad hoc through [`MatchingExpr::parse_cached`]).
    pub fn precache<'a, I>(&self, grammar: Grammar, sources: I) -> Result<usize, GrammarSyntaxError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.cache.precache(grammar, sources)
    }
}

/// Builder for [`Flow`].
///
/// States are created on first mention; [`FlowBuilder::add_state`] is only
/// needed to give a state non-default settings up front.
#[derive(Debug)]
pub struct FlowBuilder {
    allocator: StateIdAllocator,
    states: Vec<StateNode>,
    index: HashMap<StateKey, StateId>,
    transitions: Vec<Transition>,
    rules: Vec<UpdateRule>,
    macros: MacroRegistry,
    cache: ParseCache,
    options: Options,
    initial: Option<StateId>,
    initial_speaker: Speaker,
    fallback: Option<StateId>,
}

impl Default for FlowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowBuilder {
    /// An empty builder with the built-in macros registered.
    pub fn new() -> Self {
        FlowBuilder {
            allocator: StateIdAllocator::new(),
            states: Vec::new(),
            index: HashMap::new(),
            transitions: Vec::new(),
            rules: Vec::new(),
            macros: MacroRegistry::with_builtins(),
            cache: ParseCache::new(),
            options: Options::default(),
            initial: None,
            initial_speaker: Speaker::System,
            fallback: None,
        }
    }

    pub fn options(&mut self, options: Options) -> &mut Self {
        self.options = options;
        self
    }

    pub fn register_macro(&mut self, name: impl Into<String>, m: impl Macro + 'static) -> &mut Self {
        self.macros.register(name, m);
        self
    }

    pub fn macros_mut(&mut self) -> &mut MacroRegistry {
        &mut self.macros
    }

    /// Declare a state with settings; fails if it already exists.
    pub fn add_state(&mut self, key: impl Into<StateKey>, settings: StateSettings) -> Result<StateId, BuildError> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(BuildError::DuplicateState(key.to_string()));
        }
        Ok(self.insert_state(key, settings))
    }

    /// Id of `key`, creating the state with default settings if needed.
    pub fn state(&mut self, key: impl Into<StateKey>) -> StateId {
        let key = key.into();
        match self.index.get(&key) {
            Some(&id) => id,
            None => self.insert_state(key, StateSettings::default()),
        }
    }

    /// A fresh state with a generated name. Names already taken, including
    /// ones a caller chose in the `_auto` namespace, are skipped.
    pub fn anonymous_state(&mut self, settings: StateSettings) -> StateId {
        let mut n = self.allocator.allocated();
        let key = loop {
            let key = StateKey::namespaced("_auto", n.to_string());
            if !self.index.contains_key(&key) {
                break key;
            }
            n += 1;
        };
        self.insert_state(key, settings)
    }

    fn insert_state(&mut self, key: StateKey, settings: StateSettings) -> StateId {
        let id = self.allocator.allocate();
        self.index.insert(key.clone(), id);
        self.states.push(StateNode::new(key, settings));
        id
    }

    fn existing(&self, key: impl Into<StateKey>) -> Result<StateId, BuildError> {
        let key = key.into();
        self.index.get(&key).copied().ok_or_else(|| BuildError::UnknownState(key.to_string()))
    }

    /// Replace the settings of an existing state.
    pub fn set_state_settings(&mut self, key: impl Into<StateKey>, settings: StateSettings) -> Result<(), BuildError> {
        let id = self.existing(key)?;
        self.states[id.index()].settings = settings;
        Ok(())
    }

    /// Add an edge. `expression` is a matching expression for USER edges and a
    /// generation expression for SYSTEM edges.
    pub fn add_transition(
        &mut self,
        source: impl Into<StateKey>,
        target: impl Into<StateKey>,
        speaker: Speaker,
        expression: &str,
        settings: TransitionSettings,
    ) -> Result<(), BuildError> {
        let source = source.into();
        let target = target.into();
        if !settings.score.is_finite() {
            return Err(BuildError::InvalidScore {
                source_state: source.to_string(),
                target: target.to_string(),
                score: settings.score,
            });
        }
        let expr = match speaker {
            Speaker::User => EdgeExpr::Matching(MatchingExpr::parse_cached(expression, &self.cache)?),
            Speaker::System => EdgeExpr::Generation(GenerationExpr::parse_cached(expression, &self.cache)?),
        };
        let source = self.state(source);
        let target = self.state(target);
        self.transitions.push(Transition { source, target, speaker, expr, settings });
        Ok(())
    }

    /// Where the user side goes when nothing matches in `state`.
    pub fn set_error_successor(
        &mut self,
        state: impl Into<StateKey>,
        successor: impl Into<StateKey>,
    ) -> Result<(), BuildError> {
        let state = self.existing(state)?;
        let successor = self.state(successor);
        self.states[state.index()].error_successor = Some(successor);
        Ok(())
    }

    /// Generation expression that must succeed for any transition into `state`.
    pub fn set_enter_guard(&mut self, state: impl Into<StateKey>, expression: &str) -> Result<(), BuildError> {
        let state = self.existing(state)?;
        let guard = GenerationExpr::parse_cached(expression, &self.cache)?;
        self.states[state.index()].enter = Some(guard);
        Ok(())
    }

    pub fn set_initial(&mut self, state: impl Into<StateKey>) -> Result<(), BuildError> {
        self.initial = Some(self.existing(state)?);
        Ok(())
    }

    pub fn set_initial_speaker(&mut self, speaker: Speaker) -> &mut Self {
        self.initial_speaker = speaker;
        self
    }

    /// State the system side retries from when nothing is viable.
    pub fn set_fallback(&mut self, state: impl Into<StateKey>) -> Result<(), BuildError> {
        self.fallback = Some(self.existing(state)?);
        Ok(())
    }

    /// Register an update rule. With a postcondition, the rule answers on the
    /// next system turn; without one, it only updates bindings.
    pub fn add_update_rule(
        &mut self,
        precondition: &str,
        postcondition: Option<&str>,
        repeating: bool,
        score: f64,
    ) -> Result<(), BuildError> {
        if !score.is_finite() {
            return Err(BuildError::InvalidScore {
                source_state: "<update rule>".to_string(),
                target: precondition.to_string(),
                score,
            });
        }
        let precondition = MatchingExpr::parse_cached(precondition, &self.cache)?;
        let postcondition = postcondition.map(|post| GenerationExpr::parse_cached(post, &self.cache)).transpose()?;
        self.rules.push(UpdateRule { precondition, postcondition, repeating, score });
        Ok(())
    }

    pub fn build(self) -> Result<Flow, BuildError> {
        let initial = match self.initial {
            Some(id) => id,
            None if !self.states.is_empty() => StateId(0),
            None => return Err(BuildError::MissingInitialState),
        };
        tracing::debug!(
            target: "parlance::engine",
            states = self.states.len(),
            transitions = self.transitions.len(),
            rules = self.rules.len(),
            cached = self.cache.len(),
            "flow built"
        );
        Ok(Flow {
            graph: DialogueGraph::new(self.states, self.transitions),
            rules: UpdateRules::new(self.rules),
            macros: self.macros,
            cache: self.cache,
            options: self.options,
            initial,
            initial_speaker: self.initial_speaker,
            fallback: self.fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_created_on_first_mention() {
        let mut b = FlowBuilder::new();
        b.add_transition("a", "b", Speaker::System, "hi", TransitionSettings::default()).unwrap();
        b.add_transition("b", "intro:c", Speaker::User, "[yes]", TransitionSettings::default()).unwrap();
        let flow = b.build().unwrap();
        assert_eq!(flow.state_count(), 3);
        assert_eq!(flow.initial_state().to_string(), "a");
        assert_eq!(flow.state_id("intro:c"), Some(StateId(2)));
        assert_eq!(flow.transitions().len(), 2);
    }

    #[test]
    fn construction_errors() {
        let mut b = FlowBuilder::new();
        b.add_state("a", StateSettings::default()).unwrap();
        assert!(matches!(b.add_state("a", StateSettings::default()), Err(BuildError::DuplicateState(s)) if s == "a"));
        assert!(matches!(b.set_initial("nope"), Err(BuildError::UnknownState(s)) if s == "nope"));
        assert!(matches!(
            b.add_transition("a", "b", Speaker::User, "{oops", TransitionSettings::default()),
            Err(BuildError::Grammar(_))
        ));
        assert!(matches!(
            b.add_transition("a", "b", Speaker::System, "[not, generation]", TransitionSettings::default()),
            Err(BuildError::Grammar(_))
        ));
        assert!(matches!(
            b.add_transition("a", "b", Speaker::System, "x", TransitionSettings::scored(f64::NAN)),
            Err(BuildError::InvalidScore { .. })
        ));
        assert!(matches!(FlowBuilder::new().build(), Err(BuildError::MissingInitialState)));
    }

    #[test]
    fn anonymous_states_get_unique_names() {
        let mut b = FlowBuilder::new();
        let a = b.anonymous_state(StateSettings::default());
        let c = b.anonymous_state(StateSettings::default());
        assert_ne!(a, c);
        let flow = b.build().unwrap();
        assert_eq!(flow.state_key(a).map(|k| k.namespace()), Some(Some("_auto")));
        assert_ne!(flow.state_key(a), flow.state_key(c));
    }

    #[test]
    fn anonymous_states_skip_names_already_taken() {
        let mut b = FlowBuilder::new();
        // One state allocated, so the next generated name would be `_auto:1`.
        let named = b.state("_auto:1");
        let anonymous = b.anonymous_state(StateSettings::default());
        assert_ne!(anonymous, named);

        let flow = b.build().unwrap();
        assert_eq!(flow.state_count(), 2);
        assert_eq!(flow.state_id("_auto:1"), Some(named));
        assert_eq!(flow.state_key(anonymous).map(|k| k.name()), Some("2"));
        assert_eq!(flow.state_id(flow.state_key(anonymous).unwrap().clone()), Some(anonymous));
    }

    #[test]
    fn expressions_share_the_flow_cache() {
        let mut b = FlowBuilder::new();
        b.add_transition("a", "b", Speaker::User, "yes", TransitionSettings::default()).unwrap();
        b.add_transition("c", "d", Speaker::User, "yes", TransitionSettings::default()).unwrap();
        let flow = b.build().unwrap();
        assert_eq!(flow.parse_cache().len(), 1);
        assert_eq!(flow.precache(Grammar::Generation, ["ok", "fine"]).unwrap(), 2);
        assert_eq!(flow.parse_cache().len(), 3);
    }
}
