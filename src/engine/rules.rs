//! Update rules: per-turn precondition/postcondition logic.
//!
//! Update rules run at the start of every user turn, before the graph is
//! consulted. They are kept in a pre-sorted order (descending score, ties in
//! registration order) so each turn only has to copy an index list:
//!
//! ```text
//! registered:  #0 help (5)   #1 $mood=... (1)   #2 bye (5)
//! order:       [#0, #2, #1]
//! ```
//!
//! A turn repeatedly scans the *untapped* rules from the top:
//!
//! ```text
//! scan ──> first rule whose precondition matches
//!            ├─ no postcondition: apply bindings, drop from untapped
//!            │    (repeating: re-apply while it keeps changing bindings)
//!            │    └─ rescan from the top
//!            └─ postcondition: drop from untapped, hand back as the
//!                 system-turn candidate, stop
//! full scan without a match ──> converged, stop
//! ```
//!
//! The scan is a fixpoint iteration, like rule saturation: applying one rule
//! can enable another. Each rule fires at most once per run, so plain rules
//! always settle; the loop that can spin is a repeating rule whose bindings
//! keep changing. Firings and repeats together are bounded by
//! `Options::max_rule_iterations`; hitting the bound is a turn error rather
//! than a hang.

use crate::api::Options;
use crate::error::TurnError;
use crate::macro_registry::MacroRegistry;
use crate::natex::{GenerationExpr, MatchingExpr};
use crate::ngrams::NgramContext;
use crate::Bindings;

/// Rule identifier (index into the registered rules).
pub(crate) type RuleId = usize;

#[derive(Debug, Clone)]
pub(crate) struct UpdateRule {
    pub(crate) precondition: MatchingExpr,
    pub(crate) postcondition: Option<GenerationExpr>,
    pub(crate) repeating: bool,
    pub(crate) score: f64,
}

impl UpdateRule {
    /// Display name: the precondition source.
    pub(crate) fn name(&self) -> &str {
        self.precondition.source()
    }
}

/// Registered rules plus their evaluation order.
#[derive(Debug, Clone, Default)]
pub(crate) struct UpdateRules {
    rules: Vec<UpdateRule>,
    order: Vec<RuleId>,
}

/// A postcondition rule that fired, waiting for the next system turn.
#[derive(Debug, Clone)]
pub(crate) struct RuleCandidate {
    pub(crate) rule: RuleId,
    pub(crate) score: f64,
    /// Bindings the precondition added or changed.
    pub(crate) delta: Bindings,
}

/// Result of one run of the rules.
#[derive(Debug, Clone, Default)]
pub(crate) struct RuleOutcome {
    /// Bindings after every applied (postcondition-less) rule.
    pub(crate) vars: Bindings,
    pub(crate) candidate: Option<RuleCandidate>,
    /// Names of rules that fired, in order.
    pub(crate) fired: Vec<String>,
    pub(crate) evaluations: usize,
    /// Firings plus repeats, the quantity `max_rule_iterations` bounds.
    pub(crate) applications: usize,
}

fn delta(before: &Bindings, after: &Bindings) -> Bindings {
    after.iter().filter(|(k, v)| before.get(*k) != Some(*v)).map(|(k, v)| (k.clone(), v.clone())).collect()
}

impl UpdateRules {
    pub(crate) fn new(rules: Vec<UpdateRule>) -> Self {
        let mut order: Vec<RuleId> = (0..rules.len()).collect();
        // Stable: equal scores keep registration order.
        order.sort_by(|&a, &b| rules[b].score.total_cmp(&rules[a].score));
        UpdateRules { rules, order }
    }

    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(crate) fn get(&self, id: RuleId) -> &UpdateRule {
        &self.rules[id]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &UpdateRule> {
        self.rules.iter()
    }

    /// Run the rules against one utterance.
    pub(crate) fn run(
        &self,
        ngrams: &NgramContext,
        vars: &Bindings,
        macros: &MacroRegistry,
        options: &Options,
    ) -> Result<RuleOutcome, TurnError> {
        let mut outcome = RuleOutcome { vars: vars.clone(), ..RuleOutcome::default() };
        let mut untapped = self.order.clone();

        let evaluate = |id: RuleId, vars: &Bindings, outcome: &mut RuleOutcome| {
            outcome.evaluations += 1;
            self.rules[id].precondition.matches(ngrams, vars, macros, options)
        };
        // Every firing and every repeat counts; a scan that fires nothing
        // ends the run, so only repeating rules can exhaust the cap.
        let apply = |rule: &UpdateRule, outcome: &mut RuleOutcome| {
            if outcome.applications >= options.max_rule_iterations {
                return Err(TurnError::RuleEngineNonConvergence {
                    iterations: outcome.applications,
                    last_rule: rule.name().to_string(),
                });
            }
            outcome.applications += 1;
            Ok(())
        };

        loop {
            let mut fired = None;
            for (pos, &id) in untapped.iter().enumerate() {
                let current = outcome.vars.clone();
                if let Some(updated) = evaluate(id, &current, &mut outcome) {
                    fired = Some((pos, id, updated));
                    break;
                }
            }

            let Some((pos, id, updated)) = fired else {
                tracing::trace!(target: "parlance::rules", evaluations = outcome.evaluations, "converged");
                return Ok(outcome);
            };
            untapped.remove(pos);
            let rule = &self.rules[id];
            apply(rule, &mut outcome)?;
            outcome.fired.push(rule.name().to_string());
            tracing::debug!(target: "parlance::rules", rule = rule.name(), score = rule.score, "rule fired");

            if rule.postcondition.is_some() {
                let candidate = RuleCandidate { rule: id, score: rule.score, delta: delta(&outcome.vars, &updated) };
                outcome.candidate = Some(candidate);
                return Ok(outcome);
            }

            outcome.vars = updated;
            if rule.repeating {
                loop {
                    let current = outcome.vars.clone();
                    match evaluate(id, &current, &mut outcome) {
                        Some(next) if next != current => {
                            apply(rule, &mut outcome)?;
                            outcome.vars = next;
                        }
                        _ => break,
                    }
                }
            }
        }
    }
}
