//! Turn engine.
//!
//! A [`Dialogue`] is one session over a shared [`Flow`]. It owns the mutable
//! half of the conversation (current state, floor holder, bindings, gate
//! table, a pending update-rule answer and the random source) and advances it
//! one logical turn at a time.
//!
//! ## Step loop
//!
//! ```text
//! step:  outgoing edges of (state, speaker)
//!          (+ pending rule answer, first system step only)
//!        ──> evaluate: match (user) / generate (system)
//!        ──> drop: no match / unresolved, #TARGET to unknown state,
//!                  failed enter guard, closed gate
//!        ──> pick max score, ties at random
//!        ──> commit bindings + gate (+ text)
//!        ──> hand over the floor if the target was already visited this
//!            turn, is not multi-hop for this speaker, or has `switch` set;
//!            otherwise step again
//! ```
//!
//! A committed rule answer keeps the state. The floor goes to the user only
//! if the state has user edges; otherwise the system steps on from it.
//!
//! Each logical turn runs on a copy of the session; the copy replaces the
//! session only when the turn succeeds, so a failed turn changes nothing.

use super::flow::Flow;
use super::gate::{GateKey, GateTable};
use super::graph::{EdgeExpr, StateId, StateKey, TransitionSettings};
use super::rules::RuleCandidate;
use super::session::SessionSnapshot;
use crate::api::{CandidateOutcome, CandidateTrace, StepKind, StepTrace, TurnReport};
use crate::error::{SessionError, TurnError};
use crate::macro_registry::{GATE_KEY, TARGET_KEY};
use crate::ngrams::NgramContext;
use crate::selector::argmax_random;
use crate::{Bindings, Speaker};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// One dialogue session.
pub struct Dialogue {
    flow: Arc<Flow>,
    state: StateId,
    speaker: Speaker,
    vars: Bindings,
    gates: GateTable,
    pending: Option<RuleCandidate>,
    rng: Box<dyn RngCore + Send>,
}

impl fmt::Debug for Dialogue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialogue")
            .field("state", self.state())
            .field("speaker", &self.speaker)
            .field("vars", &self.vars)
            .field("gates", &self.gates.len())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// The parts of a session a turn may change.
#[derive(Debug, Clone)]
struct Working {
    state: StateId,
    speaker: Speaker,
    vars: Bindings,
    gates: GateTable,
    pending: Option<RuleCandidate>,
}

/// A viable option for one step.
#[derive(Debug, Clone)]
struct Candidate {
    target: StateId,
    score: f64,
    text: String,
    vars: Bindings,
    gate: Option<GateKey>,
    from_rule: bool,
    /// Index into the step's candidate traces.
    trace: usize,
}

impl Dialogue {
    /// A session seeded from `Options::seed`, or from entropy when unset.
    pub fn new(flow: Arc<Flow>) -> Self {
        let rng = match flow.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(flow, rng)
    }

    pub fn with_seed(flow: Arc<Flow>, seed: u64) -> Self {
        Self::with_rng(flow, StdRng::seed_from_u64(seed))
    }

    /// A session drawing from an injected random source.
    pub fn with_rng<R>(flow: Arc<Flow>, rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        Dialogue {
            state: flow.initial,
            speaker: flow.initial_speaker,
            vars: Bindings::new(),
            gates: GateTable::new(),
            pending: None,
            rng: Box::new(rng),
            flow,
        }
    }

    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    pub fn state(&self) -> &StateKey {
        self.flow.graph.key(self.state)
    }

    pub fn state_id(&self) -> StateId {
        self.state
    }

    /// Who holds the floor.
    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn vars(&self) -> &Bindings {
        &self.vars
    }

    pub fn gates(&self) -> &GateTable {
        &self.gates
    }

    /// Back to the initial state with no bindings and every gate open.
    pub fn reset(&mut self) {
        self.state = self.flow.initial;
        self.speaker = self.flow.initial_speaker;
        self.vars.clear();
        self.gates.clear();
        self.pending = None;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(&self.flow, self.state, self.speaker, &self.vars, &self.gates)
    }

    /// Replace the session state; on error the session is unchanged.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        let (state, gates) = snapshot.resolve(&self.flow)?;
        self.state = state;
        self.speaker = snapshot.speaker;
        self.vars = snapshot.vars.clone();
        self.gates = gates;
        self.pending = None;
        Ok(())
    }

    /// Run the system side until it yields the floor; returns its output.
    pub fn system_turn(&mut self) -> Result<String, TurnError> {
        Ok(self.turn(Speaker::System, None)?.output)
    }

    /// [`system_turn`](Self::system_turn) with a full step trace.
    pub fn system_turn_verbose(&mut self) -> Result<TurnReport, TurnError> {
        self.turn(Speaker::System, None)
    }

    /// Run the update rules, then the user side until it yields the floor.
    pub fn user_turn(&mut self, utterance: &str) -> Result<(), TurnError> {
        self.turn(Speaker::User, Some(utterance)).map(|_| ())
    }

    /// [`user_turn`](Self::user_turn) with a full step trace.
    pub fn user_turn_verbose(&mut self, utterance: &str) -> Result<TurnReport, TurnError> {
        self.turn(Speaker::User, Some(utterance))
    }

    fn turn(&mut self, speaker: Speaker, utterance: Option<&str>) -> Result<TurnReport, TurnError> {
        let started = Instant::now();
        if self.speaker != speaker {
            return Err(TurnError::WrongSpeaker { expected: speaker, actual: self.speaker });
        }

        let flow = Arc::clone(&self.flow);
        let mut work = Working {
            state: self.state,
            speaker: self.speaker,
            vars: self.vars.clone(),
            gates: self.gates.clone(),
            pending: self.pending.clone(),
        };
        let mut report = TurnReport {
            speaker,
            utterance: utterance.map(str::to_string),
            output: String::new(),
            start_state: flow.graph.key(work.state).to_string(),
            end_state: String::new(),
            rules_fired: Vec::new(),
            steps: Vec::new(),
            metrics: Default::default(),
        };

        let ngrams = match utterance {
            Some(text) => NgramContext::with_max_n(text, flow.options.ngram_max),
            None => NgramContext::empty(),
        };

        if speaker == Speaker::User {
            let rules_started = Instant::now();
            let outcome = flow.rules.run(&ngrams, &work.vars, &flow.macros, &flow.options).inspect_err(|err| {
                tracing::warn!(target: "parlance::engine", state = %report.start_state, error = %err, "update rules failed");
            })?;
            report.metrics.rules = rules_started.elapsed();
            report.metrics.rule_evaluations = outcome.evaluations;
            report.rules_fired = outcome.fired;
            work.vars = outcome.vars;
            work.pending = outcome.candidate;
        }

        let outputs = self.steps(&flow, &mut work, speaker, &ngrams, &mut report).inspect_err(|err| {
            tracing::warn!(target: "parlance::engine", %speaker, error = %err, "turn failed, session unchanged");
        })?;

        report.output = outputs.join(&flow.options.output_separator);
        report.end_state = flow.graph.key(work.state).to_string();
        report.metrics.total = started.elapsed();

        self.state = work.state;
        self.speaker = work.speaker;
        self.vars = work.vars;
        self.gates = work.gates;
        self.pending = work.pending;

        tracing::debug!(
            target: "parlance::engine",
            %speaker,
            from = %report.start_state,
            to = %report.end_state,
            steps = report.steps.len(),
            "turn committed"
        );
        Ok(report)
    }

    fn steps(
        &mut self,
        flow: &Flow,
        work: &mut Working,
        speaker: Speaker,
        ngrams: &NgramContext,
        report: &mut TurnReport,
    ) -> Result<Vec<String>, TurnError> {
        let mut outputs = Vec::new();
        let mut visited: HashSet<StateId> = HashSet::from([work.state]);
        let mut first = true;
        let mut retried = false;

        loop {
            // Every step but the last either enters an unvisited state or is the
            // single rule or fallback step of the first hop.
            let step = report.steps.len() + 1;
            debug_assert!(step <= flow.graph.len() + 1, "turn overran the visited-set bound");
            report.metrics.steps = step;

            let include_rule = speaker == Speaker::System && first;
            let (mut candidates, traces) = self.collect(flow, work, speaker, ngrams, include_rule);
            if include_rule {
                work.pending = None;
            }
            report.metrics.candidates_evaluated += traces.len();
            report.metrics.candidates_viable += candidates.len();

            let scores: Vec<f64> = candidates.iter().map(|c| c.score).collect();
            let state_name = flow.graph.key(work.state).to_string();
            let trace = |kind: StepKind, chosen: Option<usize>, target: StateId| StepTrace {
                step,
                state: state_name.clone(),
                kind,
                candidates: traces.clone(),
                chosen,
                target: flow.graph.key(target).to_string(),
            };

            let Some(idx) = argmax_random(&scores, &mut *self.rng) else {
                if !first {
                    report.steps.push(trace(StepKind::End, None, work.state));
                    work.speaker = speaker.other();
                    return Ok(outputs);
                }
                match speaker {
                    Speaker::User => {
                        if let Some(successor) = flow.graph.node(work.state).error_successor {
                            report.steps.push(trace(StepKind::ErrorSuccessor, None, successor));
                            work.state = successor;
                        } else if work.pending.is_some() {
                            report.steps.push(trace(StepKind::Stay, None, work.state));
                        } else {
                            return Err(TurnError::NoViableTransition { state: state_name, speaker });
                        }
                        work.speaker = Speaker::System;
                        return Ok(outputs);
                    }
                    Speaker::System => match flow.fallback.filter(|&fb| !retried && fb != work.state) {
                        Some(fallback) => {
                            tracing::debug!(target: "parlance::engine", from = %state_name, "retrying from fallback state");
                            report.steps.push(trace(StepKind::Fallback, None, fallback));
                            retried = true;
                            visited.insert(fallback);
                            work.state = fallback;
                            continue;
                        }
                        None => return Err(TurnError::NoViableTransition { state: state_name, speaker }),
                    },
                }
            };

            let chosen = candidates.swap_remove(idx);
            tracing::debug!(
                target: "parlance::engine",
                %speaker,
                from = %state_name,
                to = %flow.graph.key(chosen.target),
                score = chosen.score,
                rule = chosen.from_rule,
                "transition"
            );
            work.vars = chosen.vars;
            if let Some(key) = chosen.gate {
                work.gates.record(key);
            }
            if !chosen.text.is_empty() {
                outputs.push(chosen.text);
            }

            if chosen.from_rule {
                report.steps.push(trace(StepKind::UpdateRule, Some(chosen.trace), work.state));
                // A state the user cannot leave would strand the session, so the
                // system keeps going from it instead.
                if flow.graph.outgoing(work.state, Speaker::User).next().is_some() {
                    work.speaker = Speaker::User;
                    return Ok(outputs);
                }
                first = false;
                continue;
            }

            let target = chosen.target;
            let settings = flow.graph.node(target).settings;
            let revisit = !visited.insert(target);
            report.steps.push(trace(StepKind::Transition, Some(chosen.trace), target));
            work.state = target;
            if revisit || !settings.multi_hop(speaker) || settings.switch {
                work.speaker = speaker.other();
                return Ok(outputs);
            }
            first = false;
        }
    }

    /// Evaluate every option for one step.
    fn collect(
        &mut self,
        flow: &Flow,
        work: &Working,
        speaker: Speaker,
        ngrams: &NgramContext,
        include_rule: bool,
    ) -> (Vec<Candidate>, Vec<CandidateTrace>) {
        let mut candidates = Vec::new();
        let mut traces = Vec::new();

        for t in flow.graph.outgoing(work.state, speaker) {
            let evaluated = match &t.expr {
                EdgeExpr::Matching(expr) => {
                    expr.matches(ngrams, &work.vars, &flow.macros, &flow.options).map(|vars| (String::new(), vars))
                }
                EdgeExpr::Generation(expr) => {
                    expr.generate(&work.vars, &flow.macros, &mut *self.rng).map(|g| (g.text, g.vars))
                }
            };
            let mut record = |target: StateId, outcome: CandidateOutcome| {
                traces.push(CandidateTrace {
                    source: t.expr.source().to_string(),
                    target: flow.graph.key(target).to_string(),
                    score: t.settings.score,
                    outcome,
                });
                traces.len() - 1
            };

            let Some((text, vars)) = evaluated else {
                let miss = if speaker == Speaker::User { CandidateOutcome::NoMatch } else { CandidateOutcome::Unresolved };
                record(t.target, miss);
                continue;
            };
            match self.admit(flow, work, t.target, &t.settings, vars) {
                Ok((target, vars, gate)) => {
                    let trace = record(target, CandidateOutcome::Viable);
                    candidates.push(Candidate {
                        target,
                        score: t.settings.score,
                        text,
                        vars,
                        gate,
                        from_rule: false,
                        trace,
                    });
                }
                Err(outcome) => {
                    tracing::trace!(target: "parlance::engine", expr = t.expr.source(), ?outcome, "candidate dropped");
                    record(t.target, outcome);
                }
            }
        }

        if let Some(pending) = work.pending.as_ref().filter(|_| include_rule) {
            let rule = flow.rules.get(pending.rule);
            let mut vars = work.vars.clone();
            vars.extend(pending.delta.clone());
            let generated = rule.postcondition.as_ref().and_then(|post| post.generate(&vars, &flow.macros, &mut *self.rng));
            let outcome = if generated.is_some() { CandidateOutcome::Viable } else { CandidateOutcome::Unresolved };
            traces.push(CandidateTrace {
                source: rule.name().to_string(),
                target: flow.graph.key(work.state).to_string(),
                score: pending.score,
                outcome,
            });
            if let Some(generated) = generated {
                let mut vars = generated.vars;
                vars.remove(GATE_KEY);
                vars.remove(TARGET_KEY);
                candidates.push(Candidate {
                    target: work.state,
                    score: pending.score,
                    text: generated.text,
                    vars,
                    gate: None,
                    from_rule: true,
                    trace: traces.len() - 1,
                });
            }
        }

        (candidates, traces)
    }

    /// Apply redirects, the target's enter guard and the gate check to an
    /// evaluated edge.
    fn admit(
        &mut self,
        flow: &Flow,
        work: &Working,
        target: StateId,
        settings: &TransitionSettings,
        mut vars: Bindings,
    ) -> Result<(StateId, Bindings, Option<GateKey>), CandidateOutcome> {
        let mut target = target;
        if let Some(redirect) = vars.remove(TARGET_KEY) {
            target = flow
                .graph
                .lookup(&StateKey::from(redirect.as_str()))
                .ok_or_else(|| CandidateOutcome::UnknownTarget(redirect.clone()))?;
        }

        if let Some(guard) = &flow.graph.node(target).enter {
            match guard.generate(&vars, &flow.macros, &mut *self.rng) {
                Some(generated) => vars = generated.vars,
                None => return Err(CandidateOutcome::EnterGuard),
            }
        }

        let mut names: Vec<String> = settings.gate.clone().unwrap_or_default();
        if let Some(requested) = vars.remove(GATE_KEY) {
            names.extend(requested.split(',').filter(|name| !name.is_empty()).map(str::to_string));
        }
        vars.remove(TARGET_KEY);

        let gate = (!names.is_empty()).then(|| GateKey::new(target, names.iter().map(String::as_str), &vars));
        if gate.as_ref().is_some_and(|key| work.gates.is_closed(key)) {
            return Err(CandidateOutcome::Gated);
        }
        Ok((target, vars, gate))
    }
}
