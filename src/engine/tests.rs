use super::*;
use crate::api::{Options, StepKind};
use crate::error::{SessionError, TurnError};
use crate::{Bindings, Speaker};
use std::sync::Arc;

enum Turn {
    /// User utterance.
    User(&'static str),
    /// Expected system output.
    System(&'static str),
}

fn sys(builder: &mut FlowBuilder, source: &str, target: &str, expr: &str) {
    builder.add_transition(source, target, Speaker::System, expr, TransitionSettings::default()).unwrap();
}

fn user(builder: &mut FlowBuilder, source: &str, target: &str, expr: &str) {
    builder.add_transition(source, target, Speaker::User, expr, TransitionSettings::default()).unwrap();
}

fn welcome_flow() -> Flow {
    let mut b = FlowBuilder::new();
    user(&mut b, "A", "B", "start");
    sys(&mut b, "B", "C", "welcome");
    b.set_error_successor("A", "A").unwrap();
    b.set_initial("A").unwrap();
    b.set_initial_speaker(Speaker::User);
    b.build().unwrap()
}

fn help_flow() -> Flow {
    let mut b = FlowBuilder::new();
    user(&mut b, "idle", "chat", "hello");
    sys(&mut b, "chat", "idle", "hi there");
    b.add_update_rule("help", Some("Here is help"), false, 5.0).unwrap();
    b.set_initial("idle").unwrap();
    b.set_initial_speaker(Speaker::User);
    b.build().unwrap()
}

fn greeting_flow() -> Flow {
    let mut b = FlowBuilder::new();
    sys(&mut b, "start", "ask", "what is your name?");
    user(&mut b, "ask", "greet", "[!{i am, my name is}?, $name=/\\w+/]");
    sys(&mut b, "greet", "start", "nice to meet you $name.");
    b.build().unwrap()
}

fn multi_hop_flow() -> Flow {
    let mut b = FlowBuilder::new();
    let hop = StateSettings { system_multi_hop: true, ..StateSettings::default() };
    b.add_state("start", StateSettings::default()).unwrap();
    b.add_state("middle", hop).unwrap();
    sys(&mut b, "start", "middle", "hello.");
    sys(&mut b, "middle", "end", "how are you?");
    b.build().unwrap()
}

fn switch_flow() -> Flow {
    let mut b = FlowBuilder::new();
    let hop = StateSettings { system_multi_hop: true, switch: true, ..StateSettings::default() };
    b.add_state("start", StateSettings::default()).unwrap();
    b.add_state("middle", hop).unwrap();
    sys(&mut b, "start", "middle", "hello.");
    sys(&mut b, "middle", "end", "how are you?");
    b.build().unwrap()
}

fn user_multi_hop_flow() -> Flow {
    let mut b = FlowBuilder::new();
    b.add_state("ask", StateSettings::default()).unwrap();
    b.add_state("agreed", StateSettings { user_multi_hop: true, ..StateSettings::default() }).unwrap();
    user(&mut b, "ask", "agreed", "[yes]");
    user(&mut b, "agreed", "polite", "[please]");
    sys(&mut b, "polite", "ask", "how kind");
    sys(&mut b, "agreed", "ask", "noted");
    b.set_initial("ask").unwrap();
    b.set_initial_speaker(Speaker::User);
    b.build().unwrap()
}

fn rule_in_system_only_state_flow() -> Flow {
    let mut b = FlowBuilder::new();
    user(&mut b, "A", "B", "[start]");
    sys(&mut b, "B", "C", "welcome");
    user(&mut b, "C", "A", "/.*/");
    b.add_update_rule("[help]", Some("Here is help"), false, 5.0).unwrap();
    b.set_initial("A").unwrap();
    b.set_initial_speaker(Speaker::User);
    b.build().unwrap()
}

fn redirect_flow() -> Flow {
    let mut b = FlowBuilder::new();
    b.state("elsewhere");
    sys(&mut b, "start", "nowhere", "#TARGET(elsewhere) going");
    b.set_initial("start").unwrap();
    b.build().unwrap()
}

fn fallback_flow() -> Flow {
    let mut b = FlowBuilder::new();
    sys(&mut b, "start", "next", "hello $missing");
    sys(&mut b, "recover", "start", "sorry about that");
    b.set_fallback("recover").unwrap();
    b.set_initial("start").unwrap();
    b.build().unwrap()
}

fn error_successor_flow() -> Flow {
    let mut b = FlowBuilder::new();
    user(&mut b, "ask", "done", "{yes, no}");
    sys(&mut b, "clarify", "ask", "please say yes or no");
    sys(&mut b, "done", "ask", "thanks");
    b.set_error_successor("ask", "clarify").unwrap();
    b.set_initial("ask").unwrap();
    b.set_initial_speaker(Speaker::User);
    b.build().unwrap()
}

fn enter_guard_flow() -> Flow {
    let mut b = FlowBuilder::new();
    b.add_transition("start", "vip", Speaker::System, "welcome back", TransitionSettings::scored(2.0)).unwrap();
    sys(&mut b, "start", "lobby", "please wait");
    b.set_enter_guard("vip", "$ticket").unwrap();
    b.build().unwrap()
}

fn gated_flow() -> Flow {
    let mut b = FlowBuilder::new();
    b.add_transition("hub", "told", Speaker::System, "a joke", TransitionSettings::scored(2.0).gated(["topic"]))
        .unwrap();
    sys(&mut b, "hub", "told", "nothing more");
    user(&mut b, "told", "hub", "/.*/");
    b.build().unwrap()
}

#[test]
fn dialogue_scenarios() {
    // (name, flow, turns, final state)
    let cases: Vec<(&str, fn() -> Flow, Vec<Turn>, &str)> = vec![
        ("welcome", welcome_flow, vec![Turn::User("start"), Turn::System("welcome")], "C"),
        ("update rule answers", help_flow, vec![Turn::User("help"), Turn::System("Here is help")], "idle"),
        ("graph beats idle rule", help_flow, vec![Turn::User("hello"), Turn::System("hi there")], "idle"),
        (
            "capture and reuse",
            greeting_flow,
            vec![Turn::System("what is your name?"), Turn::User("I am Grace"), Turn::System("nice to meet you grace.")],
            "start",
        ),
        ("multi-hop output is joined", multi_hop_flow, vec![Turn::System("hello. how are you?")], "end"),
        ("switch overrides multi-hop", switch_flow, vec![Turn::System("hello.")], "middle"),
        ("user multi-hop", user_multi_hop_flow, vec![Turn::User("yes please"), Turn::System("how kind")], "ask"),
        ("user multi-hop stops short", user_multi_hop_flow, vec![Turn::User("yes"), Turn::System("noted")], "ask"),
        (
            "rule answer in a system-only state",
            rule_in_system_only_state_flow,
            vec![Turn::User("start, help"), Turn::System("Here is help welcome"), Turn::User("ok")],
            "A",
        ),
        ("target redirect", redirect_flow, vec![Turn::System("going")], "elsewhere"),
        ("system fallback", fallback_flow, vec![Turn::System("sorry about that")], "start"),
        (
            "user error successor",
            error_successor_flow,
            vec![Turn::User("banana"), Turn::System("please say yes or no"), Turn::User("yes"), Turn::System("thanks")],
            "ask",
        ),
        ("failed enter guard", enter_guard_flow, vec![Turn::System("please wait")], "lobby"),
        (
            "gate closes after firing",
            gated_flow,
            vec![Turn::System("a joke"), Turn::User("ok"), Turn::System("nothing more")],
            "told",
        ),
    ];

    for (name, flow, turns, end_state) in cases {
        let mut dialogue = Dialogue::with_seed(Arc::new(flow()), 42);
        for turn in turns {
            match turn {
                Turn::User(utterance) => dialogue
                    .user_turn(utterance)
                    .unwrap_or_else(|err| panic!("{name}: user turn {utterance:?} failed: {err}")),
                Turn::System(expected) => {
                    let output =
                        dialogue.system_turn().unwrap_or_else(|err| panic!("{name}: system turn failed: {err}"));
                    assert_eq!(output, expected, "{name}");
                }
            }
        }
        assert_eq!(dialogue.state().to_string(), end_state, "{name}");
    }
}

#[test]
fn update_rule_fires_once_per_pass() {
    let mut dialogue = Dialogue::with_seed(Arc::new(help_flow()), 1);
    let report = dialogue.user_turn_verbose("help").unwrap();
    assert_eq!(report.rules_fired, vec!["help".to_string()]);
    assert_eq!(report.steps.last().map(|s| s.kind), Some(StepKind::Stay));

    let report = dialogue.system_turn_verbose().unwrap();
    assert_eq!(report.output, "Here is help");
    assert_eq!(report.steps[0].kind, StepKind::UpdateRule);

    // A new pass may fire it again; the previous answer was consumed.
    let report = dialogue.user_turn_verbose("help").unwrap();
    assert_eq!(report.rules_fired.len(), 1);
    assert_eq!(dialogue.system_turn().unwrap(), "Here is help");
}

#[test]
fn rule_answer_keeps_the_floor_without_user_edges() {
    let mut dialogue = Dialogue::with_seed(Arc::new(rule_in_system_only_state_flow()), 4);
    dialogue.user_turn("start, help").unwrap();
    assert_eq!(dialogue.state().to_string(), "B");

    let report = dialogue.system_turn_verbose().unwrap();
    let kinds: Vec<StepKind> = report.steps.iter().map(|s| s.kind).collect();
    assert_eq!(kinds, [StepKind::UpdateRule, StepKind::Transition]);
    assert_eq!(report.steps[0].target, "B");
    assert_eq!(report.end_state, "C");
    assert_eq!(dialogue.speaker(), Speaker::User);
}

#[test]
fn user_multi_hop_consumes_one_utterance() {
    let mut dialogue = Dialogue::with_seed(Arc::new(user_multi_hop_flow()), 0);
    let report = dialogue.user_turn_verbose("yes please").unwrap();
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.end_state, "polite");
    assert_eq!(dialogue.speaker(), Speaker::System);
}

#[test]
fn longest_turn_stays_within_the_state_count() {
    // A rule answer, then a hop through every other state, then a revisit.
    let mut b = FlowBuilder::new();
    let hop = StateSettings { system_multi_hop: true, ..StateSettings::default() };
    for name in ["a", "b", "c"] {
        b.add_state(name, hop).unwrap();
    }
    sys(&mut b, "a", "b", "b");
    sys(&mut b, "b", "c", "c");
    sys(&mut b, "c", "a", "a");
    b.add_update_rule("help", Some("sure"), false, 5.0).unwrap();
    b.set_initial("a").unwrap();
    b.set_initial_speaker(Speaker::User);
    let flow = Arc::new(b.build().unwrap());

    let mut dialogue = Dialogue::with_seed(Arc::clone(&flow), 0);
    dialogue.user_turn("help").unwrap();
    let report = dialogue.system_turn_verbose().unwrap();
    assert_eq!(report.output, "sure b c a");
    assert_eq!(report.steps.len(), flow.state_count() + 1);
    assert_eq!(dialogue.speaker(), Speaker::User);
}

#[test]
fn cyclic_multi_hop_turn_is_bounded() {
    let mut b = FlowBuilder::new();
    let hop = StateSettings { system_multi_hop: true, ..StateSettings::default() };
    for name in ["a", "b", "c"] {
        b.add_state(name, hop).unwrap();
    }
    sys(&mut b, "a", "b", "b");
    sys(&mut b, "b", "c", "c");
    sys(&mut b, "c", "a", "a");
    let flow = Arc::new(b.build().unwrap());

    let mut dialogue = Dialogue::with_seed(flow, 3);
    let report = dialogue.system_turn_verbose().unwrap();
    assert_eq!(report.output, "b c a");
    assert!(report.steps.len() <= 4);
    assert_eq!(dialogue.state().to_string(), "a");
    assert_eq!(dialogue.speaker(), Speaker::User);
}

#[test]
fn gate_excludes_same_configuration_until_reset() {
    let flow = Arc::new(gated_flow());
    let mut dialogue = Dialogue::with_seed(Arc::clone(&flow), 5);
    assert_eq!(dialogue.system_turn().unwrap(), "a joke");
    assert_eq!(dialogue.gates().len(), 1);
    dialogue.user_turn("ok").unwrap();

    let report = dialogue.system_turn_verbose().unwrap();
    assert_eq!(report.output, "nothing more");
    let outcomes: Vec<_> = report.steps[0].candidates.iter().map(|c| c.outcome.clone()).collect();
    assert!(outcomes.contains(&crate::api::CandidateOutcome::Gated));

    dialogue.reset();
    assert!(dialogue.gates().is_empty());
    assert_eq!(dialogue.system_turn().unwrap(), "a joke");
}

#[test]
fn gate_reopens_for_a_new_configuration() {
    let mut b = FlowBuilder::new();
    let gated = TransitionSettings::scored(2.0).gated(["topic"]);
    b.add_transition("hub", "told", Speaker::System, "a joke about $topic", gated).unwrap();
    sys(&mut b, "hub", "told", "nothing more");
    user(&mut b, "told", "hub", "[$topic={cats, dogs}]");
    b.set_initial("told").unwrap();
    b.set_initial_speaker(Speaker::User);
    let mut dialogue = Dialogue::with_seed(Arc::new(b.build().unwrap()), 9);

    dialogue.user_turn("cats").unwrap();
    assert_eq!(dialogue.system_turn().unwrap(), "a joke about cats");
    dialogue.user_turn("cats").unwrap();
    assert_eq!(dialogue.system_turn().unwrap(), "nothing more");
    dialogue.user_turn("dogs").unwrap();
    assert_eq!(dialogue.system_turn().unwrap(), "a joke about dogs");
}

#[test]
fn failed_turns_leave_the_session_untouched() {
    let mut b = FlowBuilder::new();
    user(&mut b, "ask", "done", "[$answer={yes, no}]");
    b.set_initial_speaker(Speaker::User);
    let mut dialogue = Dialogue::with_seed(Arc::new(b.build().unwrap()), 0);

    assert_eq!(
        dialogue.system_turn(),
        Err(TurnError::WrongSpeaker { expected: Speaker::System, actual: Speaker::User })
    );

    let before = dialogue.snapshot();
    let err = dialogue.user_turn("maybe").unwrap_err();
    assert_eq!(err, TurnError::NoViableTransition { state: "ask".into(), speaker: Speaker::User });
    assert_eq!(dialogue.snapshot(), before);

    dialogue.user_turn("yes").unwrap();
    assert_eq!(dialogue.vars().get("answer").map(String::as_str), Some("yes"));
    assert_eq!(dialogue.speaker(), Speaker::System);
}

#[test]
fn system_turn_without_candidates_fails() {
    let mut b = FlowBuilder::new();
    sys(&mut b, "start", "next", "hello $missing");
    let mut dialogue = Dialogue::with_seed(Arc::new(b.build().unwrap()), 0);
    assert_eq!(
        dialogue.system_turn(),
        Err(TurnError::NoViableTransition { state: "start".into(), speaker: Speaker::System })
    );
    assert_eq!(dialogue.state().to_string(), "start");
    assert_eq!(dialogue.speaker(), Speaker::System);
}

#[test]
fn rule_non_convergence_is_reported_and_rolled_back() {
    let mut b = FlowBuilder::new();
    b.options(Options { max_rule_iterations: 2, ..Options::default() });
    for flag in ["$a=/\\w+/", "$b=/\\w+/", "$c=/\\w+/"] {
        b.add_update_rule(flag, None, false, 1.0).unwrap();
    }
    user(&mut b, "idle", "idle", "/.*/");
    b.set_initial_speaker(Speaker::User);
    let mut dialogue = Dialogue::with_seed(Arc::new(b.build().unwrap()), 0);

    let err = dialogue.user_turn("word").unwrap_err();
    assert!(matches!(err, TurnError::RuleEngineNonConvergence { iterations: 2, .. }), "{err:?}");
    assert!(dialogue.vars().is_empty());
    assert_eq!(dialogue.speaker(), Speaker::User);
}

#[test]
fn verbose_reports_count_candidates() {
    let mut dialogue = Dialogue::with_seed(Arc::new(enter_guard_flow()), 0);
    let report = dialogue.system_turn_verbose().unwrap();
    assert_eq!(report.start_state, "start");
    assert_eq!(report.end_state, "lobby");
    assert_eq!(report.metrics.steps, 1);
    assert_eq!(report.metrics.candidates_evaluated, 2);
    assert_eq!(report.metrics.candidates_viable, 1);
    let step = &report.steps[0];
    assert_eq!(step.kind, StepKind::Transition);
    let chosen = step.chosen.unwrap();
    assert_eq!(step.candidates[chosen].target, "lobby");
}

#[test]
fn seeded_sessions_are_reproducible() {
    let mut b = FlowBuilder::new();
    sys(&mut b, "start", "end", "{one, two, three, four, five}");
    sys(&mut b, "start", "end", "{six, seven, eight, nine, ten}");
    let flow = Arc::new(b.build().unwrap());

    let run = |seed| {
        let mut dialogue = Dialogue::with_seed(Arc::clone(&flow), seed);
        dialogue.system_turn().unwrap()
    };
    assert_eq!(run(17), run(17));
}

#[test]
fn snapshots_round_trip_through_json() {
    let flow = Arc::new(greeting_flow());
    let mut dialogue = Dialogue::with_seed(Arc::clone(&flow), 2);
    dialogue.system_turn().unwrap();
    dialogue.user_turn("my name is Ada").unwrap();

    let json = dialogue.snapshot().to_json().unwrap();
    let snapshot = SessionSnapshot::from_json(&json).unwrap();
    assert_eq!(snapshot.state, "greet");
    assert_eq!(snapshot.speaker, Speaker::System);

    let mut restored = Dialogue::with_seed(flow, 2);
    restored.restore(&snapshot).unwrap();
    assert_eq!(restored.vars(), dialogue.vars());
    assert_eq!(restored.system_turn().unwrap(), "nice to meet you ada.");
}

#[test]
fn restore_rejects_unknown_states() {
    let flow = Arc::new(gated_flow());
    let mut dialogue = Dialogue::with_seed(Arc::clone(&flow), 0);
    dialogue.system_turn().unwrap();
    let mut snapshot = dialogue.snapshot();
    assert_eq!(snapshot.gates.len(), 1);
    assert_eq!(snapshot.gates[0].target, "told");

    snapshot.state = "nowhere".into();
    let before = dialogue.snapshot();
    assert!(matches!(dialogue.restore(&snapshot), Err(SessionError::UnknownState(name)) if name == "nowhere"));
    assert_eq!(dialogue.snapshot(), before);

    let mut fresh = Dialogue::with_seed(flow, 0);
    fresh.restore(&before).unwrap();
    assert_eq!(fresh.gates().len(), 1);
    assert_eq!(fresh.vars(), &Bindings::new());
}
