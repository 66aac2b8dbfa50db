//! Dialogue engine.
//!
//! The engine is split into focused submodules under `src/engine/` while
//! keeping public paths flat (for example `crate::engine::Dialogue` and
//! `crate::engine::FlowBuilder`).
//!
//! ## How the parts work together
//!
//! ```text
//! FlowBuilder ── parse every expression ──> Flow (graph.rs + rules.rs)
//!   (flow.rs)                                 │   shared via Arc
//!                                             v
//!                          Dialogue (dialogue.rs), one per session
//!                            user turn:   update rules ─> pending candidate
//!                                         user edges   ─> state
//!                            system turn: system edges + pending candidate
//!                                         ─> output text
//!                            gates (gate.rs) close fired offers
//!                                             │
//!                                             v
//!                          SessionSnapshot (session.rs) <─> JSON
//! ```
//!
//! ## Responsibilities by module
//!
//! - `graph.rs`: state ids and keys, per-state and per-transition settings,
//!   the immutable graph with speaker-keyed adjacency.
//! - `flow.rs`: `FlowBuilder`, which parses expressions up front, and the
//!   shared `Flow`.
//! - `rules.rs`: update rules, run to a fixpoint against each utterance.
//! - `gate.rs`: one-shot keys for gated transitions.
//! - `dialogue.rs`: the turn engine.
//! - `session.rs`: serializable snapshots of a session.
//! - `metrics.rs`: per-turn timing and counters.
//!
//! ## Debugging
//!
//! Turn and rule traces are emitted as `tracing` events under the
//! `parlance::engine` and `parlance::rules` targets. The verbose turn API
//! returns the same information as a [`TurnReport`](crate::TurnReport).

#[path = "engine/dialogue.rs"]
mod dialogue;
#[path = "engine/flow.rs"]
mod flow;
#[path = "engine/gate.rs"]
mod gate;
#[path = "engine/graph.rs"]
mod graph;
#[path = "engine/metrics.rs"]
mod metrics;
#[path = "engine/rules.rs"]
mod rules;
#[path = "engine/session.rs"]
mod session;

#[cfg(test)]
#[path = "engine/tests.rs"]
mod tests;

pub use dialogue::Dialogue;
pub use flow::{Flow, FlowBuilder};
pub use gate::{GateKey, GateTable};
pub use graph::{StateId, StateIdAllocator, StateKey, StateSettings, Transition, TransitionSettings};
pub use metrics::TurnMetrics;
pub use session::{GateEntry, SessionSnapshot};
