//! Turn metrics.
//!
//! Every turn is timed and counted; the plain turn API drops the numbers and
//! the verbose API hands them back inside a [`TurnReport`](crate::TurnReport).
//!
//! ## Design notes
//!
//! - Candidate counts include candidates that were dropped (no match, failed
//!   guard, closed gate), so a high count with few viable candidates points at
//!   over-broad graphs.

use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TurnMetrics {
    /// Total elapsed time for the turn.
    pub total: Duration,
    /// Time spent in the update rules (user turns only).
    pub rules: Duration,
    /// Precondition evaluations made by the update rules.
    pub rule_evaluations: usize,
    /// Engine steps taken, including fallback retries.
    pub steps: usize,
    /// Candidates evaluated across all steps.
    pub candidates_evaluated: usize,
    /// Candidates that survived every filter.
    pub candidates_viable: usize,
}
