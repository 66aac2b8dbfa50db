//! Stochastic selection.
//!
//! The engine uses two of these: [`choose_uniform`] for generation
//! disjunctions and macro choice sets, [`argmax_random`] for tied transition
//! scores. [`select`] is not called by the engine; it is exported for host
//! code such as macros that need a weighted pick with a random source of
//! their own. The random source is always passed in, so a session seeded
//! with `StdRng::seed_from_u64` (or a `StepRng` in tests) replays exactly.
//!
//! Weighted picks use a cumulative ladder:
//!
//! ```text
//! weights   2.0   1.0   1.0
//! ladder   [0.5 ][0.75][1.0 ]   draw r in [0,1) -> first rung above r
//! ```

use rand::{Rng, RngCore};

/// Pick one option according to its weight. Host-facing; see the module docs.
///
/// Negative and non-finite weights count as zero. If no option has positive
/// weight, the pick is uniform. Returns `None` only for an empty slice.
pub fn select<'a, T, R>(options: &'a [(T, f64)], rng: &mut R) -> Option<&'a T>
where
    R: RngCore + ?Sized,
{
    if options.is_empty() {
        return None;
    }

    let weight = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let total: f64 = options.iter().map(|(_, w)| weight(*w)).sum();
    if total <= 0.0 || !total.is_finite() {
        return choose_uniform(options, rng).map(|(item, _)| item);
    }

    let draw = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (item, w) in options {
        let w = weight(*w);
        if w == 0.0 {
            continue;
        }
        cumulative += w / total;
        last_positive = Some(item);
        if draw < cumulative {
            return Some(item);
        }
    }
    // Rounding can leave the ladder's top rung a hair under 1.0.
    last_positive
}

/// Pick one item with equal probability.
pub fn choose_uniform<'a, T, R>(items: &'a [T], rng: &mut R) -> Option<&'a T>
where
    R: RngCore + ?Sized,
{
    if items.is_empty() {
        return None;
    }
    items.get(rng.gen_range(0..items.len()))
}

/// Index of one of the maximal scores, ties broken uniformly.
pub fn argmax_random<R>(scores: &[f64], rng: &mut R) -> Option<usize>
where
    R: RngCore + ?Sized,
{
    let best = scores.iter().copied().filter(|s| !s.is_nan()).fold(f64::NEG_INFINITY, f64::max);
    let tied: Vec<usize> = scores.iter().enumerate().filter(|(_, s)| **s == best).map(|(idx, _)| idx).collect();
    choose_uniform(&tied, rng).copied()
}
