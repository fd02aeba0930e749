//! Current-best fix arbitration between competing providers.
//!
//! Fixes from a coarse and a precise provider interleave. The arbiter keeps
//! one "current best" and only replaces it when the newcomer is clearly
//! fresher or at least as trustworthy.

use crate::types::Fix;

/// A candidate this much newer wins outright; this much older loses outright.
pub const SIGNIFICANT_TIME_DIFFERENCE_MS: i64 = 60_000;

/// Largest accuracy loss a newer fix from the same provider may bring.
pub const SIGNIFICANTLY_LESS_ACCURATE_M: f64 = 200.0;

/// Whether `candidate` should replace `current_best`.
pub fn is_better_fix(candidate: &Fix, current_best: Option<&Fix>) -> bool {
    let Some(best) = current_best else {
        return true;
    };

    let time_delta = candidate.time - best.time;
    if time_delta > SIGNIFICANT_TIME_DIFFERENCE_MS {
        return true;
    }
    if time_delta < -SIGNIFICANT_TIME_DIFFERENCE_MS {
        return false;
    }
    let is_newer = time_delta > 0;

    // Positive when the candidate is less accurate.
    let accuracy_delta = candidate.accuracy - best.accuracy;
    if accuracy_delta < 0.0 {
        return true;
    }
    if is_newer && accuracy_delta <= 0.0 {
        return true;
    }
    is_newer
        && accuracy_delta <= SIGNIFICANTLY_LESS_ACCURATE_M
        && candidate.provider == best.provider
}

/// Pick the better of `candidate` and `current_best`.
pub fn pick_best<'a>(candidate: &'a Fix, current_best: Option<&'a Fix>) -> &'a Fix {
    match current_best {
        Some(best) if !is_better_fix(candidate, Some(best)) => best,
        _ => candidate,
    }
}

/// Holder of the current best fix.
#[derive(Debug, Clone, Default)]
pub struct LocationArbiter {
    current_best: Option<Fix>,
}

impl LocationArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously persisted best fix.
    pub fn with_current_best(current_best: Option<Fix>) -> Self {
        Self { current_best }
    }

    pub fn current_best(&self) -> Option<&Fix> {
        self.current_best.as_ref()
    }

    /// Offer a fix. Returns true if it became the current best.
    pub fn offer(&mut self, candidate: &Fix) -> bool {
        if is_better_fix(candidate, self.current_best.as_ref()) {
            self.current_best = Some(candidate.clone());
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.current_best = None;
    }
}
