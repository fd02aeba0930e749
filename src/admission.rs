//! Admission filter: decides whether the current best fix becomes a trackpoint.
//!
//! # Checks
//!
//! Applied in order, the first failure wins:
//!
//! 1. (0, 0) coordinates
//! 2. staleness in device monotonic time
//! 3. provider-dependent accuracy ceiling
//! 4. homepoint membership
//! 5. with rests omitted and a non-empty history: identical position, then
//!    the displacement test against the most recent accepted fix
//!
//! The displacement test keeps a fix only if it moved farther than
//! `sqrt(acc1² + acc2²)` from the previous one, i.e. further than the two
//! accuracy circles can explain.

use std::collections::VecDeque;
use std::fmt;

use crate::config::{AdmissionConfig, DEFAULT_HISTORY_SIZE};
use crate::geo_utils::haversine_distance;
use crate::types::{Fix, Homepoint};

/// Why a fix was not admitted.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    ZeroCoordinates,
    Stale { age_ms: u64 },
    Inaccurate { accuracy: f64, ceiling: f64 },
    /// `index` is the homepoint's position in the snapshot that was checked
    AtHomepoint { id: i64, index: usize },
    Identical,
    NotDisplaced { distance: f64, combined_radius: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ZeroCoordinates => write!(f, "zero coordinates"),
            RejectReason::Stale { age_ms } => write!(f, "stale by {age_ms} ms"),
            RejectReason::Inaccurate { accuracy, ceiling } => {
                write!(f, "accuracy {accuracy:.1} m over {ceiling:.1} m")
            }
            RejectReason::AtHomepoint { id, .. } => write!(f, "inside homepoint {id}"),
            RejectReason::Identical => write!(f, "identical to previous fix"),
            RejectReason::NotDisplaced {
                distance,
                combined_radius,
            } => write!(
                f,
                "moved {distance:.1} m within combined radius {combined_radius:.1} m"
            ),
        }
    }
}

/// Outcome of [`AdmissionFilter::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Keep,
    Reject(RejectReason),
}

impl Admission {
    pub fn is_keep(&self) -> bool {
        matches!(self, Admission::Keep)
    }
}

// ============================================================================
// Recent History
// ============================================================================

/// Bounded window of recently accepted fixes, newest last.
#[derive(Debug, Clone)]
pub struct RecentHistory {
    fixes: VecDeque<Fix>,
    capacity: usize,
}

impl RecentHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            fixes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, fix: Fix) {
        if self.capacity == 0 {
            return;
        }
        while self.fixes.len() >= self.capacity {
            self.fixes.pop_front();
        }
        self.fixes.push_back(fix);
    }

    pub fn last(&self) -> Option<&Fix> {
        self.fixes.back()
    }

    pub fn clear(&mut self) {
        self.fixes.clear();
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fix> {
        self.fixes.iter()
    }
}

impl Default for RecentHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

// ============================================================================
// Filter
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AdmissionFilter {
    config: AdmissionConfig,
}

impl AdmissionFilter {
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Run every check against `fix`.
    ///
    /// `now_nanos` is the device monotonic clock, same base as
    /// [`Fix::elapsed_realtime_nanos`].
    pub fn evaluate(
        &self,
        fix: &Fix,
        now_nanos: u64,
        history: &RecentHistory,
        homepoints: &[Homepoint],
        omit_rests: bool,
    ) -> Admission {
        if fix.is_zero() {
            return Admission::Reject(RejectReason::ZeroCoordinates);
        }

        let age_ms = fix_age_ms(fix, now_nanos);
        if age_ms > self.config.max_fix_age_ms {
            return Admission::Reject(RejectReason::Stale { age_ms });
        }

        let ceiling = self.config.accuracy_ceiling(&fix.provider);
        if !(fix.accuracy <= ceiling) {
            return Admission::Reject(RejectReason::Inaccurate {
                accuracy: fix.accuracy,
                ceiling,
            });
        }

        if let Some(index) = homepoints.iter().position(|home| home.contains(fix)) {
            return Admission::Reject(RejectReason::AtHomepoint {
                id: homepoints[index].id,
                index,
            });
        }

        if omit_rests {
            if let Some(previous) = history.last() {
                if previous.latitude == fix.latitude && previous.longitude == fix.longitude {
                    return Admission::Reject(RejectReason::Identical);
                }
                let distance = haversine_distance(previous, fix);
                let combined = self.combined_radius(previous, fix);
                if distance <= combined {
                    return Admission::Reject(RejectReason::NotDisplaced {
                        distance,
                        combined_radius: combined,
                    });
                }
            }
        }

        Admission::Keep
    }

    /// Boolean form of [`AdmissionFilter::evaluate`].
    pub fn should_keep(
        &self,
        fix: &Fix,
        now_nanos: u64,
        history: &RecentHistory,
        homepoints: &[Homepoint],
        omit_rests: bool,
    ) -> bool {
        self.evaluate(fix, now_nanos, history, homepoints, omit_rests)
            .is_keep()
    }

    /// Displacement two fixes must exceed to count as movement.
    pub fn combined_radius(&self, a: &Fix, b: &Fix) -> f64 {
        let acc1 = self.effective_accuracy(a.accuracy);
        let acc2 = self.effective_accuracy(b.accuracy);
        (acc1 * acc1 + acc2 * acc2).sqrt() * self.config.displacement_sigma
    }

    fn effective_accuracy(&self, accuracy: f64) -> f64 {
        if accuracy.is_finite() && accuracy > 0.0 {
            accuracy
        } else {
            self.config.fallback_distance
        }
    }
}

/// Age of a fix in milliseconds. A fix stamped after `now_nanos` has age 0.
pub fn fix_age_ms(fix: &Fix, now_nanos: u64) -> u64 {
    now_nanos.saturating_sub(fix.elapsed_realtime_nanos) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::meters_to_latitude_degrees;
    use crate::source::Provider;

    const LAT: f64 = 48.2082;
    const LON: f64 = 16.3738;
    const NOW: u64 = 100_000_000_000;

    fn fix_at(lat: f64, lon: f64, accuracy: f64) -> Fix {
        Fix::new(Provider::Gps, lat, lon, accuracy, 1_700_000_000_000, NOW)
    }

    fn north_of(meters: f64, accuracy: f64) -> Fix {
        fix_at(LAT + meters_to_latitude_degrees(meters), LON, accuracy)
    }

    fn history_with(fix: Fix) -> RecentHistory {
        let mut history = RecentHistory::default();
        history.push(fix);
        history
    }

    #[test]
    fn test_zero_coordinates_rejected() {
        let filter = AdmissionFilter::default();
        let fix = fix_at(0.0, 0.0, 5.0);
        for omit_rests in [true, false] {
            assert_eq!(
                filter.evaluate(&fix, NOW, &RecentHistory::default(), &[], omit_rests),
                Admission::Reject(RejectReason::ZeroCoordinates)
            );
        }
    }

    #[test]
    fn test_empty_history_keeps() {
        let filter = AdmissionFilter::default();
        let fix = fix_at(LAT, LON, 10.0);
        assert!(filter.should_keep(&fix, NOW, &RecentHistory::default(), &[], true));
        assert!(filter.should_keep(&fix, NOW, &RecentHistory::default(), &[], false));
    }

    #[test]
    fn test_stale_fix_rejected() {
        let filter = AdmissionFilter::default();
        let fix = fix_at(LAT, LON, 10.0);
        let later = NOW + 5_001_000_000;
        assert_eq!(
            filter.evaluate(&fix, later, &RecentHistory::default(), &[], true),
            Admission::Reject(RejectReason::Stale { age_ms: 5_001 })
        );
        assert!(filter.should_keep(&fix, NOW + 5_000_000_000, &RecentHistory::default(), &[], true));
        // Clock behind the fix: age 0, not stale.
        assert!(filter.should_keep(&fix, 0, &RecentHistory::default(), &[], true));
    }

    #[test]
    fn test_accuracy_ceiling_depends_on_provider() {
        let filter = AdmissionFilter::default();
        let empty = RecentHistory::default();

        let gps = fix_at(LAT, LON, 35.0);
        assert!(matches!(
            filter.evaluate(&gps, NOW, &empty, &[], true),
            Admission::Reject(RejectReason::Inaccurate { .. })
        ));

        let mut network = fix_at(LAT, LON, 35.0);
        network.provider = Provider::Network;
        assert!(filter.should_keep(&network, NOW, &empty, &[], true));

        network.accuracy = 40.5;
        assert!(!filter.should_keep(&network, NOW, &empty, &[], true));

        let mut nan = fix_at(LAT, LON, f64::NAN);
        nan.provider = Provider::Network;
        assert!(!filter.should_keep(&nan, NOW, &empty, &[], true));
    }

    #[test]
    fn test_homepoint_rejects() {
        let filter = AdmissionFilter::default();
        let homes = vec![
            Homepoint::new(1, "work", 40.0, -3.0, 100.0).unwrap(),
            Homepoint::new(2, "home", LAT, LON, 50.0).unwrap(),
        ];
        let inside = north_of(30.0, 5.0);
        assert_eq!(
            filter.evaluate(&inside, NOW, &RecentHistory::default(), &homes, false),
            Admission::Reject(RejectReason::AtHomepoint { id: 2, index: 1 })
        );
        let outside = north_of(80.0, 5.0);
        assert!(filter.should_keep(&outside, NOW, &RecentHistory::default(), &homes, false));
    }

    #[test]
    fn test_displacement_within_combined_radius_rejected() {
        let filter = AdmissionFilter::default();
        let previous = fix_at(LAT, LON, 15.0);
        let candidate = north_of(20.0, 15.0);
        let combined = filter.combined_radius(&previous, &candidate);
        assert!((combined - 21.213).abs() < 0.01);

        let history = history_with(previous);
        match filter.evaluate(&candidate, NOW, &history, &[], true) {
            Admission::Reject(RejectReason::NotDisplaced { distance, .. }) => {
                assert!((distance - 20.0).abs() < 0.05);
            }
            other => panic!("expected NotDisplaced, got {other:?}"),
        }
        // Rest filter off: the same fix is kept.
        assert!(filter.should_keep(&candidate, NOW, &history, &[], false));
    }

    #[test]
    fn test_displacement_beyond_combined_radius_kept() {
        let filter = AdmissionFilter::default();
        let history = history_with(fix_at(LAT, LON, 15.0));
        assert!(filter.should_keep(&north_of(25.0, 15.0), NOW, &history, &[], true));
    }

    #[test]
    fn test_zero_accuracy_uses_fallback() {
        let filter = AdmissionFilter::default();
        let a = fix_at(LAT, LON, 0.0);
        let b = north_of(10.0, 0.0);
        let expected = (2.0f64 * 15.0 * 15.0).sqrt();
        assert!((filter.combined_radius(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_identical_position_rejected() {
        let filter = AdmissionFilter::default();
        let history = history_with(fix_at(LAT, LON, 3.0));
        assert_eq!(
            filter.evaluate(&fix_at(LAT, LON, 3.0), NOW, &history, &[], true),
            Admission::Reject(RejectReason::Identical)
        );
    }

    #[test]
    fn test_history_compares_against_most_recent() {
        let filter = AdmissionFilter::default();
        let mut history = RecentHistory::new(3);
        history.push(fix_at(LAT, LON, 5.0));
        history.push(north_of(100.0, 5.0));
        // 102 m from the oldest entry but only 2 m from the newest.
        assert!(!filter.should_keep(&north_of(102.0, 5.0), NOW, &history, &[], true));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = RecentHistory::new(5);
        for i in 0..8 {
            history.push(north_of(i as f64 * 100.0, 5.0));
        }
        assert_eq!(history.len(), 5);
        let newest = history.last().unwrap();
        assert!((newest.latitude - (LAT + meters_to_latitude_degrees(700.0))).abs() < 1e-12);
        history.clear();
        assert!(history.is_empty());
    }
}
