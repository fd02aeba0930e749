//! Tracker and admission configuration.
//!
//! Both structs deserialize from camelCase JSON with every field optional,
//! so a host can persist only what the user changed. Thresholds are taken as
//! given; [`TrackerConfig::validate`] reports combinations that look
//! inconsistent but never rewrites them.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::Provider;

/// Default accuracy ceiling for high-precision providers (meters).
pub const DEFAULT_MAX_ACCURACY_M: f64 = 30.0;
/// Extra allowance for coarse providers (meters).
pub const DEFAULT_NETWORK_ACCURACY_MARGIN_M: f64 = 10.0;
/// Fixes older than this (device monotonic time) are stale.
pub const DEFAULT_MAX_FIX_AGE_MS: u64 = 5_000;
/// Stand-in for a missing or zero accuracy in the displacement test (meters).
pub const DEFAULT_FALLBACK_DISTANCE_M: f64 = 15.0;
/// Commit the open transaction at most this often.
pub const DEFAULT_COMMIT_INTERVAL_MS: i64 = 30_000;
/// Accepted fixes remembered for the displacement test.
pub const DEFAULT_HISTORY_SIZE: usize = 5;

/// Thresholds used by [`crate::admission::AdmissionFilter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionConfig {
    /// Accuracy ceiling for GPS fixes (meters)
    pub max_accuracy: f64,
    /// Added to `max_accuracy` for every other provider
    pub network_accuracy_margin: f64,
    pub max_fix_age_ms: u64,
    pub fallback_distance: f64,
    /// Multiplier on the combined accuracy radius. 1.0 is a one-sigma test.
    pub displacement_sigma: f64,
    /// Drop fixes that are not displaced from the last accepted one
    pub omit_rests: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_accuracy: DEFAULT_MAX_ACCURACY_M,
            network_accuracy_margin: DEFAULT_NETWORK_ACCURACY_MARGIN_M,
            max_fix_age_ms: DEFAULT_MAX_FIX_AGE_MS,
            fallback_distance: DEFAULT_FALLBACK_DISTANCE_M,
            displacement_sigma: 1.0,
            omit_rests: true,
        }
    }
}

impl AdmissionConfig {
    /// Accuracy ceiling for fixes from `provider`.
    pub fn accuracy_ceiling(&self, provider: &Provider) -> f64 {
        if provider.is_high_precision() {
            self.max_accuracy
        } else {
            self.max_accuracy + self.network_accuracy_margin
        }
    }
}

/// Everything the tracker reads from the host's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Written into every trackpoint row
    pub device_id: String,
    pub use_gps: bool,
    pub use_network: bool,
    /// Interval requested from sources; 0 asks for every fix
    pub min_interval_ms: u64,
    pub min_distance_m: f64,
    pub commit_interval_ms: i64,
    pub history_size: usize,
    pub admission: AdmissionConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            device_id: "myphone".to_string(),
            use_gps: true,
            use_network: false,
            min_interval_ms: 0,
            min_distance_m: 0.0,
            commit_interval_ms: DEFAULT_COMMIT_INTERVAL_MS,
            history_size: DEFAULT_HISTORY_SIZE,
            admission: AdmissionConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether fixes from `provider` should be requested at all.
    pub fn uses_provider(&self, provider: &Provider) -> bool {
        match provider {
            Provider::Gps => self.use_gps,
            Provider::Network => self.use_network,
            Provider::Other(_) => self.use_gps || self.use_network,
        }
    }

    /// Report suspicious settings. An empty list means nothing stood out.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let admission = &self.admission;

        if self.device_id.trim().is_empty() {
            warnings.push("device id is empty".to_string());
        }
        if !self.use_gps && !self.use_network {
            warnings.push("no provider enabled, recording will collect nothing".to_string());
        }
        if !(admission.max_accuracy > 0.0) {
            warnings.push(format!(
                "accuracy ceiling {} m rejects every fix",
                admission.max_accuracy
            ));
        }
        if admission.max_fix_age_ms == 0 {
            warnings.push("staleness window is 0 ms, every fix is stale".to_string());
        }
        if !(admission.fallback_distance > 0.0) {
            warnings.push(format!(
                "fallback displacement {} m disables the rest filter for fixes without accuracy",
                admission.fallback_distance
            ));
        }
        if !(admission.displacement_sigma > 0.0) {
            warnings.push(format!(
                "displacement sigma {} disables the rest filter",
                admission.displacement_sigma
            ));
        }
        if admission.max_accuracy > admission.fallback_distance * admission.displacement_sigma {
            warnings.push(format!(
                "accuracy ceiling {} m is looser than the fallback displacement {} m; \
                 fixes without accuracy may be kept while barely moving",
                admission.max_accuracy, admission.fallback_distance
            ));
        }
        if self.commit_interval_ms <= 0 {
            warnings.push("commit interval is not positive, every insert commits".to_string());
        }
        if self.history_size == 0 {
            warnings.push("history size is 0, the rest filter never runs".to_string());
        }
        warnings
    }
}
