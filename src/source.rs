//! Collaborator interfaces consumed by the tracker.
//!
//! The platform owns the actual location hardware. The engine only sees a
//! [`LocationSource`] per named provider, a [`PermissionCheck`] and a
//! [`Clock`]. Fixes travel from a source to the tracker through an mpsc
//! channel handed over in [`LocationSource::request_updates`], so delivery is
//! decoupled from processing: the tracker drains the channel and handles
//! each fix to completion before looking at the next.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::types::Fix;

/// Channel end a source pushes fixes into.
pub type FixSender = Sender<Fix>;

// ============================================================================
// Provider
// ============================================================================

/// Named position provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Satellite positioning, high precision
    Gps,
    /// Cell/Wi-Fi positioning, coarse
    Network,
    Other(String),
}

impl Provider {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "gps" => Provider::Gps,
            "network" => Provider::Network,
            other => Provider::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Provider::Gps => "gps",
            Provider::Network => "network",
            Provider::Other(name) => name,
        }
    }

    /// Whether this provider gets the tight accuracy ceiling.
    pub fn is_high_precision(&self) -> bool {
        matches!(self, Provider::Gps)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// A platform position provider.
pub trait LocationSource {
    fn provider(&self) -> Provider;

    /// Whether the provider exists and is currently switched on.
    fn is_available(&self) -> bool;

    /// Start delivering fixes into `sink`.
    ///
    /// `min_interval_ms` of 0 means as fast as the hardware allows.
    fn request_updates(
        &mut self,
        min_interval_ms: u64,
        min_distance_m: f64,
        sink: FixSender,
    ) -> std::result::Result<(), SourceError>;

    /// Stop delivering fixes. Fixes already queued are still processed.
    fn remove_updates(&mut self);
}

/// Runtime location permission.
pub trait PermissionCheck {
    fn has_location_permission(&self) -> bool;
}

/// Permission check for hosts without a runtime permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl PermissionCheck for AlwaysGranted {
    fn has_location_permission(&self) -> bool {
        true
    }
}

impl<T: PermissionCheck + ?Sized> PermissionCheck for Arc<T> {
    fn has_location_permission(&self) -> bool {
        (**self).has_location_permission()
    }
}

/// Shared toggle, handy when the host flips permission at runtime.
impl PermissionCheck for AtomicBool {
    fn has_location_permission(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Wall clock plus the device monotonic clock fixes are stamped with.
pub trait Clock {
    /// Unix time in milliseconds.
    fn now_millis(&self) -> i64;

    /// Monotonic nanoseconds, same time base as [`Fix::elapsed_realtime_nanos`].
    fn elapsed_realtime_nanos(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
    fn elapsed_realtime_nanos(&self) -> u64 {
        (**self).elapsed_realtime_nanos()
    }
}

/// System clock. The monotonic base is the moment the clock was created,
/// so fixes must be stamped with [`SystemClock::elapsed_realtime_nanos`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn elapsed_realtime_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Clock whose monotonic base belongs to the host.
///
/// Platform fixes are stamped with the device's boot-relative clock, which
/// the engine cannot read itself. The host reports it with every call via
/// [`HostClock::observe_elapsed_realtime_nanos`]; the reading never moves
/// backwards.
#[derive(Debug, Default)]
pub struct HostClock {
    nanos: AtomicU64,
}

impl HostClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_elapsed_realtime_nanos(&self, nanos: u64) {
        self.nanos.fetch_max(nanos, Ordering::SeqCst);
    }
}

impl Clock for HostClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    fn elapsed_realtime_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Hand-driven clock for simulations and tests. Both time bases advance
/// together.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(now_millis),
            nanos: AtomicU64::new(0),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
        self.nanos
            .fetch_add(millis.max(0) as u64 * 1_000_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
    fn elapsed_realtime_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Manual Source
// ============================================================================

#[derive(Debug)]
struct ManualSourceState {
    available: bool,
    sink: Option<FixSender>,
    min_interval_ms: Option<u64>,
}

/// A source fed by the host: platform callbacks forward each location into
/// [`ManualSourceHandle::push`]. The source half is handed to the tracker,
/// the handle stays with the platform glue.
#[derive(Debug)]
pub struct ManualSource {
    provider: Provider,
    state: Arc<Mutex<ManualSourceState>>,
}

/// Host-side handle of a [`ManualSource`].
#[derive(Debug, Clone)]
pub struct ManualSourceHandle {
    provider: Provider,
    state: Arc<Mutex<ManualSourceState>>,
}

impl ManualSource {
    pub fn new(provider: Provider, available: bool) -> (Self, ManualSourceHandle) {
        let state = Arc::new(Mutex::new(ManualSourceState {
            available,
            sink: None,
            min_interval_ms: None,
        }));
        (
            Self {
                provider: provider.clone(),
                state: Arc::clone(&state),
            },
            ManualSourceHandle { provider, state },
        )
    }
}

impl LocationSource for ManualSource {
    fn provider(&self) -> Provider {
        self.provider.clone()
    }

    fn is_available(&self) -> bool {
        self.state.lock().map(|s| s.available).unwrap_or(false)
    }

    fn request_updates(
        &mut self,
        min_interval_ms: u64,
        _min_distance_m: f64,
        sink: FixSender,
    ) -> std::result::Result<(), SourceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SourceError::Unsupported(self.provider.clone()))?;
        if !state.available {
            return Err(SourceError::ProviderDisabled(self.provider.clone()));
        }
        state.sink = Some(sink);
        state.min_interval_ms = Some(min_interval_ms);
        Ok(())
    }

    fn remove_updates(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.sink = None;
            state.min_interval_ms = None;
        }
    }
}

impl ManualSourceHandle {
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Forward a fix. Returns false when the tracker is not listening or the
    /// provider is switched off.
    pub fn push(&self, fix: Fix) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        match &state.sink {
            Some(sink) if state.available => sink.send(fix).is_ok(),
            _ => false,
        }
    }

    /// Switch the provider on or off. The registration survives, so a
    /// provider that comes back resumes delivery to the same sink.
    pub fn set_available(&self, available: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.available = available;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().map(|s| s.sink.is_some()).unwrap_or(false)
    }

    pub fn requested_interval_ms(&self) -> Option<u64> {
        self.state.lock().ok().and_then(|s| s.min_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_provider_parse_and_display() {
        assert_eq!(Provider::parse("GPS"), Provider::Gps);
        assert_eq!(Provider::parse("network"), Provider::Network);
        assert_eq!(Provider::parse("fused"), Provider::Other("fused".into()));
        assert_eq!(Provider::Network.to_string(), "network");
        assert!(Provider::Gps.is_high_precision());
        assert!(!Provider::Network.is_high_precision());
    }

    #[test]
    fn test_manual_clock_advances_both_bases() {
        let clock = ManualClock::new(1_000);
        clock.advance_millis(2_500);
        assert_eq!(clock.now_millis(), 3_500);
        assert_eq!(clock.elapsed_realtime_nanos(), 2_500_000_000);
    }

    #[test]
    fn test_host_clock_never_goes_back() {
        let clock = HostClock::new();
        assert_eq!(clock.elapsed_realtime_nanos(), 0);
        clock.observe_elapsed_realtime_nanos(3_660_000_000_000);
        clock.observe_elapsed_realtime_nanos(3_000_000_000_000);
        assert_eq!(clock.elapsed_realtime_nanos(), 3_660_000_000_000);
        assert!(clock.now_millis() > 1_600_000_000_000);
    }

    #[test]
    fn test_manual_source_off_and_on_keeps_registration() {
        let (mut source, handle) = ManualSource::new(Provider::Gps, true);
        let (tx, rx) = mpsc::channel();
        source.request_updates(0, 0.0, tx).unwrap();
        let fix = Fix::new(Provider::Gps, 1.0, 2.0, 5.0, 10, 0);

        handle.set_available(false);
        assert!(!source.is_available());
        assert!(!handle.push(fix.clone()));

        handle.set_available(true);
        assert!(handle.is_attached());
        assert!(handle.push(fix.clone()));
        assert_eq!(rx.try_recv().unwrap(), fix);
    }

    #[test]
    fn test_manual_source_delivery() {
        let (mut source, handle) = ManualSource::new(Provider::Gps, true);
        let (tx, rx) = mpsc::channel();
        let fix = Fix::new(Provider::Gps, 1.0, 2.0, 5.0, 10, 0);

        assert!(!handle.push(fix.clone()));
        source.request_updates(0, 0.0, tx).unwrap();
        assert!(handle.is_attached());
        assert_eq!(handle.requested_interval_ms(), Some(0));
        assert!(handle.push(fix.clone()));
        assert_eq!(rx.try_recv().unwrap(), fix);

        source.remove_updates();
        assert!(!handle.is_attached());
    }

    #[test]
    fn test_manual_source_disabled() {
        let (mut source, handle) = ManualSource::new(Provider::Network, false);
        let (tx, _rx) = mpsc::channel();
        assert_eq!(
            source.request_updates(0, 0.0, tx),
            Err(SourceError::ProviderDisabled(Provider::Network))
        );
        handle.set_available(true);
        assert!(source.is_available());
    }
}
