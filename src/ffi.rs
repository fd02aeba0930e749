//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The host owns one [`FfiTracker`]. Platform location callbacks forward
//! every reading through [`FfiTracker::push_fix`]; provider and permission
//! changes go through [`FfiTracker::set_provider_enabled`]. Calls are
//! serialized by a mutex, so fixes are still handled one at a time.
//!
//! Fix staleness is judged against the device's boot-relative clock
//! (`SystemClock.elapsedRealtimeNanos()` on Android), which the host passes
//! to [`FfiTracker::push_fix`] and [`FfiTracker::tick`].

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::config::TrackerConfig;
use crate::context::Context;
use crate::events::EngineEvent;
use crate::gpx;
use crate::init_logging;
use crate::source::{HostClock, LocationSource, ManualSource, ManualSourceHandle, Provider};
use crate::state::JsonStateFile;
use crate::track::TrackAssembler;
use crate::tracker::{FixOutcome, Tracker};
use crate::types::{Fix, Homepoint, Trackpoint};

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFix {
    pub provider: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    /// Unix millis
    pub time: i64,
    pub satellites: Option<u32>,
    pub elapsed_realtime_nanos: u64,
}

impl From<FfiFix> for Fix {
    fn from(fix: FfiFix) -> Self {
        Fix {
            provider: Provider::parse(&fix.provider),
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            time: fix.time,
            satellites: fix.satellites,
            elapsed_realtime_nanos: fix.elapsed_realtime_nanos,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTrackpoint {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
    pub time: i64,
    pub satellites: Option<u32>,
}

impl From<Trackpoint> for FfiTrackpoint {
    fn from(p: Trackpoint) -> Self {
        Self {
            device_id: p.device_id,
            latitude: p.latitude,
            longitude: p.longitude,
            altitude: p.altitude,
            accuracy: p.accuracy,
            time: p.time,
            satellites: p.satellites,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiHomepoint {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiTrackStatistics {
    pub point_count: u32,
    pub distance: f64,
    pub duration: i64,
    pub velocity: f64,
    pub total_ascent: f64,
    pub total_descent: f64,
    pub max_altitude: f64,
    pub min_altitude: f64,
}

/// Engine event flattened for the host. `payload` is JSON.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiEvent {
    pub kind: String,
    pub payload: String,
}

impl From<EngineEvent> for FfiEvent {
    fn from(event: EngineEvent) -> Self {
        let (kind, payload) = match event {
            EngineEvent::DatabaseChanged { ready } => ("databaseChanged", ready.to_string()),
            EngineEvent::CurrentBestChanged(fix) => (
                "currentBestChanged",
                serde_json::to_string(&fix).unwrap_or_default(),
            ),
            EngineEvent::TrackingStateChanged(state) => (
                "trackingStateChanged",
                serde_json::to_string(&state).unwrap_or_default(),
            ),
        };
        Self {
            kind: kind.to_string(),
            payload,
        }
    }
}

// ============================================================================
// Tracker Object
// ============================================================================

#[derive(uniffi::Object)]
pub struct FfiTracker {
    tracker: Mutex<Tracker>,
    clock: Arc<HostClock>,
    gps: ManualSourceHandle,
    network: ManualSourceHandle,
    events: Mutex<Receiver<EngineEvent>>,
}

impl FfiTracker {
    fn with_tracker<R>(&self, default: R, f: impl FnOnce(&mut Tracker) -> R) -> R {
        match self.tracker.lock() {
            Ok(mut tracker) => f(&mut tracker),
            Err(_) => {
                warn!("[FfiTracker] Tracker lock poisoned");
                default
            }
        }
    }

    fn handle(&self, provider: &Provider) -> Option<&ManualSourceHandle> {
        match provider {
            Provider::Gps => Some(&self.gps),
            Provider::Network => Some(&self.network),
            Provider::Other(_) => None,
        }
    }
}

#[uniffi::export]
impl FfiTracker {
    /// Create the tracker and resume recording if it was active.
    ///
    /// An unparseable `config_json` falls back to defaults.
    #[uniffi::constructor]
    pub fn new(config_json: String, state_path: String) -> Arc<Self> {
        init_logging();
        let config = TrackerConfig::from_json(&config_json).unwrap_or_else(|e| {
            warn!("[FfiTracker] Invalid config, using defaults: {}", e);
            TrackerConfig::default()
        });
        let mut ctx = Context::new(config);
        let events = ctx.events.subscribe();

        let (gps_source, gps) = ManualSource::new(Provider::Gps, true);
        let (network_source, network) = ManualSource::new(Provider::Network, true);
        let sources: Vec<Box<dyn LocationSource + Send>> =
            vec![Box::new(gps_source), Box::new(network_source)];
        let clock = Arc::new(HostClock::new());
        let tracker = Tracker::boot(
            ctx,
            Arc::clone(&clock),
            JsonStateFile::new(state_path),
            sources,
        );
        info!("[FfiTracker] Created in state {:?}", tracker.state());

        Arc::new(Self {
            tracker: Mutex::new(tracker),
            clock,
            gps,
            network,
            events: Mutex::new(events),
        })
    }

    /// Open `trkpt_<device_id>.db` inside `folder`.
    pub fn load_database(&self, folder: String) -> bool {
        self.with_tracker(false, |t| {
            let path = Context::database_path(&folder, &t.config().device_id);
            t.load_database(path).is_ok()
        })
    }

    pub fn apply_config_json(&self, config_json: String) -> bool {
        match TrackerConfig::from_json(&config_json) {
            Ok(config) => self.with_tracker(false, |t| {
                t.apply_config(config);
                true
            }),
            Err(e) => {
                warn!("[FfiTracker] Rejected config: {}", e);
                false
            }
        }
    }

    pub fn start(&self) {
        self.with_tracker((), |t| t.start());
    }

    pub fn stop(&self) {
        self.with_tracker((), |t| t.stop());
    }

    pub fn handle_command(&self, action: String) -> bool {
        self.with_tracker(false, |t| t.handle_command(&action))
    }

    pub fn is_recording(&self) -> bool {
        self.with_tracker(false, |t| t.is_recording())
    }

    /// Hand one platform reading to the engine. Returns whether it was stored.
    ///
    /// `now_elapsed_realtime_nanos` is the device's boot-relative clock at the
    /// time of the call, the same base as `fix.elapsed_realtime_nanos`.
    pub fn push_fix(&self, fix: FfiFix, now_elapsed_realtime_nanos: u64) -> bool {
        self.clock
            .observe_elapsed_realtime_nanos(now_elapsed_realtime_nanos);
        let fix: Fix = fix.into();
        let delivered = self
            .handle(&fix.provider)
            .is_some_and(|handle| handle.push(fix.clone()));
        self.with_tracker(false, |t| {
            if delivered {
                // Only the pushed fix is queued; pump it and report its fate.
                let before = t.stats().fixes_accepted;
                t.pump();
                t.stats().fixes_accepted > before
            } else {
                t.on_fix(fix) == FixOutcome::Accepted
            }
        })
    }

    pub fn set_provider_enabled(&self, provider: String, enabled: bool) {
        let provider = Provider::parse(&provider);
        if let Some(handle) = self.handle(&provider) {
            handle.set_available(enabled);
        }
        self.with_tracker((), |t| t.on_provider_changed(&provider, enabled));
    }

    pub fn tick(&self, now_elapsed_realtime_nanos: u64) -> u32 {
        self.clock
            .observe_elapsed_realtime_nanos(now_elapsed_realtime_nanos);
        self.with_tracker(0, |t| t.tick() as u32)
    }

    /// Drain pending engine events.
    pub fn poll_events(&self) -> Vec<FfiEvent> {
        match self.events.lock() {
            Ok(rx) => rx.try_iter().map(FfiEvent::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn current_best(&self) -> Option<FfiTrackpoint> {
        self.with_tracker(None, |t| {
            let device_id = t.config().device_id.clone();
            t.current_best()
                .map(|fix| Trackpoint::from_fix(&device_id, fix).into())
        })
    }

    pub fn query_range(&self, device_id: String, start: i64, end: i64) -> Vec<FfiTrackpoint> {
        self.with_tracker(Vec::new(), |t| {
            t.context()
                .store
                .query_range(&device_id, start, end)
                .map(FfiTrackpoint::from)
                .collect()
        })
    }

    pub fn query_bbox(
        &self,
        device_id: String,
        north: f64,
        south: f64,
        east: f64,
        west: f64,
    ) -> Vec<FfiTrackpoint> {
        self.with_tracker(Vec::new(), |t| {
            t.context()
                .store
                .query_bbox(&device_id, north, south, east, west)
                .map(FfiTrackpoint::from)
                .collect()
        })
    }

    pub fn delete_trkpt(&self, device_id: String, time: i64) -> bool {
        self.with_tracker(false, |t| {
            t.context_mut()
                .store
                .delete(&device_id, time)
                .map(|n| n > 0)
                .unwrap_or(false)
        })
    }

    pub fn delete_range(&self, device_id: String, start: i64, end: i64) -> u32 {
        self.with_tracker(0, |t| {
            t.context_mut()
                .store
                .delete_range(&device_id, start, end)
                .map(|n| n as u32)
                .unwrap_or(0)
        })
    }

    pub fn homepoints(&self) -> Vec<FfiHomepoint> {
        self.with_tracker(Vec::new(), |t| {
            t.homepoints()
                .iter()
                .map(|h| FfiHomepoint {
                    id: h.id,
                    name: h.name.clone(),
                    latitude: h.latitude,
                    longitude: h.longitude,
                    radius: h.radius,
                })
                .collect()
        })
    }

    /// Insert or update a homepoint. Fails on a non-positive radius.
    pub fn save_homepoint(&self, homepoint: FfiHomepoint) -> bool {
        let Ok(home) = Homepoint::new(
            homepoint.id,
            &homepoint.name,
            homepoint.latitude,
            homepoint.longitude,
            homepoint.radius,
        ) else {
            return false;
        };
        self.with_tracker(false, |t| {
            let store = &mut t.context_mut().store;
            let saved = match store.update_homepoint(&home) {
                Ok(true) => true,
                Ok(false) => store.insert_homepoint(&home).is_ok(),
                Err(_) => false,
            };
            t.reload_homepoints();
            saved
        })
    }

    pub fn delete_homepoint(&self, id: i64) -> bool {
        self.with_tracker(false, |t| {
            let deleted = t.context_mut().store.delete_homepoint(id).unwrap_or(false);
            t.reload_homepoints();
            deleted
        })
    }

    pub fn track_statistics(&self, device_id: String, start: i64, end: i64) -> FfiTrackStatistics {
        self.with_tracker(FfiTrackStatistics::default(), |t| {
            let stats = TrackAssembler::new(&t.context().store)
                .statistics_for_range(&device_id, start, end);
            FfiTrackStatistics {
                point_count: stats.point_count as u32,
                distance: stats.distance,
                duration: stats.duration,
                velocity: stats.velocity,
                total_ascent: stats.total_ascent,
                total_descent: stats.total_descent,
                max_altitude: stats.max_altitude,
                min_altitude: stats.min_altitude,
            }
        })
    }

    pub fn export_gpx(&self, device_id: String, start: i64, end: i64, path: String) -> bool {
        self.with_tracker(false, |t| {
            let track = TrackAssembler::new(&t.context().store).load(&device_id, start, end);
            match gpx::export_gpx(&track, &path) {
                Ok(_) => true,
                Err(e) => {
                    warn!("[FfiTracker] {}", e);
                    false
                }
            }
        })
    }

    /// Flush and release everything; recording resumes on the next start.
    pub fn shutdown(&self) {
        self.with_tracker((), |t| t.shutdown());
    }
}
