//! # trkpt
//!
//! Location recording engine for battery-powered devices.
//!
//! This crate provides:
//! - Current-best fix arbitration between GPS and network providers
//! - An admission filter that drops noise, rests and homepoint visits
//! - A restart-safe Stopped/Recording state machine
//! - A transactional SQLite trackpoint store with batched commits
//! - Track assembly, segmentation, statistics and GPX export
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use trkpt::{Context, JsonStateFile, ManualSource, Provider, SystemClock, Tracker, TrackerConfig};
//!
//! let mut ctx = Context::new(TrackerConfig::default());
//! ctx.load_database_folder("/data/trkpt").unwrap();
//!
//! let (gps, gps_handle) = ManualSource::new(Provider::Gps, true);
//! let mut tracker = Tracker::new(ctx, SystemClock::new(), JsonStateFile::new("/data/trkpt/state.json"));
//! tracker.add_source(gps);
//! tracker.recover();
//! tracker.start();
//!
//! // Platform callbacks forward readings through `gps_handle.push(fix)`,
//! // then the host drives the engine:
//! tracker.tick();
//! ```

pub mod admission;
pub mod arbiter;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod geo_utils;
pub mod gpx;
pub mod migrations;
pub mod persistence;
pub mod source;
pub mod state;
pub mod track;
pub mod tracker;
pub mod types;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use admission::{Admission, AdmissionFilter, RecentHistory, RejectReason};
pub use arbiter::{LocationArbiter, is_better_fix, pick_best};
pub use config::{AdmissionConfig, TrackerConfig};
pub use context::Context;
pub use error::{Result, SourceError, TrkptError};
pub use events::{EngineEvent, EventBus};
pub use gpx::{export_gpx, render_gpx};
pub use persistence::{PointStore, TrackDay, TrkptCursor};
pub use source::{
    AlwaysGranted, Clock, FixSender, HostClock, LocationSource, ManualClock, ManualSource,
    ManualSourceHandle, PermissionCheck, Provider, SystemClock,
};
pub use state::{JsonStateFile, MemoryState, PersistedState, StatePersistence, TrackingState};
pub use track::{STOP_OVER_THRESHOLD_MS, Track, TrackAssembler, TrackStatistics};
pub use tracker::{FixOutcome, Tracker, TrackerCommand, TrackerStats};
pub use types::{BoundingBox, Fix, Homepoint, Trackpoint};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android. Safe to call more than once.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("trkpt"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}
