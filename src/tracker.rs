//! Recording state machine.
//!
//! # Pipeline
//!
//! Every fix goes through the same steps, one fix at a time:
//!
//! 1. the arbiter decides whether it becomes the current best
//! 2. while recording with a ready store, the admission filter judges it
//! 3. admitted fixes are inserted and the transaction is committed when due
//!
//! ## Lifecycle
//!
//! `Stopped` and `Recording` are persisted on every transition. The current
//! best fix is saved on transitions and at most once per commit interval
//! from [`Tracker::tick`], never per fix. A fresh
//! tracker calls [`Tracker::recover`] once; if the last persisted state was
//! `Recording` it resumes without any external command, so a process killed
//! mid-trip picks up where it left off.

use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;

use crate::admission::{Admission, AdmissionFilter, RecentHistory, RejectReason};
use crate::arbiter::LocationArbiter;
use crate::config::TrackerConfig;
use crate::context::Context;
use crate::error::{Result, SourceError};
use crate::events::EngineEvent;
use crate::source::{AlwaysGranted, Clock, FixSender, LocationSource, PermissionCheck, Provider};
use crate::state::{PersistedState, StatePersistence, TrackingState};
use crate::types::{Fix, Homepoint, Trackpoint};

/// External start/stop command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerCommand {
    Start,
    Stop,
}

impl TrackerCommand {
    /// Accepts `start`/`stop` and namespaced actions such as
    /// `net.voussoir.trkpt.action.START`.
    pub fn parse(command: &str) -> Option<Self> {
        let action = command.rsplit('.').next().unwrap_or(command).trim();
        if action.eq_ignore_ascii_case("start") {
            Some(TrackerCommand::Start)
        } else if action.eq_ignore_ascii_case("stop") {
            Some(TrackerCommand::Stop)
        } else {
            None
        }
    }
}

/// What happened to one fix.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// Worse than the current best
    NotBest,
    /// New current best, but not recording or no store
    Observed,
    Rejected(RejectReason),
    Accepted,
    /// Admitted but the insert failed or hit an existing key
    NotStored,
}

/// Counters since the tracker was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerStats {
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub fixes_rejected: u64,
    pub commits: u64,
}

struct SourceSlot {
    source: Box<dyn LocationSource + Send>,
    attached: bool,
}

impl SourceSlot {
    fn provider(&self) -> Provider {
        self.source.provider()
    }
}

pub struct Tracker {
    ctx: Context,
    state: TrackingState,
    recovered: bool,
    arbiter: LocationArbiter,
    filter: AdmissionFilter,
    history: RecentHistory,
    /// Snapshot of the store's homepoints, most recently hit first
    homepoints: Vec<Homepoint>,
    arrived_home: bool,
    /// Current best changed since the last state save
    best_dirty: bool,
    state_saved_at: Option<i64>,
    sources: Vec<SourceSlot>,
    permission: Box<dyn PermissionCheck + Send>,
    clock: Box<dyn Clock + Send>,
    persistence: Box<dyn StatePersistence + Send>,
    fix_tx: Sender<Fix>,
    fix_rx: Receiver<Fix>,
    stats: TrackerStats,
}

impl Tracker {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a stopped tracker. Call [`Tracker::recover`] before use.
    pub fn new(
        ctx: Context,
        clock: impl Clock + Send + 'static,
        persistence: impl StatePersistence + Send + 'static,
    ) -> Self {
        let (fix_tx, fix_rx) = mpsc::channel();
        let filter = AdmissionFilter::new(ctx.config.admission.clone());
        let history = RecentHistory::new(ctx.config.history_size);
        let mut tracker = Self {
            ctx,
            state: TrackingState::Stopped,
            recovered: false,
            arbiter: LocationArbiter::new(),
            filter,
            history,
            homepoints: Vec::new(),
            arrived_home: false,
            best_dirty: false,
            state_saved_at: None,
            sources: Vec::new(),
            permission: Box::new(AlwaysGranted),
            clock: Box::new(clock),
            persistence: Box::new(persistence),
            fix_tx,
            fix_rx,
            stats: TrackerStats::default(),
        };
        tracker.reload_homepoints();
        tracker
    }

    /// Register a location source. Sources are attached on start or recovery.
    pub fn add_source(&mut self, source: impl LocationSource + Send + 'static) {
        log::debug!("[Tracker] Registered source {}", source.provider());
        self.sources.push(SourceSlot {
            source: Box::new(source),
            attached: false,
        });
        if self.state == TrackingState::Recording {
            self.attach_sources();
        }
    }

    pub fn set_permission_check(&mut self, permission: impl PermissionCheck + Send + 'static) {
        self.permission = Box::new(permission);
    }

    /// Create, register everything and recover in one go.
    pub fn boot(
        ctx: Context,
        clock: impl Clock + Send + 'static,
        persistence: impl StatePersistence + Send + 'static,
        sources: Vec<Box<dyn LocationSource + Send>>,
    ) -> Self {
        let mut tracker = Self::new(ctx, clock, persistence);
        for source in sources {
            tracker.sources.push(SourceSlot {
                source,
                attached: false,
            });
        }
        tracker.recover();
        tracker
    }

    /// Restore the persisted state. Runs once; later calls return the
    /// current state unchanged.
    pub fn recover(&mut self) -> TrackingState {
        if self.recovered {
            return self.state;
        }
        self.recovered = true;

        let persisted = match self.persistence.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                log::warn!("[Tracker] Could not load persisted state, starting stopped: {}", e);
                PersistedState::default()
            }
        };
        if let Some(best) = persisted.current_best {
            self.arbiter = LocationArbiter::with_current_best(Some(best));
        }
        if persisted.tracking_state == TrackingState::Recording {
            log::info!("[Tracker] Resuming recording after restart");
            self.state = TrackingState::Recording;
            self.history.clear();
            self.attach_sources();
            self.ctx
                .events
                .emit(EngineEvent::TrackingStateChanged(TrackingState::Recording));
        }
        self.state
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == TrackingState::Recording
    }

    pub fn current_best(&self) -> Option<&Fix> {
        self.arbiter.current_best()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.ctx.config
    }

    pub fn homepoints(&self) -> &[Homepoint] {
        &self.homepoints
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    /// Sender for hosts that deliver fixes from their own callbacks.
    pub fn fix_sender(&self) -> FixSender {
        self.fix_tx.clone()
    }

    /// Number of sources currently delivering.
    pub fn attached_sources(&self) -> usize {
        self.sources.iter().filter(|slot| slot.attached).count()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    pub fn start(&mut self) {
        log::info!("[Tracker] Start recording");
        self.recovered = true;
        self.history.clear();
        self.arrived_home = false;
        let changed = self.state != TrackingState::Recording;
        self.state = TrackingState::Recording;
        self.attach_sources();
        self.persist();
        if changed {
            self.ctx
                .events
                .emit(EngineEvent::TrackingStateChanged(TrackingState::Recording));
        }
    }

    pub fn stop(&mut self) {
        log::info!("[Tracker] Stop recording");
        self.recovered = true;
        if let Err(e) = self.ctx.store.commit() {
            log::error!("[Tracker] Commit on stop failed: {}", e);
        }
        let changed = self.state != TrackingState::Stopped;
        self.state = TrackingState::Stopped;
        self.persist();
        self.history.clear();
        self.detach_sources();
        if changed {
            self.ctx
                .events
                .emit(EngineEvent::TrackingStateChanged(TrackingState::Stopped));
        }
    }

    /// Apply an external command. Returns false for unknown commands.
    pub fn handle_command(&mut self, command: &str) -> bool {
        match TrackerCommand::parse(command) {
            Some(TrackerCommand::Start) => {
                self.start();
                true
            }
            Some(TrackerCommand::Stop) => {
                self.stop();
                true
            }
            None => {
                log::debug!("[Tracker] Ignoring command '{}'", command);
                false
            }
        }
    }

    /// Teardown: release sources, flush and close the store. The persisted
    /// state is kept so the next [`Tracker::recover`] resumes.
    pub fn shutdown(&mut self) {
        log::info!("[Tracker] Shutdown while {:?}", self.state);
        self.detach_sources();
        self.pump();
        self.persist();
        self.ctx.close_database();
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replace the configuration, re-evaluate sources and reload homepoints.
    pub fn apply_config(&mut self, config: TrackerConfig) {
        for warning in config.validate() {
            log::warn!("[Tracker] Config: {}", warning);
        }
        if config.history_size != self.ctx.config.history_size {
            self.history = RecentHistory::new(config.history_size);
        }
        self.filter = AdmissionFilter::new(config.admission.clone());
        self.ctx.config = config;
        self.reload_homepoints();
        if self.state == TrackingState::Recording {
            self.attach_sources();
        }
    }

    /// Refresh the homepoint snapshot from the store.
    pub fn reload_homepoints(&mut self) {
        self.homepoints = match self.ctx.store.homepoints() {
            Ok(homepoints) => homepoints,
            Err(e) => {
                log::warn!("[Tracker] Could not load homepoints: {}", e);
                Vec::new()
            }
        };
        log::debug!("[Tracker] {} homepoints loaded", self.homepoints.len());
    }

    /// Connect the store and reload homepoints.
    pub fn load_database(&mut self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let result = self.ctx.load_database(path);
        self.reload_homepoints();
        result
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// A provider was switched on or off.
    pub fn on_provider_changed(&mut self, provider: &Provider, enabled: bool) {
        let action = if enabled { "enabled" } else { "disabled" };
        log::info!("[Tracker] Provider {} {}", provider, action);
        if !enabled {
            for slot in self.sources.iter_mut().filter(|s| &s.provider() == provider) {
                if slot.attached {
                    slot.source.remove_updates();
                    slot.attached = false;
                }
            }
        } else if self.state == TrackingState::Recording {
            self.attach_sources();
        }
    }

    /// Periodic housekeeping: retry inactive sources, drain fixes, commit
    /// and save the current best when due.
    pub fn tick(&mut self) -> usize {
        if self.state == TrackingState::Recording {
            self.attach_sources();
        }
        let processed = self.pump();
        self.commit_if_due();
        self.persist_if_due();
        processed
    }

    fn attach_sources(&mut self) {
        let config = &self.ctx.config;
        for slot in self.sources.iter_mut() {
            let provider = slot.provider();
            let wanted = config.uses_provider(&provider);
            if !wanted {
                if slot.attached {
                    log::info!("[Tracker] Detaching {} (disabled in config)", provider);
                    slot.source.remove_updates();
                    slot.attached = false;
                }
                continue;
            }
            if slot.attached {
                if slot.source.is_available() {
                    continue;
                }
                // Went away without a provider callback.
                log::info!("[Tracker] {} became unavailable", provider);
                slot.source.remove_updates();
                slot.attached = false;
            }
            let result = if !self.permission.has_location_permission() {
                Err(SourceError::PermissionDenied(provider.clone()))
            } else if !slot.source.is_available() {
                Err(SourceError::ProviderDisabled(provider.clone()))
            } else {
                slot.source.request_updates(
                    config.min_interval_ms,
                    config.min_distance_m,
                    self.fix_tx.clone(),
                )
            };
            match result {
                Ok(()) => {
                    log::info!("[Tracker] Attached {}", provider);
                    slot.attached = true;
                }
                Err(e) => log::warn!("[Tracker] Source inactive: {}", e),
            }
        }
    }

    fn detach_sources(&mut self) {
        for slot in self.sources.iter_mut().filter(|s| s.attached) {
            slot.source.remove_updates();
            slot.attached = false;
        }
    }

    // ========================================================================
    // Fix handling
    // ========================================================================

    /// Process every queued fix in arrival order.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(fix) = self.fix_rx.try_recv() {
            self.on_fix(fix);
            processed += 1;
        }
        processed
    }

    /// Run one fix through arbitration, admission and storage.
    pub fn on_fix(&mut self, fix: Fix) -> FixOutcome {
        self.stats.fixes_received += 1;

        if !self.arbiter.offer(&fix) {
            return FixOutcome::NotBest;
        }
        self.ctx
            .events
            .emit(EngineEvent::CurrentBestChanged(fix.clone()));
        self.best_dirty = true;

        if self.state != TrackingState::Recording {
            return FixOutcome::Observed;
        }
        if !self.ctx.store.is_ready() {
            log::debug!("[Tracker] Omitting fix {}, database not ready", fix.time);
            return FixOutcome::Observed;
        }

        let now_nanos = self.clock.elapsed_realtime_nanos();
        let admission = self.filter.evaluate(
            &fix,
            now_nanos,
            &self.history,
            &self.homepoints,
            self.ctx.config.admission.omit_rests,
        );
        if let Admission::Reject(reason) = admission {
            self.stats.fixes_rejected += 1;
            if let RejectReason::AtHomepoint { index, .. } = reason {
                self.arrive_home(index);
            }
            log::debug!("[Tracker] Omitting fix {}: {}", fix.time, reason);
            return FixOutcome::Rejected(reason);
        }
        self.arrived_home = false;

        let trkpt = Trackpoint::from_fix(&self.ctx.config.device_id, &fix);
        let outcome = match self.ctx.store.insert(&trkpt) {
            Ok(true) => {
                self.stats.fixes_accepted += 1;
                FixOutcome::Accepted
            }
            Ok(false) => FixOutcome::NotStored,
            Err(e) => {
                log::error!("[Tracker] Insert of fix {} failed: {}", fix.time, e);
                FixOutcome::NotStored
            }
        };
        self.history.push(fix);
        self.commit_if_due();
        outcome
    }

    /// Move the matched homepoint to the front and flush on first arrival.
    fn arrive_home(&mut self, index: usize) {
        if index > 0 && index < self.homepoints.len() {
            let home = self.homepoints.remove(index);
            self.homepoints.insert(0, home);
        }
        if !self.arrived_home {
            self.arrived_home = true;
            log::info!("[Tracker] Arrived at homepoint");
            self.commit();
        }
    }

    fn commit(&mut self) {
        if !self.ctx.store.in_transaction() {
            return;
        }
        match self.ctx.store.commit() {
            Ok(()) => self.stats.commits += 1,
            Err(e) => log::error!("[Tracker] Commit failed: {}", e),
        }
    }

    fn commit_if_due(&mut self) {
        let now = self.clock.now_millis();
        match self
            .ctx
            .store
            .commit_if_due(now, self.ctx.config.commit_interval_ms)
        {
            Ok(true) => self.stats.commits += 1,
            Ok(false) => {}
            Err(e) => log::error!("[Tracker] Commit failed: {}", e),
        }
    }

    fn persist_if_due(&mut self) {
        if !self.best_dirty {
            return;
        }
        let now = self.clock.now_millis();
        let due = self.state_saved_at.is_none_or(|saved| {
            now.saturating_sub(saved) >= self.ctx.config.commit_interval_ms
        });
        if due {
            self.persist();
        }
    }

    fn persist(&mut self) {
        self.best_dirty = false;
        self.state_saved_at = Some(self.clock.now_millis());
        let state = PersistedState {
            tracking_state: self.state,
            current_best: self.arbiter.current_best().cloned(),
        };
        if let Err(e) = self.persistence.save(&state) {
            log::warn!("[Tracker] Could not persist state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::geo_utils::meters_to_latitude_degrees;
    use crate::persistence::PointStore;
    use crate::source::{HostClock, ManualClock, ManualSource, ManualSourceHandle};
    use crate::state::MemoryState;

    const T0: i64 = 1_700_000_000_000;
    const LAT: f64 = 52.52;
    const LON: f64 = 13.405;

    struct Harness {
        tracker: Tracker,
        clock: Arc<ManualClock>,
        state: MemoryState,
        gps: ManualSourceHandle,
        network: ManualSourceHandle,
    }

    fn harness_with(state: MemoryState, config: TrackerConfig) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut ctx = Context::new(config);
        ctx.attach_store(PointStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(T0));
        let mut tracker = Tracker::new(ctx, Arc::clone(&clock), state.clone());
        let (gps_source, gps) = ManualSource::new(Provider::Gps, true);
        let (network_source, network) = ManualSource::new(Provider::Network, true);
        tracker.add_source(gps_source);
        tracker.add_source(network_source);
        tracker.recover();
        Harness {
            tracker,
            clock,
            state,
            gps,
            network,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryState::new(), TrackerConfig::default())
    }

    impl Harness {
        /// GPS fix `meters` north of the origin, stamped now.
        fn fix(&self, meters: f64, accuracy: f64) -> Fix {
            Fix::new(
                Provider::Gps,
                LAT + meters_to_latitude_degrees(meters),
                LON,
                accuracy,
                self.clock.now_millis(),
                self.clock.elapsed_realtime_nanos(),
            )
        }

        fn stored(&self) -> usize {
            self.tracker.context().store.count("myphone").unwrap() as usize
        }
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(TrackerCommand::parse("start"), Some(TrackerCommand::Start));
        assert_eq!(
            TrackerCommand::parse("net.voussoir.trkpt.action.STOP"),
            Some(TrackerCommand::Stop)
        );
        assert_eq!(TrackerCommand::parse("pause"), None);
        assert_eq!(TrackerCommand::parse(""), None);
    }

    #[test]
    fn test_start_attaches_enabled_sources_only() {
        let mut h = harness();
        assert!(!h.gps.is_attached());
        h.tracker.start();
        assert!(h.tracker.is_recording());
        assert!(h.gps.is_attached());
        assert!(!h.network.is_attached());
        assert_eq!(h.state.snapshot().tracking_state, TrackingState::Recording);

        h.tracker.stop();
        assert!(!h.gps.is_attached());
        assert_eq!(h.state.snapshot().tracking_state, TrackingState::Stopped);
    }

    #[test]
    fn test_unknown_command_ignored() {
        let mut h = harness();
        assert!(!h.tracker.handle_command("net.voussoir.trkpt.action.PAUSE"));
        assert_eq!(h.tracker.state(), TrackingState::Stopped);
        assert!(h.tracker.handle_command("net.voussoir.trkpt.action.START"));
        assert!(h.tracker.is_recording());
    }

    #[test]
    fn test_restart_recovery() {
        let state = MemoryState::with_state(PersistedState {
            tracking_state: TrackingState::Recording,
            current_best: None,
        });
        let h = harness_with(state, TrackerConfig::default());
        assert_eq!(h.tracker.state(), TrackingState::Recording);
        assert!(h.gps.is_attached());
    }

    #[test]
    fn test_recover_runs_once() {
        let mut h = harness();
        h.state
            .clone()
            .save(&PersistedState {
                tracking_state: TrackingState::Recording,
                current_best: None,
            })
            .unwrap();
        assert_eq!(h.tracker.recover(), TrackingState::Stopped);
    }

    #[test]
    fn test_fixes_recorded_through_channel() {
        let mut h = harness();
        h.tracker.start();
        assert!(h.gps.push(h.fix(0.0, 5.0)));
        h.clock.advance_millis(1_000);
        assert!(h.gps.push(h.fix(100.0, 5.0)));
        assert_eq!(h.tracker.pump(), 2);
        assert_eq!(h.stored(), 2);
        assert_eq!(h.tracker.stats().fixes_accepted, 2);
    }

    #[test]
    fn test_not_recording_only_observes() {
        let mut h = harness();
        let events = h.tracker.context_mut().events.subscribe();
        let fix = h.fix(0.0, 5.0);
        assert_eq!(h.tracker.on_fix(fix.clone()), FixOutcome::Observed);
        assert_eq!(h.stored(), 0);
        assert_eq!(h.tracker.current_best(), Some(&fix));
        assert_eq!(events.try_recv().unwrap(), EngineEvent::CurrentBestChanged(fix.clone()));
        assert_eq!(h.state.snapshot().current_best, None);
        h.tracker.tick();
        assert_eq!(h.state.snapshot().current_best, Some(fix));
    }

    /// Counts writes to the state backend.
    #[derive(Clone, Default)]
    struct CountingState {
        inner: MemoryState,
        saves: Arc<AtomicUsize>,
    }

    impl StatePersistence for CountingState {
        fn load(&self) -> Result<PersistedState> {
            self.inner.load()
        }

        fn save(&mut self, state: &PersistedState) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(state)
        }
    }

    #[test]
    fn test_state_saved_on_transitions_and_interval() {
        let mut ctx = Context::new(TrackerConfig::default());
        ctx.attach_store(PointStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(T0));
        let state = CountingState::default();
        let saves = Arc::clone(&state.saves);
        let mut tracker = Tracker::new(ctx, Arc::clone(&clock), state);
        tracker.recover();

        for step in 0..100 {
            clock.advance_millis(1_000);
            let fix = Fix::new(
                Provider::Gps,
                LAT + meters_to_latitude_degrees(step as f64 * 10.0),
                LON,
                5.0,
                clock.now_millis(),
                clock.elapsed_realtime_nanos(),
            );
            assert_eq!(tracker.on_fix(fix), FixOutcome::Observed);
        }
        assert_eq!(saves.load(Ordering::SeqCst), 0);

        tracker.tick();
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        // New best, but the last save is recent.
        clock.advance_millis(1_000);
        let fix = Fix::new(
            Provider::Gps,
            LAT,
            LON,
            5.0,
            clock.now_millis(),
            clock.elapsed_realtime_nanos(),
        );
        tracker.on_fix(fix);
        tracker.tick();
        assert_eq!(saves.load(Ordering::SeqCst), 1);

        clock.advance_millis(30_000);
        tracker.tick();
        assert_eq!(saves.load(Ordering::SeqCst), 2);
        tracker.tick();
        assert_eq!(saves.load(Ordering::SeqCst), 2);

        tracker.start();
        tracker.stop();
        assert_eq!(saves.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_stale_fix_rejected_against_host_clock() {
        let mut ctx = Context::new(TrackerConfig::default());
        ctx.attach_store(PointStore::in_memory().unwrap());
        let clock = Arc::new(HostClock::new());
        let mut tracker = Tracker::new(ctx, Arc::clone(&clock), MemoryState::new());
        tracker.recover();
        tracker.start();

        // Device up for an hour; the fix was taken a minute ago.
        clock.observe_elapsed_realtime_nanos(3_660_000_000_000);
        let now = clock.now_millis();
        let stale = Fix::new(Provider::Gps, LAT, LON, 5.0, now - 60_000, 3_600_000_000_000);
        assert_eq!(
            tracker.on_fix(stale),
            FixOutcome::Rejected(RejectReason::Stale { age_ms: 60_000 })
        );

        let fresh = Fix::new(Provider::Gps, LAT, LON, 5.0, now, 3_659_500_000_000);
        assert_eq!(tracker.on_fix(fresh), FixOutcome::Accepted);
        assert_eq!(tracker.context().store.count("myphone").unwrap(), 1);
    }

    #[test]
    fn test_rest_fixes_rejected() {
        let mut h = harness();
        h.tracker.start();
        assert_eq!(h.tracker.on_fix(h.fix(0.0, 15.0)), FixOutcome::Accepted);
        h.clock.advance_millis(1_000);
        let outcome = h.tracker.on_fix(h.fix(20.0, 15.0));
        assert!(matches!(
            outcome,
            FixOutcome::Rejected(RejectReason::NotDisplaced { .. })
        ));
        assert_eq!(h.stored(), 1);
    }

    #[test]
    fn test_stop_clears_history() {
        let mut h = harness();
        h.tracker.start();
        h.tracker.on_fix(h.fix(0.0, 15.0));
        h.tracker.stop();
        h.tracker.start();
        h.clock.advance_millis(1_000);
        // Would fail the displacement test if history survived.
        assert_eq!(h.tracker.on_fix(h.fix(5.0, 15.0)), FixOutcome::Accepted);
    }

    #[test]
    fn test_worse_fix_is_not_best() {
        let mut h = harness();
        h.tracker.start();
        h.tracker.on_fix(h.fix(0.0, 5.0));
        let mut worse = h.fix(200.0, 50.0);
        worse.provider = Provider::Network;
        worse.time -= 1_000;
        assert_eq!(h.tracker.on_fix(worse), FixOutcome::NotBest);
    }

    #[test]
    fn test_homepoint_suppresses_and_moves_to_front() {
        let mut h = harness();
        {
            let store = &mut h.tracker.context_mut().store;
            store
                .insert_homepoint(&Homepoint::new(1, "work", 40.0, -3.0, 100.0).unwrap())
                .unwrap();
            store
                .insert_homepoint(&Homepoint::new(2, "home", LAT, LON, 50.0).unwrap())
                .unwrap();
        }
        h.tracker.reload_homepoints();
        h.tracker.start();

        let outcome = h.tracker.on_fix(h.fix(10.0, 5.0));
        assert_eq!(
            outcome,
            FixOutcome::Rejected(RejectReason::AtHomepoint { id: 2, index: 1 })
        );
        assert_eq!(h.tracker.homepoints()[0].id, 2);
        assert_eq!(h.stored(), 0);
    }

    #[test]
    fn test_store_unavailable_is_not_an_error() {
        let mut h = harness();
        h.tracker.context_mut().close_database();
        h.tracker.start();
        assert_eq!(h.tracker.on_fix(h.fix(0.0, 5.0)), FixOutcome::Observed);
        assert!(h.tracker.is_recording());
    }

    #[test]
    fn test_commit_interval() {
        let mut h = harness();
        h.tracker.start();
        // First insert commits right away: nothing committed yet.
        h.tracker.on_fix(h.fix(0.0, 5.0));
        assert!(!h.tracker.context().store.in_transaction());

        h.clock.advance_millis(1_000);
        h.tracker.on_fix(h.fix(100.0, 5.0));
        assert!(h.tracker.context().store.in_transaction());

        h.clock.advance_millis(30_000);
        h.tracker.tick();
        assert!(!h.tracker.context().store.in_transaction());
        assert_eq!(h.tracker.stats().commits, 2);
    }

    #[test]
    fn test_permission_denied_then_granted() {
        let mut h = harness();
        let granted = Arc::new(AtomicBool::new(false));
        h.tracker.set_permission_check(Arc::clone(&granted));
        h.tracker.start();
        assert!(h.tracker.is_recording());
        assert!(!h.gps.is_attached());

        granted.store(true, Ordering::SeqCst);
        h.tracker.tick();
        assert!(h.gps.is_attached());
    }

    #[test]
    fn test_provider_disabled_and_reenabled() {
        let mut h = harness();
        h.tracker.start();
        h.gps.set_available(false);
        h.tracker.on_provider_changed(&Provider::Gps, false);
        assert_eq!(h.tracker.attached_sources(), 0);
        assert!(h.tracker.is_recording());

        h.gps.set_available(true);
        h.tracker.on_provider_changed(&Provider::Gps, true);
        assert!(h.gps.is_attached());
    }

    #[test]
    fn test_provider_lost_without_callback_reattached_by_tick() {
        let mut h = harness();
        h.tracker.start();
        h.gps.set_available(false);
        h.tracker.tick();
        assert_eq!(h.tracker.attached_sources(), 0);
        assert!(!h.gps.is_attached());

        h.gps.set_available(true);
        h.tracker.tick();
        assert_eq!(h.tracker.attached_sources(), 1);
        assert!(h.gps.is_attached());
        assert!(h.gps.push(h.fix(0.0, 5.0)));
        assert_eq!(h.tracker.pump(), 1);
        assert_eq!(h.stored(), 1);
    }

    #[test]
    fn test_provider_toggled_between_ticks_keeps_delivering() {
        let mut h = harness();
        h.tracker.start();
        h.gps.set_available(false);
        h.gps.set_available(true);
        for _ in 0..3 {
            h.tracker.tick();
        }
        assert!(h.gps.is_attached());
        assert_eq!(h.tracker.attached_sources(), 1);
        assert!(h.gps.push(h.fix(0.0, 5.0)));
        assert_eq!(h.tracker.tick(), 1);
        assert_eq!(h.stored(), 1);
    }

    #[test]
    fn test_apply_config_switches_providers() {
        let mut h = harness();
        h.tracker.start();
        let mut config = h.tracker.config().clone();
        config.use_gps = false;
        config.use_network = true;
        h.tracker.apply_config(config);
        assert!(!h.gps.is_attached());
        assert!(h.network.is_attached());
    }

    #[test]
    fn test_shutdown_keeps_recording_state() {
        let mut h = harness();
        h.tracker.start();
        h.tracker.on_fix(h.fix(0.0, 5.0));
        h.tracker.shutdown();
        assert!(!h.tracker.context().store.is_ready());
        assert!(!h.gps.is_attached());
        assert_eq!(h.state.snapshot().tracking_state, TrackingState::Recording);
    }
}
