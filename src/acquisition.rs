//! Location acquisition state machine.
//!
//! The [`AcquisitionController`] owns one acquisition session at a time. A
//! session opens a high-accuracy watch on the device, runs every fix through the
//! [`SampleFilter`], and settles into a terminal [`AcquisitionState`] by one of
//! these routes:
//!
//! - a fix reaches the "good enough" accuracy and the watch stops early
//! - the watch window expires and the best fix seen is adopted
//! - nothing arrived, so the persisted last-good fix is shown instead
//! - nothing at all is known, so a single coarse network query is made
//! - the device reports an error (permission denial is final, signal errors
//!   go through the network query)
//!
//! Every accepted fix is pushed to the form through the injected
//! [`AcquisitionObserver`] and handed to the [`GeocodeScheduler`].

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::filter::{FilterConfig, RawFix, SampleFilter, SampleHistory, TrustTier};
use crate::geo::Coordinate;
use crate::position::{now_ms, PositionError, PositionOptions, PositionSource};
use crate::store::{KeyValueStore, LastGoodFix, DEFAULT_LAST_GOOD_KEY};

/// Where the session currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionState {
    Idle,
    Searching,
    Accurate,
    Inaccurate,
    Denied,
    Timeout,
    Unavailable,
    /// Presentation overlay only, see [`AcquisitionController::display_state`]
    Outdated,
}

impl AcquisitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Searching => "searching",
            AcquisitionState::Accurate => "accurate",
            AcquisitionState::Inaccurate => "inaccurate",
            AcquisitionState::Denied => "denied",
            AcquisitionState::Timeout => "timeout",
            AcquisitionState::Unavailable => "unavailable",
            AcquisitionState::Outdated => "outdated",
        }
    }

    /// A session that has settled on a result (good or bad)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AcquisitionState::Accurate
                | AcquisitionState::Inaccurate
                | AcquisitionState::Denied
                | AcquisitionState::Unavailable
        )
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-time messages surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    PermissionDenied,
    PositionUnavailable,
}

impl Advisory {
    pub fn message(&self) -> &'static str {
        match self {
            Advisory::PermissionDenied => {
                "Location permission denied. Please allow access to capture coordinates."
            }
            Advisory::PositionUnavailable => {
                "Could not determine your location. Please ensure location services are enabled, or enter the address manually."
            }
        }
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// The coordinate currently shown to the user
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixUpdate {
    pub coordinate: Coordinate,
    /// Absent when the coordinate came from the persisted last-good fix
    pub accuracy_meters: Option<f64>,
    pub timestamp_ms: i64,
    pub tier: TrustTier,
}

impl FixUpdate {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}

/// Receives acquisition progress. All methods default to no-ops.
pub trait AcquisitionObserver: Send + Sync {
    fn on_state(&self, _state: AcquisitionState) {}
    fn on_fix(&self, _update: &FixUpdate) {}
    fn on_advisory(&self, _advisory: Advisory) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AcquisitionObserver for NoopObserver {}

/// Seam between acquisition and reverse geocoding
pub trait GeocodeScheduler: Send + Sync {
    /// A new acquisition session started
    fn begin_session(&self) {}

    /// A new smoothed coordinate is on display
    fn schedule(&self, coordinate: Coordinate);
}

/// Timing and accuracy thresholds for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// How long the high-accuracy watch runs before settling
    pub watch_window_ms: u64,
    /// Accuracy that ends the watch early and counts as `accurate`
    pub good_enough_accuracy: f64,
    /// Fixes at least this accurate overwrite the persisted last-good fix
    pub last_good_accuracy: f64,
    /// Fixes older than this are presented as `outdated`
    pub outdated_after_ms: i64,
    /// Budget for the coarse network query
    pub fallback_timeout_ms: u64,
    /// Oldest cached position the network query may return
    pub fallback_max_age_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            watch_window_ms: 20_000,
            good_enough_accuracy: 10.0,
            last_good_accuracy: 25.0,
            outdated_after_ms: 60_000,
            fallback_timeout_ms: 15_000,
            fallback_max_age_ms: 600_000,
        }
    }
}

impl AcquisitionConfig {
    pub fn watch_window(&self) -> Duration {
        Duration::from_millis(self.watch_window_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn fallback_max_age(&self) -> Duration {
        Duration::from_millis(self.fallback_max_age_ms)
    }
}

/// Drives a location session from the first watch event to a terminal state
pub struct AcquisitionController {
    source: Arc<dyn PositionSource>,
    store: Arc<dyn KeyValueStore>,
    scheduler: Arc<dyn GeocodeScheduler>,
    observer: Arc<dyn AcquisitionObserver>,
    config: AcquisitionConfig,
    filter: SampleFilter,
    last_good_key: String,
    history: SampleHistory,
    state: AcquisitionState,
    current: Option<FixUpdate>,
}

impl AcquisitionController {
    pub fn new(
        source: Arc<dyn PositionSource>,
        store: Arc<dyn KeyValueStore>,
        scheduler: Arc<dyn GeocodeScheduler>,
    ) -> Self {
        Self {
            source,
            store,
            scheduler,
            observer: Arc::new(NoopObserver),
            config: AcquisitionConfig::default(),
            filter: SampleFilter::default(),
            last_good_key: DEFAULT_LAST_GOOD_KEY.to_string(),
            history: SampleHistory::new(),
            state: AcquisitionState::Idle,
            current: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AcquisitionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: AcquisitionConfig, filter: FilterConfig) -> Self {
        self.config = config;
        self.filter = SampleFilter::new(filter);
        self
    }

    pub fn with_last_good_key(mut self, key: impl Into<String>) -> Self {
        self.last_good_key = key.into();
        self
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// The fix currently on display, if any
    pub fn current_fix(&self) -> Option<&FixUpdate> {
        self.current.as_ref()
    }

    pub fn smoothed(&self) -> Option<Coordinate> {
        self.current.map(|c| c.coordinate)
    }

    pub fn history(&self) -> &SampleHistory {
        &self.history
    }

    /// Persisted last-good fix as currently stored
    pub fn last_good(&self) -> Option<LastGoodFix> {
        LastGoodFix::load(self.store.as_ref(), &self.last_good_key)
    }

    /// Trust tier of the displayed fix as of `now_ms`
    pub fn trust_tier(&self, now_ms: i64) -> Option<TrustTier> {
        self.current.map(|c| {
            TrustTier::classify(
                c.accuracy_meters.unwrap_or(f64::INFINITY),
                c.age_ms(now_ms),
                self.config.good_enough_accuracy,
                self.config.outdated_after_ms,
            )
        })
    }

    /// State as the form should present it: settled fixes older than the
    /// outdated threshold show as `outdated`. Never blocks submission.
    pub fn display_state(&self, now_ms: i64) -> AcquisitionState {
        match (self.state, self.current) {
            (AcquisitionState::Accurate | AcquisitionState::Inaccurate, Some(current))
                if current.age_ms(now_ms) > self.config.outdated_after_ms =>
            {
                AcquisitionState::Outdated
            }
            (state, _) => state,
        }
    }

    /// Run a full acquisition session and return the state it settled in.
    ///
    /// Any previous session's watch is gone by the time this is callable
    /// again, since the subscription lives only inside this call.
    pub async fn begin(&mut self) -> AcquisitionState {
        let session = Uuid::new_v4();
        info!("Starting location session {session}");

        self.history.clear();
        self.scheduler.begin_session();
        self.set_state(AcquisitionState::Searching);

        let window = self.config.watch_window();
        let mut watch = self.source.watch(PositionOptions::precise(window));
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        let mut best: Option<RawFix> = None;
        loop {
            // Deadline first so a chatty source cannot hold the window open
            tokio::select! {
                biased;
                _ = &mut deadline => {
                    debug!("Session {session}: watch window elapsed");
                    break;
                }
                event = watch.recv() => match event {
                    Some(Ok(fix)) => {
                        self.handle_fix(fix);
                        if best.is_none_or(|b| fix.effective_accuracy() < b.effective_accuracy()) {
                            best = Some(fix);
                        }
                        if fix.effective_accuracy() <= self.config.good_enough_accuracy {
                            info!(
                                "Session {session}: reached {:.1}m accuracy, stopping watch",
                                fix.effective_accuracy()
                            );
                            return self.settle(AcquisitionState::Accurate);
                        }
                    }
                    Some(Err(error)) => {
                        warn!("Session {session}: location error: {error}");
                        drop(watch);
                        return self.handle_failure(error).await;
                    }
                    None => {
                        debug!("Session {session}: watch ended before the window");
                        break;
                    }
                },
            }
        }

        drop(watch);
        self.on_window_expired(best).await
    }

    /// Feed one raw fix through the filter. Returns whether it was accepted.
    fn handle_fix(&mut self, fix: RawFix) -> bool {
        let outcome = self.filter.accept(&mut self.history, fix);
        if !outcome.accepted {
            debug!(
                "Rejected jump to {:.6}, {:.6} at {:.0}m accuracy",
                fix.lat,
                fix.lng,
                fix.effective_accuracy()
            );
            return false;
        }

        let coordinate = outcome.smoothed.unwrap_or_else(|| fix.coordinate());
        let accuracy = fix.effective_accuracy();
        let tier = TrustTier::classify(
            accuracy,
            now_ms() - fix.timestamp_ms,
            self.config.good_enough_accuracy,
            self.config.outdated_after_ms,
        );

        self.show(FixUpdate {
            coordinate,
            accuracy_meters: Some(fix.accuracy_meters).filter(|a| a.is_finite() && *a >= 0.0),
            timestamp_ms: fix.timestamp_ms,
            tier,
        });

        if accuracy <= self.config.last_good_accuracy {
            let last_good = LastGoodFix::new(coordinate, fix.timestamp_ms);
            if let Err(e) = last_good.save(self.store.as_ref(), &self.last_good_key) {
                warn!("Failed to persist last good fix: {e:#}");
            }
        }

        true
    }

    async fn on_window_expired(&mut self, best: Option<RawFix>) -> AcquisitionState {
        if let Some(best) = best {
            self.handle_fix(best);
            let state = if best.effective_accuracy() <= self.config.good_enough_accuracy {
                AcquisitionState::Accurate
            } else {
                AcquisitionState::Inaccurate
            };
            info!(
                "Settling on best fix of the window ({:.1}m): {state}",
                best.effective_accuracy()
            );
            return self.settle(state);
        }

        if let Some(last_good) = self.last_good() {
            info!(
                "No fix this session, showing last good fix from {}s ago",
                last_good.age_ms(now_ms()) / 1000
            );
            self.show(FixUpdate {
                coordinate: last_good.coordinate(),
                accuracy_meters: None,
                timestamp_ms: last_good.timestamp_ms,
                tier: TrustTier::classify(
                    f64::INFINITY,
                    last_good.age_ms(now_ms()),
                    self.config.good_enough_accuracy,
                    self.config.outdated_after_ms,
                ),
            });
            return self.settle(AcquisitionState::Inaccurate);
        }

        self.set_state(AcquisitionState::Timeout);
        self.network_fallback().await
    }

    async fn handle_failure(&mut self, error: PositionError) -> AcquisitionState {
        match error {
            PositionError::PermissionDenied => {
                self.set_state(AcquisitionState::Denied);
                self.observer.on_advisory(Advisory::PermissionDenied);
                AcquisitionState::Denied
            }
            PositionError::PositionUnavailable => {
                self.set_state(AcquisitionState::Unavailable);
                self.network_fallback().await
            }
            PositionError::Timeout => {
                self.set_state(AcquisitionState::Timeout);
                self.network_fallback().await
            }
            PositionError::Other(_) => self.give_up(),
        }
    }

    /// Single coarse query that may be answered from a cached network position
    async fn network_fallback(&mut self) -> AcquisitionState {
        let timeout = self.config.fallback_timeout();
        let options = PositionOptions::coarse(timeout, self.config.fallback_max_age());
        info!("Trying network-based location");

        let fix = match tokio::time::timeout(timeout, self.source.current_position(options)).await
        {
            Ok(Ok(fix)) => fix,
            Ok(Err(e)) => {
                warn!("Network fallback failed: {e}");
                return self.give_up();
            }
            Err(_) => {
                warn!("Network fallback timed out after {}ms", timeout.as_millis());
                return self.give_up();
            }
        };

        if !self.handle_fix(fix) && self.current.is_none() {
            return self.give_up();
        }

        let state = if fix.effective_accuracy() <= self.config.good_enough_accuracy {
            AcquisitionState::Accurate
        } else {
            AcquisitionState::Inaccurate
        };
        self.settle(state)
    }

    fn give_up(&mut self) -> AcquisitionState {
        self.set_state(AcquisitionState::Unavailable);
        self.observer.on_advisory(Advisory::PositionUnavailable);
        AcquisitionState::Unavailable
    }

    fn show(&mut self, update: FixUpdate) {
        self.current = Some(update);
        self.observer.on_fix(&update);
        self.scheduler.schedule(update.coordinate);
    }

    fn settle(&mut self, state: AcquisitionState) -> AcquisitionState {
        self.set_state(state);
        state
    }

    fn set_state(&mut self, state: AcquisitionState) {
        if self.state != state {
            debug!("Location state {} -> {}", self.state, state);
            self.state = state;
            self.observer.on_state(state);
        }
    }
}
