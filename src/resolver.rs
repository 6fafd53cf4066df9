//! Reverse geocoding of the displayed coordinate.
//!
//! The resolver is scheduled on every accepted smoothed coordinate. It ignores
//! jitter within a few meters of the last scheduled coordinate, coalesces rapid
//! updates behind a short debounce, and then looks the coordinate up:
//!
//! 1. the primary provider, bounded by its own timeout
//! 2. the secondary provider on any primary failure or empty result
//! 3. the raw coordinate pair when both fail
//!
//! Nearby landmarks are looked up alongside and appended to the result.
//! Provider failures never reach the caller.
//!
//! The composed text lands in the address field unless the user has typed
//! their own address there. Responses for a coordinate that has since been
//! superseded are dropped.

use futures::future;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::acquisition::GeocodeScheduler;
use crate::format::{compose_with_nearby, format_address, format_coordinates};
use crate::geo::Coordinate;
use crate::geocode::AddressProvider;
use crate::poi::NearbyPoiEnricher;

/// Composed address for a coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub text: String,
    pub source_coordinate: Coordinate,
}

/// Timing and jitter settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    /// Per-provider lookup timeout
    pub timeout: Duration,
    pub debounce: Duration,
    /// Coordinates closer than this to the last scheduled one are ignored
    pub min_move_meters: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            debounce: Duration::from_millis(250),
            min_move_meters: 10.0,
        }
    }
}

/// Receives addresses written to the address field
pub trait AddressObserver: Send + Sync {
    fn on_address(&self, _address: &ResolvedAddress) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAddressObserver;

impl AddressObserver for NoopAddressObserver {}

#[derive(Debug, Default)]
struct ResolverState {
    last_scheduled: Option<Coordinate>,
    /// Bumped on every accepted schedule; a debounced task only runs if it is still current
    epoch: u64,
    pending: Option<JoinHandle<()>>,
    /// Last automatically composed text, applied or not
    last_auto_text: Option<String>,
    resolved: Option<ResolvedAddress>,
    /// Contents of the address field
    field: String,
    manual: bool,
}

/// Debounced, multi-provider reverse geocoder feeding the address field
#[derive(Clone)]
pub struct ReverseGeocodeResolver {
    primary: Arc<dyn AddressProvider>,
    secondary: Option<Arc<dyn AddressProvider>>,
    enricher: Option<NearbyPoiEnricher>,
    observer: Arc<dyn AddressObserver>,
    config: ResolverConfig,
    state: Arc<Mutex<ResolverState>>,
}

impl ReverseGeocodeResolver {
    pub fn new(primary: Arc<dyn AddressProvider>) -> Self {
        Self {
            primary,
            secondary: None,
            enricher: None,
            observer: Arc::new(NoopAddressObserver),
            config: ResolverConfig::default(),
            state: Arc::new(Mutex::new(ResolverState::default())),
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn AddressProvider>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_enricher(mut self, enricher: NearbyPoiEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AddressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current contents of the address field
    pub fn current_address(&self) -> String {
        self.lock().field.clone()
    }

    /// Latest automatically composed address, even if it was not applied
    pub fn resolved(&self) -> Option<ResolvedAddress> {
        self.lock().resolved.clone()
    }

    pub fn is_manual(&self) -> bool {
        self.lock().manual
    }

    /// The user typed into the address field. Automatic results stop
    /// overwriting it until the next acquisition session.
    pub fn user_edited_address(&self, text: impl Into<String>) {
        let mut state = self.lock();
        state.manual = true;
        state.field = text.into();
    }

    /// Queue a lookup for `coordinate` after the debounce delay.
    ///
    /// Returns `false` when the coordinate is within the jitter radius of the
    /// last scheduled one and nothing was queued.
    pub fn schedule_lookup(&self, coordinate: Coordinate) -> bool {
        let mut state = self.lock();

        if let Some(last) = state.last_scheduled {
            let moved = last.distance_to(&coordinate);
            if moved < self.config.min_move_meters {
                debug!("Skipping lookup for {coordinate}, moved only {moved:.1}m");
                return false;
            }
        }

        state.last_scheduled = Some(coordinate);
        state.epoch += 1;
        let epoch = state.epoch;

        let this = self.clone();
        state.pending = Some(tokio::spawn(async move {
            this.run_debounced(coordinate, epoch).await;
        }));
        true
    }

    async fn run_debounced(self, coordinate: Coordinate, epoch: u64) {
        tokio::time::sleep(self.config.debounce).await;

        if self.lock().epoch != epoch {
            debug!("Lookup for {coordinate} superseded during debounce");
            return;
        }

        let resolved = self.resolve_now(coordinate).await;
        self.apply(resolved);
    }

    /// Wait for the most recently queued lookup to finish
    pub async fn wait_idle(&self) {
        loop {
            let Some(handle) = self.lock().pending.take() else {
                return;
            };
            if let Err(e) = handle.await {
                warn!("Address lookup task failed: {e}");
            }
        }
    }

    /// Resolve a coordinate immediately, without debounce or applying the result
    pub async fn resolve_now(&self, coordinate: Coordinate) -> ResolvedAddress {
        let (base, nearby) =
            future::join(self.lookup_base(coordinate), self.nearby_text(coordinate)).await;

        ResolvedAddress {
            text: compose_with_nearby(&base, &nearby),
            source_coordinate: coordinate,
        }
    }

    async fn lookup_base(&self, coordinate: Coordinate) -> String {
        if let Some(text) = self.try_provider(self.primary.as_ref(), coordinate).await {
            return text;
        }

        if let Some(secondary) = &self.secondary {
            if let Some(text) = self.try_provider(secondary.as_ref(), coordinate).await {
                return text;
            }
        }

        info!("No address available for {coordinate}, using coordinates");
        format_coordinates(coordinate)
    }

    async fn try_provider(
        &self,
        provider: &dyn AddressProvider,
        coordinate: Coordinate,
    ) -> Option<String> {
        match tokio::time::timeout(self.config.timeout, provider.reverse(coordinate)).await {
            Ok(Ok(payload)) => {
                let text = format_address(&payload);
                if text.is_none() {
                    debug!("{} returned nothing usable for {coordinate}", provider.name());
                }
                text
            }
            Ok(Err(e)) => {
                warn!("{} lookup failed: {e:#}", provider.name());
                None
            }
            Err(_) => {
                warn!(
                    "{} lookup timed out after {}ms",
                    provider.name(),
                    self.config.timeout.as_millis()
                );
                None
            }
        }
    }

    async fn nearby_text(&self, coordinate: Coordinate) -> String {
        match &self.enricher {
            Some(enricher) => enricher.nearby_text(coordinate).await,
            None => String::new(),
        }
    }

    /// Publish a finished lookup. Returns whether the address field changed.
    fn apply(&self, resolved: ResolvedAddress) -> bool {
        let mut state = self.lock();

        if state.last_scheduled != Some(resolved.source_coordinate) {
            debug!(
                "Discarding stale address for {}",
                resolved.source_coordinate
            );
            return false;
        }

        if state.last_auto_text.as_deref() == Some(resolved.text.as_str()) {
            debug!("Address unchanged, not reapplying");
            return false;
        }

        state.last_auto_text = Some(resolved.text.clone());
        state.resolved = Some(resolved.clone());

        if state.manual && !state.field.trim().is_empty() {
            info!("Keeping manually entered address");
            return false;
        }

        state.field = resolved.text.clone();
        drop(state);

        self.observer.on_address(&resolved);
        true
    }
}

impl GeocodeScheduler for ReverseGeocodeResolver {
    fn begin_session(&self) {
        self.lock().manual = false;
    }

    fn schedule(&self, coordinate: Coordinate) {
        self.schedule_lookup(coordinate);
    }
}
