//! Scripted position source for replaying recorded or hand-written fix sequences.
//!
//! Used by the `locate` command to drive the pipeline without a device, and by
//! tests to reproduce specific signal conditions (jitter, teleports, permission
//! errors, silent windows).

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::filter::RawFix;
use crate::position::{now_ms, PositionError, PositionOptions, PositionSource, WatchEvent};

/// Position portion of a scripted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    /// How old the fix already is when delivered
    #[serde(default)]
    pub age_ms: i64,
}

/// Error codes a script can inject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedError {
    Denied,
    Unavailable,
    Timeout,
}

impl From<ScriptedError> for PositionError {
    fn from(e: ScriptedError) -> Self {
        match e {
            ScriptedError::Denied => PositionError::PermissionDenied,
            ScriptedError::Unavailable => PositionError::PositionUnavailable,
            ScriptedError::Timeout => PositionError::Timeout,
        }
    }
}

/// One step of a script: wait, then deliver a fix or an error (or nothing)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedEvent {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<ScriptedFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptedError>,
}

impl ScriptedEvent {
    pub fn fix(delay_ms: u64, lat: f64, lng: f64, accuracy_meters: f64) -> Self {
        Self {
            delay_ms,
            fix: Some(ScriptedFix {
                lat,
                lng,
                accuracy_meters,
                age_ms: 0,
            }),
            error: None,
        }
    }

    pub fn error(delay_ms: u64, error: ScriptedError) -> Self {
        Self {
            delay_ms,
            fix: None,
            error: Some(error),
        }
    }

    /// Materialise the event, stamping fixes with the current time minus their age
    fn materialise(&self) -> Option<WatchEvent> {
        if let Some(error) = self.error {
            return Some(Err(error.into()));
        }
        self.fix.as_ref().map(|f| {
            Ok(RawFix::new(
                f.lat,
                f.lng,
                f.accuracy_meters,
                now_ms() - f.age_ms,
            ))
        })
    }
}

/// Full script: the watch stream plus the answer to a one-shot query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub watch: Vec<ScriptedEvent>,
    #[serde(default)]
    pub one_shot: Option<ScriptedEvent>,
}

impl ReplayScript {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fix script from {}", path.display()))?;

        serde_yaml::from_str(&yaml)
            .with_context(|| format!("Failed to parse fix script from {}", path.display()))
    }
}

/// Counters describing how the pipeline used the scripted source
#[derive(Debug, Default)]
pub struct ReplayStats {
    watch_calls: AtomicUsize,
    delivered: AtomicUsize,
    cancelled: AtomicBool,
    one_shot_calls: AtomicUsize,
    last_one_shot: Mutex<Option<PositionOptions>>,
}

impl ReplayStats {
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Watch events actually handed to the subscriber
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Whether the subscriber dropped its watch
    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn one_shot_calls(&self) -> usize {
        self.one_shot_calls.load(Ordering::SeqCst)
    }

    pub fn last_one_shot_options(&self) -> Option<PositionOptions> {
        self.last_one_shot.lock().ok().and_then(|guard| *guard)
    }
}

/// [`PositionSource`] that plays back a [`ReplayScript`] in real (or paused) tokio time
pub struct ScriptedPositionSource {
    script: ReplayScript,
    stats: Arc<ReplayStats>,
}

impl ScriptedPositionSource {
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script,
            stats: Arc::new(ReplayStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ReplayStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl PositionSource for ScriptedPositionSource {
    fn watch(&self, _options: PositionOptions) -> mpsc::Receiver<WatchEvent> {
        self.stats.watch_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        let events = self.script.watch.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(event.delay_ms)) => {}
                    _ = tx.closed() => {
                        stats.cancelled.store(true, Ordering::SeqCst);
                        return;
                    }
                }

                let Some(item) = event.materialise() else {
                    continue;
                };
                stats.delivered.fetch_add(1, Ordering::SeqCst);
                if tx.send(item).await.is_err() {
                    stats.delivered.fetch_sub(1, Ordering::SeqCst);
                    stats.cancelled.store(true, Ordering::SeqCst);
                    return;
                }
            }

            // A real watch stays open until the subscriber lets go
            tx.closed().await;
            debug!("Scripted watch closed by subscriber");
            stats.cancelled.store(true, Ordering::SeqCst);
        });

        rx
    }

    async fn current_position(&self, options: PositionOptions) -> Result<RawFix, PositionError> {
        self.stats.one_shot_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.stats.last_one_shot.lock() {
            *last = Some(options);
        }

        let Some(event) = &self.script.one_shot else {
            return Err(PositionError::PositionUnavailable);
        };

        let delay = Duration::from_millis(event.delay_ms);
        if delay > options.timeout {
            tokio::time::sleep(options.timeout).await;
            return Err(PositionError::Timeout);
        }
        tokio::time::sleep(delay).await;

        event
            .materialise()
            .unwrap_or(Err(PositionError::PositionUnavailable))
    }
}
