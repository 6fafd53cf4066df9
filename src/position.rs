//! Interface to the device location service.
//!
//! A [`PositionSource`] exposes the two modes a handheld location provider
//! offers: a continuous high-accuracy watch and a one-shot query that may be
//! answered from a cached, network-derived position. Watch subscriptions are
//! plain channels; dropping the receiver ends the subscription.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::filter::RawFix;

/// Failure codes reported by the device location service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    /// The user declined the location permission
    #[error("location permission denied")]
    PermissionDenied,

    /// No positioning signal could be obtained
    #[error("position unavailable")]
    PositionUnavailable,

    /// No fix arrived within the provider's own timeout
    #[error("timed out waiting for a position")]
    Timeout,

    /// Anything the provider reports outside the standard codes
    #[error("location provider error: {0}")]
    Other(String),
}

/// A single item delivered on a watch subscription
pub type WatchEvent = Result<RawFix, PositionError>;

/// Request parameters passed through to the device provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Ask for satellite-grade positioning rather than network/cell estimates
    pub high_accuracy: bool,
    /// Upper bound the provider should spend on a single answer
    pub timeout: Duration,
    /// Oldest cached position the provider may return
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// Continuous high-accuracy watch with no cached answers
    pub fn precise(timeout: Duration) -> Self {
        Self {
            high_accuracy: true,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }

    /// Low-accuracy network query that tolerates a cached position
    pub fn coarse(timeout: Duration, maximum_age: Duration) -> Self {
        Self {
            high_accuracy: false,
            timeout,
            maximum_age,
        }
    }
}

/// Device location provider
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Open a continuous subscription. Events arrive in the order the device produced them.
    fn watch(&self, options: PositionOptions) -> mpsc::Receiver<WatchEvent>;

    /// Ask for a single position
    async fn current_position(&self, options: PositionOptions) -> Result<RawFix, PositionError>;
}

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
