//! Handshake timing
//!
//! Only two things in the protocol time out:
//! - `connect_timeout_ms`: overall budget for the ping/pong handshake
//! - `liveness_interval_ms`: how often a connected target is checked for closure
//!
//! Pings are re-sent every `ping_interval_ms` until a pong arrives. Ordinary
//! requests have no timeout; they stay pending until answered or until the
//! channel closes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Handshake timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Interval between pings while connecting (default: 100)
    pub ping_interval_ms: u64,

    /// Overall handshake budget (default: 10000)
    pub connect_timeout_ms: u64,

    /// Interval between closed-target checks (default: 300)
    pub liveness_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 100,
            connect_timeout_ms: 10_000,
            liveness_interval_ms: 300,
        }
    }
}

impl TimeoutConfig {
    /// Validate timing bounds
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms > 600_000 {
            return Err(TimeoutValidationError::ConnectOutOfBounds {
                value: self.connect_timeout_ms,
            });
        }

        // ping_interval_ms must be in (0, connect_timeout_ms]
        if self.ping_interval_ms == 0 || self.ping_interval_ms > self.connect_timeout_ms {
            return Err(TimeoutValidationError::PingOutOfBounds {
                value: self.ping_interval_ms,
                max: self.connect_timeout_ms,
            });
        }

        if self.liveness_interval_ms == 0 {
            return Err(TimeoutValidationError::LivenessZero);
        }

        Ok(())
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

/// Timeout validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("connect_timeout_ms must be in (0, 600000], got {value}")]
    ConnectOutOfBounds { value: u64 },

    #[error("ping_interval_ms must be in (0, {max}], got {value}")]
    PingOutOfBounds { value: u64, max: u64 },

    #[error("liveness_interval_ms must be greater than 0")]
    LivenessZero,
}
