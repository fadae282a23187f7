// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Timing configuration for the communication stack
//!
//! All values are in milliseconds, a zero task timeout disables the timer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stack configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub coordinator: CoordinatorConfig,
    pub api: ApiConfig,
}

/// Transport manager timeouts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Interval after which a device that has not re-advertised is lost
    pub lost_device_ms: u64,
    /// Connection and GATT negotiation timeout
    pub connection_timeout_ms: u64,
    /// Per-write timeout
    pub send_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            lost_device_ms: 10_000,
            connection_timeout_ms: 15_000,
            send_timeout_ms: 5_000,
        }
    }
}

impl TransportConfig {
    pub fn lost_device(&self) -> Duration {
        Duration::from_millis(self.lost_device_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Coordinator timeouts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Timeout for each transfer phase (write, read)
    pub transfer_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}

/// Device API task timeouts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Timeout for requests not requiring user interaction
    pub request_timeout_ms: u64,
    /// Timeout for the attestation check on connection
    pub attestation_timeout_ms: u64,
    /// Timeout for requests that may wait on the user (PIN, signing)
    pub user_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            attestation_timeout_ms: 5_000,
            user_timeout_ms: 0,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn attestation_timeout(&self) -> Duration {
        Duration::from_millis(self.attestation_timeout_ms)
    }

    pub fn user_timeout(&self) -> Duration {
        Duration::from_millis(self.user_timeout_ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_defaults() {
        let c = Config::default();

        assert_eq!(c.transport.lost_device(), Duration::from_secs(10));
        assert_eq!(c.transport.connection_timeout(), Duration::from_secs(15));
        assert_eq!(c.transport.send_timeout(), Duration::from_secs(5));
        assert_eq!(c.coordinator.transfer_timeout(), Duration::from_secs(5));
        assert_eq!(c.api.attestation_timeout(), Duration::from_secs(5));
        assert!(c.api.user_timeout().is_zero());
    }

    #[test]
    fn config_partial_json() {
        let c: Config = serde_json::from_str(r#"{ "api": { "user_timeout_ms": 60000 } }"#).unwrap();

        assert_eq!(c.api.user_timeout(), Duration::from_secs(60));
        assert_eq!(c.api.request_timeout_ms, ApiConfig::default().request_timeout_ms);
        assert_eq!(c.transport, TransportConfig::default());
    }
}
