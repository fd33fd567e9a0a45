//! Service configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sexton_gc::{EmptyRegistryPolicy, PruneConfig};
use sexton_wire::DeletionPacketEncoder;
use std::time::Duration;

/// Configuration for the deletion service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    /// How far behind a session's cursor each query starts (in microseconds).
    ///
    /// Must be non-zero: a deletion stamped in the same microsecond as a
    /// flush snapshot is only picked up by a query that reaches back past it.
    pub skew_tolerance_us: u64,
    /// Upper bound on the size of one deletion packet.
    pub max_packet_bytes: usize,
    /// Flags byte written into every packet header.
    pub packet_flags: u8,
    /// How often pending deletions are flushed (in milliseconds).
    pub dispatch_interval_ms: u64,
    /// How often tombstones are collected (in milliseconds).
    pub prune_interval_ms: u64,
    /// Cursor lag after which a session is reported as stalled (in milliseconds).
    pub stall_warning_after_ms: u64,
    /// What a prune does while no session is connected.
    pub empty_registry_policy: EmptyRegistryPolicy,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            skew_tolerance_us: 50_000,
            max_packet_bytes: 1400,
            packet_flags: 0,
            dispatch_interval_ms: 16,
            prune_interval_ms: 1000,
            stall_warning_after_ms: 30_000,
            empty_registry_policy: EmptyRegistryPolicy::ForgetAll,
        }
    }
}

impl DeletionConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DeletionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that the configuration can drive a service.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.encoder()?;
        if self.skew_tolerance_us == 0 {
            return Err(ConfigError::ZeroSkewTolerance);
        }
        if self.dispatch_interval_ms == 0 {
            return Err(ConfigError::ZeroDispatchInterval);
        }
        if self.prune_interval_ms == 0 {
            return Err(ConfigError::ZeroPruneInterval);
        }
        Ok(())
    }

    /// Build the packet encoder this configuration describes.
    pub fn encoder(&self) -> Result<DeletionPacketEncoder, ConfigError> {
        Ok(DeletionPacketEncoder::new(self.max_packet_bytes)?)
    }

    pub fn prune_config(&self) -> PruneConfig {
        PruneConfig {
            empty_registry_policy: self.empty_registry_policy,
            stall_warning_after: Duration::from_millis(self.stall_warning_after_ms),
        }
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }
}

/// Builder for deletion configuration.
pub struct DeletionConfigBuilder {
    config: DeletionConfig,
}

impl DeletionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DeletionConfig::default(),
        }
    }

    pub fn skew_tolerance(mut self, micros: u64) -> Self {
        self.config.skew_tolerance_us = micros;
        self
    }

    pub fn max_packet_bytes(mut self, bytes: usize) -> Self {
        self.config.max_packet_bytes = bytes;
        self
    }

    pub fn packet_flags(mut self, flags: u8) -> Self {
        self.config.packet_flags = flags;
        self
    }

    pub fn dispatch_interval(mut self, ms: u64) -> Self {
        self.config.dispatch_interval_ms = ms;
        self
    }

    pub fn prune_interval(mut self, ms: u64) -> Self {
        self.config.prune_interval_ms = ms;
        self
    }

    pub fn stall_warning_after(mut self, ms: u64) -> Self {
        self.config.stall_warning_after_ms = ms;
        self
    }

    pub fn empty_registry_policy(mut self, policy: EmptyRegistryPolicy) -> Self {
        self.config.empty_registry_policy = policy;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<DeletionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for DeletionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
