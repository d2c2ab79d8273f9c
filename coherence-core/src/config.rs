//! Engine configuration

use crate::error::{CoherenceError, CoherenceResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconciliation sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the scheduled sweep task runs at all.
    pub enabled: bool,
    /// Interval between sweep passes.
    pub interval: Duration,
    /// Number of suspected orphans checked per chunk.
    pub chunk_size: usize,
    /// Upper bound on concurrent existence checks within a chunk.
    pub max_concurrent_checks: usize,
    /// Lifetime of the sweep lease.
    pub lease_ttl: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(24 * 60 * 60),
            chunk_size: 500,
            max_concurrent_checks: 4,
            lease_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl SweepConfig {
    /// Create a config for development (fast sweeps).
    pub fn development() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            chunk_size: 50,
            max_concurrent_checks: 2,
            lease_ttl: Duration::from_secs(120),
        }
    }
}

/// Cache engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of a cached record; the worst-case staleness ceiling.
    pub record_ttl: Duration,
    /// Lifetime of a tombstone.
    pub tombstone_ttl: Duration,
    /// Bound on every call to the source of record.
    pub upstream_timeout: Duration,
    /// Upper bound on how long the source of record takes to make a
    /// deletion visible to all readers.
    pub propagation_bound: Duration,
    /// Multiplier applied to `propagation_bound` to cap `tombstone_ttl`.
    pub tombstone_safety_factor: f64,
    pub sweep: SweepConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            record_ttl: Duration::from_secs(8 * 60 * 60),
            tombstone_ttl: Duration::from_secs(10 * 60),
            upstream_timeout: Duration::from_secs(10),
            propagation_bound: Duration::from_secs(5 * 60),
            tombstone_safety_factor: 3.0,
            sweep: SweepConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_propagation_bound(mut self, bound: Duration, safety_factor: f64) -> Self {
        self.propagation_bound = bound;
        self.tombstone_safety_factor = safety_factor;
        self
    }

    pub fn with_sweep(mut self, sweep: SweepConfig) -> Self {
        self.sweep = sweep;
        self
    }

    /// Largest tombstone TTL the propagation bound allows.
    pub fn max_tombstone_ttl(&self) -> Duration {
        self.propagation_bound.mul_f64(self.tombstone_safety_factor.max(0.0))
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `COHERENCE_RECORD_TTL_SECS`: Record TTL (default: 28800)
    /// - `COHERENCE_TOMBSTONE_TTL_SECS`: Tombstone TTL (default: 600)
    /// - `COHERENCE_UPSTREAM_TIMEOUT_MS`: Upstream call timeout (default: 10000)
    /// - `COHERENCE_PROPAGATION_BOUND_SECS`: Deletion propagation bound (default: 300)
    /// - `COHERENCE_TOMBSTONE_SAFETY_FACTOR`: Safety factor (default: 3.0)
    /// - `COHERENCE_SWEEP_ENABLED`: Run the scheduled sweep (default: true)
    /// - `COHERENCE_SWEEP_INTERVAL_SECS`: Sweep interval (default: 86400)
    /// - `COHERENCE_SWEEP_CHUNK_SIZE`: Orphans checked per chunk (default: 500)
    /// - `COHERENCE_SWEEP_MAX_CONCURRENT_CHECKS`: Concurrent checks (default: 4)
    /// - `COHERENCE_SWEEP_LEASE_TTL_SECS`: Sweep lease TTL (default: 1800)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            record_ttl: env_secs("COHERENCE_RECORD_TTL_SECS").unwrap_or(defaults.record_ttl),
            tombstone_ttl: env_secs("COHERENCE_TOMBSTONE_TTL_SECS").unwrap_or(defaults.tombstone_ttl),
            upstream_timeout: std::env::var("COHERENCE_UPSTREAM_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.upstream_timeout),
            propagation_bound: env_secs("COHERENCE_PROPAGATION_BOUND_SECS")
                .unwrap_or(defaults.propagation_bound),
            tombstone_safety_factor: std::env::var("COHERENCE_TOMBSTONE_SAFETY_FACTOR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.tombstone_safety_factor),
            sweep: SweepConfig {
                enabled: std::env::var("COHERENCE_SWEEP_ENABLED")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sweep.enabled),
                interval: env_secs("COHERENCE_SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep.interval),
                chunk_size: std::env::var("COHERENCE_SWEEP_CHUNK_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sweep.chunk_size),
                max_concurrent_checks: std::env::var("COHERENCE_SWEEP_MAX_CONCURRENT_CHECKS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.sweep.max_concurrent_checks),
                lease_ttl: env_secs("COHERENCE_SWEEP_LEASE_TTL_SECS").unwrap_or(defaults.sweep.lease_ttl),
            },
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(CoherenceError::Config) if invalid.
    ///
    /// Validates:
    /// - record, tombstone and upstream timeout durations are positive
    /// - tombstone_safety_factor >= 1.0
    /// - tombstone_ttl <= propagation_bound * tombstone_safety_factor
    /// - sweep chunk size, concurrency, interval and lease TTL are positive
    pub fn validate(&self) -> CoherenceResult<()> {
        for (field, value) in [
            ("record_ttl", self.record_ttl),
            ("tombstone_ttl", self.tombstone_ttl),
            ("upstream_timeout", self.upstream_timeout),
            ("sweep.interval", self.sweep.interval),
            ("sweep.lease_ttl", self.sweep.lease_ttl),
        ] {
            if value.is_zero() {
                return Err(invalid(field, format!("{value:?}"), format!("{field} must be positive")));
            }
        }

        if self.tombstone_safety_factor.is_nan() || self.tombstone_safety_factor < 1.0 {
            return Err(invalid(
                "tombstone_safety_factor",
                self.tombstone_safety_factor.to_string(),
                "tombstone_safety_factor must be at least 1.0",
            ));
        }

        if self.tombstone_ttl > self.max_tombstone_ttl() {
            return Err(invalid(
                "tombstone_ttl",
                format!("{:?}", self.tombstone_ttl),
                format!(
                    "tombstone_ttl must not exceed propagation_bound x safety factor ({:?})",
                    self.max_tombstone_ttl()
                ),
            ));
        }

        if self.sweep.chunk_size == 0 {
            return Err(invalid("sweep.chunk_size", "0", "sweep.chunk_size must be greater than 0"));
        }

        if self.sweep.max_concurrent_checks == 0 {
            return Err(invalid(
                "sweep.max_concurrent_checks",
                "0",
                "sweep.max_concurrent_checks must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Soft recommendations that do not block startup.
    pub fn advisories(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.sweep.enabled && self.tombstone_ttl >= self.sweep.interval {
            notes.push(format!(
                "tombstone_ttl ({:?}) should be shorter than the sweep interval ({:?})",
                self.tombstone_ttl, self.sweep.interval
            ));
        }
        if self.upstream_timeout >= self.record_ttl {
            notes.push(format!(
                "upstream_timeout ({:?}) is not shorter than record_ttl ({:?})",
                self.upstream_timeout, self.record_ttl
            ));
        }
        notes
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

fn invalid(field: &str, value: impl Into<String>, reason: impl Into<String>) -> CoherenceError {
    CoherenceError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.into(),
        reason: reason.into(),
    })
}
