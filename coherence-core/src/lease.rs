//! Short-lived named leases for mutual exclusion of batch jobs.

use crate::entities::chrono_ttl;
use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease name used by the reconciliation sweep.
pub const SWEEP_LEASE: &str = "coherence.sweep";

/// A named lease held in the cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    pub name: String,
    pub holder: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LeaseData {
    pub fn new(name: impl Into<String>, holder: impl Into<String>, now: Timestamp, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            holder: holder.into(),
            acquired_at: now,
            expires_at: now + chrono_ttl(ttl),
        }
    }

    /// Check if the lease has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            let duration = self.expires_at - now;
            duration.to_std().ok()
        }
    }

    /// Whether `holder` may take this lease at `now`: it is expired or
    /// already theirs.
    pub fn is_available_to(&self, holder: &str, now: Timestamp) -> bool {
        self.is_expired(now) || self.holder == holder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let lease = LeaseData::new(SWEEP_LEASE, "worker-a", now, Duration::from_secs(60));
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + chrono::Duration::seconds(60)));
        assert_eq!(lease.remaining_duration(now), Some(Duration::from_secs(60)));
        assert_eq!(lease.remaining_duration(now + chrono::Duration::seconds(61)), None);
    }

    #[test]
    fn test_lease_availability() {
        let now = Utc::now();
        let lease = LeaseData::new(SWEEP_LEASE, "worker-a", now, Duration::from_secs(60));
        assert!(lease.is_available_to("worker-a", now));
        assert!(!lease.is_available_to("worker-b", now));
        assert!(lease.is_available_to("worker-b", now + chrono::Duration::seconds(60)));
    }
}
