//! Expiry policy and the clock it is evaluated against.
//!
//! Every expiry decision in the crate goes through [`ExpiryPolicy`]: the
//! download and info paths, and the reaper's re-check of the rows the
//! metadata store hands back.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Mutex;

use crate::models::blob_record::BlobRecord;

/// Default time-to-live: two hours.
pub const DEFAULT_TTL_SECS: i64 = 2 * 60 * 60;

/// Longest configurable time-to-live: ten years.
pub const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Source of "now" for the service and reaper.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to drive expiry in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = instant;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Fixed-TTL expiry rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    ttl: TimeDelta,
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_TTL_SECS))
    }
}

impl ExpiryPolicy {
    pub fn new(ttl: TimeDelta) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// `uploaded_at + ttl`, saturating at the end of representable time.
    pub fn compute_expiry(&self, uploaded_at: DateTime<Utc>) -> DateTime<Utc> {
        uploaded_at
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A record is still valid at its exact expiry instant.
    pub fn is_expired(&self, record: &BlobRecord, now: DateTime<Utc>) -> bool {
        now > record.expires_at
    }

    /// Anything stored before this instant has outlived every possible record.
    pub fn orphan_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record_at(uploaded_at: DateTime<Utc>, policy: &ExpiryPolicy) -> BlobRecord {
        BlobRecord {
            id: Uuid::new_v4(),
            filename: "a.txt".into(),
            size: 10,
            mime_type: "text/plain".into(),
            uploaded_at,
            expires_at: policy.compute_expiry(uploaded_at),
        }
    }

    #[test]
    fn default_ttl_is_two_hours() {
        let policy = ExpiryPolicy::default();
        let t = Utc::now();
        assert_eq!(policy.compute_expiry(t) - t, TimeDelta::seconds(7200));
    }

    #[test]
    fn valid_at_exact_expiry_instant() {
        let policy = ExpiryPolicy::default();
        let t = Utc::now();
        let record = record_at(t, &policy);

        assert!(!policy.is_expired(&record, t));
        assert!(!policy.is_expired(&record, t + TimeDelta::hours(2)));
        assert!(policy.is_expired(
            &record,
            t + TimeDelta::hours(2) + TimeDelta::nanoseconds(1)
        ));
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let policy = ExpiryPolicy::new(TimeDelta::MAX);
        let t = Utc::now();
        assert_eq!(policy.compute_expiry(t), DateTime::<Utc>::MAX_UTC);
        assert_eq!(policy.orphan_cutoff(t), DateTime::<Utc>::MIN_UTC);

        let record = record_at(t, &policy);
        assert!(!policy.is_expired(&record, t + TimeDelta::days(365 * 1000)));
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(TimeDelta::seconds(7201));
        assert_eq!(clock.now() - start, TimeDelta::seconds(7201));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
