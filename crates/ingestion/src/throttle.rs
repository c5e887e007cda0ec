//! Ingestion throttling using token buckets
//!
//! The global throttle makes excess ingestions wait for capacity. The
//! per-document limit rejects repeat ingestions of one `source_id` instead.

use governor::{
    clock::{Clock, DefaultClock, QuantaClock},
    state::{InMemoryState, NotKeyed},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use ragforge_common::config::SourceRateLimit;
use ragforge_common::errors::{AppError, Result};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Rate limiter shared by every ingestion of one orchestrator
pub type IngestThrottle = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Rate limiter keyed on `source_id`
pub type SourceLimiter = DefaultKeyedRateLimiter<String>;

/// Create a throttle admitting `per_minute` ingestions per minute
///
/// Returns `None` when throttling is disabled or `per_minute` is zero.
pub fn create_throttle(per_minute: Option<u32>) -> Option<Arc<IngestThrottle>> {
    let per_minute = NonZeroU32::new(per_minute?)?;
    Some(throttle_with_quota(Quota::per_minute(per_minute)))
}

pub fn throttle_with_quota(quota: Quota) -> Arc<IngestThrottle> {
    Arc::new(RateLimiter::direct(quota))
}

/// Create a per-document limiter; `None` for a zero limit or period
pub fn create_source_limiter(config: &SourceRateLimit) -> Option<Arc<SourceLimiter>> {
    let burst = NonZeroU32::new(config.limit)?;
    let replenish = Duration::from_secs(config.period_secs) / config.limit;
    let quota = Quota::with_period(replenish)?.allow_burst(burst);
    Some(Arc::new(RateLimiter::keyed(quota)))
}

/// Take one ingestion of `source_id` from the limiter, or say when to retry
pub fn check_source(limiter: &SourceLimiter, source_id: &str) -> Result<()> {
    limiter
        .check_key(&source_id.to_string())
        .map_err(|not_until| AppError::SourceRateLimited {
            source_id: source_id.to_string(),
            retry_after: not_until.wait_time_from(DefaultClock::default().now()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_disabled_throttle() {
        assert!(create_throttle(None).is_none());
        assert!(create_throttle(Some(0)).is_none());
    }

    #[test]
    fn test_quota_admits_burst_then_waits() {
        let throttle = create_throttle(Some(2)).unwrap();
        assert!(throttle.check().is_ok());
        assert!(throttle.check().is_ok());
        assert!(throttle.check().is_err());
    }

    #[test]
    fn test_source_limit_is_per_document() {
        let config = SourceRateLimit { limit: 1, period_secs: 4 * 3600 };
        let limiter = create_source_limiter(&config).unwrap();

        assert_ok!(check_source(&limiter, "a.pdf"));
        let err = assert_err!(check_source(&limiter, "a.pdf"));
        match err {
            AppError::SourceRateLimited { source_id, retry_after } => {
                assert_eq!(source_id, "a.pdf");
                assert!(retry_after > Duration::from_secs(3600));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_ok!(check_source(&limiter, "b.pdf"));
    }

    #[test]
    fn test_zero_source_limit_disabled() {
        assert!(create_source_limiter(&SourceRateLimit { limit: 0, period_secs: 60 }).is_none());
        assert!(create_source_limiter(&SourceRateLimit { limit: 1, period_secs: 0 }).is_none());
    }
}
