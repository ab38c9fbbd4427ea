//! Retention manager for cleaning up old samples.

use crate::db::{DbError, Store};

use std::sync::Arc;
use std::time::Duration;

/// Deletes samples that fell out of the retention horizon.
///
/// Runs as the last step of every probe cycle, so stale rows survive at
/// most one probe interval past the horizon.
pub struct RetentionManager {
    store: Arc<Store>,
}

impl RetentionManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Remove samples older than `now - horizon` and return how many went.
    pub fn prune(&self, now: i64, horizon: Duration) -> Result<usize, DbError> {
        let horizon_ms = i64::try_from(horizon.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(horizon_ms);
        let removed = self.store.prune_older_than(cutoff)?;

        if removed > 0 {
            let remaining = self.store.sample_count()?;
            tracing::info!(
                "RetentionManager: Removed {} samples older than {}, {} remain",
                removed,
                cutoff,
                remaining
            );
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ServiceSample, ServiceStatus};

    const HOUR: i64 = 3_600_000;

    #[test]
    fn test_prune_removes_expired_samples() {
        let store = Arc::new(Store::in_memory().unwrap());
        let now = 10 * HOUR;
        let old = ServiceSample {
            url: "https://a".to_string(),
            status: ServiceStatus::Online,
            response_time: Some(10),
            timestamp: now - 2 * HOUR,
        };
        let fresh = ServiceSample {
            timestamp: now - HOUR / 2,
            ..old.clone()
        };
        store.append_samples(&[old.clone(), fresh]).unwrap();

        let manager = RetentionManager::new(store.clone());
        assert_eq!(manager.prune(now, Duration::from_secs(3600)).unwrap(), 1);

        let remaining = store.query_range(Some("https://a"), 0).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|s| s.timestamp > old.timestamp));
        assert_eq!(store.sample_count().unwrap(), 1);
    }

    #[test]
    fn test_prune_with_huge_horizon_keeps_everything() {
        let store = Arc::new(Store::in_memory().unwrap());
        store
            .append_samples(&[ServiceSample {
                url: "https://a".to_string(),
                status: ServiceStatus::Offline,
                response_time: None,
                timestamp: 0,
            }])
            .unwrap();

        let manager = RetentionManager::new(store.clone());
        assert_eq!(manager.prune(HOUR, Duration::MAX).unwrap(), 0);
        assert_eq!(store.sample_count().unwrap(), 1);
    }
}
