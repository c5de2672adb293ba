// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::config::settings::RateLimitingSettings;
use crate::domain::models::rate_limit::{Admission, DomainRateState};
use crate::domain::services::rate_limiting_service::{RateLimitError, RateLimiter};
use crate::utils::clock::Clock;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// 进程内令牌桶限流器
///
/// 每个域名一个桶，桶状态由各自的互斥锁保护，不同域名之间没有共享锁
pub struct LocalRateLimiter {
    buckets: DashMap<String, Arc<Mutex<DomainRateState>>>,
    settings: RateLimitingSettings,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    /// 创建本地限流器
    ///
    /// # 参数
    ///
    /// * `settings` - 限流配置（默认桶参数与按域名覆盖）
    /// * `clock` - 时钟
    pub fn new(settings: RateLimitingSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            settings,
            clock,
        }
    }

    fn bucket(&self, domain: &str) -> Arc<Mutex<DomainRateState>> {
        self.buckets
            .entry(domain.to_string())
            .or_insert_with(|| {
                let (capacity, rate) = self.settings.bucket_for(domain);
                Arc::new(Mutex::new(DomainRateState::new(
                    domain,
                    capacity,
                    rate,
                    self.settings.jitter_factor(),
                    self.clock.now(),
                )))
            })
            .clone()
    }
}

#[async_trait]
impl RateLimiter for LocalRateLimiter {
    async fn admit(&self, domain: &str) -> Result<Admission, RateLimitError> {
        let domain = domain.to_ascii_lowercase();
        let bucket = self.bucket(&domain);
        let now = self.clock.now();

        let result = bucket.lock().admit(now);
        match result {
            Ok(()) => Ok(Admission::allowed()),
            Err(until) => {
                let admission = Admission::denied_until(until, now);
                metrics::counter!("crawlq_rate_limit_denied_total").increment(1);
                debug!(
                    domain = %domain,
                    retry_after_ms = admission.retry_after.as_millis() as u64,
                    "Domain rate limited"
                );
                Ok(admission)
            }
        }
    }

    async fn snapshot(&self) -> Result<Vec<DomainRateState>, RateLimitError> {
        let now = self.clock.now();
        Ok(self
            .buckets
            .iter()
            .map(|entry| {
                let mut state = entry.value().lock().clone();
                state.refill(now);
                state
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{DomainOverride, RateLimiterBackendKind};
    use crate::utils::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::time::Duration;

    fn settings(burst: u32, rps: f64, jitter_percent: f64) -> RateLimitingSettings {
        RateLimitingSettings {
            backend: RateLimiterBackendKind::Local,
            burst,
            requests_per_second: rps,
            jitter_percent,
            overrides: HashMap::new(),
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
    }

    #[tokio::test]
    async fn test_burst_then_deny_then_refill() {
        let clock = clock();
        let limiter = LocalRateLimiter::new(settings(2, 1.0, 0.0), clock.clone());

        assert!(limiter.admit("a.test").await.unwrap().allowed);
        assert!(limiter.admit("a.test").await.unwrap().allowed);

        let denied = limiter.admit("a.test").await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_secs(1));

        clock.advance(chrono::Duration::seconds(1));
        assert!(limiter.admit("a.test").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_jitter_stays_within_bounds() {
        let clock = clock();
        let limiter = LocalRateLimiter::new(settings(1, 1.0, 20.0), clock.clone());
        assert!(limiter.admit("a.test").await.unwrap().allowed);

        for _ in 0..20 {
            let denied = limiter.admit("a.test").await.unwrap();
            assert!(!denied.allowed);
            assert!(denied.retry_after >= Duration::from_secs(1));
            assert!(denied.retry_after < Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn test_denied_requests_share_the_domain_deadline() {
        let clock = clock();
        let limiter = LocalRateLimiter::new(settings(1, 1.0, 50.0), clock.clone());
        assert!(limiter.admit("a.test").await.unwrap().allowed);

        let first = limiter.admit("a.test").await.unwrap();
        let deadline = first.not_before.unwrap();
        clock.advance(chrono::Duration::milliseconds(300));
        let second = limiter.admit("a.test").await.unwrap();
        assert!(!second.allowed);
        assert_eq!(second.not_before, Some(deadline));
        assert_eq!(
            first.retry_after - second.retry_after,
            Duration::from_millis(300)
        );
    }

    #[tokio::test]
    async fn test_domains_are_isolated() {
        let clock = clock();
        let limiter = LocalRateLimiter::new(settings(1, 0.5, 0.0), clock.clone());

        assert!(limiter.admit("a.test").await.unwrap().allowed);
        assert!(!limiter.admit("a.test").await.unwrap().allowed);
        assert!(limiter.admit("b.test").await.unwrap().allowed);
        assert!(limiter.admit("B.TEST").await.is_ok());
    }

    #[tokio::test]
    async fn test_override_applies_per_domain() {
        let clock = clock();
        let mut cfg = settings(1, 1.0, 0.0);
        cfg.overrides.insert(
            "big.test".to_string(),
            DomainOverride {
                burst: Some(3),
                requests_per_second: None,
            },
        );
        let limiter = LocalRateLimiter::new(cfg, clock.clone());

        for _ in 0..3 {
            assert!(limiter.admit("big.test").await.unwrap().allowed);
        }
        assert!(!limiter.admit("big.test").await.unwrap().allowed);

        let mut snapshot = limiter.snapshot().await.unwrap();
        snapshot.sort_by(|a, b| a.domain.cmp(&b.domain));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].capacity, 3.0);
    }
}
