//! Per-service token buckets.
//!
//! Each external service gets its own limiter, so a slow marketplace budget
//! never throttles metadata lookups.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use governor::{Quota, RateLimiter};

use crate::config::{Config, ServiceLimit};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// The external services the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Metadata,
    Images,
    Pricing,
    Listing,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::Metadata,
        Service::Images,
        Service::Pricing,
        Service::Listing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Metadata => "metadata",
            Service::Images => "images",
            Service::Pricing => "pricing",
            Service::Listing => "listing",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| format!("unknown service '{}'", s))
    }
}

/// Grant to make one call. Carries how long the caller was suspended.
#[derive(Debug, Clone)]
pub struct Permit {
    pub service: String,
    pub waited: Duration,
}

fn quota_for(limit: &ServiceLimit) -> Quota {
    let requests = NonZeroU32::new(limit.requests).unwrap_or(NonZeroU32::MIN);
    let burst = limit
        .burst
        .and_then(NonZeroU32::new)
        .unwrap_or(requests);
    let interval = Duration::from_secs(limit.per_secs.max(1));
    let period = interval / requests.get();

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(requests))
        .allow_burst(burst)
}

/// Independent limiters keyed by service name.
///
/// Names without configuration get a limiter of one request per second on
/// first use.
pub struct RateLimiters {
    limits: HashMap<String, ServiceLimit>,
    limiters: Mutex<HashMap<String, Arc<DirectRateLimiter>>>,
}

impl RateLimiters {
    pub fn new(limits: HashMap<String, ServiceLimit>) -> Self {
        Self {
            limits,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.services.clone())
    }

    fn limiter(&self, name: &str) -> Arc<DirectRateLimiter> {
        let mut limiters = match self.limiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        limiters
            .entry(name.to_string())
            .or_insert_with(|| {
                let limit = self.limits.get(name).cloned().unwrap_or_default();
                tracing::debug!(
                    service = name,
                    requests = limit.requests,
                    per_secs = limit.per_secs,
                    "Creating rate limiter"
                );
                Arc::new(RateLimiter::direct(quota_for(&limit)))
            })
            .clone()
    }

    /// Waits until `service_name` has capacity for one more call.
    pub async fn acquire(&self, service_name: &str) -> Permit {
        let limiter = self.limiter(service_name);
        let started = Instant::now();
        limiter.until_ready().await;
        let waited = started.elapsed();
        if waited > Duration::from_millis(50) {
            tracing::debug!(service = service_name, ?waited, "Throttled by rate limiter");
        }
        Permit {
            service: service_name.to_string(),
            waited,
        }
    }

    /// Takes a permit only if one is available right now.
    pub fn try_acquire(&self, service_name: &str) -> Option<Permit> {
        self.limiter(service_name).check().ok().map(|_| Permit {
            service: service_name.to_string(),
            waited: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(requests: u32, per_secs: u64) -> ServiceLimit {
        ServiceLimit {
            requests,
            per_secs,
            burst: None,
            max_attempts: None,
        }
    }

    #[test]
    fn test_service_names() {
        for svc in Service::ALL {
            assert_eq!(svc.as_str().parse::<Service>().unwrap(), svc);
        }
        assert!("shipping".parse::<Service>().is_err());
    }

    #[test]
    fn test_budget_is_enforced_per_service() {
        let limiters = RateLimiters::new(HashMap::from([
            ("metadata".to_string(), limit(2, 60)),
            ("listing".to_string(), limit(1, 60)),
        ]));

        assert!(limiters.try_acquire("metadata").is_some());
        assert!(limiters.try_acquire("metadata").is_some());
        assert!(limiters.try_acquire("metadata").is_none());

        // listing has its own bucket
        assert!(limiters.try_acquire("listing").is_some());
        assert!(limiters.try_acquire("listing").is_none());
    }

    #[test]
    fn test_unconfigured_service_gets_default_budget() {
        let limiters = RateLimiters::new(HashMap::new());
        assert!(limiters.try_acquire("pricing").is_some());
        assert!(limiters.try_acquire("pricing").is_none());
    }

    #[tokio::test]
    async fn test_acquire_suspends_until_capacity() {
        let limiters = RateLimiters::new(HashMap::from([(
            "images".to_string(),
            ServiceLimit {
                requests: 20,
                per_secs: 1,
                burst: Some(1),
                max_attempts: None,
            },
        )]));

        limiters.acquire("images").await;
        let permit = limiters.acquire("images").await;
        assert_eq!(permit.service, "images");
        assert!(permit.waited >= Duration::from_millis(20));
    }
}
