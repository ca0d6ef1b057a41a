use std::time::Duration;

use crate::collaborators::CollaboratorError;
use crate::config::{Config, RetryConfig};
use crate::ratelimit::Service;

/// Bounded exponential backoff for transient collaborator failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            multiplier: retry.multiplier,
        }
    }

    /// Global policy with the per-service attempt cap applied.
    pub fn for_service(config: &Config, service: Service) -> Self {
        let mut policy = Self::from_config(&config.retry);
        if let Some(max) = config.service_limit(service.as_str()).max_attempts {
            policy.max_attempts = max.max(1);
        }
        policy
    }

    /// Whether another attempt is allowed after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32, error: &CollaboratorError) -> bool {
        error.is_transient() && attempts < self.max_attempts
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based). A remote `retry_after` hint raises the delay but never past
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &CollaboratorError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let backoff = if scaled.is_finite() && scaled < self.max_delay.as_millis() as f64 {
            Duration::from_millis(scaled as u64)
        } else {
            self.max_delay
        };

        match error.retry_after() {
            Some(hint) => backoff.max(hint).min(self.max_delay),
            None => backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceLimit;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy();
        let err = CollaboratorError::transient("503");
        assert_eq!(p.delay_for(1, &err), Duration::from_millis(100));
        assert_eq!(p.delay_for(2, &err), Duration::from_millis(200));
        assert_eq!(p.delay_for(3, &err), Duration::from_millis(400));
        assert_eq!(p.delay_for(10, &err), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_after_hint_raises_delay() {
        let p = policy();
        let hinted = CollaboratorError::rate_limited(Duration::from_millis(700));
        assert_eq!(p.delay_for(1, &hinted), Duration::from_millis(700));
        let huge = CollaboratorError::rate_limited(Duration::from_secs(60));
        assert_eq!(p.delay_for(1, &huge), Duration::from_millis(1000));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let p = policy();
        assert!(p.should_retry(1, &CollaboratorError::transient("timeout")));
        assert!(!p.should_retry(4, &CollaboratorError::transient("timeout")));
        assert!(!p.should_retry(1, &CollaboratorError::NotFound));
        assert!(!p.should_retry(1, &CollaboratorError::Invalid("bad".into())));
    }

    #[test]
    fn test_per_service_override() {
        let mut config = Config::default();
        config.services.insert(
            "listing".to_string(),
            ServiceLimit {
                max_attempts: Some(7),
                ..ServiceLimit::default()
            },
        );
        assert_eq!(RetryPolicy::for_service(&config, Service::Listing).max_attempts, 7);
        assert_eq!(RetryPolicy::for_service(&config, Service::Metadata).max_attempts, 3);
    }
}
