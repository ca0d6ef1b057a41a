use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::ratelimit::Service;

use super::retry::RetryPolicy;

/// Runtime settings of the item pipeline, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound for one rate-limiter wait and for one collaborator call.
    pub call_timeout: Duration,
    /// Continue with an empty image set when the image provider has nothing.
    pub allow_missing_images: bool,
    pub retry: HashMap<Service, RetryPolicy>,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            allow_missing_images: config.allow_missing_images,
            retry: Service::ALL
                .into_iter()
                .map(|svc| (svc, RetryPolicy::for_service(config, svc)))
                .collect(),
        }
    }

    pub fn retry_for(&self, service: Service) -> RetryPolicy {
        self.retry.get(&service).cloned().unwrap_or_default()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
