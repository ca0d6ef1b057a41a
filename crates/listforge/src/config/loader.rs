use std::path::Path;

use crate::config::schema::{Config, ServiceLimit};
use crate::error::ConfigError;
use crate::ratelimit::Service;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.max_concurrent_jobs == 0 {
        return Err(ConfigError::Validation {
            message: "max_concurrent_jobs must be greater than 0".to_string(),
        });
    }

    if config.lease_ttl_secs == 0 {
        return Err(ConfigError::Validation {
            message: "lease_ttl_secs must be greater than 0".to_string(),
        });
    }

    if config.call_timeout_ms == 0 {
        return Err(ConfigError::Validation {
            message: "call_timeout_ms must be greater than 0".to_string(),
        });
    }

    if let Some(ref worker_id) = config.worker_id {
        if worker_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "worker_id must not be blank".to_string(),
            });
        }
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }
    if !(retry.multiplier >= 1.0 && retry.multiplier.is_finite()) {
        return Err(ConfigError::Validation {
            message: format!("retry.multiplier must be >= 1.0, got {}", retry.multiplier),
        });
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(ConfigError::Validation {
            message: "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
        });
    }

    for (name, limit) in &config.services {
        if name.parse::<Service>().is_err() {
            return Err(ConfigError::InvalidService {
                name: name.clone(),
                reason: format!(
                    "unknown service; expected one of {}",
                    Service::ALL.map(|s| s.as_str()).join(", ")
                ),
            });
        }
        validate_service_limit(name, limit)?;
    }

    Ok(())
}

fn validate_service_limit(name: &str, limit: &ServiceLimit) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidService {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if limit.requests == 0 {
        return Err(invalid("requests must be greater than 0"));
    }
    if limit.per_secs == 0 {
        return Err(invalid("per_secs must be greater than 0"));
    }
    if limit.burst == Some(0) {
        return Err(invalid("burst must be greater than 0"));
    }
    if limit.max_attempts == Some(0) {
        return Err(invalid("max_attempts must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.lease_ttl_secs, 300);
        assert_eq!(config.pipeline_epoch, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.allow_missing_images);
        assert_eq!(config.service_limit("metadata"), ServiceLimit::default());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "version": "1.0",
            "database_path": "/tmp/lf.db",
            "worker_id": "box-1",
            "max_concurrent_jobs": 4,
            "call_timeout_ms": 1500,
            "retry": { "max_attempts": 5, "base_delay_ms": 10, "max_delay_ms": 100, "multiplier": 3.0 },
            "services": {
                "metadata": { "requests": 10, "per_secs": 1 },
                "listing": { "requests": 2, "per_secs": 60, "burst": 1, "max_attempts": 6 }
            },
            "logging": { "level": "debug", "format": "json" }
        }"#;
        let config = load_config_from_str(json).unwrap();
        assert_eq!(config.worker_id.as_deref(), Some("box-1"));
        assert_eq!(config.resolve_worker_id(), "box-1");
        assert_eq!(config.call_timeout().as_millis(), 1500);
        assert_eq!(config.service_limit("listing").max_attempts, Some(6));
        assert_eq!(
            config.logging.format,
            crate::config::schema::LogFormat::Json
        );
        assert_eq!(
            config.database_path().unwrap(),
            std::path::PathBuf::from("/tmp/lf.db")
        );
    }

    #[test]
    fn test_rejects_unknown_version() {
        let err = load_config_from_str(r#"{ "version": "2.0" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_rejects_unknown_service() {
        let err = load_config_from_str(
            r#"{ "version": "1.0", "services": { "shipping": { "requests": 1 } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidService { ref name, .. } if name == "shipping"));
    }

    #[test]
    fn test_rejects_zero_budget() {
        let err = load_config_from_str(
            r#"{ "version": "1.0", "services": { "pricing": { "requests": 0 } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidService { .. }));
    }

    #[test]
    fn test_rejects_bad_retry() {
        let err = load_config_from_str(
            r#"{ "version": "1.0", "retry": { "max_attempts": 0 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));

        let err = load_config_from_str(
            r#"{ "version": "1.0", "retry": { "multiplier": 0.5 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let err = load_config_from_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listforge.json");
        std::fs::write(&path, r#"{ "version": "1.0", "pipeline_epoch": 7 }"#).unwrap();
        assert_eq!(load_config(&path).unwrap().pipeline_epoch, 7);

        let missing = load_config(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));
    }
}
