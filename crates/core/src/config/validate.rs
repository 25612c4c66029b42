use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Tool path is set and timeouts are non-zero
/// - Cooldown window covers a full tool invocation
/// - Retry limit and page size are non-zero
/// - Sweep concurrency is at least one
/// - Download base URL is http(s)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.acme.tool_path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "acme.tool_path cannot be empty".to_string(),
        ));
    }

    if config.acme.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "acme.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.lifecycle.cooldown_secs < config.acme.timeout_secs {
        return Err(ConfigError::ValidationError(format!(
            "lifecycle.cooldown_secs ({}) must be >= acme.timeout_secs ({})",
            config.lifecycle.cooldown_secs, config.acme.timeout_secs
        )));
    }

    if config.lifecycle.page_size == 0 {
        return Err(ConfigError::ValidationError(
            "lifecycle.page_size cannot be 0".to_string(),
        ));
    }

    if config.lifecycle.retry_limit == 0 {
        return Err(ConfigError::ValidationError(
            "lifecycle.retry_limit cannot be 0".to_string(),
        ));
    }

    if config.sweep.max_concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "sweep.max_concurrency cannot be 0".to_string(),
        ));
    }

    if config.dns.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "dns.timeout_secs cannot be 0".to_string(),
        ));
    }

    let url = &config.export.download_base_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "export.download_base_url must be an http(s) URL, got {}",
            url
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LifecycleConfig, SweepConfig};

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_cooldown_shorter_than_tool_timeout_fails() {
        let config = Config {
            lifecycle: LifecycleConfig {
                cooldown_secs: 60,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("cooldown_secs"));
    }

    #[test]
    fn test_zero_concurrency_fails() {
        let config = Config {
            sweep: SweepConfig {
                max_concurrency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_non_http_download_url_fails() {
        let mut config = Config::default();
        config.export.download_base_url = "ftp://files.example.com".to_string();
        assert!(validate_config(&config).is_err());
    }
}
