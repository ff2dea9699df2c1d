use crate::config::types::{Config, CrawlerConfig, NetworkConfig, OutputConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_network_config(&config.network)?;
    validate_output_config(&config.output)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_slots < 1 || config.max_slots > 1024 {
        return Err(ConfigError::Validation(format!(
            "max_slots must be between 1 and 1024, got {}",
            config.max_slots
        )));
    }

    if config.min_pool_size < 1 {
        return Err(ConfigError::Validation(format!(
            "min_pool_size must be >= 1, got {}",
            config.min_pool_size
        )));
    }

    if config.max_pool_size <= config.min_pool_size {
        return Err(ConfigError::Validation(format!(
            "max_pool_size ({}) must be greater than min_pool_size ({})",
            config.max_pool_size, config.min_pool_size
        )));
    }

    if config.fetch_ttl_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "fetch_ttl_ms must be >= 100ms, got {}ms",
            config.fetch_ttl_ms
        )));
    }

    if config.pull_batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "pull_batch_size must be >= 1, got {}",
            config.pull_batch_size
        )));
    }

    if config.pull_batch_size > config.max_pool_size {
        return Err(ConfigError::Validation(format!(
            "pull_batch_size ({}) must not exceed max_pool_size ({})",
            config.pull_batch_size, config.max_pool_size
        )));
    }

    Ok(())
}

/// Validates network configuration
///
/// Either a ready proxy or a control daemon that can create one is required.
fn validate_network_config(config: &NetworkConfig) -> Result<(), ConfigError> {
    if config.proxy_url.is_none() && config.control_url.is_none() {
        return Err(ConfigError::Validation(
            "network needs either proxy_url or control_url".to_string(),
        ));
    }

    if let Some(proxy_url) = &config.proxy_url {
        let url = Url::parse(proxy_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy_url: {}", e)))?;
        if !matches!(url.scheme(), "socks5" | "socks5h" | "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "proxy_url scheme must be socks5, socks5h, http or https, got '{}'",
                url.scheme()
            )));
        }
    }

    if let Some(control_url) = &config.control_url {
        Url::parse(control_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid control_url: {}", e)))?;

        if config.instances < 1 {
            return Err(ConfigError::Validation(
                "instances must be >= 1 when control_url is set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.retry_attempts < 1 {
        return Err(ConfigError::Validation(
            "retry_attempts must be >= 1".to_string(),
        ));
    }
    Ok(())
}
