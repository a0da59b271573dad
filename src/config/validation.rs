use crate::config::types::{
    ApiConfig, Config, CrawlConfig, DiscoveryConfig, RetryConfig, StorageConfig, Strategy,
};
use crate::ConfigError;
use crate::crawler::paginator::SEARCH_RESULT_CAP;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_crawl_config(&config.crawl, &config.api)?;
    validate_retry_config(&config.retry)?;
    validate_storage_config(&config.storage)?;
    validate_discovery_config(&config.discovery)?;
    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.endpoint)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{}' must use http or https",
            config.endpoint
        )));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_crawl_config(config: &CrawlConfig, api: &ApiConfig) -> Result<(), ConfigError> {
    if config.target_count == 0 {
        return Err(ConfigError::Validation(
            "target-count must be >= 1".to_string(),
        ));
    }

    if config.parallelism < 1 || config.parallelism > 32 {
        return Err(ConfigError::Validation(format!(
            "parallelism must be between 1 and 32, got {}",
            config.parallelism
        )));
    }

    if config.max_pages_per_partition < 1 {
        return Err(ConfigError::Validation(
            "max-pages-per-partition must be >= 1".to_string(),
        ));
    }

    let reachable = u64::from(config.max_pages_per_partition) * u64::from(api.page_size);
    if reachable > SEARCH_RESULT_CAP {
        tracing::warn!(
            "max-pages-per-partition * page-size = {} exceeds the search result cap of {}; \
             later pages will come back empty",
            reachable,
            SEARCH_RESULT_CAP
        );
    }

    if config.rate_limit_fallback_secs == 0 {
        return Err(ConfigError::Validation(
            "rate-limit-fallback-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "base-delay-ms must be >= 1".to_string(),
        ));
    }

    if config.max_delay_ms < config.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max-delay-ms ({}) must be >= base-delay-ms ({})",
            config.max_delay_ms, config.base_delay_ms
        )));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.batch_size < 1 || config.batch_size > 1_000 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be between 1 and 1000, got {}",
            config.batch_size
        )));
    }

    Ok(())
}

fn validate_discovery_config(config: &DiscoveryConfig) -> Result<(), ConfigError> {
    if matches!(config.strategy, Strategy::Stars | Strategy::CreatedStars) {
        validate_star_bounds(&config.star_bounds)?;
    }

    if matches!(config.strategy, Strategy::Created | Strategy::CreatedStars) {
        let (from, to) = match (config.created_from, config.created_to) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                return Err(ConfigError::InvalidDiscovery(
                    "created-from and created-to are required for date partitioning".to_string(),
                ))
            }
        };

        if from >= to {
            return Err(ConfigError::InvalidDiscovery(format!(
                "created-from ({}) must be before created-to ({})",
                from, to
            )));
        }

        if config.window_days < 1 {
            return Err(ConfigError::InvalidDiscovery(
                "window-days must be >= 1".to_string(),
            ));
        }
    }

    if config.base_query.contains('"') {
        return Err(ConfigError::InvalidDiscovery(
            "base-query cannot contain double quotes".to_string(),
        ));
    }

    Ok(())
}

/// Star bounds must be non-empty and strictly ascending so intervals stay disjoint
fn validate_star_bounds(bounds: &[u64]) -> Result<(), ConfigError> {
    if bounds.is_empty() {
        return Err(ConfigError::InvalidDiscovery(
            "star-bounds cannot be empty".to_string(),
        ));
    }

    if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ConfigError::InvalidDiscovery(format!(
            "star-bounds must be strictly ascending, got {:?}",
            bounds
        )));
    }

    Ok(())
}
