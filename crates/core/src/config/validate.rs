use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Orchestrator concurrency is at least 1
/// - Relay chunk width, rotation threshold and attempt count are at least 1
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.orchestrator.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.concurrency cannot be 0".to_string(),
        ));
    }

    if config.relay.chunk_width == 0 {
        return Err(ConfigError::ValidationError(
            "relay.chunk_width cannot be 0".to_string(),
        ));
    }

    if config.relay.rotation_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "relay.rotation_threshold cannot be 0".to_string(),
        ));
    }

    if config.relay.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "relay.max_attempts cannot be 0".to_string(),
        ));
    }

    Ok(())
}
