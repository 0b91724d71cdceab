use crate::config::error::{ConfigError, Result};
use crate::config::loader::ResilienceConfig;
use crate::retry::CircuitBreakerConfig;

/// Validate a loaded configuration.
///
/// Collects every problem instead of stopping at the first one, so a single
/// error lists all offending fields.
pub fn validate(config: &ResilienceConfig) -> Result<()> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    if retry.backoff_multiplier < 1.0 {
        errors.push(format!(
            "retry.backoff_multiplier must be >= 1.0 (got {})",
            retry.backoff_multiplier
        ));
    }
    if retry.max_delay_ms < retry.initial_delay_ms {
        errors.push(format!(
            "retry.max_delay_ms ({}) must be >= retry.initial_delay_ms ({})",
            retry.max_delay_ms, retry.initial_delay_ms
        ));
    }

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    let mut names: Vec<_> = config.circuit_breakers.keys().collect();
    names.sort();
    for name in names {
        if let Some(breaker) = config.circuit_breakers.get(name) {
            check_breaker(&format!("circuit_breakers.{name}"), breaker, &mut errors);
        }
    }

    if config.logging.buffer_capacity == 0 {
        errors.push("logging.buffer_capacity must be at least 1".to_string());
    }
    if config.metrics.capacity == 0 {
        errors.push("metrics.capacity must be at least 1".to_string());
    }
    if config.metrics.slow_query_threshold_ms < 0.0 {
        errors.push("metrics.slow_query_threshold_ms must not be negative".to_string());
    }

    if errors.is_empty() {
        return Ok(());
    }

    Err(ConfigError::Invalid(format!(
        "Configuration validation failed ({} error{}):\n  - {}",
        errors.len(),
        if errors.len() == 1 { "" } else { "s" },
        errors.join("\n  - ")
    )))
}

fn check_breaker(path: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<String>) {
    if breaker.failure_threshold == 0 {
        errors.push(format!("{path}.failure_threshold must be at least 1"));
    }
    if breaker.success_threshold == 0 {
        errors.push(format!("{path}.success_threshold must be at least 1"));
    }
    if breaker.timeout_ms == 0 {
        errors.push(format!("{path}.timeout_ms must be greater than 0"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&ResilienceConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ResilienceConfig::default();
        config.retry.initial_delay_ms = 10_000;
        config.logging.buffer_capacity = 0;
        config.circuit_breakers.insert(
            "goat".to_string(),
            CircuitBreakerConfig {
                timeout_ms: 0,
                ..Default::default()
            },
        );

        let msg = validate(&config).unwrap_err().to_string();
        assert!(msg.contains("(3 errors)"), "got: {msg}");
        assert!(msg.contains("retry.max_delay_ms"));
        assert!(msg.contains("circuit_breakers.goat.timeout_ms"));
        assert!(msg.contains("logging.buffer_capacity"));
    }
}
