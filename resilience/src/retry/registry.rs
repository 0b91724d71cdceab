//! Named circuit breakers, one per dependency.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus};
use crate::clock::Clock;
use crate::config::ResilienceConfig;
use crate::logging::StructuredLogger;

/// Lazily creates and memoizes one [`CircuitBreaker`] per dependency name.
pub struct CircuitBreakerRegistry {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: ResilienceConfig, clock: Arc<dyn Clock>, logger: StructuredLogger) -> Self {
        Self {
            config,
            clock,
            logger,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `name`, created on first use.
    ///
    /// The first call for a name fixes its settings: `config` if given, else
    /// the configured override for that dependency, else the default. Later
    /// calls return the existing breaker and ignore `config`.
    pub fn get(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock();
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }

        let config = config.unwrap_or_else(|| self.config.breaker_for(name));
        let breaker = Arc::new(CircuitBreaker::with_clock(
            name,
            config,
            Arc::clone(&self.clock),
            self.logger.clone(),
        ));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        tracing::debug!(dependency = %name, "registered circuit breaker");
        breaker
    }

    /// Force-close every registered breaker.
    pub fn reset_all(&self) {
        for breaker in self.lock().values() {
            breaker.reset();
        }
    }

    /// Status of every registered breaker, ordered by name.
    pub fn statuses(&self) -> BTreeMap<String, CircuitBreakerStatus> {
        self.lock()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.status()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retry::CircuitState;
    use pretty_assertions::assert_eq;

    fn registry(config: ResilienceConfig) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            config,
            Arc::new(ManualClock::new(0)),
            StructuredLogger::disabled(),
        )
    }

    #[test]
    fn first_config_wins() {
        let registry = registry(ResilienceConfig::default());
        let first = registry.get(
            "goat",
            Some(CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            }),
        );
        let second = registry.get(
            "goat",
            Some(CircuitBreakerConfig {
                failure_threshold: 9,
                ..Default::default()
            }),
        );

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn configured_overrides_apply() {
        let mut config = ResilienceConfig::default();
        config.circuit_breakers.insert(
            "stockx".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 10,
                ..Default::default()
            },
        );
        let registry = registry(config);

        assert_eq!(registry.get("stockx", None).config().failure_threshold, 10);
        assert_eq!(registry.get("flightclub", None).config().failure_threshold, 5);
    }

    #[test]
    fn reset_all_and_statuses() {
        let registry = registry(ResilienceConfig::default());
        registry.get("stockx", None).open();
        registry.get("goat", None).record_failure();

        let statuses = registry.statuses();
        assert_eq!(
            statuses.keys().collect::<Vec<_>>(),
            vec!["goat", "stockx"]
        );
        assert_eq!(statuses["stockx"].state, CircuitState::Open);
        assert_eq!(statuses["goat"].failures, 1);

        registry.reset_all();
        assert!(
            registry
                .statuses()
                .values()
                .all(|s| s.state == CircuitState::Closed && s.failures == 0)
        );
    }
}
