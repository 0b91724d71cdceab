//! Composition root for the resilience core.
//!
//! One [`ResilienceContext`] per application (or per test) owns every shared
//! piece of state: the logger buffer, the breaker registry and the query
//! metrics ring. Handlers receive it explicitly instead of reaching for globals.

use std::sync::Arc;

use solebox_feedback::{LogSink, NullSink};

use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceConfig;
use crate::logging::StructuredLogger;
use crate::metrics::DatabaseMetrics;
use crate::retry::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, RetryEngine};

pub struct ResilienceContext {
    config: ResilienceConfig,
    logger: StructuredLogger,
    breakers: CircuitBreakerRegistry,
    retry: RetryEngine,
    metrics: DatabaseMetrics,
}

impl ResilienceContext {
    /// Context that discards flushed log batches and reads the system clock.
    pub fn new(config: ResilienceConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ResilienceConfig) -> ResilienceContextBuilder {
        ResilienceContextBuilder {
            config,
            sink: Arc::new(NullSink),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn retry(&self) -> &RetryEngine {
        &self.retry
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Shorthand for `breakers().get(name, config)`.
    pub fn breaker(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        self.breakers.get(name, config)
    }

    pub fn metrics(&self) -> &DatabaseMetrics {
        &self.metrics
    }
}

impl Drop for ResilienceContext {
    fn drop(&mut self) {
        self.logger.flush();
    }
}

pub struct ResilienceContextBuilder {
    config: ResilienceConfig,
    sink: Arc<dyn LogSink>,
    clock: Arc<dyn Clock>,
}

impl ResilienceContextBuilder {
    /// Where flushed log batches go.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Time source for breaker deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> ResilienceContext {
        let logger = StructuredLogger::new(&self.config, self.sink);
        let breakers =
            CircuitBreakerRegistry::new(self.config.clone(), self.clock, logger.clone());
        let retry = RetryEngine::new(logger.clone(), self.config.retry.clone());
        let metrics = DatabaseMetrics::new(self.config.metrics.clone(), logger.clone());

        ResilienceContext {
            config: self.config,
            logger,
            breakers,
            retry,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retry::CircuitState;
    use pretty_assertions::assert_eq;
    use solebox_feedback::MemorySink;

    #[test]
    fn contexts_are_isolated() {
        let first = ResilienceContext::new(ResilienceConfig::default());
        let second = ResilienceContext::new(ResilienceConfig::default());

        first.breaker("stockx", None).open();
        first.metrics().record_query("get_item", 5.0, None);

        assert_eq!(first.breaker("stockx", None).state(), CircuitState::Open);
        assert_eq!(second.breaker("stockx", None).state(), CircuitState::Closed);
        assert!(second.metrics().get_all_metrics().is_empty());
    }

    #[test]
    fn builder_wires_clock_and_config() {
        let clock = ManualClock::new(5_000);
        let mut config = ResilienceConfig::default();
        config.retry.max_retries = 1;
        let ctx = ResilienceContext::builder(config)
            .with_clock(Arc::new(clock.clone()))
            .build();

        assert_eq!(ctx.retry().defaults().max_retries, 1);
        let breaker = ctx.breaker("goat", None);
        breaker.open();
        assert_eq!(breaker.status().next_retry_time, Some(35_000));
    }

    #[test]
    fn drop_flushes_buffered_entries() {
        let sink = MemorySink::new();
        {
            let ctx = ResilienceContext::builder(ResilienceConfig::default())
                .with_sink(Arc::new(sink.clone()))
                .build();
            ctx.logger().info("scrape started", None);
        }
        assert_eq!(sink.entry_count(), 1);
    }
}
