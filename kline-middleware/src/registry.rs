use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use kline_types::{EndpointClass, Exchange, RateLimitConfig};

use crate::RateLimiter;

/// Shared limiters keyed by `(exchange, endpoint-class)`.
///
/// Every adapter and job resolving the same pair receives the same instance, so the
/// window ceiling holds across concurrent jobs.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    exchange_configs: HashMap<Exchange, RateLimitConfig>,
    class_configs: HashMap<(Exchange, EndpointClass), RateLimitConfig>,
    limiters: Mutex<HashMap<(Exchange, EndpointClass), Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    /// Registry using each exchange's published limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the limits of every endpoint class on `exchange`.
    #[must_use]
    pub fn with_exchange(mut self, exchange: Exchange, config: RateLimitConfig) -> Self {
        self.exchange_configs.insert(exchange, config);
        self
    }

    /// Override the limits of one endpoint class.
    #[must_use]
    pub fn with_class(
        mut self,
        exchange: Exchange,
        class: EndpointClass,
        config: RateLimitConfig,
    ) -> Self {
        self.class_configs.insert((exchange, class), config);
        self
    }

    /// Configuration that applies to `(exchange, class)`.
    #[must_use]
    pub fn config_for(&self, exchange: Exchange, class: EndpointClass) -> RateLimitConfig {
        self.class_configs
            .get(&(exchange, class))
            .or_else(|| self.exchange_configs.get(&exchange))
            .cloned()
            .unwrap_or_else(|| RateLimitConfig::published(exchange))
    }

    /// The shared limiter for `(exchange, class)`, created on first use.
    pub fn get(&self, exchange: Exchange, class: EndpointClass) -> Arc<RateLimiter> {
        let mut map = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry((exchange, class)).or_insert_with(|| {
            Arc::new(RateLimiter::new(
                exchange,
                class,
                self.config_for(exchange, class),
            ))
        }))
    }
}
