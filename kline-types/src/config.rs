//! Resolved configuration consumed by the ingestion core.
//!
//! The core never reads configuration files; callers resolve credentials, base URLs,
//! and limits elsewhere and hand over these structs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::market::Exchange;

/// Sliding-window ceiling for one `(exchange, endpoint-class)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests admitted within any window.
    pub limit: u32,
    /// Length of the sliding window.
    pub window: Duration,
    /// Optional cap on concurrently outstanding requests.
    pub max_in_flight: Option<u32>,
    /// Cooldown applied after a rate-limit signal that carries no retry hint.
    pub default_cooldown: Duration,
    /// How long grants stay evenly spaced (`window / limit`) after a cooldown.
    pub penalty: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(1),
            max_in_flight: None,
            default_cooldown: Duration::from_secs(5),
            penalty: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    /// Conservative ceilings derived from each exchange's published public limits.
    #[must_use]
    pub fn published(exchange: Exchange) -> Self {
        let (limit, window) = match exchange {
            // 6000 weight/min, klines cost 2; keep well under.
            Exchange::Binance => (1_000, Duration::from_secs(60)),
            Exchange::Bybit => (10, Duration::from_secs(1)),
            Exchange::Coinbase => (10, Duration::from_secs(1)),
            Exchange::Cryptocom => (50, Duration::from_secs(1)),
            // history-candles: 20 requests per 2 seconds.
            Exchange::Okx => (20, Duration::from_secs(2)),
        };
        Self {
            limit,
            window,
            ..Self::default()
        }
    }
}

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    pub min_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor applied after each failed attempt (>= 1).
    pub factor: u32,
    /// Random jitter percentage [0, 100] added to each delay.
    pub jitter_percent: u8,
    /// Total attempts per page, including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 500,
            max_backoff_ms: 30_000,
            factor: 2,
            jitter_percent: 20,
            max_attempts: 5,
        }
    }
}

/// HTTP endpoints and timeout for one exchange adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Base URL for spot market data.
    pub spot_base_url: String,
    /// Base URL for futures market data (equal to spot on most exchanges).
    pub futures_base_url: String,
    /// Timeout applied by the HTTP client to each request.
    pub request_timeout: Duration,
}

impl ExchangeConfig {
    /// Public production endpoints.
    #[must_use]
    pub fn production(exchange: Exchange) -> Self {
        let (spot, futures) = match exchange {
            Exchange::Binance => ("https://api.binance.com", "https://fapi.binance.com"),
            Exchange::Bybit => ("https://api.bybit.com", "https://api.bybit.com"),
            Exchange::Coinbase => (
                "https://api.exchange.coinbase.com",
                "https://api.exchange.coinbase.com",
            ),
            Exchange::Cryptocom => ("https://api.crypto.com", "https://api.crypto.com"),
            Exchange::Okx => ("https://www.okx.com", "https://www.okx.com"),
        };
        Self {
            spot_base_url: spot.to_string(),
            futures_base_url: futures.to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Point both markets at one base URL (test servers, proxies).
    pub fn with_base_url(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            spot_base_url: base.clone(),
            futures_base_url: base,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Orchestrator-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Backoff applied to transient page failures.
    pub retry: RetryConfig,
    /// Deadline for a single adapter call; exceeding it counts as a transient failure.
    pub call_timeout: Duration,
    /// Suspension applied after `RateLimited` when the exchange sends no hint.
    pub rate_limit_cooldown: Duration,
    /// How many times gaps found after a run are backfilled before giving up.
    pub max_backfill_rounds: u32,
    /// Clamp job ranges so the still-forming bar is never requested.
    pub closed_bars_only: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(15),
            rate_limit_cooldown: Duration::from_secs(5),
            max_backfill_rounds: 1,
            closed_bars_only: true,
        }
    }
}
