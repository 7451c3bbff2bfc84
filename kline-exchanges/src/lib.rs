//! kline-exchanges
//!
//! HTTP adapters implementing `ExchangeAdapter` against each exchange's public
//! historical market-data endpoints. Every `fetch_page` call performs exactly one
//! request; throttling and retries live outside the adapters.
#![warn(missing_docs)]

use std::sync::Arc;

use kline_core::{Exchange, ExchangeAdapter, ExchangeConfig, KlineError};

mod binance;
mod bybit;
mod coinbase;
mod cryptocom;
mod http;
mod okx;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use coinbase::CoinbaseAdapter;
pub use cryptocom::CryptocomAdapter;
pub use okx::OkxAdapter;

/// Build the adapter for `exchange` against `config`.
///
/// # Errors
/// Returns `KlineError::InvalidArg` when the HTTP client cannot be built.
pub fn adapter_for(
    exchange: Exchange,
    config: ExchangeConfig,
) -> Result<Arc<dyn ExchangeAdapter>, KlineError> {
    Ok(match exchange {
        Exchange::Binance => Arc::new(BinanceAdapter::new(config)?),
        Exchange::Bybit => Arc::new(BybitAdapter::new(config)?),
        Exchange::Coinbase => Arc::new(CoinbaseAdapter::new(config)?),
        Exchange::Cryptocom => Arc::new(CryptocomAdapter::new(config)?),
        Exchange::Okx => Arc::new(OkxAdapter::new(config)?),
    })
}

/// One adapter per supported exchange, against production endpoints.
///
/// # Errors
/// Returns `KlineError::InvalidArg` when an HTTP client cannot be built.
pub fn production_adapters() -> Result<Vec<Arc<dyn ExchangeAdapter>>, KlineError> {
    Exchange::ALL
        .into_iter()
        .map(|ex| adapter_for(ex, ExchangeConfig::production(ex)))
        .collect()
}
