use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kline_core::{ExchangeAdapter, Page, PageRequest};
use kline_types::{AdapterCapabilities, DataKind, EndpointClass, KlineError, MarketType};

use crate::RateLimiterRegistry;

/// Adapter wrapper that admits every page fetch through the shared limiter for its
/// endpoint class and forwards server rate-limit hints back to that limiter.
///
/// The wrapper never retries; `RateLimited` still reaches the caller. When a call
/// timeout is set it bounds the exchange call only, not the wait for admission.
pub struct ThrottledAdapter {
    inner: Arc<dyn ExchangeAdapter>,
    limiters: Arc<RateLimiterRegistry>,
    call_timeout: Option<Duration>,
}

impl ThrottledAdapter {
    /// Wrap `inner`, drawing limiters from `limiters`.
    pub fn new(inner: Arc<dyn ExchangeAdapter>, limiters: Arc<RateLimiterRegistry>) -> Self {
        Self {
            inner,
            limiters,
            call_timeout: None,
        }
    }

    /// Bound each admitted call; an elapsed deadline surfaces as `Transient`.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Access the inner adapter.
    pub fn inner(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.inner
    }
}

#[async_trait]
impl ExchangeAdapter for ThrottledAdapter {
    fn capabilities(&self) -> &AdapterCapabilities {
        self.inner.capabilities()
    }

    fn endpoint_class(&self, kind: DataKind, market: MarketType) -> EndpointClass {
        self.inner.endpoint_class(kind, market)
    }

    async fn fetch_page(&self, req: &PageRequest) -> Result<Page, KlineError> {
        let class = self.inner.endpoint_class(req.kind, req.market_type());
        let limiter = self.limiters.get(self.inner.exchange(), class);
        let permit = limiter.acquire().await;
        let result = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.fetch_page(req))
                .await
                .unwrap_or_else(|_| {
                    Err(KlineError::transient(
                        self.inner.exchange().to_string(),
                        format!("call timed out after {limit:?}"),
                    ))
                }),
            None => self.inner.fetch_page(req).await,
        };
        limiter.release(permit);
        if let Err(KlineError::RateLimited { retry_after_ms, .. }) = &result {
            limiter.on_rate_limit_signal((*retry_after_ms).map(Duration::from_millis));
        }
        result
    }
}
