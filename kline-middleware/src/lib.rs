//! kline-middleware
//!
//! Rate limiting for exchange adapters.
//!
//! - [`RateLimiter`]: sliding-window throttle for one `(exchange, endpoint-class)` budget.
//! - [`RateLimiterRegistry`]: shares one limiter per budget across every job.
//! - [`ThrottledAdapter`]: wraps an adapter so each page fetch is admitted by its limiter.

mod rate_limit;
mod registry;
mod throttle;

pub use crate::rate_limit::{Permit, RateLimiter, SlidingWindow};
pub use crate::registry::RateLimiterRegistry;
pub use crate::throttle::ThrottledAdapter;
