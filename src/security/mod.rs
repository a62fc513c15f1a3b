//! Request admission.

pub mod rate_limit;

pub use rate_limit::{AppRateLimiter, rate_limit_middleware};
