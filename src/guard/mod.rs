//! Admission control in front of externally-metered calls.

pub mod rate_limit;

pub use rate_limit::{Admission, RateLimiter};
