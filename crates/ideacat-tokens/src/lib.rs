//! Token counting, cost estimation and rate-limit pacing
//!
//! Everything here is pure computation; nothing performs I/O.

pub mod error;
pub mod estimator;
pub mod pricing;
pub mod rate_limit;

pub use error::{Result, TokenError};
pub use estimator::{Encoding, MessageOverhead, ResponseEstimate, TokenEstimator};
pub use pricing::{ModelCatalog, ModelPrice, ModelSpec};
pub use rate_limit::{RateLimits, rate_limit_delay};
