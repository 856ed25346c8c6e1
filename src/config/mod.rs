// Policy configuration modules

pub mod rate_limit;
pub mod scope_policy;

pub use rate_limit::{RateLimitSettings, RateLimitStrategy};
pub use scope_policy::{ScopePolicy, ScopePolicyError};
