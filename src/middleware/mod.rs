// HTTP middleware modules

pub mod auth;
pub mod auth_middleware;
pub mod client_ip;
pub mod correlation;

pub use auth::AuthenticatedPrincipal;
pub use auth_middleware::authorization_filter;
pub use client_ip::{ClientIpResolver, RateLimitKeyResolver};
pub use correlation::{correlation_middleware, RequestContext, CORRELATION_HEADER};
