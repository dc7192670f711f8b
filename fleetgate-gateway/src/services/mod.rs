//! gRPC service implementations.

mod bootstrap;
mod management;
mod rate_limit;

pub use bootstrap::BootstrapService;
pub use management::ManagementService;
pub use rate_limit::{JoinRateLimiter, RateLimitInterceptor};
