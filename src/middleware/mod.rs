//! Pipeline stages.
//!
//! Each module provides one [`crate::pipeline::Stage`] implementation for a
//! cross-cutting concern. The order they run in is decided by
//! [`crate::startup::standard_pipeline`], not here.

pub mod body;
pub mod cookies;
pub mod cors;
pub mod dispatch;
pub mod errors;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod static_assets;
pub mod trim;
pub mod unknown_route;

pub use body::BodyDecoderStage;
pub use cookies::CookieStage;
pub use cors::CorsStage;
pub use dispatch::RouteDispatchStage;
pub use errors::{ErrorReporter, ErrorTranslator, TracingReporter};
pub use ip::{ClientIpStage, TrustedProxies};
pub use rate_limit::{RateLimitStage, RateLimiter, Throttle};
pub use security_headers::SecurityHeadersStage;
pub use static_assets::{AllowList, StaticAssetGate};
pub use trim::TrimStage;
pub use unknown_route::UnknownRouteStage;
