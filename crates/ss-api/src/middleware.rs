//! second-serve/crates/ss-api/src/middleware.rs
//!
//! Middleware for logging and cross-origin access.

use actix_cors::Cors;
use actix_web::middleware::Logger;

// Returns the standard request logger:
// remote-ip "request-line" status-code response-size "referrer" "user-agent"
pub fn standard_middleware() -> Logger {
    Logger::default()
}

// Configures CORS (Cross-Origin Resource Sharing).
// The dashboard frontend is served from a different origin in development.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_header()
        .allowed_methods(vec!["GET", "POST", "PUT"])
        .max_age(3600)
}
