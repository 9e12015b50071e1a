//! # ss-api
//!
//! The web routing and orchestration layer for Second Serve.
//! Thin by design: handlers translate HTTP to lifecycle-engine calls and
//! engine errors back to status codes; every rule lives in `ss-core`.

pub mod handlers;
pub mod middleware;

use actix_web::web;

/// Configures the food-listing routes.
///
/// Scoped under `/api/food`; the main binary can remount the scope
/// elsewhere if a gateway needs it.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/food")
            .route("", web::post().to(handlers::create_listing))
            .route("", web::get().to(handlers::list_available))
            .route("/mine", web::get().to(handlers::list_mine))
            .route("/request/{id}", web::put().to(handlers::request_listing))
            .route("/accept/{id}", web::put().to(handlers::accept_request))
            .route("/confirm-deal/{id}", web::put().to(handlers::confirm_deal))
            .route("/confirm-receipt/{id}", web::put().to(handlers::confirm_receipt)),
    );
}
