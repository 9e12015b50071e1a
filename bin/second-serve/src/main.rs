//! # Second Serve Binary
//!
//! The entry point that assembles the application based on compile-time
//! features: one store, one notifier, one geocoder plugin behind the
//! `ss-core` ports, injected into the lifecycle engine.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use ss_api::handlers::AppState;
use ss_api::middleware;
use ss_core::engine::LifecycleEngine;
use ss_core::traits::{Geocoder, ListingRepo, Notifier};

#[cfg(feature = "db-sqlite")]
use ss_db_sqlite::SqliteListingRepo;

#[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
use ss_store_memory::MemoryListingRepo;

#[cfg(feature = "notify-mailer")]
use ss_notify_mailer::HttpMailNotifier;

#[cfg(feature = "geo-nominatim")]
use ss_geo_nominatim::NominatimGeocoder;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // 1. Initialize the store implementation
    #[cfg(feature = "db-sqlite")]
    let repo: Arc<dyn ListingRepo> = Arc::new(
        SqliteListingRepo::new(&env_or("DATABASE_URL", "sqlite:second_serve.db?mode=rwc")).await?,
    );
    #[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
    let repo: Arc<dyn ListingRepo> = Arc::new(MemoryListingRepo::new());

    // 2. Initialize the notifier implementation
    #[cfg(feature = "notify-mailer")]
    let notifier: Arc<dyn Notifier> = Arc::new(HttpMailNotifier::new(
        env_or("MAIL_RELAY_URL", "http://localhost:8025/api/send"),
        env_or("MAIL_FROM", "no-reply@secondserve.org"),
    ));

    // 3. Initialize the geocoder implementation
    #[cfg(feature = "geo-nominatim")]
    let geocoder: Arc<dyn Geocoder> = Arc::new(NominatimGeocoder::new(env_or(
        "GEOCODER_URL",
        "https://nominatim.openstreetmap.org",
    )));

    // 4. Wire the lifecycle engine and share it across workers
    let state = web::Data::new(AppState {
        engine: LifecycleEngine::new(repo, notifier, geocoder),
    });

    let bind_addr = env_or("BIND_ADDR", "127.0.0.1:5000");
    log::info!("Second Serve starting on http://{bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::standard_middleware())
            .wrap(middleware::cors_policy())
            .configure(ss_api::configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await?;
    Ok(())
}
