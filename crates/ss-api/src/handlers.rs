//! # ss-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the
//! lifecycle engine. The principal is resolved by the upstream auth layer
//! and arrives as trusted headers (`X-User-Id`, `X-User-Role`); handlers
//! only check that it is present, map the call into the engine, and map
//! the result back to a status code.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use ss_core::engine::{LifecycleEngine, Transition};
use ss_core::error::LifecycleError;
use ss_core::models::{ListingDraft, Location, Principal, Role};
use uuid::Uuid;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub engine: LifecycleEngine,
}

/// Optional body of `PUT /api/food/accept/{id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBody {
    pub receiver_id: Option<Uuid>,
}

/// Optional body of `PUT /api/food/confirm-deal/{id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmDealBody {
    pub receiver_location: Option<Location>,
}

/// Reads the externally-resolved principal off the request.
fn principal_from(req: &HttpRequest) -> Option<Principal> {
    let id = req
        .headers()
        .get("X-User-Id")?
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw).ok())?;
    let role = match req.headers().get("X-User-Role").and_then(|v| v.to_str().ok()) {
        Some("donor") => Role::Donor,
        Some("receiver") => Role::Receiver,
        _ => Role::Undefined,
    };
    Some(Principal { id, role })
}

fn unauthenticated() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({ "error": "authentication required" }))
}

/// One stable status code and message per error kind.
fn error_response(err: LifecycleError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });
    match err {
        LifecycleError::NotFound(..) => HttpResponse::NotFound().json(body),
        LifecycleError::Forbidden(_) => HttpResponse::Forbidden().json(body),
        LifecycleError::InvalidState(_) | LifecycleError::InvalidInput(_) => {
            HttpResponse::BadRequest().json(body)
        }
        LifecycleError::Conflict(_) => HttpResponse::Conflict().json(body),
        LifecycleError::Internal(ref detail) => {
            log::error!("internal error: {detail}");
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn transition_response(message: &str, transition: Transition) -> serde_json::Value {
    serde_json::json!({
        "message": message,
        "listing": transition.listing,
        "emailStatus": transition.notifications,
    })
}

/// `POST /api/food`: donor posts a surplus-food listing.
pub async fn create_listing(
    data: web::Data<AppState>,
    req: HttpRequest,
    draft: web::Json<ListingDraft>,
) -> impl Responder {
    let Some(principal) = principal_from(&req) else {
        return unauthenticated();
    };
    match data.engine.create_listing(&principal, draft.into_inner()).await {
        Ok(transition) => HttpResponse::Created()
            .json(transition_response("Food listing created successfully", transition)),
        Err(err) => error_response(err),
    }
}

/// `GET /api/food`: all available listings. Public; runs the expiry sweep.
pub async fn list_available(data: web::Data<AppState>) -> impl Responder {
    match data.engine.list_available().await {
        Ok(listings) => HttpResponse::Ok().json(listings),
        Err(err) => error_response(err),
    }
}

/// `GET /api/food/mine`: the caller's own listings, in any status.
pub async fn list_mine(data: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let Some(principal) = principal_from(&req) else {
        return unauthenticated();
    };
    match data.engine.list_mine(principal.id).await {
        Ok(listings) => HttpResponse::Ok().json(listings),
        Err(err) => error_response(err),
    }
}

/// `PUT /api/food/request/{id}`: receiver registers interest.
pub async fn request_listing(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> impl Responder {
    let Some(principal) = principal_from(&req) else {
        return unauthenticated();
    };
    match data.engine.request_listing(&principal, path.into_inner()).await {
        Ok(transition) => {
            HttpResponse::Ok().json(transition_response("Request sent successfully", transition))
        }
        Err(err) => error_response(err),
    }
}

/// `PUT /api/food/accept/{id}`: donor accepts one pending request.
/// Without an explicit `receiverId` the first requester is chosen.
pub async fn accept_request(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: Option<web::Json<AcceptBody>>,
) -> impl Responder {
    let Some(principal) = principal_from(&req) else {
        return unauthenticated();
    };
    let receiver = body.and_then(|b| b.into_inner().receiver_id);
    match data.engine.accept_request(&principal, path.into_inner(), receiver).await {
        Ok(transition) => {
            HttpResponse::Ok().json(transition_response("Request accepted successfully", transition))
        }
        Err(err) => error_response(err),
    }
}

/// `PUT /api/food/confirm-deal/{id}`: claimant confirms and shares a
/// pickup location.
pub async fn confirm_deal(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
    body: Option<web::Json<ConfirmDealBody>>,
) -> impl Responder {
    let Some(principal) = principal_from(&req) else {
        return unauthenticated();
    };
    let location = body.and_then(|b| b.into_inner().receiver_location);
    match data.engine.confirm_deal(&principal, path.into_inner(), location).await {
        Ok(transition) => {
            HttpResponse::Ok().json(transition_response("Deal confirmed successfully", transition))
        }
        Err(err) => error_response(err),
    }
}

/// `PUT /api/food/confirm-receipt/{id}`: claimant confirms the handoff.
pub async fn confirm_receipt(
    data: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> impl Responder {
    let Some(principal) = principal_from(&req) else {
        return unauthenticated();
    };
    match data.engine.confirm_receipt(&principal, path.into_inner()).await {
        Ok(transition) => HttpResponse::Ok()
            .json(transition_response("Receipt confirmed successfully", transition)),
        Err(err) => error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use async_trait::async_trait;
    use ss_core::models::User;
    use ss_core::traits::{DeliveryResult, Geocoder, ListingRepo, Notifier};
    use ss_store_memory::MemoryListingRepo;
    use std::sync::Arc;

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn send(&self, to: &str, _subject: &str, _body: &str) -> DeliveryResult {
            DeliveryResult { success: true, message: format!("delivered to {to}") }
        }
    }

    struct NullGeocoder;

    #[async_trait]
    impl Geocoder for NullGeocoder {
        async fn country_for(&self, _address: &str) -> String {
            "Unknown".to_string()
        }
        async fn reverse(&self, _latitude: f64, _longitude: f64) -> Option<String> {
            None
        }
    }

    async fn state_with_user() -> (web::Data<AppState>, Principal) {
        let repo = Arc::new(MemoryListingRepo::new());
        let user = User {
            id: Uuid::now_v7(),
            email: "donor@example.com".to_string(),
            phone: "+6590000000".to_string(),
            role: Role::Donor,
        };
        let principal = Principal { id: user.id, role: Role::Donor };
        repo.insert_user(user).await.unwrap();
        let engine = LifecycleEngine::new(repo, Arc::new(NullNotifier), Arc::new(NullGeocoder));
        (web::Data::new(AppState { engine }), principal)
    }

    fn draft_json() -> serde_json::Value {
        serde_json::json!({
            "title": "Bread",
            "description": "Day-old loaves",
            "quantity": 2.5,
            "location": { "address": "12 Baker St", "latitude": 51.5, "longitude": -0.15 }
        })
    }

    #[actix_web::test]
    async fn create_requires_a_principal() {
        let (state, _) = state_with_user().await;
        let app = test::init_service(
            App::new().app_data(state).configure(crate::configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/food")
            .set_json(draft_json())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn create_then_list_round_trip() {
        let (state, principal) = state_with_user().await;
        let app = test::init_service(
            App::new().app_data(state).configure(crate::configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/food")
            .insert_header(("X-User-Id", principal.id.to_string()))
            .insert_header(("X-User-Role", "donor"))
            .set_json(draft_json())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["listing"]["status"], "available");
        assert_eq!(body["listing"]["country"], "Unknown");

        let req = test::TestRequest::get().uri("/api/food").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
        let listings: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(listings.as_array().map(|a| a.len()), Some(1));
    }

    #[actix_web::test]
    async fn malformed_draft_is_a_bad_request() {
        let (state, principal) = state_with_user().await;
        let app = test::init_service(
            App::new().app_data(state).configure(crate::configure_routes),
        )
        .await;

        let mut draft = draft_json();
        draft["location"] = serde_json::Value::Null;
        let req = test::TestRequest::post()
            .uri("/api/food")
            .insert_header(("X-User-Id", principal.id.to_string()))
            .set_json(draft)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn requesting_a_missing_listing_is_not_found() {
        let (state, principal) = state_with_user().await;
        let app = test::init_service(
            App::new().app_data(state).configure(crate::configure_routes),
        )
        .await;

        let req = test::TestRequest::put()
            .uri(&format!("/api/food/request/{}", Uuid::now_v7()))
            .insert_header(("X-User-Id", principal.id.to_string()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
