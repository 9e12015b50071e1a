//! # Domain Models
//!
//! These structs represent the core entities of Second Serve.
//! We use UUID v7 for time-ordered, globally unique identification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a listing stays available when the donor supplies no expiry.
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

/// What a user signed up to do on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Receiver,
    /// New accounts that have not picked a role yet.
    Undefined,
}

/// A platform account. Credential material lives in the auth layer,
/// not here; the lifecycle core only ever reads users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub phone: String,
    pub role: Role,
}

/// The authenticated caller of a lifecycle operation, as resolved by the
/// external auth layer. The core trusts it as given.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

/// A geographic point with its human-readable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// All three fields are required together: a non-blank address and
    /// finite coordinates.
    pub fn is_well_formed(&self) -> bool {
        !self.address.trim().is_empty() && self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Placeholder pickup point substituted when a claimant submits a malformed
/// location at deal-confirmation time.
pub fn fallback_receiver_location() -> Location {
    Location {
        address: "Current Location (Geolocation)".to_string(),
        latitude: 0.0,
        longitude: 0.0,
    }
}

/// Where a listing sits in its lifecycle.
///
/// `Expired` is reachable from `Available` only, by time (the sweep),
/// never by user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Available,
    Claimed,
    DealConfirmed,
    Received,
    Expired,
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ListingStatus::Available => "available",
            ListingStatus::Claimed => "claimed",
            ListingStatus::DealConfirmed => "deal_confirmed",
            ListingStatus::Received => "received",
            ListingStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A posted surplus-food offer.
///
/// Invariant: `claimed_by` is set if and only if
/// `status ∈ {claimed, deal_confirmed, received}`, and `requested_by`
/// is only non-empty while `status = available`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Kilograms. A non-integer magnitude; never rounded by the engine.
    pub quantity: f64,
    pub location: Location,
    /// Derived from `location.address` at creation; "Unknown" when the
    /// geocoder could not resolve it.
    pub country: String,
    pub posted_by: Uuid,
    /// Ordered set of distinct users who requested the listing while it
    /// was available. A user appears at most once.
    pub requested_by: Vec<Uuid>,
    pub claimed_by: Option<Uuid>,
    /// Pickup point supplied by the claimant at deal-confirmation time.
    pub receiver_location: Option<Location>,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub deal_confirmed_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency counter; bumped by every conditional save.
    pub revision: u64,
}

impl Listing {
    /// Builds a fresh `Available` listing. A caller-supplied expiry is
    /// clamped to be no earlier than `created_at`; without one the listing
    /// expires after [`DEFAULT_EXPIRY_DAYS`].
    pub fn new(
        posted_by: Uuid,
        title: String,
        description: String,
        quantity: f64,
        location: Location,
        country: String,
        expires_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let expires_at = match expires_at {
            Some(supplied) => supplied.max(created_at),
            None => created_at + Duration::days(DEFAULT_EXPIRY_DAYS),
        };
        Listing {
            id: Uuid::now_v7(),
            title,
            description,
            quantity,
            location,
            country,
            posted_by,
            requested_by: Vec::new(),
            claimed_by: None,
            receiver_location: None,
            status: ListingStatus::Available,
            created_at,
            expires_at,
            deal_confirmed_at: None,
            received_at: None,
            revision: 0,
        }
    }
}

/// The donor-supplied fields of a new listing, as received on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub quantity: f64,
    pub location: Option<Location>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
