//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use crate::models::{Listing, ListingStatus, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Outcome of a conditional save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The stored status or revision no longer matched; nothing was written.
    Conflict,
}

/// Data persistence contract for listings and (read-mostly) users.
#[async_trait]
pub trait ListingRepo: Send + Sync {
    // Listing Operations
    async fn get_listing(&self, id: Uuid) -> anyhow::Result<Option<Listing>>;
    async fn insert_listing(&self, listing: Listing) -> anyhow::Result<()>;

    /// The atomic primitive every mutating transition goes through.
    ///
    /// Implementations must, in one atomic step, verify that the stored
    /// record still has status `expected` AND revision `listing.revision`,
    /// then persist `listing` with `revision + 1`. Any interleaved write
    /// bumps the revision, so a stale writer observes [`SaveOutcome::Conflict`]
    /// and nothing is clobbered. An unconditional save is not an acceptable
    /// implementation.
    async fn save_if_status(
        &self,
        listing: &Listing,
        expected: ListingStatus,
    ) -> anyhow::Result<SaveOutcome>;

    async fn list_by_status(&self, status: ListingStatus) -> anyhow::Result<Vec<Listing>>;
    async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Listing>>;

    /// Bulk sweep: flips every `available` listing with `expires_at < now`
    /// to `expired`, returning how many were flipped. Listings in any other
    /// status are untouched regardless of `expires_at`.
    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    // User Operations
    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn insert_user(&self, user: User) -> anyhow::Result<()>;
}

/// What became of one outbound message.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub message: String,
}

/// Best-effort outbound message delivery.
///
/// Implementations retry internally (bounded) and never return an error:
/// a failed delivery is an unhappy [`DeliveryResult`], not an `Err`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> DeliveryResult;
}

/// Best-effort address resolution with bounded latency.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Country for a free-form address; `"Unknown"` when the lookup fails.
    async fn country_for(&self, address: &str) -> String;

    /// Reverse lookup of a human-readable address for coordinates.
    async fn reverse(&self, latitude: f64, longitude: f64) -> Option<String>;
}
