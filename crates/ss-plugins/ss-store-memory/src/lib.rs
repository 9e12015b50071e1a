//! # ss-store-memory
//!
//! In-process implementation of `ListingRepo` on top of `DashMap`.
//! The conditional save holds the shard entry lock for the whole
//! compare-and-write, which is what makes it the reference implementation
//! of the CAS contract: two racing writers against the same listing are
//! serialized by the entry lock, and the stale one observes `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ss_core::models::{Listing, ListingStatus, User};
use ss_core::traits::{ListingRepo, SaveOutcome};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryListingRepo {
    listings: DashMap<Uuid, Listing>,
    users: DashMap<Uuid, User>,
}

impl MemoryListingRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingRepo for MemoryListingRepo {
    async fn get_listing(&self, id: Uuid) -> anyhow::Result<Option<Listing>> {
        Ok(self.listings.get(&id).map(|entry| entry.clone()))
    }

    async fn insert_listing(&self, listing: Listing) -> anyhow::Result<()> {
        self.listings.insert(listing.id, listing);
        Ok(())
    }

    /// Compare-and-write under the entry lock: the stored record must still
    /// carry the expected status and the caller's revision.
    async fn save_if_status(
        &self,
        listing: &Listing,
        expected: ListingStatus,
    ) -> anyhow::Result<SaveOutcome> {
        let mut entry = self
            .listings
            .get_mut(&listing.id)
            .ok_or_else(|| anyhow::anyhow!("listing {} not found", listing.id))?;

        if entry.status != expected || entry.revision != listing.revision {
            return Ok(SaveOutcome::Conflict);
        }
        let mut next = listing.clone();
        next.revision += 1;
        *entry = next;
        Ok(SaveOutcome::Saved)
    }

    async fn list_by_status(&self, status: ListingStatus) -> anyhow::Result<Vec<Listing>> {
        Ok(self
            .listings
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Listing>> {
        Ok(self
            .listings
            .iter()
            .filter(|entry| entry.posted_by == owner)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut flipped = 0;
        for mut entry in self.listings.iter_mut() {
            if entry.status == ListingStatus::Available && entry.expires_at < now {
                entry.status = ListingStatus::Expired;
                entry.revision += 1;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.get(&id).map(|entry| entry.clone()))
    }

    async fn insert_user(&self, user: User) -> anyhow::Result<()> {
        self.users.insert(user.id, user);
        Ok(())
    }
}
