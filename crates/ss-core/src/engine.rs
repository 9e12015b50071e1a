//! # Listing Lifecycle Engine
//!
//! Owns the state machine `available → claimed → deal_confirmed / received`
//! (plus the time-based `available → expired` sweep) and orchestrates the
//! side effects of each transition. All collaborators are injected ports:
//! no process-wide singletons, no direct I/O from this module beyond them.
//!
//! Every mutating transition is committed through the store's conditional
//! save, so two racing callers are linearized by the store: exactly one
//! wins, the loser observes `Conflict` (or `InvalidState` after a reload).
//! Notifier and geocoder failures never roll back a committed transition;
//! they are collected into the [`NotificationSummary`] attached to each
//! result.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LifecycleError, Result};
use crate::guard::{self, ListingAction};
use crate::models::{
    fallback_receiver_location, Listing, ListingDraft, ListingStatus, Location, Principal, User,
};
use crate::traits::{Geocoder, ListingRepo, Notifier, SaveOutcome};

/// How many times `request_listing` reloads and retries after losing the
/// conditional-save race before giving up with `Conflict`.
const MAX_SAVE_RETRIES: usize = 3;

/// Per-recipient outcome of one best-effort notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub recipient: String,
    pub success: bool,
    pub message: String,
}

/// Everything the engine tried to send during one transition.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub reports: Vec<DeliveryReport>,
}

impl NotificationSummary {
    pub fn all_delivered(&self) -> bool {
        self.reports.iter().all(|r| r.success)
    }
}

/// A committed transition: the updated listing plus the best-effort
/// notification outcomes. Degraded upstreams show up here, never as errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub listing: Listing,
    #[serde(rename = "emailStatus")]
    pub notifications: NotificationSummary,
}

/// The lifecycle engine. One instance serves all request-scoped tasks;
/// the listing record in the store is the only shared mutable resource.
pub struct LifecycleEngine {
    repo: Arc<dyn ListingRepo>,
    notifier: Arc<dyn Notifier>,
    geocoder: Arc<dyn Geocoder>,
}

impl LifecycleEngine {
    pub fn new(
        repo: Arc<dyn ListingRepo>,
        notifier: Arc<dyn Notifier>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self { repo, notifier, geocoder }
    }

    /// Creates a new `available` listing for the calling donor.
    ///
    /// Country resolution is best-effort and never blocks creation; a
    /// malformed draft fails with `InvalidInput` and persists nothing.
    pub async fn create_listing(
        &self,
        principal: &Principal,
        draft: ListingDraft,
    ) -> Result<Transition> {
        if draft.title.trim().is_empty() {
            return Err(LifecycleError::InvalidInput("title is required".to_string()));
        }
        if draft.description.trim().is_empty() {
            return Err(LifecycleError::InvalidInput("description is required".to_string()));
        }
        if !draft.quantity.is_finite() || draft.quantity <= 0.0 {
            return Err(LifecycleError::InvalidInput(
                "quantity must be a positive number of kilograms".to_string(),
            ));
        }
        let location = match draft.location {
            Some(loc) if loc.is_well_formed() => loc,
            _ => {
                return Err(LifecycleError::InvalidInput(
                    "location must include address, latitude, and longitude".to_string(),
                ))
            }
        };

        let country = self.geocoder.country_for(&location.address).await;
        let listing = Listing::new(
            principal.id,
            draft.title,
            draft.description,
            draft.quantity,
            location,
            country,
            draft.expires_at,
            Utc::now(),
        );
        self.repo
            .insert_listing(listing.clone())
            .await
            .map_err(LifecycleError::internal)?;

        let mut summary = NotificationSummary::default();
        if let Some(donor) = self.user_for_notice(listing.posted_by).await {
            let body = format!(
                "Hello {},\n\nYou have successfully created a food listing titled \"{}\" \
                 with a quantity of {} kg in {}. It is now available for receivers to claim.\n\n\
                 Thank you for using Second Serve!",
                donor.email, listing.title, listing.quantity, listing.country
            );
            summary.reports.push(
                self.notify(&donor.email, "Food Listing Created Successfully", &body).await,
            );
        }
        Ok(Transition { listing, notifications: summary })
    }

    /// All currently available listings. Runs the expiry sweep first, so
    /// stale listings never show up as available.
    pub async fn list_available(&self) -> Result<Vec<Listing>> {
        self.sweep_expired().await?;
        self.repo
            .list_by_status(ListingStatus::Available)
            .await
            .map_err(LifecycleError::internal)
    }

    /// Every listing the owner has posted, in any status.
    pub async fn list_mine(&self, owner: Uuid) -> Result<Vec<Listing>> {
        self.repo.list_by_owner(owner).await.map_err(LifecycleError::internal)
    }

    /// Flips available listings past their expiry to `expired`.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let flipped = self
            .repo
            .expire_stale(Utc::now())
            .await
            .map_err(LifecycleError::internal)?;
        if flipped > 0 {
            log::info!("expired {flipped} stale listing(s)");
        }
        Ok(flipped)
    }

    /// Registers the caller's interest in an available listing.
    ///
    /// The append is committed with a conditional save; on a lost race the
    /// engine reloads, re-runs the guard against the fresh copy, and tries
    /// again a bounded number of times (the operation is safely retryable).
    pub async fn request_listing(
        &self,
        principal: &Principal,
        listing_id: Uuid,
    ) -> Result<Transition> {
        for _ in 0..MAX_SAVE_RETRIES {
            let mut listing = self.load_listing(listing_id).await?;
            guard::authorize(principal, &listing, ListingAction::Request)?;

            listing.requested_by.push(principal.id);
            match self
                .repo
                .save_if_status(&listing, ListingStatus::Available)
                .await
                .map_err(LifecycleError::internal)?
            {
                SaveOutcome::Saved => {
                    listing.revision += 1;
                    let mut summary = NotificationSummary::default();
                    if let Some(donor) = self.user_for_notice(listing.posted_by).await {
                        let requester = self.user_for_notice(principal.id).await;
                        let who = requester
                            .map(|u| u.email)
                            .unwrap_or_else(|| principal.id.to_string());
                        let body = format!(
                            "Hello {},\n\nYour food listing titled \"{}\" has a new request \
                             from {}. Accept the request from your dashboard to arrange the \
                             handoff.\n\nThank you for using Second Serve!",
                            donor.email, listing.title, who
                        );
                        summary.reports.push(
                            self.notify(&donor.email, "New Request for Your Food Listing", &body)
                                .await,
                        );
                    }
                    return Ok(Transition { listing, notifications: summary });
                }
                SaveOutcome::Conflict => continue,
            }
        }
        Err(LifecycleError::Conflict(
            "listing was modified concurrently; please retry".to_string(),
        ))
    }

    /// Accepts one pending request, moving the listing to `claimed`.
    ///
    /// Without an explicit `receiver`, the first requester wins. The sweep
    /// runs first so a donor can never accept on a listing that is already
    /// past its expiry but not yet swept.
    pub async fn accept_request(
        &self,
        principal: &Principal,
        listing_id: Uuid,
        receiver: Option<Uuid>,
    ) -> Result<Transition> {
        self.sweep_expired().await?;

        let mut listing = self.load_listing(listing_id).await?;
        guard::authorize(principal, &listing, ListingAction::AcceptRequest)?;

        let chosen = match receiver {
            Some(id) if listing.requested_by.contains(&id) => id,
            Some(id) => {
                return Err(LifecycleError::InvalidInput(format!(
                    "user {id} has not requested this listing"
                )))
            }
            // Guard guarantees requested_by is non-empty here.
            None => listing.requested_by[0],
        };
        let rejected: Vec<Uuid> =
            listing.requested_by.drain(..).filter(|id| *id != chosen).collect();
        listing.claimed_by = Some(chosen);
        listing.status = ListingStatus::Claimed;

        self.commit(&mut listing, ListingStatus::Available).await?;

        let mut summary = NotificationSummary::default();
        if let Some(accepted) = self.user_for_notice(chosen).await {
            let body = format!(
                "Hello {},\n\nYour request for the food listing titled \"{}\" has been \
                 accepted by the donor. Confirm the deal from your dashboard to exchange \
                 pickup details.\n\nThank you for using Second Serve!",
                accepted.email, listing.title
            );
            summary
                .reports
                .push(self.notify(&accepted.email, "Your Food Request Was Accepted", &body).await);
        }
        // Rejected-party notices are collected individually and never abort
        // the already-committed accept.
        for other in rejected {
            if let Some(user) = self.user_for_notice(other).await {
                let body = format!(
                    "Hello {},\n\nThe donor has accepted another request for the food \
                     listing titled \"{}\". Keep browsing, new listings are posted every \
                     day.\n\nThank you for using Second Serve!",
                    user.email, listing.title
                );
                summary
                    .reports
                    .push(self.notify(&user.email, "Food Request Not Accepted", &body).await);
            }
        }
        Ok(Transition { listing, notifications: summary })
    }

    /// The claimant confirms the deal and shares a pickup location,
    /// moving the listing to `deal_confirmed`.
    ///
    /// A malformed or missing location is replaced by the documented
    /// placeholder rather than failing the transition.
    pub async fn confirm_deal(
        &self,
        principal: &Principal,
        listing_id: Uuid,
        receiver_location: Option<Location>,
    ) -> Result<Transition> {
        let mut listing = self.load_listing(listing_id).await?;
        guard::authorize(principal, &listing, ListingAction::ConfirmDeal)?;

        let receiver_location = self.normalize_receiver_location(receiver_location).await;
        listing.receiver_location = Some(receiver_location.clone());
        listing.deal_confirmed_at = Some(Utc::now());
        listing.status = ListingStatus::DealConfirmed;

        self.commit(&mut listing, ListingStatus::Claimed).await?;

        let mut summary = NotificationSummary::default();
        let donor = self.user_for_notice(listing.posted_by).await;
        let claimant = self.user_for_notice(principal.id).await;
        match (donor, claimant) {
            (Some(donor), Some(claimant)) if donor.email == claimant.email => {
                // Data-quality signal: the same account (or a shared inbox)
                // sits on both sides of the deal. Send once.
                log::warn!(
                    "donor and receiver share an email address ({}); sending a single deal notification",
                    donor.email
                );
                let body = format!(
                    "Hello {},\n\nThe deal for the food listing titled \"{}\" is confirmed. \
                     Pickup point: {} ({}, {}).\n\nThank you for using Second Serve!",
                    donor.email,
                    listing.title,
                    receiver_location.address,
                    receiver_location.latitude,
                    receiver_location.longitude
                );
                summary
                    .reports
                    .push(self.notify(&donor.email, "Food Listing Deal Confirmed", &body).await);
            }
            (donor, claimant) => {
                if let Some(donor) = donor {
                    let body = format!(
                        "Hello {},\n\nThe receiver has confirmed the deal for your food \
                         listing titled \"{}\". Their pickup location is {} ({}, {}).\n\n\
                         Thank you for using Second Serve!",
                        donor.email,
                        listing.title,
                        receiver_location.address,
                        receiver_location.latitude,
                        receiver_location.longitude
                    );
                    summary.reports.push(
                        self.notify(&donor.email, "Food Listing Deal Confirmed", &body).await,
                    );
                }
                if let Some(claimant) = claimant {
                    let body = format!(
                        "Hello {},\n\nYou confirmed the deal for the food listing titled \
                         \"{}\". The donor's location is {} ({}, {}).\n\n\
                         Thank you for using Second Serve!",
                        claimant.email,
                        listing.title,
                        listing.location.address,
                        listing.location.latitude,
                        listing.location.longitude
                    );
                    summary.reports.push(
                        self.notify(&claimant.email, "Food Listing Deal Confirmed", &body).await,
                    );
                }
            }
        }
        Ok(Transition { listing, notifications: summary })
    }

    /// The claimant confirms the physical handoff, moving the listing to
    /// its terminal `received` state.
    pub async fn confirm_receipt(
        &self,
        principal: &Principal,
        listing_id: Uuid,
    ) -> Result<Transition> {
        let mut listing = self.load_listing(listing_id).await?;
        guard::authorize(principal, &listing, ListingAction::ConfirmReceipt)?;

        listing.received_at = Some(Utc::now());
        listing.status = ListingStatus::Received;

        self.commit(&mut listing, ListingStatus::Claimed).await?;

        let mut summary = NotificationSummary::default();
        if let Some(donor) = self.user_for_notice(listing.posted_by).await {
            let claimant = self.user_for_notice(principal.id).await;
            let who = claimant.map(|u| u.email).unwrap_or_else(|| principal.id.to_string());
            let body = format!(
                "Hello {},\n\nThe receiver {} has confirmed receipt of your food listing \
                 titled \"{}\". Thank you for your donation!\n\n\
                 Thank you for using Second Serve!",
                donor.email, who, listing.title
            );
            summary
                .reports
                .push(self.notify(&donor.email, "Food Listing Receipt Confirmed", &body).await);
        }
        Ok(Transition { listing, notifications: summary })
    }

    /// Fetches one listing, mapping absence to `NotFound`.
    pub async fn get_listing(&self, id: Uuid) -> Result<Listing> {
        self.load_listing(id).await
    }

    // ── internals ───────────────────────────────────────────────────────

    async fn load_listing(&self, id: Uuid) -> Result<Listing> {
        self.repo
            .get_listing(id)
            .await
            .map_err(LifecycleError::internal)?
            .ok_or_else(|| LifecycleError::NotFound("Listing".to_string(), id.to_string()))
    }

    /// Commits a mutated listing through the conditional save. On a lost
    /// race, reloads once so the caller learns whether the action is gone
    /// for good (`InvalidState`) or merely worth retrying (`Conflict`).
    async fn commit(&self, listing: &mut Listing, expected: ListingStatus) -> Result<()> {
        match self
            .repo
            .save_if_status(listing, expected)
            .await
            .map_err(LifecycleError::internal)?
        {
            SaveOutcome::Saved => {
                listing.revision += 1;
                Ok(())
            }
            SaveOutcome::Conflict => {
                let fresh = self.load_listing(listing.id).await?;
                if fresh.status != expected {
                    Err(LifecycleError::InvalidState(format!(
                        "listing is not {expected}"
                    )))
                } else {
                    Err(LifecycleError::Conflict(
                        "listing was modified concurrently; please retry".to_string(),
                    ))
                }
            }
        }
    }

    /// Validates the claimant-supplied pickup location. A blank address
    /// with usable coordinates gets a best-effort reverse lookup; anything
    /// else malformed becomes the documented placeholder.
    async fn normalize_receiver_location(&self, supplied: Option<Location>) -> Location {
        match supplied {
            Some(loc) if loc.is_well_formed() => loc,
            Some(loc)
                if loc.latitude.is_finite()
                    && loc.longitude.is_finite()
                    && (loc.latitude, loc.longitude) != (0.0, 0.0) =>
            {
                match self.geocoder.reverse(loc.latitude, loc.longitude).await {
                    Some(address) => Location { address, ..loc },
                    None => fallback_receiver_location(),
                }
            }
            _ => fallback_receiver_location(),
        }
    }

    /// Looks up a user for notification purposes. Best-effort: a missing
    /// user or a store hiccup here must not abort a committed transition.
    async fn user_for_notice(&self, id: Uuid) -> Option<User> {
        match self.repo.get_user(id).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                log::warn!("skipping notification: user {id} not found");
                None
            }
            Err(err) => {
                log::warn!("skipping notification: user lookup failed for {id}: {err}");
                None
            }
        }
    }

    async fn notify(&self, to: &str, subject: &str, body: &str) -> DeliveryReport {
        let result = self.notifier.send(to, subject, body).await;
        if !result.success {
            log::warn!("notification to {to} failed: {}", result.message);
        }
        DeliveryReport {
            recipient: to.to_string(),
            success: result.success,
            message: result.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::traits::DeliveryResult;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repo with the same status+revision CAS contract the real
    /// adapters implement.
    #[derive(Default)]
    struct MemRepo {
        listings: Mutex<HashMap<Uuid, Listing>>,
        users: Mutex<HashMap<Uuid, User>>,
    }

    #[async_trait]
    impl ListingRepo for MemRepo {
        async fn get_listing(&self, id: Uuid) -> anyhow::Result<Option<Listing>> {
            Ok(self.listings.lock().unwrap().get(&id).cloned())
        }

        async fn insert_listing(&self, listing: Listing) -> anyhow::Result<()> {
            self.listings.lock().unwrap().insert(listing.id, listing);
            Ok(())
        }

        async fn save_if_status(
            &self,
            listing: &Listing,
            expected: ListingStatus,
        ) -> anyhow::Result<SaveOutcome> {
            let mut map = self.listings.lock().unwrap();
            match map.get_mut(&listing.id) {
                Some(stored)
                    if stored.status == expected && stored.revision == listing.revision =>
                {
                    let mut next = listing.clone();
                    next.revision += 1;
                    *stored = next;
                    Ok(SaveOutcome::Saved)
                }
                Some(_) => Ok(SaveOutcome::Conflict),
                None => anyhow::bail!("listing vanished"),
            }
        }

        async fn list_by_status(&self, status: ListingStatus) -> anyhow::Result<Vec<Listing>> {
            Ok(self
                .listings
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.status == status)
                .cloned()
                .collect())
        }

        async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Listing>> {
            Ok(self
                .listings
                .lock()
                .unwrap()
                .values()
                .filter(|l| l.posted_by == owner)
                .cloned()
                .collect())
        }

        async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
            let mut count = 0;
            for listing in self.listings.lock().unwrap().values_mut() {
                if listing.status == ListingStatus::Available && listing.expires_at < now {
                    listing.status = ListingStatus::Expired;
                    listing.revision += 1;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.users.lock().unwrap().get(&id).cloned())
        }

        async fn insert_user(&self, user: User) -> anyhow::Result<()> {
            self.users.lock().unwrap().insert(user.id, user);
            Ok(())
        }
    }

    /// Records every send; deliveries to `failing` addresses report failure.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, to: &str, subject: &str, _body: &str) -> DeliveryResult {
            self.sent.lock().unwrap().push((to.to_string(), subject.to_string()));
            if self.failing.iter().any(|f| f == to) {
                DeliveryResult { success: false, message: "relay refused".to_string() }
            } else {
                DeliveryResult { success: true, message: "sent".to_string() }
            }
        }
    }

    struct StaticGeocoder {
        country: Option<String>,
        reverse_to: Option<String>,
    }

    #[async_trait]
    impl Geocoder for StaticGeocoder {
        async fn country_for(&self, _address: &str) -> String {
            self.country.clone().unwrap_or_else(|| "Unknown".to_string())
        }

        async fn reverse(&self, _latitude: f64, _longitude: f64) -> Option<String> {
            self.reverse_to.clone()
        }
    }

    struct Rig {
        engine: LifecycleEngine,
        repo: Arc<MemRepo>,
        notifier: Arc<RecordingNotifier>,
    }

    fn rig_with(notifier: RecordingNotifier, country: Option<&str>) -> Rig {
        let repo = Arc::new(MemRepo::default());
        let notifier = Arc::new(notifier);
        let engine = LifecycleEngine::new(
            repo.clone(),
            notifier.clone(),
            Arc::new(StaticGeocoder {
                country: country.map(String::from),
                reverse_to: Some("7 Reverse Ln".to_string()),
            }),
        );
        Rig { engine, repo, notifier }
    }

    fn rig() -> Rig {
        rig_with(RecordingNotifier::default(), Some("Singapore"))
    }

    async fn seed_user(repo: &MemRepo, email: &str, role: Role) -> Principal {
        let user = User {
            id: Uuid::now_v7(),
            email: email.to_string(),
            phone: "+6590000000".to_string(),
            role,
        };
        let principal = Principal { id: user.id, role };
        repo.insert_user(user).await.unwrap();
        principal
    }

    fn draft(expires_at: Option<DateTime<Utc>>) -> ListingDraft {
        ListingDraft {
            title: "Rice".to_string(),
            description: "Five kilos of jasmine rice".to_string(),
            quantity: 5.0,
            location: Some(Location {
                address: "21 Clementi Ave".to_string(),
                latitude: 1.31,
                longitude: 103.76,
            }),
            expires_at,
        }
    }

    #[tokio::test]
    async fn create_then_list_available_round_trip() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;

        let created = rig.engine.create_listing(&donor, draft(None)).await.unwrap();
        assert_eq!(created.listing.status, ListingStatus::Available);
        assert_eq!(created.listing.country, "Singapore");
        assert!(created.notifications.all_delivered());

        let available = rig.engine.list_available().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, created.listing.id);
    }

    #[tokio::test]
    async fn create_falls_back_to_unknown_country() {
        let rig = rig_with(RecordingNotifier::default(), None);
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let created = rig.engine.create_listing(&donor, draft(None)).await.unwrap();
        assert_eq!(created.listing.country, "Unknown");
    }

    #[tokio::test]
    async fn create_rejects_malformed_drafts() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;

        let mut no_location = draft(None);
        no_location.location = None;
        let err = rig.engine.create_listing(&donor, no_location).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        let mut bad_quantity = draft(None);
        bad_quantity.quantity = -1.0;
        let err = rig.engine.create_listing(&donor, bad_quantity).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        // Nothing persisted from either attempt.
        assert!(rig.engine.list_available().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_request_is_rejected_and_state_unchanged() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let receiver = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;

        rig.engine.request_listing(&receiver, listing.id).await.unwrap();
        let err = rig.engine.request_listing(&receiver, listing.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(_)));

        let stored = rig.engine.get_listing(listing.id).await.unwrap();
        assert_eq!(stored.requested_by, vec![receiver.id]);
    }

    #[tokio::test]
    async fn accept_defaults_to_the_first_requester() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let r2 = seed_user(&rig.repo, "r2@example.com", Role::Receiver).await;
        let listing = rig
            .engine
            .create_listing(&donor, draft(Some(Utc::now() + Duration::hours(1))))
            .await
            .unwrap()
            .listing;

        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.request_listing(&r2, listing.id).await.unwrap();

        let accepted = rig.engine.accept_request(&donor, listing.id, None).await.unwrap();
        assert_eq!(accepted.listing.status, ListingStatus::Claimed);
        assert_eq!(accepted.listing.claimed_by, Some(r1.id));
        assert!(accepted.listing.requested_by.is_empty());

        // R1 got the acceptance, R2 the rejection.
        let sent = rig.notifier.sent.lock().unwrap();
        assert!(sent
            .iter()
            .any(|(to, subj)| to == "r1@example.com" && subj.contains("Accepted")));
        assert!(sent
            .iter()
            .any(|(to, subj)| to == "r2@example.com" && subj.contains("Not Accepted")));
    }

    #[tokio::test]
    async fn accept_with_unknown_receiver_is_invalid_input() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let outsider = Uuid::now_v7();
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();

        let err = rig
            .engine
            .accept_request(&donor, listing.id, Some(outsider))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidInput(_)));

        let stored = rig.engine.get_listing(listing.id).await.unwrap();
        assert_eq!(stored.status, ListingStatus::Available);
        assert_eq!(stored.requested_by, vec![r1.id]);
    }

    #[tokio::test]
    async fn rejected_party_notification_failure_does_not_abort_accept() {
        let notifier = RecordingNotifier {
            sent: Mutex::new(Vec::new()),
            failing: vec!["r2@example.com".to_string()],
        };
        let rig = rig_with(notifier, Some("Singapore"));
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let r2 = seed_user(&rig.repo, "r2@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.request_listing(&r2, listing.id).await.unwrap();

        let accepted = rig.engine.accept_request(&donor, listing.id, None).await.unwrap();
        assert_eq!(accepted.listing.status, ListingStatus::Claimed);
        assert!(!accepted.notifications.all_delivered());
        let failed: Vec<_> = accepted
            .notifications
            .reports
            .iter()
            .filter(|r| !r.success)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].recipient, "r2@example.com");
    }

    #[tokio::test]
    async fn concurrent_accepts_have_exactly_one_winner() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let r2 = seed_user(&rig.repo, "r2@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.request_listing(&r2, listing.id).await.unwrap();

        let (a, b) = tokio::join!(
            rig.engine.accept_request(&donor, listing.id, Some(r1.id)),
            rig.engine.accept_request(&donor, listing.id, Some(r2.id)),
        );
        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for outcome in [a, b] {
            if let Err(err) = outcome {
                assert!(matches!(
                    err,
                    LifecycleError::Conflict(_) | LifecycleError::InvalidState(_)
                ));
            }
        }

        let stored = rig.engine.get_listing(listing.id).await.unwrap();
        assert_eq!(stored.status, ListingStatus::Claimed);
        assert!(stored.claimed_by.is_some());
    }

    #[tokio::test]
    async fn accept_after_clock_expiry_is_rejected_by_the_sweep() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let listing = rig
            .engine
            .create_listing(&donor, draft(Some(Utc::now() + Duration::milliseconds(1))))
            .await
            .unwrap()
            .listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let err = rig.engine.accept_request(&donor, listing.id, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState(_)));
        let stored = rig.engine.get_listing(listing.id).await.unwrap();
        assert_eq!(stored.status, ListingStatus::Expired);
    }

    #[tokio::test]
    async fn confirm_deal_substitutes_fallback_for_malformed_location() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.accept_request(&donor, listing.id, None).await.unwrap();

        let malformed = Location { address: "".to_string(), latitude: 0.0, longitude: 0.0 };
        let confirmed = rig
            .engine
            .confirm_deal(&r1, listing.id, Some(malformed))
            .await
            .unwrap();
        assert_eq!(confirmed.listing.status, ListingStatus::DealConfirmed);
        assert_eq!(
            confirmed.listing.receiver_location,
            Some(fallback_receiver_location())
        );
        assert!(confirmed.listing.deal_confirmed_at.is_some());
    }

    #[tokio::test]
    async fn confirm_deal_reverse_geocodes_a_blank_address() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.accept_request(&donor, listing.id, None).await.unwrap();

        let coords_only = Location { address: "".to_string(), latitude: 1.29, longitude: 103.85 };
        let confirmed = rig
            .engine
            .confirm_deal(&r1, listing.id, Some(coords_only))
            .await
            .unwrap();
        let resolved = confirmed.listing.receiver_location.unwrap();
        assert_eq!(resolved.address, "7 Reverse Ln");
        assert_eq!(resolved.latitude, 1.29);
    }

    #[tokio::test]
    async fn confirm_deal_with_shared_email_sends_once() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "same@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "same@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.accept_request(&donor, listing.id, None).await.unwrap();

        let confirmed = rig.engine.confirm_deal(&r1, listing.id, None).await.unwrap();
        assert_eq!(confirmed.notifications.reports.len(), 1);
        assert_eq!(confirmed.listing.status, ListingStatus::DealConfirmed);
    }

    #[tokio::test]
    async fn confirms_by_non_claimant_are_forbidden() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let stranger = seed_user(&rig.repo, "r2@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.accept_request(&donor, listing.id, None).await.unwrap();

        let err = rig.engine.confirm_deal(&stranger, listing.id, None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));
        let err = rig.engine.confirm_receipt(&stranger, listing.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));

        let stored = rig.engine.get_listing(listing.id).await.unwrap();
        assert_eq!(stored.status, ListingStatus::Claimed);
        assert_eq!(stored.claimed_by, Some(r1.id));
    }

    #[tokio::test]
    async fn confirm_receipt_reaches_the_terminal_state() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;
        let listing = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.request_listing(&r1, listing.id).await.unwrap();
        rig.engine.accept_request(&donor, listing.id, None).await.unwrap();

        let received = rig.engine.confirm_receipt(&r1, listing.id).await.unwrap();
        assert_eq!(received.listing.status, ListingStatus::Received);
        assert!(received.listing.received_at.is_some());
        assert_eq!(received.listing.claimed_by, Some(r1.id));

        let sent = rig.notifier.sent.lock().unwrap();
        assert!(sent
            .iter()
            .any(|(to, subj)| to == "donor@example.com" && subj.contains("Receipt Confirmed")));
    }

    #[tokio::test]
    async fn sweep_only_touches_available_listings() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;

        let soon = Utc::now() + Duration::milliseconds(100);
        let stale = rig.engine.create_listing(&donor, draft(Some(soon))).await.unwrap().listing;
        let claimed = rig.engine.create_listing(&donor, draft(Some(soon))).await.unwrap().listing;
        rig.engine.request_listing(&r1, claimed.id).await.unwrap();
        rig.engine.accept_request(&donor, claimed.id, None).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let flipped = rig.engine.sweep_expired().await.unwrap();
        assert_eq!(flipped, 1);

        assert_eq!(
            rig.engine.get_listing(stale.id).await.unwrap().status,
            ListingStatus::Expired
        );
        // Past its expiry but claimed: untouched.
        assert_eq!(
            rig.engine.get_listing(claimed.id).await.unwrap().status,
            ListingStatus::Claimed
        );
    }

    #[tokio::test]
    async fn list_mine_returns_every_status() {
        let rig = rig();
        let donor = seed_user(&rig.repo, "donor@example.com", Role::Donor).await;
        let other = seed_user(&rig.repo, "other@example.com", Role::Donor).await;
        let r1 = seed_user(&rig.repo, "r1@example.com", Role::Receiver).await;

        let a = rig.engine.create_listing(&donor, draft(None)).await.unwrap().listing;
        rig.engine.create_listing(&other, draft(None)).await.unwrap();
        rig.engine.request_listing(&r1, a.id).await.unwrap();
        rig.engine.accept_request(&donor, a.id, None).await.unwrap();

        let mine = rig.engine.list_mine(donor.id).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].status, ListingStatus::Claimed);
    }
}
