//! # Authorization Guard
//!
//! Pure role/ownership/status checks, run by the lifecycle engine before
//! every mutating operation. No I/O here: the engine hands in the loaded
//! listing and the resolved principal.
//!
//! Creation is not in [`ListingAction`]: any authenticated principal may
//! create a listing, which the API surface enforces simply by requiring a
//! principal at all.

use crate::error::{LifecycleError, Result};
use crate::models::{Listing, ListingStatus, Principal};

/// The listing-bound actions the guard knows how to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingAction {
    Request,
    AcceptRequest,
    ConfirmDeal,
    ConfirmReceipt,
}

/// Checks whether `principal` may perform `action` on `listing`.
///
/// Ownership/identity failures come back as [`LifecycleError::Forbidden`];
/// wrong-status and duplicate-request failures as
/// [`LifecycleError::InvalidState`].
pub fn authorize(principal: &Principal, listing: &Listing, action: ListingAction) -> Result<()> {
    match action {
        ListingAction::Request => {
            if principal.id == listing.posted_by {
                return Err(LifecycleError::Forbidden(
                    "you cannot request your own listing".to_string(),
                ));
            }
            if listing.status != ListingStatus::Available {
                return Err(LifecycleError::InvalidState(
                    "listing is not available".to_string(),
                ));
            }
            if listing.requested_by.contains(&principal.id) {
                return Err(LifecycleError::InvalidState(
                    "you have already requested this listing".to_string(),
                ));
            }
            Ok(())
        }
        ListingAction::AcceptRequest => {
            if principal.id != listing.posted_by {
                return Err(LifecycleError::Forbidden(
                    "only the donor can accept requests for this listing".to_string(),
                ));
            }
            if listing.status != ListingStatus::Available {
                return Err(LifecycleError::InvalidState(
                    "listing is not available".to_string(),
                ));
            }
            if listing.requested_by.is_empty() {
                return Err(LifecycleError::InvalidState(
                    "listing has no pending requests".to_string(),
                ));
            }
            Ok(())
        }
        ListingAction::ConfirmDeal => {
            if listing.status != ListingStatus::Claimed {
                return Err(LifecycleError::InvalidState(
                    "listing must be claimed before confirming the deal".to_string(),
                ));
            }
            if listing.claimed_by != Some(principal.id) {
                return Err(LifecycleError::Forbidden(
                    "you are not authorized to confirm the deal for this listing".to_string(),
                ));
            }
            Ok(())
        }
        ListingAction::ConfirmReceipt => {
            if listing.status != ListingStatus::Claimed {
                return Err(LifecycleError::InvalidState(
                    "listing must be claimed before confirming receipt".to_string(),
                ));
            }
            if listing.claimed_by != Some(principal.id) {
                return Err(LifecycleError::Forbidden(
                    "you are not authorized to confirm receipt of this listing".to_string(),
                ));
            }
            Ok(())
        }
    }
}
