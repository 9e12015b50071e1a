//! second-serve/crates/ss-core/src/lib.rs
//!
//! The central domain logic and interface definitions for Second Serve:
//! the listing lifecycle state machine, the authorization guard, and the
//! ports any storage/notifier/geocoder plugin must implement.

pub mod models;
pub mod traits;
pub mod error;
pub mod guard;
pub mod engine;

// Re-exporting for easier access in other crates
pub use models::*;
pub use traits::*;
pub use error::*;
pub use engine::{DeliveryReport, LifecycleEngine, NotificationSummary, Transition};
