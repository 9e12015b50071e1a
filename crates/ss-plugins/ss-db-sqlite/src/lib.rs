//! # ss-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational
//! model and the `ss-core` domain models. The conditional save the engine
//! requires becomes a single conditional `UPDATE` keyed on id, status, and
//! revision; `rows_affected` tells us whether we won the write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};
use ss_core::models::{Listing, ListingStatus, Location, Role, User};
use ss_core::traits::{ListingRepo, SaveOutcome};
use uuid::Uuid;

pub struct SqliteListingRepo {
    pool: SqlitePool,
}

// Helpers for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Uuid {
    Uuid::from_slice(blob).unwrap_or_default()
}

fn status_to_str(status: ListingStatus) -> String {
    status.to_string()
}

fn str_to_status(s: &str) -> anyhow::Result<ListingStatus> {
    match s {
        "available" => Ok(ListingStatus::Available),
        "claimed" => Ok(ListingStatus::Claimed),
        "deal_confirmed" => Ok(ListingStatus::DealConfirmed),
        "received" => Ok(ListingStatus::Received),
        "expired" => Ok(ListingStatus::Expired),
        other => anyhow::bail!("unknown listing status in database: {other}"),
    }
}

fn str_to_role(s: &str) -> Role {
    match s {
        "donor" => Role::Donor,
        "receiver" => Role::Receiver,
        _ => Role::Undefined,
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Donor => "donor",
        Role::Receiver => "receiver",
        Role::Undefined => "undefined",
    }
}

fn row_to_listing(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Listing> {
    let requested_by: Vec<Uuid> =
        serde_json::from_str(&row.get::<String, _>("requested_by")).unwrap_or_default();
    let receiver_location: Option<Location> = row
        .get::<Option<String>, _>("receiver_location")
        .and_then(|json| serde_json::from_str(&json).ok());
    Ok(Listing {
        id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
        title: row.get("title"),
        description: row.get("description"),
        quantity: row.get("quantity"),
        location: Location {
            address: row.get("address"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
        },
        country: row.get("country"),
        posted_by: blob_to_uuid(row.get::<Vec<u8>, _>("posted_by").as_slice()),
        requested_by,
        claimed_by: row
            .get::<Option<Vec<u8>>, _>("claimed_by")
            .map(|blob| blob_to_uuid(blob.as_slice())),
        receiver_location,
        status: str_to_status(&row.get::<String, _>("status"))?,
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        deal_confirmed_at: row.get("deal_confirmed_at"),
        received_at: row.get("received_at"),
        revision: row.get::<i64, _>("revision") as u64,
    })
}

impl SqliteListingRepo {
    /// Connects and applies the schema. `sqlite::memory:` works for tests.
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id    BLOB PRIMARY KEY,
                email TEXT NOT NULL,
                phone TEXT NOT NULL,
                role  TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS listings (
                id                BLOB PRIMARY KEY,
                title             TEXT NOT NULL,
                description       TEXT NOT NULL,
                quantity          REAL NOT NULL,
                address           TEXT NOT NULL,
                latitude          REAL NOT NULL,
                longitude         REAL NOT NULL,
                country           TEXT NOT NULL,
                posted_by         BLOB NOT NULL,
                requested_by      TEXT NOT NULL,
                claimed_by        BLOB,
                receiver_location TEXT,
                status            TEXT NOT NULL,
                created_at        TEXT NOT NULL,
                expires_at        TEXT NOT NULL,
                deal_confirmed_at TEXT,
                received_at       TEXT,
                revision          INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ListingRepo for SqliteListingRepo {
    async fn get_listing(&self, id: Uuid) -> anyhow::Result<Option<Listing>> {
        let row = sqlx::query("SELECT * FROM listings WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_listing).transpose()
    }

    async fn insert_listing(&self, listing: Listing) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO listings (id, title, description, quantity, address, latitude, \
             longitude, country, posted_by, requested_by, claimed_by, receiver_location, \
             status, created_at, expires_at, deal_confirmed_at, received_at, revision) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(listing.id))
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.quantity)
        .bind(&listing.location.address)
        .bind(listing.location.latitude)
        .bind(listing.location.longitude)
        .bind(&listing.country)
        .bind(uuid_to_blob(listing.posted_by))
        .bind(serde_json::to_string(&listing.requested_by)?)
        .bind(listing.claimed_by.map(uuid_to_blob))
        .bind(
            listing
                .receiver_location
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(status_to_str(listing.status))
        .bind(listing.created_at)
        .bind(listing.expires_at)
        .bind(listing.deal_confirmed_at)
        .bind(listing.received_at)
        .bind(listing.revision as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// One conditional `UPDATE`; SQLite's row-level write gives us the
    /// atomicity. A zero `rows_affected` means someone got there first.
    async fn save_if_status(
        &self,
        listing: &Listing,
        expected: ListingStatus,
    ) -> anyhow::Result<SaveOutcome> {
        let result = sqlx::query(
            "UPDATE listings SET \
                 requested_by = ?, claimed_by = ?, receiver_location = ?, status = ?, \
                 deal_confirmed_at = ?, received_at = ?, revision = revision + 1 \
             WHERE id = ? AND status = ? AND revision = ?",
        )
        .bind(serde_json::to_string(&listing.requested_by)?)
        .bind(listing.claimed_by.map(uuid_to_blob))
        .bind(
            listing
                .receiver_location
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(status_to_str(listing.status))
        .bind(listing.deal_confirmed_at)
        .bind(listing.received_at)
        .bind(uuid_to_blob(listing.id))
        .bind(status_to_str(expected))
        .bind(listing.revision as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(SaveOutcome::Saved)
        } else {
            log::debug!("conditional save lost for listing {}", listing.id);
            Ok(SaveOutcome::Conflict)
        }
    }

    async fn list_by_status(&self, status: ListingStatus) -> anyhow::Result<Vec<Listing>> {
        let rows = sqlx::query("SELECT * FROM listings WHERE status = ? ORDER BY created_at DESC")
            .bind(status_to_str(status))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_listing).collect()
    }

    async fn list_by_owner(&self, owner: Uuid) -> anyhow::Result<Vec<Listing>> {
        let rows =
            sqlx::query("SELECT * FROM listings WHERE posted_by = ? ORDER BY created_at DESC")
                .bind(uuid_to_blob(owner))
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_listing).collect()
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE listings SET status = 'expired', revision = revision + 1 \
             WHERE status = 'available' AND expires_at < ?",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| User {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            email: row.get("email"),
            phone: row.get("phone"),
            role: str_to_role(&row.get::<String, _>("role")),
        }))
    }

    async fn insert_user(&self, user: User) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO users (id, email, phone, role) VALUES (?, ?, ?, ?)")
            .bind(uuid_to_blob(user.id))
            .bind(&user.email)
            .bind(&user.phone)
            .bind(role_to_str(user.role))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
