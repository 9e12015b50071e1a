//! # ss-notify-mailer
//!
//! HTTP mail-relay implementation of `Notifier`. Posts one JSON message
//! per notification to a relay endpoint (any transactional-mail HTTP API
//! with a `{from, to, subject, body}` shape will do).
//!
//! Delivery is best-effort with bounded retries: up to [`MAX_RETRIES`]
//! re-attempts with linear backoff, after which the failure is reported
//! in the `DeliveryResult`, never as an error. Callers must be able to
//! fire this and keep going.

use async_trait::async_trait;
use ss_core::traits::{DeliveryResult, Notifier};
use std::time::Duration;

/// Re-attempts after the first try.
const MAX_RETRIES: u32 = 2;
/// Backoff grows linearly: 500ms, then 1000ms.
const BACKOFF_STEP: Duration = Duration::from_millis(500);
/// Hard cap on any single relay round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpMailNotifier {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

impl HttpMailNotifier {
    /// `relay_url` is the full endpoint to POST messages to; `from` is the
    /// sender address stamped on every message.
    pub fn new(relay_url: String, from: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, relay_url, from }
    }

    async fn attempt(&self, to: &str, subject: &str, body: &str) -> Result<(), String> {
        let payload = serde_json::json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "body": body,
        });
        let response = self
            .client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("relay returned {}", response.status()))
        }
    }
}

#[async_trait]
impl Notifier for HttpMailNotifier {
    async fn send(&self, to: &str, subject: &str, body: &str) -> DeliveryResult {
        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_STEP * attempt).await;
            }
            match self.attempt(to, subject, body).await {
                Ok(()) => {
                    return DeliveryResult {
                        success: true,
                        message: format!("delivered to {to}"),
                    }
                }
                Err(err) => {
                    log::warn!("mail delivery to {to} failed (attempt {}): {err}", attempt + 1);
                    last_error = err;
                }
            }
        }
        DeliveryResult {
            success: false,
            message: format!("delivery to {to} failed after {} attempts: {last_error}", MAX_RETRIES + 1),
        }
    }
}
