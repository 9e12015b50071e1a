//! # ss-geo-nominatim
//!
//! Nominatim (OpenStreetMap) implementation of `Geocoder`. Strictly
//! best-effort: one attempt per lookup, a short client timeout, and the
//! documented defaults on any failure; a slow or broken geocoder must
//! never block a listing transition.

use async_trait::async_trait;
use ss_core::traits::Geocoder;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
// Nominatim's usage policy requires an identifying User-Agent.
const USER_AGENT: &str = "SecondServe/0.1 (second-serve@example.com)";

pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// `base_url` without a trailing slash, e.g.
    /// `https://nominatim.openstreetmap.org`.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    async fn search(&self, address: &str) -> Option<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", address), ("format", "json"), ("addressdetails", "1")])
            .send()
            .await
            .ok()?;
        response.json::<serde_json::Value>().await.ok()
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn country_for(&self, address: &str) -> String {
        match self.search(address).await {
            Some(results) => results
                .get(0)
                .and_then(|hit| hit.get("address"))
                .and_then(|addr| addr.get("country"))
                .and_then(|c| c.as_str())
                .unwrap_or("Unknown")
                .to_string(),
            None => {
                log::warn!("country lookup failed for address {address:?}; defaulting to Unknown");
                "Unknown".to_string()
            }
        }
    }

    async fn reverse(&self, latitude: f64, longitude: f64) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .ok()?;
        let value = response.json::<serde_json::Value>().await.ok()?;
        value
            .get("display_name")
            .and_then(|name| name.as_str())
            .map(String::from)
    }
}
