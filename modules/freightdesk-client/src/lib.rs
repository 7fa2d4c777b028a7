pub mod error;

pub use error::{ClientError, Result};

use std::time::Duration;

use freightdesk_common::{
    Freight, FreightQuery, ScrapeAck, ScrapeRequest, SessionAck, Truck, VehicleLocation,
};
use serde::de::DeserializeOwned;

/// REST client for the dashboard backend: freights, trucks, GPS lookups and
/// the automation endpoints.
pub struct FreightDeskClient {
    client: reqwest::Client,
    base_url: String,
}

impl FreightDeskClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        reqwest::Url::parse(base_url).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List freight offers, newest first.
    pub async fn list_freights(&self, query: &FreightQuery) -> Result<Vec<Freight>> {
        let url = format!("{}/freights", self.base_url);
        let freights: Vec<Freight> = self
            .execute(self.client.get(&url).query(query))
            .await?;
        tracing::debug!(count = freights.len(), skip = query.skip, "Fetched freights");
        Ok(freights)
    }

    /// Submit a scrape. Returns as soon as the backend has queued the task.
    pub async fn start_scrape(&self, request: &ScrapeRequest) -> Result<ScrapeAck> {
        let url = format!("{}/freights/scrape", self.base_url);
        tracing::info!(
            origin = request.origin.as_deref().unwrap_or("-"),
            destination = request.destination.as_deref().unwrap_or("-"),
            headless = request.headless,
            "Submitting scrape"
        );
        self.execute(self.client.post(&url).json(request)).await
    }

    /// Open an authenticated browser context on the automation host.
    pub async fn launch_browser(&self) -> Result<SessionAck> {
        let url = format!("{}/scraper/launch", self.base_url);
        self.execute(self.client.post(&url)).await
    }

    pub async fn get_truck(&self, truck_id: i64) -> Result<Truck> {
        let url = format!("{}/trucks/{}", self.base_url, truck_id);
        self.execute(self.client.get(&url)).await
    }

    /// Ask the GPS provider for a truck's current position and address.
    pub async fn truck_location(&self, truck_id: i64) -> Result<VehicleLocation> {
        let url = format!("{}/trucks/{}/location", self.base_url, truck_id);
        self.execute(self.client.get(&url)).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ClientError {
    let message = api_detail(body);
    if status == reqwest::StatusCode::NOT_FOUND {
        ClientError::NotFound(message)
    } else {
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Pull `detail` out of a JSON error body, falling back to the raw text.
fn api_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_detail_prefers_json_detail() {
        let body = r#"{"detail": "Origin must be provided or truck must have GPS location"}"#;
        assert_eq!(
            api_detail(body),
            "Origin must be provided or truck must have GPS location"
        );
        assert_eq!(api_detail("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn base_url_is_normalized() {
        let client = FreightDeskClient::new("http://localhost:8000/api/", Duration::from_secs(5))
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
    }

    #[test]
    fn unknown_resources_are_not_found() {
        let err = status_error(reqwest::StatusCode::NOT_FOUND, r#"{"detail": "Truck not found"}"#);
        assert!(matches!(err, ClientError::NotFound(ref msg) if msg == "Truck not found"));

        let err = status_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, ClientError::Api { status: 502, .. }));
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        let err = FreightDeskClient::new("not a url", Duration::from_secs(5))
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::InvalidUrl { .. }));
    }
}
