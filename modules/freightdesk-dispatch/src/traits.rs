// Trait abstractions for the orchestrator's external collaborators.
//
// FreightSource: read-only freight listing (the data store's REST surface).
// AutomationBackend: scrape submission and session bootstrap.
// LocationProvider: on-demand GPS resolution for a vehicle.
//
// FreightDeskClient implements all three. Tests swap in the mocks from
// `testing`, so no network is needed.

use anyhow::Result;
use async_trait::async_trait;

use freightdesk_client::FreightDeskClient;
use freightdesk_common::{
    Freight, FreightQuery, ScrapeAck, ScrapeRequest, SessionAck, VehicleLocation,
};

#[async_trait]
pub trait FreightSource: Send + Sync {
    /// Idempotent read of the freight collection.
    async fn fetch_freights(&self, query: &FreightQuery) -> Result<Vec<Freight>>;
}

#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Submit a scrape. Success means "accepted for execution", not "done".
    async fn dispatch_scrape(&self, request: &ScrapeRequest) -> Result<ScrapeAck>;

    /// Out-of-band session bootstrap (authenticated browser context).
    async fn launch_session(&self) -> Result<SessionAck>;
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn fetch_vehicle_location(&self, vehicle_id: i64) -> Result<VehicleLocation>;
}

#[async_trait]
impl FreightSource for FreightDeskClient {
    async fn fetch_freights(&self, query: &FreightQuery) -> Result<Vec<Freight>> {
        Ok(self.list_freights(query).await?)
    }
}

#[async_trait]
impl AutomationBackend for FreightDeskClient {
    async fn dispatch_scrape(&self, request: &ScrapeRequest) -> Result<ScrapeAck> {
        Ok(self.start_scrape(request).await?)
    }

    async fn launch_session(&self) -> Result<SessionAck> {
        Ok(self.launch_browser().await?)
    }
}

#[async_trait]
impl LocationProvider for FreightDeskClient {
    async fn fetch_vehicle_location(&self, vehicle_id: i64) -> Result<VehicleLocation> {
        Ok(self.truck_location(vehicle_id).await?)
    }
}
