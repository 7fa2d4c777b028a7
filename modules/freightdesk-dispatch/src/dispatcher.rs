use std::sync::Arc;

use tracing::{info, warn};

use freightdesk_common::{FreightDeskError, ScrapeAck, ScrapeRequest, SearchFilter};

use crate::dates::MarketplaceDates;
use crate::traits::AutomationBackend;

/// Manual scrapes need something to search for.
pub fn require_route(filter: &SearchFilter) -> Result<(), FreightDeskError> {
    if filter.has_route() {
        Ok(())
    } else {
        Err(FreightDeskError::Validation(
            "Please provide at least an origin or a destination for a manual search.".to_string(),
        ))
    }
}

/// Builds scrape requests and hands them to the automation backend.
/// Fire-and-forget: an acknowledgement means the task was queued.
pub struct ScrapeDispatcher {
    backend: Arc<dyn AutomationBackend>,
    headless: bool,
}

impl ScrapeDispatcher {
    pub fn new(backend: Arc<dyn AutomationBackend>, headless: bool) -> Self {
        Self { backend, headless }
    }

    /// Assemble the request from a resolved filter. Blank route fields go
    /// out as `null`, never as empty strings.
    pub fn build_request(&self, filter: &SearchFilter, dates: MarketplaceDates) -> ScrapeRequest {
        ScrapeRequest {
            origin: filter.origin().map(String::from),
            destination: filter.destination().map(String::from),
            headless: self.headless,
            loading_date_from: dates.loading_from,
            loading_date_to: dates.loading_to,
            unloading_date_from: dates.unloading_from,
            unloading_date_to: dates.unloading_to,
        }
    }

    /// Submit the request. Unreachable backends and explicit refusals are
    /// both dispatch errors.
    pub async fn dispatch(&self, request: &ScrapeRequest) -> Result<ScrapeAck, FreightDeskError> {
        let ack = self.backend.dispatch_scrape(request).await.map_err(|e| {
            warn!(error = %e, "Scrape submission failed");
            FreightDeskError::Dispatch(format!("Failed to start scraping task: {e}"))
        })?;

        if ack.is_rejected() {
            let reason = ack
                .message
                .clone()
                .unwrap_or_else(|| "no reason given".to_string());
            warn!(reason = %reason, "Automation backend refused scrape");
            return Err(FreightDeskError::Dispatch(format!(
                "Automation backend rejected the scrape: {reason}"
            )));
        }

        info!(
            task_id = ack.task_id.as_deref().unwrap_or("-"),
            status = ack.status.as_deref().unwrap_or("accepted"),
            "Scrape accepted"
        );
        Ok(ack)
    }
}
