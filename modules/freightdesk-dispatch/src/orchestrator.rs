//! Scrape orchestration for one dashboard session.
//!
//! A trigger enters the status machine (guarded: one run at a time), the
//! origin is resolved, dates are normalized, the scrape is dispatched, and
//! completion is detected by a scheduled re-fetch. Every failure lands in
//! the `Error` stage with a readable message and frees the guard.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use freightdesk_client::FreightDeskClient;
use freightdesk_common::{
    Config, FreightDeskError, FreightQuery, FreightSnapshot, SearchFilter, SessionAck,
    VehicleLocationState,
};

use crate::dates::MarketplaceDates;
use crate::dispatcher::{require_route, ScrapeDispatcher};
use crate::location::LocationResolver;
use crate::poller::{CompletionPoller, CompletionStrategy};
use crate::status::{RunTicket, Stage, StatusMachine, StatusSummary, Trigger};
use crate::traits::{AutomationBackend, FreightSource, LocationProvider};

/// Knobs for an orchestrator, normally taken from `Config`.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub headless: bool,
    pub completion: CompletionStrategy,
    pub page_size: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            headless: false,
            completion: CompletionStrategy::default(),
            page_size: 100,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            headless: config.headless,
            completion: CompletionStrategy::from_config(config),
            page_size: config.freight_page_size,
        }
    }
}

pub struct ScrapeOrchestrator {
    freights: Arc<dyn FreightSource>,
    backend: Arc<dyn AutomationBackend>,
    resolver: LocationResolver,
    dispatcher: ScrapeDispatcher,
    poller: CompletionPoller,
    page_query: FreightQuery,
    status: Arc<StatusMachine>,
    /// Parent of every pending refresh; cancelled on close/drop.
    session: CancellationToken,
    pending: Mutex<Option<CancellationToken>>,
}

impl ScrapeOrchestrator {
    pub fn new(
        freights: Arc<dyn FreightSource>,
        backend: Arc<dyn AutomationBackend>,
        locations: Arc<dyn LocationProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        let page_query = FreightQuery::first_page(settings.page_size);
        Self {
            resolver: LocationResolver::new(locations),
            dispatcher: ScrapeDispatcher::new(backend.clone(), settings.headless),
            poller: CompletionPoller::new(
                freights.clone(),
                settings.completion,
                page_query.clone(),
            ),
            freights,
            backend,
            page_query,
            status: Arc::new(StatusMachine::new()),
            session: CancellationToken::new(),
            pending: Mutex::new(None),
        }
    }

    /// Wire every collaborator to the same backend client.
    pub fn with_client(client: Arc<FreightDeskClient>, config: &Config) -> Self {
        Self::new(
            client.clone(),
            client.clone(),
            client,
            OrchestratorSettings::from_config(config),
        )
    }

    pub fn status(&self) -> StatusSummary {
        self.status.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSummary> {
        self.status.subscribe()
    }

    /// "Scrape with manual filters". Needs an origin or a destination.
    /// Returns once the backend has accepted the task; completion is
    /// tracked in the background.
    pub async fn trigger_manual_scrape(
        &self,
        filter: SearchFilter,
    ) -> Result<RunTicket, FreightDeskError> {
        let dates = self.validate(&filter, true)?;
        let ticket = self.status.begin(Trigger::Manual)?;
        self.run(ticket, filter, dates, None).await
    }

    /// "Scrape from truck GPS". The origin comes from the vehicle unless
    /// the filter already names one; with nothing to go on the backend
    /// picks its own default location.
    pub async fn trigger_gps_scrape(
        &self,
        filter: SearchFilter,
        vehicle: Option<VehicleLocationState>,
    ) -> Result<RunTicket, FreightDeskError> {
        let dates = self.validate(&filter, false)?;
        let ticket = self.status.begin(Trigger::Gps)?;
        self.run(ticket, filter, dates, vehicle.as_ref()).await
    }

    /// Navigation carrying a vehicle reference: resolve the origin so the
    /// filter can be pre-filled. Nothing is dispatched.
    pub async fn prefill_origin(
        &self,
        vehicle: VehicleLocationState,
    ) -> Result<Option<String>, FreightDeskError> {
        let ticket = self.status.begin(Trigger::Prefill)?;

        let resolved = match self
            .resolver
            .resolve(&SearchFilter::default(), Some(&vehicle))
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.abort(&ticket, e)),
        };

        self.ensure_live(&ticket)?;
        self.status.set_origin(&ticket, resolved.origin.clone());
        if !self.status.settle_idle(&ticket) {
            return Err(self.discarded());
        }
        Ok(resolved.origin)
    }

    /// Load the freight list and update the offer count. Does not change
    /// the stage, so it is safe to call while a run is in flight.
    pub async fn refresh_freights(&self) -> Result<FreightSnapshot, FreightDeskError> {
        if self.status.is_closed() {
            return Err(FreightDeskError::SessionClosed);
        }

        let freights = self.freights.fetch_freights(&self.page_query).await.map_err(|e| {
            warn!(error = %e, "Failed to load freights");
            FreightDeskError::Refetch(format!("Failed to load freights: {e}"))
        })?;

        let snapshot = FreightSnapshot::of(&freights);
        self.status.record_refresh(snapshot);
        Ok(snapshot)
    }

    /// Open the automation backend's browser session. Independent of the
    /// scrape pipeline and its guard.
    pub async fn launch_automation_session(&self) -> Result<SessionAck, FreightDeskError> {
        if self.status.is_closed() {
            return Err(FreightDeskError::SessionClosed);
        }

        let ack = self.backend.launch_session().await.map_err(|e| {
            warn!(error = %e, "Failed to launch automation session");
            FreightDeskError::Session(format!(
                "Failed to launch browser. Is the backend running? ({e})"
            ))
        })?;
        info!(message = ack.message.as_deref().unwrap_or("-"), "Automation session launched");
        Ok(ack)
    }

    /// Back to Idle. Any pending refresh is cancelled and in-flight results
    /// are discarded when they arrive.
    pub fn reset(&self) {
        self.settle_pending(StatusMachine::reset);
        info!("Dashboard status reset");
    }

    /// Tear the session down. Later triggers are refused.
    pub fn close(&self) {
        self.settle_pending(StatusMachine::close);
        self.session.cancel();
        info!("Dashboard session closed");
    }

    /// Wait until no run is active and return the settled summary.
    pub async fn wait_until_settled(&self) -> StatusSummary {
        let mut rx = self.status.subscribe();
        let settled = rx
            .wait_for(|summary| !summary.stage.is_active())
            .await
            .map(|summary| summary.clone());
        settled.unwrap_or_else(|_| self.status.snapshot())
    }

    async fn run(
        &self,
        ticket: RunTicket,
        filter: SearchFilter,
        dates: MarketplaceDates,
        vehicle: Option<&VehicleLocationState>,
    ) -> Result<RunTicket, FreightDeskError> {
        let resolved = match self.resolver.resolve(&filter, vehicle).await {
            Ok(resolved) => resolved,
            Err(e) => return Err(self.abort(&ticket, e)),
        };
        self.ensure_live(&ticket)?;
        self.status.set_origin(&ticket, resolved.origin.clone());

        let resolved_filter = SearchFilter {
            origin: resolved.origin,
            ..filter
        };
        let request = self.dispatcher.build_request(&resolved_filter, dates);
        // Without a prior load the summary counts are not a baseline.
        let summary = self.status.snapshot();
        let baseline = summary
            .last_refreshed_at
            .map(|_| summary.freight_snapshot());

        if !self.status.advance(&ticket, Stage::Scraping) {
            return Err(self.discarded());
        }
        info!(
            run_id = %ticket.run_id,
            origin = request.origin.as_deref().unwrap_or("-"),
            destination = request.destination.as_deref().unwrap_or("-"),
            source = ?resolved.source,
            "Dispatching scrape"
        );

        if let Err(e) = self.dispatcher.dispatch(&request).await {
            return Err(self.abort(&ticket, e));
        }

        self.schedule_refresh(ticket, baseline)?;
        Ok(ticket)
    }

    /// Input checks that run before the guard. A failure is surfaced with
    /// the stage left at Idle.
    fn validate(
        &self,
        filter: &SearchFilter,
        needs_route: bool,
    ) -> Result<MarketplaceDates, FreightDeskError> {
        let checked = if needs_route {
            require_route(filter).and_then(|_| MarketplaceDates::from_filter(filter))
        } else {
            MarketplaceDates::from_filter(filter)
        };

        checked.map_err(|e| match self.status.reject(&e) {
            Ok(()) => e,
            Err(guard) => guard,
        })
    }

    /// Start the completion watch for a dispatched run. The liveness check
    /// and the token swap share the `pending` lock with `reset` and `close`.
    fn schedule_refresh(
        &self,
        ticket: RunTicket,
        baseline: Option<FreightSnapshot>,
    ) -> Result<(), FreightDeskError> {
        let mut pending = self.lock_pending();
        self.ensure_live(&ticket)?;

        let cancel = self.session.child_token();
        if let Some(previous) = pending.replace(cancel.clone()) {
            previous.cancel();
        }
        // Detached; cancellation goes through the token.
        drop(self.poller.schedule(ticket, self.status.clone(), baseline, cancel));
        Ok(())
    }

    /// Apply a status teardown and cancel the pending refresh as one step
    /// with respect to `schedule_refresh`.
    fn settle_pending<F: FnOnce(&StatusMachine)>(&self, teardown: F) {
        let mut pending = self.lock_pending();
        teardown(self.status.as_ref());
        if let Some(token) = pending.take() {
            token.cancel();
        }
    }

    /// Record a pipeline failure. If the run was reset meanwhile the
    /// failure is discarded instead.
    fn abort(&self, ticket: &RunTicket, error: FreightDeskError) -> FreightDeskError {
        if self.status.fail(ticket, &error) {
            warn!(run_id = %ticket.run_id, error = %error, "Scrape run failed");
            error
        } else {
            warn!(run_id = %ticket.run_id, error = %error, "Discarding failure of abandoned run");
            self.discarded()
        }
    }

    fn ensure_live(&self, ticket: &RunTicket) -> Result<(), FreightDeskError> {
        if self.status.is_current(ticket) {
            Ok(())
        } else {
            warn!(run_id = %ticket.run_id, "Run was reset while in flight, discarding result");
            Err(self.discarded())
        }
    }

    fn discarded(&self) -> FreightDeskError {
        if self.status.is_closed() {
            FreightDeskError::SessionClosed
        } else {
            FreightDeskError::Abandoned
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ScrapeOrchestrator {
    fn drop(&mut self) {
        self.session.cancel();
    }
}
