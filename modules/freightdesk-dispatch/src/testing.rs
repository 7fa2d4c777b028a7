// Test mocks for the orchestrator.
//
// One mock per collaborator trait:
// - MockFreightSource (FreightSource): scripted freight lists, call counter
// - MockAutomationBackend (AutomationBackend): records every request
// - MockLocationProvider (LocationProvider): vehicle_id → address map
//
// Each mock can be told to fail, and can hold its responses behind a
// `Notify` gate so tests can observe in-flight stages.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

use freightdesk_common::{
    Freight, FreightQuery, ScrapeAck, ScrapeRequest, SessionAck, VehicleLocation,
};

use crate::traits::{AutomationBackend, FreightSource, LocationProvider};

/// A freight offer whose creation time grows with its id.
pub fn freight(id: i64) -> Freight {
    Freight {
        id,
        trans_id: Some(format!("TE-{id}")),
        loading_place: Some("SK, 82106 Bratislava".to_string()),
        unloading_place: Some("PL, Warsaw".to_string()),
        loading_date: Some("01.03.2024".to_string()),
        price_original: Some(1000.0 + id as f64),
        currency: Some("EUR".to_string()),
        created_at: Utc
            .with_ymd_and_hms(2024, 3, 1, 8, 0, 0)
            .single()
            .map(|t| t + chrono::Duration::minutes(id)),
    }
}

// ---------------------------------------------------------------------------
// MockFreightSource
// ---------------------------------------------------------------------------

/// Returns scripted freight lists in order; the last one repeats.
pub struct MockFreightSource {
    responses: Mutex<VecDeque<Vec<Freight>>>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockFreightSource {
    pub fn new(freights: Vec<Freight>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([freights])),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue the list returned by the next call after the current ones.
    pub fn then(self, freights: Vec<Freight>) -> Self {
        self.responses.lock().unwrap().push_back(freights);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FreightSource for MockFreightSource {
    async fn fetch_freights(&self, _query: &FreightQuery) -> Result<Vec<Freight>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("MockFreightSource: backend unavailable");
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.pop_front().unwrap_or_default())
        } else {
            Ok(responses.front().cloned().unwrap_or_default())
        }
    }
}

// ---------------------------------------------------------------------------
// MockAutomationBackend
// ---------------------------------------------------------------------------

/// Records dispatched requests. Accepts by default.
pub struct MockAutomationBackend {
    dispatched: Mutex<Vec<ScrapeRequest>>,
    fail: bool,
    reject_reason: Option<String>,
    gate: Option<Arc<Notify>>,
    sessions: AtomicUsize,
}

impl MockAutomationBackend {
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            fail: false,
            reject_reason: None,
            gate: None,
            sessions: AtomicUsize::new(0),
        }
    }

    /// Every call errors as if the backend were unreachable.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// The backend answers with `success: false`.
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.reject_reason = Some(reason.to_string());
        self
    }

    /// Hold each dispatch until the returned `Notify` is signalled.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn dispatched(&self) -> Vec<ScrapeRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn sessions_launched(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl Default for MockAutomationBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationBackend for MockAutomationBackend {
    async fn dispatch_scrape(&self, request: &ScrapeRequest) -> Result<ScrapeAck> {
        self.dispatched.lock().unwrap().push(request.clone());
        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }
        if self.fail {
            bail!("MockAutomationBackend: connection refused");
        }
        if let Some(ref reason) = self.reject_reason {
            return Ok(ScrapeAck {
                success: Some(false),
                message: Some(reason.clone()),
                ..Default::default()
            });
        }
        Ok(ScrapeAck {
            status: Some("pending".to_string()),
            message: Some("Scraper started in background".to_string()),
            task_id: Some(format!("scrape_{}", self.dispatched.lock().unwrap().len())),
            ..Default::default()
        })
    }

    async fn launch_session(&self) -> Result<SessionAck> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("MockAutomationBackend: connection refused");
        }
        Ok(SessionAck {
            status: Some("launched".to_string()),
            message: Some("Browser launched".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// MockLocationProvider
// ---------------------------------------------------------------------------

/// vehicle_id → address. Unregistered vehicles error.
pub struct MockLocationProvider {
    addresses: HashMap<i64, String>,
    fail: bool,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl MockLocationProvider {
    pub fn new() -> Self {
        Self {
            addresses: HashMap::new(),
            fail: false,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on_vehicle(mut self, vehicle_id: i64, address: &str) -> Self {
        self.addresses.insert(vehicle_id, address.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Hold each lookup until the returned `Notify` is signalled.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationProvider for MockLocationProvider {
    async fn fetch_vehicle_location(&self, vehicle_id: i64) -> Result<VehicleLocation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref gate) = self.gate {
            gate.notified().await;
        }
        if self.fail {
            bail!("MockLocationProvider: GPS provider timed out");
        }
        match self.addresses.get(&vehicle_id) {
            Some(address) => Ok(VehicleLocation {
                address: Some(address.clone()),
                lat: Some(48.1486),
                lng: Some(17.1077),
            }),
            None => bail!("MockLocationProvider: no location registered for vehicle {vehicle_id}"),
        }
    }
}
