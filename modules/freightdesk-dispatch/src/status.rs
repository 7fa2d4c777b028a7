//! Orchestration status: the single UI-visible state of a dashboard session.
//!
//! `StatusMachine` owns the current `StatusSummary`, enforces the stage
//! transitions and the one-pipeline-at-a-time guard, and publishes every
//! change on a `watch` channel for the presentation layer. Only the
//! orchestrator holds it mutably; everyone else gets snapshots.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use freightdesk_common::{FreightDeskError, FreightSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    Resolving,
    Scraping,
    Refreshing,
    Ready,
    Error,
}

impl Stage {
    /// A pipeline is running; new triggers are refused.
    pub fn is_active(self) -> bool {
        matches!(self, Stage::Resolving | Stage::Scraping | Stage::Refreshing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Ready | Stage::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Resolving => "Resolving GPS...",
            Stage::Scraping => "Scraping...",
            Stage::Refreshing => "Refreshing...",
            Stage::Ready => "Ready",
            Stage::Error => "Error",
        }
    }

    /// Forward transitions a run may take. Resets bypass this table.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Idle, Resolving)
                | (Resolving, Scraping)
                | (Resolving, Idle)
                | (Resolving, Error)
                | (Scraping, Refreshing)
                | (Scraping, Error)
                | (Refreshing, Ready)
                | (Refreshing, Error)
                | (Ready, Idle)
                | (Error, Idle)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// "Scrape with manual filters".
    Manual,
    /// "Scrape from truck GPS".
    Gps,
    /// Navigation carrying a vehicle reference: resolve the origin only.
    Prefill,
}

/// Handle for one accepted run. Transitions made with a ticket from before
/// the latest reset are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    pub run_id: Uuid,
    pub trigger: Trigger,
    generation: u64,
}

/// Snapshot consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub stage: Stage,
    pub label: &'static str,
    pub scrape_active: bool,
    pub updated_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub total_offers: usize,
    pub latest_offer_at: Option<DateTime<Utc>>,
    /// Origin used (or resolved) by the latest run.
    pub origin: Option<String>,
    pub last_error: Option<String>,
}

impl StatusSummary {
    fn idle() -> Self {
        Self {
            stage: Stage::Idle,
            label: Stage::Idle.label(),
            scrape_active: false,
            updated_at: Utc::now(),
            last_refreshed_at: None,
            total_offers: 0,
            latest_offer_at: None,
            origin: None,
            last_error: None,
        }
    }

    /// Count and newest timestamp as of the last refresh.
    pub fn freight_snapshot(&self) -> FreightSnapshot {
        FreightSnapshot {
            count: self.total_offers,
            newest: self.latest_offer_at,
        }
    }

    fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.label = stage.label();
        self.scrape_active = stage.is_active();
        self.updated_at = Utc::now();
    }

    fn record_refresh(&mut self, snapshot: FreightSnapshot) {
        self.total_offers = snapshot.count;
        self.latest_offer_at = snapshot.newest;
        self.last_refreshed_at = Some(Utc::now());
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status={} offers={}", self.label, self.total_offers)?;
        if let Some(ref origin) = self.origin {
            write!(f, " origin=\"{origin}\"")?;
        }
        match self.last_refreshed_at {
            Some(at) => write!(f, " last_update={}", at.format("%Y-%m-%d %H:%M:%S"))?,
            None => write!(f, " last_update=never")?,
        }
        if let Some(ref err) = self.last_error {
            write!(f, " error=\"{err}\"")?;
        }
        Ok(())
    }
}

struct MachineState {
    summary: StatusSummary,
    generation: u64,
    closed: bool,
}

pub struct StatusMachine {
    state: Mutex<MachineState>,
    tx: watch::Sender<StatusSummary>,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        let summary = StatusSummary::idle();
        let (tx, _) = watch::channel(summary.clone());
        Self {
            state: Mutex::new(MachineState {
                summary,
                generation: 0,
                closed: false,
            }),
            tx,
        }
    }

    pub fn snapshot(&self) -> StatusSummary {
        self.lock().summary.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSummary> {
        self.tx.subscribe()
    }

    /// Whether a ticket still belongs to the live run.
    pub fn is_current(&self, ticket: &RunTicket) -> bool {
        let state = self.lock();
        !state.closed && state.generation == ticket.generation
    }

    /// Accept a new run. Refused while another run is active or after close.
    /// A terminal stage passes through Idle (clearing the last error) on
    /// its way to Resolving.
    pub fn begin(&self, trigger: Trigger) -> Result<RunTicket, FreightDeskError> {
        let mut state = self.lock();
        Self::check_accepting(&state)?;

        if state.summary.stage.is_terminal() {
            state.summary.set_stage(Stage::Idle);
        }
        state.summary.last_error = None;
        state.summary.origin = None;
        state.summary.set_stage(Stage::Resolving);
        state.generation += 1;

        let ticket = RunTicket {
            run_id: Uuid::new_v4(),
            trigger,
            generation: state.generation,
        };
        info!(run_id = %ticket.run_id, ?trigger, "Scrape run started");
        self.publish(&state);
        Ok(ticket)
    }

    /// Record a trigger refused before it started (bad input). The stage
    /// settles at Idle with the message surfaced. Active runs are untouched
    /// and the guard conflict is returned instead.
    pub fn reject(&self, error: &FreightDeskError) -> Result<(), FreightDeskError> {
        let mut state = self.lock();
        Self::check_accepting(&state)?;

        if state.summary.stage != Stage::Idle {
            state.summary.set_stage(Stage::Idle);
        }
        state.summary.updated_at = Utc::now();
        state.summary.last_error = Some(error.to_string());
        warn!(error = %error, "Scrape trigger rejected");
        self.publish(&state);
        Ok(())
    }

    /// Move a live run forward. Returns false when the ticket is stale or
    /// the transition is not allowed from the current stage.
    pub fn advance(&self, ticket: &RunTicket, next: Stage) -> bool {
        self.apply(ticket, next, |_| {})
    }

    /// Record the origin a run resolved to.
    pub fn set_origin(&self, ticket: &RunTicket, origin: Option<String>) -> bool {
        let mut state = self.lock();
        if !Self::live(&state, ticket) {
            return false;
        }
        state.summary.origin = origin;
        state.summary.updated_at = Utc::now();
        self.publish(&state);
        true
    }

    /// Refresh finished: Refreshing → Ready with the new freight numbers.
    pub fn complete(&self, ticket: &RunTicket, snapshot: FreightSnapshot) -> bool {
        self.apply(ticket, Stage::Ready, |summary| summary.record_refresh(snapshot))
    }

    /// Resolution-only run finished: Resolving → Idle.
    pub fn settle_idle(&self, ticket: &RunTicket) -> bool {
        self.apply(ticket, Stage::Idle, |_| {})
    }

    /// Abort a live run into Error, keeping the message for the UI.
    pub fn fail(&self, ticket: &RunTicket, error: &FreightDeskError) -> bool {
        let message = error.to_string();
        self.apply(ticket, Stage::Error, |summary| summary.last_error = Some(message))
    }

    /// Update freight numbers outside a run (mount-time load, manual refresh).
    /// The stage does not change.
    pub fn record_refresh(&self, snapshot: FreightSnapshot) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.summary.record_refresh(snapshot);
        state.summary.updated_at = Utc::now();
        self.publish(&state);
    }

    /// Back to Idle from any stage. Outstanding tickets become stale.
    pub fn reset(&self) {
        let mut state = self.lock();
        Self::force_idle(&mut state);
        self.publish(&state);
    }

    /// Tear down: reset and refuse every later trigger.
    pub fn close(&self) {
        let mut state = self.lock();
        Self::force_idle(&mut state);
        state.closed = true;
        self.publish(&state);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn apply<F>(&self, ticket: &RunTicket, next: Stage, update: F) -> bool
    where
        F: FnOnce(&mut StatusSummary),
    {
        let mut state = self.lock();
        if !Self::live(&state, ticket) {
            debug!(run_id = %ticket.run_id, ?next, "Dropping transition for stale run");
            return false;
        }

        let current = state.summary.stage;
        if !current.can_advance_to(next) {
            warn!(run_id = %ticket.run_id, from = ?current, to = ?next, "Illegal stage transition");
            return false;
        }

        update(&mut state.summary);
        state.summary.set_stage(next);
        info!(run_id = %ticket.run_id, stage = next.label(), "Stage changed");
        self.publish(&state);
        true
    }

    fn check_accepting(state: &MachineState) -> Result<(), FreightDeskError> {
        if state.closed {
            return Err(FreightDeskError::SessionClosed);
        }
        let stage = state.summary.stage;
        if stage.is_active() {
            return Err(FreightDeskError::ScrapeInProgress(
                stage.label().trim_end_matches("...").to_lowercase(),
            ));
        }
        Ok(())
    }

    fn live(state: &MachineState, ticket: &RunTicket) -> bool {
        !state.closed && state.generation == ticket.generation
    }

    fn force_idle(state: &mut MachineState) {
        state.generation += 1;
        state.summary.last_error = None;
        state.summary.set_stage(Stage::Idle);
    }

    fn publish(&self, state: &MachineState) {
        self.tx.send_replace(state.summary.clone());
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_run_walks_every_stage() {
        let machine = StatusMachine::new();
        let ticket = machine.begin(Trigger::Manual).unwrap();
        assert_eq!(machine.snapshot().stage, Stage::Resolving);
        assert!(machine.snapshot().scrape_active);

        assert!(machine.advance(&ticket, Stage::Scraping));
        assert!(machine.advance(&ticket, Stage::Refreshing));
        assert!(machine.complete(
            &ticket,
            FreightSnapshot {
                count: 12,
                newest: None
            }
        ));

        let summary = machine.snapshot();
        assert_eq!(summary.stage, Stage::Ready);
        assert_eq!(summary.total_offers, 12);
        assert!(!summary.scrape_active);
        assert!(summary.last_refreshed_at.is_some());
    }

    #[test]
    fn second_trigger_is_refused_while_active() {
        let machine = StatusMachine::new();
        let ticket = machine.begin(Trigger::Manual).unwrap();

        for stage in [Stage::Resolving, Stage::Scraping, Stage::Refreshing] {
            if stage != Stage::Resolving {
                assert!(machine.advance(&ticket, stage));
            }
            let err = machine.begin(Trigger::Gps).unwrap_err();
            assert!(matches!(err, FreightDeskError::ScrapeInProgress(_)));
        }
    }

    #[test]
    fn terminal_stages_accept_a_new_trigger_and_clear_the_error() {
        let machine = StatusMachine::new();
        let ticket = machine.begin(Trigger::Manual).unwrap();
        machine.fail(&ticket, &FreightDeskError::Dispatch("backend down".into()));
        assert_eq!(machine.snapshot().stage, Stage::Error);
        assert!(machine.snapshot().last_error.is_some());

        machine.begin(Trigger::Manual).unwrap();
        let summary = machine.snapshot();
        assert_eq!(summary.stage, Stage::Resolving);
        assert_eq!(summary.last_error, None);
    }

    #[test]
    fn reset_makes_outstanding_tickets_stale() {
        let machine = StatusMachine::new();
        let ticket = machine.begin(Trigger::Manual).unwrap();
        machine.advance(&ticket, Stage::Scraping);

        machine.reset();
        assert_eq!(machine.snapshot().stage, Stage::Idle);
        assert!(!machine.is_current(&ticket));
        assert!(!machine.advance(&ticket, Stage::Refreshing));
        assert_eq!(machine.snapshot().stage, Stage::Idle);
    }

    #[test]
    fn skipping_a_stage_is_refused() {
        let machine = StatusMachine::new();
        let ticket = machine.begin(Trigger::Manual).unwrap();
        assert!(!machine.complete(&ticket, FreightSnapshot::default()));
        assert_eq!(machine.snapshot().stage, Stage::Resolving);
    }

    #[test]
    fn rejection_keeps_idle_and_surfaces_message() {
        let machine = StatusMachine::new();
        machine
            .reject(&FreightDeskError::Validation("origin or destination required".into()))
            .unwrap();
        let summary = machine.snapshot();
        assert_eq!(summary.stage, Stage::Idle);
        assert!(summary.last_error.unwrap().contains("origin or destination"));
    }

    #[test]
    fn rejection_does_not_disturb_an_active_run() {
        let machine = StatusMachine::new();
        machine.begin(Trigger::Manual).unwrap();
        let err = machine
            .reject(&FreightDeskError::Validation("bad".into()))
            .unwrap_err();
        assert!(matches!(err, FreightDeskError::ScrapeInProgress(_)));
        assert_eq!(machine.snapshot().stage, Stage::Resolving);
        assert_eq!(machine.snapshot().last_error, None);
    }

    #[test]
    fn closed_machine_refuses_everything() {
        let machine = StatusMachine::new();
        machine.close();
        assert_eq!(
            machine.begin(Trigger::Manual).unwrap_err(),
            FreightDeskError::SessionClosed
        );
        assert!(machine.is_closed());
    }

    #[test]
    fn subscribers_see_each_transition() {
        let machine = StatusMachine::new();
        let rx = machine.subscribe();
        let ticket = machine.begin(Trigger::Gps).unwrap();
        assert_eq!(rx.borrow().stage, Stage::Resolving);
        machine.advance(&ticket, Stage::Scraping);
        assert_eq!(rx.borrow().stage, Stage::Scraping);
        assert_eq!(rx.borrow().label, "Scraping...");
    }
}
