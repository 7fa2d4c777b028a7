use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use freightdesk_common::{CompletionMode, Config, FreightDeskError, FreightQuery, FreightSnapshot};

use crate::status::{RunTicket, Stage, StatusMachine};
use crate::traits::FreightSource;

/// Default wait before the single post-scrape refresh. The backend gives no
/// completion signal; this is long enough for a typical marketplace run.
pub const DEFAULT_REFRESH_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStrategy {
    /// Wait once, re-fetch once, settle to Ready whatever came back.
    FixedDelay(Duration),
    /// Re-fetch every `interval` until the freight list differs from the
    /// pre-dispatch baseline, giving up (still Ready) after `max_attempts`.
    Converge { interval: Duration, max_attempts: u32 },
}

impl Default for CompletionStrategy {
    fn default() -> Self {
        CompletionStrategy::FixedDelay(DEFAULT_REFRESH_DELAY)
    }
}

impl CompletionStrategy {
    pub fn from_config(config: &Config) -> Self {
        match config.completion_mode {
            CompletionMode::Fixed => CompletionStrategy::FixedDelay(config.refresh_delay),
            CompletionMode::Converge => CompletionStrategy::Converge {
                interval: config.poll_interval,
                max_attempts: config.poll_max_attempts,
            },
        }
    }
}

/// Detects scrape completion by re-fetching freights after dispatch, and
/// releases the run guard by settling the status.
pub struct CompletionPoller {
    freights: Arc<dyn FreightSource>,
    strategy: CompletionStrategy,
    query: FreightQuery,
}

impl CompletionPoller {
    pub fn new(
        freights: Arc<dyn FreightSource>,
        strategy: CompletionStrategy,
        query: FreightQuery,
    ) -> Self {
        Self {
            freights,
            strategy,
            query,
        }
    }

    /// Spawn the completion watch for a dispatched run. Cancelling the
    /// token stops it before any further status update.
    ///
    /// `baseline` is the freight list as loaded before dispatch. Without
    /// one, converge mode takes its first poll as the baseline.
    pub fn schedule(
        &self,
        ticket: RunTicket,
        status: Arc<StatusMachine>,
        baseline: Option<FreightSnapshot>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let watch = CompletionWatch {
            freights: self.freights.clone(),
            query: self.query.clone(),
            ticket,
            status,
            baseline,
        };
        let strategy = self.strategy;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(run_id = %watch.ticket.run_id, "Pending refresh cancelled");
                }
                _ = watch.run(strategy) => {}
            }
        })
    }
}

struct CompletionWatch {
    freights: Arc<dyn FreightSource>,
    query: FreightQuery,
    ticket: RunTicket,
    status: Arc<StatusMachine>,
    baseline: Option<FreightSnapshot>,
}

impl CompletionWatch {
    async fn run(&self, strategy: CompletionStrategy) {
        match strategy {
            CompletionStrategy::FixedDelay(delay) => self.fixed_delay(delay).await,
            CompletionStrategy::Converge {
                interval,
                max_attempts,
            } => self.converge(interval, max_attempts.max(1)).await,
        }
    }

    async fn fixed_delay(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
        if !self.status.advance(&self.ticket, Stage::Refreshing) {
            return;
        }

        match self.fetch().await {
            Ok(snapshot) => self.finish(snapshot),
            Err(e) => self.abort(e),
        }
    }

    async fn converge(&self, interval: Duration, max_attempts: u32) {
        let mut baseline = self.baseline;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(interval).await;
            if !self.status.is_current(&self.ticket) {
                return;
            }

            let snapshot = match self.fetch().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    if self.status.advance(&self.ticket, Stage::Refreshing) {
                        self.abort(e);
                    }
                    return;
                }
            };

            let changed = match baseline {
                Some(previous) => snapshot != previous,
                None => {
                    debug!(
                        run_id = %self.ticket.run_id,
                        offers = snapshot.count,
                        "Baseline taken from first poll"
                    );
                    baseline = Some(snapshot);
                    false
                }
            };

            if changed {
                info!(
                    run_id = %self.ticket.run_id,
                    attempt,
                    offers = snapshot.count,
                    "Freight list changed"
                );
            } else if attempt == max_attempts {
                warn!(run_id = %self.ticket.run_id, attempt, "No new offers seen, settling anyway");
            } else {
                debug!(run_id = %self.ticket.run_id, attempt, "Freight list unchanged");
                continue;
            }

            if self.status.advance(&self.ticket, Stage::Refreshing) {
                self.finish(snapshot);
            }
            return;
        }
    }

    async fn fetch(&self) -> Result<FreightSnapshot, FreightDeskError> {
        self.freights
            .fetch_freights(&self.query)
            .await
            .map(|list| FreightSnapshot::of(&list))
            .map_err(|e| FreightDeskError::Refetch(format!("Failed to reload freights: {e}")))
    }

    fn finish(&self, snapshot: FreightSnapshot) {
        if self.status.complete(&self.ticket, snapshot) {
            info!(run_id = %self.ticket.run_id, offers = snapshot.count, "Scrape results refreshed");
        }
    }

    fn abort(&self, error: FreightDeskError) {
        warn!(run_id = %self.ticket.run_id, error = %error, "Post-scrape refresh failed");
        self.status.fail(&self.ticket, &error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Trigger;
    use crate::testing::{freight, MockFreightSource};

    fn poller(source: Arc<MockFreightSource>, strategy: CompletionStrategy) -> CompletionPoller {
        CompletionPoller::new(source, strategy, FreightQuery::first_page(100))
    }

    fn scraping_run(status: &StatusMachine) -> RunTicket {
        let ticket = status.begin(Trigger::Manual).unwrap();
        assert!(status.advance(&ticket, Stage::Scraping));
        ticket
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_refreshes_once_after_the_delay() {
        let source = Arc::new(MockFreightSource::new(vec![freight(1), freight(2)]));
        let status = Arc::new(StatusMachine::new());
        let ticket = scraping_run(&status);

        let handle = poller(source.clone(), CompletionStrategy::default()).schedule(
            ticket,
            status.clone(),
            None,
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(source.calls(), 0);
        assert_eq!(status.snapshot().stage, Stage::Scraping);

        handle.await.unwrap();
        assert_eq!(source.calls(), 1);
        let summary = status.snapshot();
        assert_eq!(summary.stage, Stage::Ready);
        assert_eq!(summary.total_offers, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_data_still_settles_ready() {
        let source = Arc::new(MockFreightSource::new(vec![freight(1)]));
        let status = Arc::new(StatusMachine::new());
        status.record_refresh(FreightSnapshot::of(&[freight(1)]));
        let baseline = status.snapshot().freight_snapshot();
        let ticket = scraping_run(&status);

        let watch = poller(source, CompletionStrategy::default());
        watch
            .schedule(ticket, status.clone(), Some(baseline), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status.snapshot().stage, Stage::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watch_never_touches_status() {
        let source = Arc::new(MockFreightSource::new(vec![freight(1)]));
        let status = Arc::new(StatusMachine::new());
        let ticket = scraping_run(&status);
        let cancel = CancellationToken::new();

        let handle = poller(source.clone(), CompletionStrategy::default()).schedule(
            ticket,
            status.clone(),
            None,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls(), 0);
        assert_eq!(status.snapshot().stage, Stage::Scraping);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_failure_ends_in_error() {
        let source = Arc::new(MockFreightSource::new(vec![]).failing());
        let status = Arc::new(StatusMachine::new());
        let ticket = scraping_run(&status);

        let watch = poller(source, CompletionStrategy::default());
        watch
            .schedule(ticket, status.clone(), None, CancellationToken::new())
            .await
            .unwrap();

        let summary = status.snapshot();
        assert_eq!(summary.stage, Stage::Error);
        assert!(summary.last_error.unwrap().starts_with("Refresh error"));
    }

    #[tokio::test(start_paused = true)]
    async fn converge_stops_at_first_changed_list() {
        let source = Arc::new(
            MockFreightSource::new(vec![freight(1)])
                .then(vec![freight(1)])
                .then(vec![freight(1), freight(2), freight(3)]),
        );
        let status = Arc::new(StatusMachine::new());
        status.record_refresh(FreightSnapshot::of(&[freight(1)]));
        let baseline = status.snapshot().freight_snapshot();
        let ticket = scraping_run(&status);

        let strategy = CompletionStrategy::Converge {
            interval: Duration::from_secs(2),
            max_attempts: 10,
        };
        let watch = poller(source.clone(), strategy);
        watch
            .schedule(ticket, status.clone(), Some(baseline), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 3);
        let summary = status.snapshot();
        assert_eq!(summary.stage, Stage::Ready);
        assert_eq!(summary.total_offers, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn converge_gives_up_after_max_attempts() {
        let source = Arc::new(MockFreightSource::new(vec![freight(1)]));
        let status = Arc::new(StatusMachine::new());
        status.record_refresh(FreightSnapshot::of(&[freight(1)]));
        let baseline = status.snapshot().freight_snapshot();
        let ticket = scraping_run(&status);

        let strategy = CompletionStrategy::Converge {
            interval: Duration::from_secs(1),
            max_attempts: 4,
        };
        let watch = poller(source.clone(), strategy);
        watch
            .schedule(ticket, status.clone(), Some(baseline), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 4);
        assert_eq!(status.snapshot().stage, Stage::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn converge_without_baseline_starts_from_first_poll() {
        let five: Vec<_> = (1..=5).map(freight).collect();
        let six: Vec<_> = (1..=6).map(freight).collect();
        let source = Arc::new(
            MockFreightSource::new(five.clone())
                .then(five.clone())
                .then(five)
                .then(six),
        );
        let status = Arc::new(StatusMachine::new());
        let ticket = scraping_run(&status);

        let strategy = CompletionStrategy::Converge {
            interval: Duration::from_secs(2),
            max_attempts: 10,
        };
        let watch = poller(source.clone(), strategy);
        watch
            .schedule(ticket, status.clone(), None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(source.calls(), 4);
        let summary = status.snapshot();
        assert_eq!(summary.stage, Stage::Ready);
        assert_eq!(summary.total_offers, 6);
    }
}
