pub mod dates;
pub mod dispatcher;
pub mod location;
pub mod orchestrator;
pub mod poller;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use orchestrator::{OrchestratorSettings, ScrapeOrchestrator};
pub use poller::CompletionStrategy;
pub use status::{RunTicket, Stage, StatusSummary, Trigger};
