use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FreightDeskError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Location error: {0}")]
    Resolution(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Refresh error: {0}")]
    Refetch(String),

    #[error("Scrape lock conflict: a scrape is already {0}")]
    ScrapeInProgress(String),

    #[error("Dashboard session is closed")]
    SessionClosed,

    #[error("Scrape run was abandoned by a reset")]
    Abandoned,

    #[error("Automation session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
