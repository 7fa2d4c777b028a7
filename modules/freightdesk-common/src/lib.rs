pub mod types;
pub mod config;
pub mod error;

pub use types::*;
pub use config::{CompletionMode, Config};
pub use error::FreightDeskError;
