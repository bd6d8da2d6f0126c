pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::SyncConfig;

pub use core::{engine::SyncEngine, sync::SyncPipeline};
pub use domain::model::{OutcomeStatus, SyncReport};
pub use utils::error::{Result, SyncError};
