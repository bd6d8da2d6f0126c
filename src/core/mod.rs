pub mod engine;
pub mod owner;
pub mod sync;

pub use crate::domain::model::{DriveFile, FileOutcome, SyncReport, TransformResult};
pub use crate::domain::ports::{CrmClient, DriveSource, Pipeline, SyncSettings, TokenStore};
pub use crate::utils::error::Result;
