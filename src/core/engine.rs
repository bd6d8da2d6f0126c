use crate::adapters::storage::write_report;
use crate::core::Pipeline;
use crate::domain::model::{OutcomeStatus, SyncReport};
use crate::utils::error::Result;
use chrono::Utc;
use std::path::PathBuf;

pub struct SyncEngine<P: Pipeline> {
    pipeline: P,
    folder_id: String,
    dry_run: bool,
    report_path: Option<PathBuf>,
}

impl<P: Pipeline> SyncEngine<P> {
    pub fn new(pipeline: P, folder_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            pipeline,
            folder_id: folder_id.into(),
            dry_run,
            report_path: None,
        }
    }

    pub fn with_report_path(mut self, path: Option<PathBuf>) -> Self {
        self.report_path = path;
        self
    }

    pub async fn run(&self) -> Result<SyncReport> {
        let started_at = Utc::now();
        tracing::info!(
            "🚀 Starting Google Drive → HubSpot sync for folder {}{}",
            self.folder_id,
            if self.dry_run { " (dry-run)" } else { "" }
        );

        // Extract
        let files = self.pipeline.extract().await?;

        // Transform
        let mut transformed = self.pipeline.transform(files).await?;
        let mut outcomes = std::mem::take(&mut transformed.outcomes);

        // Load
        outcomes.extend(self.pipeline.load(transformed).await?);
        outcomes.sort_by(|a, b| a.file_name.cmp(&b.file_name).then(a.file_id.cmp(&b.file_id)));

        let report = SyncReport {
            folder_id: self.folder_id.clone(),
            dry_run: self.dry_run,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        tracing::info!(
            "📊 attached={} dry_run={} no_owner={} no_match={} unsupported={} failed={}",
            report.count(OutcomeStatus::Attached),
            report.count(OutcomeStatus::DryRun),
            report.count(OutcomeStatus::NoOwners),
            report.count(OutcomeStatus::NoMatch),
            report.count(OutcomeStatus::Unsupported),
            report.count(OutcomeStatus::Failed)
        );

        if let Some(path) = &self.report_path {
            write_report(path, &report).await?;
            tracing::info!("📁 Report written to {}", path.display());
        }

        Ok(report)
    }
}
