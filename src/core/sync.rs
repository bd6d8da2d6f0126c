use crate::core::owner::{resolve_owner_emails, OwnerSource};
use crate::domain::model::{
    CrmObjectType, CrmRecord, DownloadMode, DriveFile, FileOutcome, FilePlan, OutcomeStatus,
    SkipReason, TransformResult,
};
use crate::domain::ports::{CrmClient, DriveSource, Pipeline, SyncSettings};
use crate::utils::error::{ErrorCategory, Result, SyncError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// 同一個 email 在多個檔案中出現時，只查一次 HubSpot。
///
/// 每個 key 對應一個 `OnceCell`，並行的查詢會等待同一個請求；失敗時不快取，下一個呼叫者重試。
#[derive(Debug, Default)]
struct LookupCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Vec<String>>>>>,
}

impl LookupCache {
    async fn get_or_fetch<F, Fut>(&self, key: String, fetch: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<String>>>,
    {
        let cell = self.entries.lock().await.entry(key).or_default().clone();
        cell.get_or_try_init(fetch).await.cloned()
    }
}

fn is_fatal(error: &SyncError) -> bool {
    error.category() == ErrorCategory::Authentication
}

pub struct SyncPipeline<D: DriveSource, C: CrmClient, S: SyncSettings> {
    drive: D,
    crm: C,
    settings: S,
    cache: LookupCache,
}

impl<D: DriveSource, C: CrmClient, S: SyncSettings> SyncPipeline<D, C, S> {
    pub fn new(drive: D, crm: C, settings: S) -> Self {
        Self {
            drive,
            crm,
            settings,
            cache: LookupCache::default(),
        }
    }

    async fn search(&self, object_type: CrmObjectType, email: &str) -> Result<Vec<String>> {
        let key = format!("search:{}:{}", object_type, email);
        self.cache
            .get_or_fetch(key, || self.crm.search_by_email(object_type, email))
            .await
    }

    async fn associated(&self, record: &CrmRecord, target: CrmObjectType) -> Result<Vec<String>> {
        let key = format!("assoc:{}:{}:{}", record.object_type, record.id, target);
        self.cache
            .get_or_fetch(key, || self.crm.associated(record, target))
            .await
    }

    /// 把 email 對應的紀錄加入計畫；只有恰好一筆符合時才會附加
    async fn match_email(&self, plan: &mut FilePlan, email: &str) -> Result<()> {
        for &object_type in self.settings.match_objects() {
            let ids = match self.search(object_type, email).await {
                Ok(ids) => ids,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!("HubSpot {} lookup failed for {}: {}", object_type, email, e);
                    plan.skipped.push(SkipReason::LookupFailed {
                        email: email.to_string(),
                        object_type,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let id = match ids.as_slice() {
                [] => {
                    tracing::info!("No HubSpot {} found for {}", object_type, email);
                    plan.skipped.push(SkipReason::NoMatch {
                        email: email.to_string(),
                        object_type,
                    });
                    continue;
                }
                [id] => id.clone(),
                many => {
                    tracing::warn!(
                        "⚠️ {} HubSpot {} match {}, not attaching",
                        many.len(),
                        object_type,
                        email
                    );
                    plan.skipped.push(SkipReason::Ambiguous {
                        email: email.to_string(),
                        object_type,
                        matches: many.len(),
                    });
                    continue;
                }
            };

            let record = CrmRecord::new(object_type, id);
            if !plan.add_record(record.clone()) {
                continue;
            }

            for &target in self.settings.include_associated() {
                if target == object_type {
                    continue;
                }
                match self.associated(&record, target).await {
                    Ok(ids) => {
                        for id in ids {
                            plan.add_record(CrmRecord::new(target, id));
                        }
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => {
                        tracing::warn!(
                            "Could not read {} associated with {} {}: {}",
                            target,
                            record.object_type,
                            record.id,
                            e
                        );
                        plan.skipped.push(SkipReason::LookupFailed {
                            email: email.to_string(),
                            object_type: target,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn plan_file(&self, file: DriveFile, folder_name: Option<&str>) -> Result<FilePlan> {
        let emails = resolve_owner_emails(
            &file,
            self.settings.owner_sources(),
            &self.drive,
            folder_name,
        )
        .await?;

        let mut plan = FilePlan::new(file, emails);
        for email in plan.owner_emails.clone() {
            self.match_email(&mut plan, &email).await?;
        }
        Ok(plan)
    }

    async fn attach(&self, plan: FilePlan) -> FileOutcome {
        if self.settings.dry_run() {
            tracing::info!(
                "🧪 [dry-run] would attach '{}' to {} record(s)",
                plan.file.name,
                plan.records.len()
            );
            let mut outcome = FileOutcome::from_plan(&plan, OutcomeStatus::DryRun);
            outcome.attached_to = plan.records;
            return outcome;
        }

        let mut outcome = FileOutcome::from_plan(&plan, OutcomeStatus::Failed);

        let content = match self.drive.download(&plan.file).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("❌ Failed to download '{}': {}", plan.file.name, e);
                return outcome.with_message(format!("download failed: {}", e));
            }
        };

        let file_id = match self
            .crm
            .upload_file(&content, self.settings.hubspot_folder_path())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("❌ Failed to upload '{}' to HubSpot: {}", content.file_name, e);
                return outcome.with_message(format!("upload failed: {}", e));
            }
        };
        outcome.hubspot_file_id = Some(file_id.clone());

        let body = crate::adapters::hubspot::note_body(&content.file_name);
        match self.crm.create_note(&file_id, &plan.records, &body).await {
            Ok(note_id) => {
                tracing::info!(
                    "✅ Attached '{}' to {} HubSpot record(s) (note {})",
                    content.file_name,
                    plan.records.len(),
                    note_id
                );
                outcome.status = OutcomeStatus::Attached;
                outcome.attached_to = plan.records;
                outcome
            }
            Err(e) => {
                tracing::error!("❌ Failed to create note for '{}': {}", content.file_name, e);
                outcome.with_message(format!("note creation failed: {}", e))
            }
        }
    }
}

#[async_trait::async_trait]
impl<D: DriveSource, C: CrmClient, S: SyncSettings> Pipeline for SyncPipeline<D, C, S> {
    async fn extract(&self) -> Result<Vec<DriveFile>> {
        let folder_id = self.settings.folder_id();
        tracing::debug!("Listing Drive folder {}", folder_id);
        let files = self.drive.list_folder(folder_id).await?;
        tracing::info!("📂 Found {} file(s) in Google Drive folder", files.len());
        Ok(files)
    }

    async fn transform(&self, files: Vec<DriveFile>) -> Result<TransformResult> {
        let mut result = TransformResult::default();

        let folder_name = if self.settings.owner_sources().contains(&OwnerSource::FileName) {
            match self.drive.folder_name(self.settings.folder_id()).await {
                Ok(name) => Some(name),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!("Could not read Drive folder name: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut supported = Vec::new();
        for file in files {
            if file.download_mode() == DownloadMode::Unsupported {
                tracing::info!("Skipping '{}' ({} cannot be exported)", file.name, file.mime_type);
                result.outcomes.push(
                    FileOutcome::new(&file, OutcomeStatus::Unsupported)
                        .with_message(format!("{} cannot be downloaded", file.mime_type)),
                );
            } else {
                supported.push(file);
            }
        }

        let planned: Vec<(DriveFile, Result<FilePlan>)> = stream::iter(supported)
            .map(|file| {
                let folder_name = folder_name.as_deref();
                async move {
                    let plan = self.plan_file(file.clone(), folder_name).await;
                    (file, plan)
                }
            })
            .buffer_unordered(self.settings.concurrent_files())
            .collect()
            .await;

        for (file, plan) in planned {
            let plan = match plan {
                Ok(plan) => plan,
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::error!("❌ Failed to resolve owners of '{}': {}", file.name, e);
                    result.outcomes.push(
                        FileOutcome::new(&file, OutcomeStatus::Failed).with_message(e.to_string()),
                    );
                    continue;
                }
            };

            if plan.owner_emails.is_empty() {
                tracing::info!("No owner email found for '{}'", plan.file.name);
                result
                    .outcomes
                    .push(FileOutcome::from_plan(&plan, OutcomeStatus::NoOwners));
            } else if plan.records.is_empty() {
                let lookup_failed = plan
                    .skipped
                    .iter()
                    .any(|s| matches!(s, SkipReason::LookupFailed { .. }));
                let status = if lookup_failed {
                    OutcomeStatus::Failed
                } else {
                    OutcomeStatus::NoMatch
                };
                result.outcomes.push(FileOutcome::from_plan(&plan, status));
            } else {
                result.plans.push(plan);
            }
        }

        tracing::info!(
            "🔎 {} file(s) matched HubSpot records, {} skipped",
            result.plans.len(),
            result.outcomes.len()
        );
        Ok(result)
    }

    async fn load(&self, result: TransformResult) -> Result<Vec<FileOutcome>> {
        let outcomes = stream::iter(result.plans)
            .map(|plan| self.attach(plan))
            .buffer_unordered(self.settings.concurrent_files())
            .collect()
            .await;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FileContent;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Default)]
    struct MockDrive {
        files: Vec<DriveFile>,
        permissions: HashMap<String, Vec<String>>,
        failing_downloads: Vec<String>,
        downloads: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl DriveSource for MockDrive {
        async fn list_folder(&self, _folder_id: &str) -> Result<Vec<DriveFile>> {
            Ok(self.files.clone())
        }

        async fn folder_name(&self, _folder_id: &str) -> Result<String> {
            Ok("Cases".to_string())
        }

        async fn permission_emails(&self, file_id: &str) -> Result<Vec<String>> {
            Ok(self.permissions.get(file_id).cloned().unwrap_or_default())
        }

        async fn download(&self, file: &DriveFile) -> Result<FileContent> {
            if self.failing_downloads.contains(&file.id) {
                return Err(SyncError::HttpStatusError {
                    service: "Google Drive".to_string(),
                    status: 404,
                    body: "not found".to_string(),
                });
            }
            self.downloads.lock().await.push(file.id.clone());
            let (file_name, mime_type) = file.upload_name_and_type();
            Ok(FileContent {
                file_name,
                mime_type,
                bytes: b"content".to_vec(),
            })
        }
    }

    #[derive(Default)]
    struct MockCrm {
        contacts: HashMap<String, Vec<String>>,
        deals: HashMap<String, Vec<String>>,
        unauthorized: bool,
        search_delay: Option<std::time::Duration>,
        searches: Arc<Mutex<Vec<String>>>,
        notes: Arc<Mutex<Vec<(String, Vec<CrmRecord>)>>>,
    }

    #[async_trait]
    impl CrmClient for MockCrm {
        async fn search_by_email(
            &self,
            _object_type: CrmObjectType,
            email: &str,
        ) -> Result<Vec<String>> {
            if self.unauthorized {
                return Err(SyncError::HttpStatusError {
                    service: "HubSpot".to_string(),
                    status: 401,
                    body: String::new(),
                });
            }
            self.searches.lock().await.push(email.to_string());
            if let Some(delay) = self.search_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.contacts.get(email).cloned().unwrap_or_default())
        }

        async fn associated(
            &self,
            record: &CrmRecord,
            _target: CrmObjectType,
        ) -> Result<Vec<String>> {
            Ok(self.deals.get(&record.id).cloned().unwrap_or_default())
        }

        async fn upload_file(&self, content: &FileContent, _folder_path: &str) -> Result<String> {
            Ok(format!("hs-{}", content.file_name))
        }

        async fn create_note(
            &self,
            file_id: &str,
            records: &[CrmRecord],
            _body: &str,
        ) -> Result<String> {
            self.notes
                .lock()
                .await
                .push((file_id.to_string(), records.to_vec()));
            Ok("note-1".to_string())
        }
    }

    struct TestSettings {
        sources: Vec<OwnerSource>,
        match_objects: Vec<CrmObjectType>,
        include_associated: Vec<CrmObjectType>,
        concurrent_files: usize,
        dry_run: bool,
    }

    impl Default for TestSettings {
        fn default() -> Self {
            Self {
                sources: vec![OwnerSource::Permissions],
                match_objects: vec![CrmObjectType::Contact],
                include_associated: Vec::new(),
                concurrent_files: 2,
                dry_run: false,
            }
        }
    }

    impl SyncSettings for TestSettings {
        fn folder_id(&self) -> &str {
            "folder-1"
        }
        fn owner_sources(&self) -> &[OwnerSource] {
            &self.sources
        }
        fn match_objects(&self) -> &[CrmObjectType] {
            &self.match_objects
        }
        fn include_associated(&self) -> &[CrmObjectType] {
            &self.include_associated
        }
        fn hubspot_folder_path(&self) -> &str {
            "/imported-files"
        }
        fn concurrent_files(&self) -> usize {
            self.concurrent_files
        }
        fn dry_run(&self) -> bool {
            self.dry_run
        }
    }

    fn file(id: &str, name: &str, mime_type: &str) -> DriveFile {
        DriveFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            owners: Vec::new(),
            size: None,
        }
    }

    fn permissions(entries: Vec<(&str, Vec<&str>)>) -> HashMap<String, Vec<String>> {
        entries
            .into_iter()
            .map(|(id, emails)| (id.to_string(), emails.iter().map(|e| e.to_string()).collect()))
            .collect()
    }

    async fn run<D: DriveSource, C: CrmClient, S: SyncSettings>(
        pipeline: &SyncPipeline<D, C, S>,
    ) -> Vec<FileOutcome> {
        let files = pipeline.extract().await.unwrap();
        let mut transformed = pipeline.transform(files).await.unwrap();
        let mut outcomes = std::mem::take(&mut transformed.outcomes);
        outcomes.extend(pipeline.load(transformed).await.unwrap());
        outcomes.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        outcomes
    }

    #[tokio::test]
    async fn test_file_is_attached_only_to_its_unique_match() {
        let drive = MockDrive {
            files: vec![
                file("1", "contract.pdf", "application/pdf"),
                file("2", "notes", "application/vnd.google-apps.document"),
            ],
            permissions: permissions(vec![
                ("1", vec!["Jane@Acme.io", "unknown@acme.io"]),
                ("2", vec!["bob@corp.com"]),
            ]),
            ..Default::default()
        };
        let crm = MockCrm {
            contacts: HashMap::from([
                ("jane@acme.io".to_string(), vec!["101".to_string()]),
                ("bob@corp.com".to_string(), vec!["202".to_string()]),
            ]),
            ..Default::default()
        };
        let notes = crm.notes.clone();
        let pipeline = SyncPipeline::new(drive, crm, TestSettings::default());

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, OutcomeStatus::Attached);
        assert_eq!(
            outcomes[0].attached_to,
            vec![CrmRecord::new(CrmObjectType::Contact, "101")]
        );
        assert_eq!(
            outcomes[0].skipped,
            vec![SkipReason::NoMatch {
                email: "unknown@acme.io".to_string(),
                object_type: CrmObjectType::Contact,
            }]
        );
        assert_eq!(outcomes[1].hubspot_file_id.as_deref(), Some("hs-notes.pdf"));

        let notes = notes.lock().await;
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|(_, records)| records.len() == 1));
    }

    #[tokio::test]
    async fn test_ambiguous_match_is_not_attached() {
        let drive = MockDrive {
            files: vec![file("1", "contract.pdf", "application/pdf")],
            permissions: permissions(vec![("1", vec!["shared@acme.io"])]),
            ..Default::default()
        };
        let crm = MockCrm {
            contacts: HashMap::from([(
                "shared@acme.io".to_string(),
                vec!["1".to_string(), "2".to_string()],
            )]),
            ..Default::default()
        };
        let notes = crm.notes.clone();
        let pipeline = SyncPipeline::new(drive, crm, TestSettings::default());

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes[0].status, OutcomeStatus::NoMatch);
        assert!(matches!(
            outcomes[0].skipped[0],
            SkipReason::Ambiguous { matches: 2, .. }
        ));
        assert!(notes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_and_ownerless_files_are_reported() {
        let drive = MockDrive {
            files: vec![
                file("1", "Intake form", "application/vnd.google-apps.form"),
                file("2", "public.pdf", "application/pdf"),
            ],
            ..Default::default()
        };
        let pipeline = SyncPipeline::new(drive, MockCrm::default(), TestSettings::default());

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes[0].status, OutcomeStatus::Unsupported);
        assert_eq!(outcomes[1].status, OutcomeStatus::NoOwners);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_download() {
        let drive = MockDrive {
            files: vec![file("1", "contract.pdf", "application/pdf")],
            permissions: permissions(vec![("1", vec!["jane@acme.io"])]),
            ..Default::default()
        };
        let downloads = drive.downloads.clone();
        let crm = MockCrm {
            contacts: HashMap::from([("jane@acme.io".to_string(), vec!["101".to_string()])]),
            ..Default::default()
        };
        let notes = crm.notes.clone();
        let settings = TestSettings {
            dry_run: true,
            ..Default::default()
        };
        let pipeline = SyncPipeline::new(drive, crm, settings);

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes[0].status, OutcomeStatus::DryRun);
        assert_eq!(outcomes[0].attached_to.len(), 1);
        assert!(downloads.lock().await.is_empty());
        assert!(notes.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_does_not_abort_other_files() {
        let drive = MockDrive {
            files: vec![
                file("1", "broken.pdf", "application/pdf"),
                file("2", "ok.pdf", "application/pdf"),
            ],
            permissions: permissions(vec![("1", vec!["jane@acme.io"]), ("2", vec!["jane@acme.io"])]),
            failing_downloads: vec!["1".to_string()],
            ..Default::default()
        };
        let crm = MockCrm {
            contacts: HashMap::from([("jane@acme.io".to_string(), vec!["101".to_string()])]),
            ..Default::default()
        };
        let searches = crm.searches.clone();
        let pipeline = SyncPipeline::new(drive, crm, TestSettings::default());

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes[0].status, OutcomeStatus::Failed);
        assert!(outcomes[0]
            .message
            .as_deref()
            .unwrap()
            .starts_with("download failed"));
        assert_eq!(outcomes[1].status, OutcomeStatus::Attached);
        assert_eq!(searches.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_email_is_searched_once_across_concurrent_files() {
        let ids = ["1", "2", "3", "4"];
        let drive = MockDrive {
            files: ids
                .iter()
                .map(|id| file(id, &format!("case-{}.pdf", id), "application/pdf"))
                .collect(),
            permissions: permissions(ids.iter().map(|id| (*id, vec!["jane@acme.io"])).collect()),
            ..Default::default()
        };
        let crm = MockCrm {
            contacts: HashMap::from([("jane@acme.io".to_string(), vec!["101".to_string()])]),
            search_delay: Some(std::time::Duration::from_millis(50)),
            ..Default::default()
        };
        let searches = crm.searches.clone();
        let settings = TestSettings {
            concurrent_files: 4,
            dry_run: true,
            ..Default::default()
        };
        let pipeline = SyncPipeline::new(drive, crm, settings);

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::DryRun));
        assert_eq!(*searches.lock().await, vec!["jane@acme.io".to_string()]);
    }

    #[tokio::test]
    async fn test_associated_deals_join_the_note() {
        let drive = MockDrive {
            files: vec![file("1", "contract.pdf", "application/pdf")],
            permissions: permissions(vec![("1", vec!["jane@acme.io"])]),
            ..Default::default()
        };
        let crm = MockCrm {
            contacts: HashMap::from([("jane@acme.io".to_string(), vec!["101".to_string()])]),
            deals: HashMap::from([("101".to_string(), vec!["9".to_string(), "10".to_string()])]),
            ..Default::default()
        };
        let notes = crm.notes.clone();
        let settings = TestSettings {
            include_associated: vec![CrmObjectType::Deal],
            ..Default::default()
        };
        let pipeline = SyncPipeline::new(drive, crm, settings);

        let outcomes = run(&pipeline).await;

        assert_eq!(outcomes[0].status, OutcomeStatus::Attached);
        let notes = notes.lock().await;
        assert_eq!(
            notes[0].1,
            vec![
                CrmRecord::new(CrmObjectType::Contact, "101"),
                CrmRecord::new(CrmObjectType::Deal, "9"),
                CrmRecord::new(CrmObjectType::Deal, "10"),
            ]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_crm_aborts_transform() {
        let drive = MockDrive {
            files: vec![file("1", "contract.pdf", "application/pdf")],
            permissions: permissions(vec![("1", vec!["jane@acme.io"])]),
            ..Default::default()
        };
        let crm = MockCrm {
            unauthorized: true,
            ..Default::default()
        };
        let pipeline = SyncPipeline::new(drive, crm, TestSettings::default());

        let files = pipeline.extract().await.unwrap();
        let err = pipeline.transform(files).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }
}
