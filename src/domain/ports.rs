use crate::domain::model::{
    CrmObjectType, CrmRecord, DriveFile, FileContent, FileOutcome, OwnerSource, StoredToken,
    TransformResult,
};
use crate::utils::error::Result;
use async_trait::async_trait;

/// OAuth token 的持久化位置
pub trait TokenStore: Send + Sync {
    fn load(&self) -> impl std::future::Future<Output = Result<Option<StoredToken>>> + Send;
    fn save(&self, token: &StoredToken) -> impl std::future::Future<Output = Result<()>> + Send;
}

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

#[async_trait]
pub trait DriveSource: Send + Sync {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>>;
    async fn folder_name(&self, folder_id: &str) -> Result<String>;
    async fn permission_emails(&self, file_id: &str) -> Result<Vec<String>>;
    async fn download(&self, file: &DriveFile) -> Result<FileContent>;
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn search_by_email(&self, object_type: CrmObjectType, email: &str) -> Result<Vec<String>>;
    async fn associated(&self, record: &CrmRecord, target: CrmObjectType) -> Result<Vec<String>>;
    async fn upload_file(&self, content: &FileContent, folder_path: &str) -> Result<String>;
    async fn create_note(&self, file_id: &str, records: &[CrmRecord], body: &str)
        -> Result<String>;
}

pub trait SyncSettings: Send + Sync {
    fn folder_id(&self) -> &str;
    fn owner_sources(&self) -> &[OwnerSource];
    fn match_objects(&self) -> &[CrmObjectType];
    fn include_associated(&self) -> &[CrmObjectType];
    fn hubspot_folder_path(&self) -> &str;
    fn concurrent_files(&self) -> usize;
    fn dry_run(&self) -> bool;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<DriveFile>>;
    async fn transform(&self, files: Vec<DriveFile>) -> Result<TransformResult>;
    async fn load(&self, result: TransformResult) -> Result<Vec<FileOutcome>>;
}
