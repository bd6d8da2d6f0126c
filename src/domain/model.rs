use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PDF_MIME_TYPE: &str = "application/pdf";
const WORKSPACE_PREFIX: &str = "application/vnd.google-apps.";

/// Drive 資料夾中的單一檔案
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// 下載方式：一般檔案直接下載，Workspace 檔案必須匯出
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    Media,
    Export(&'static str),
    Unsupported,
}

impl DriveFile {
    pub fn download_mode(&self) -> DownloadMode {
        match self.mime_type.as_str() {
            "application/vnd.google-apps.document"
            | "application/vnd.google-apps.spreadsheet"
            | "application/vnd.google-apps.presentation"
            | "application/vnd.google-apps.drawing" => DownloadMode::Export(PDF_MIME_TYPE),
            other if other.starts_with(WORKSPACE_PREFIX) => DownloadMode::Unsupported,
            _ => DownloadMode::Media,
        }
    }

    /// 上傳到 HubSpot 時使用的檔名與 MIME type
    pub fn upload_name_and_type(&self) -> (String, String) {
        match self.download_mode() {
            DownloadMode::Export(mime) => {
                let name = if self.name.to_ascii_lowercase().ends_with(".pdf") {
                    self.name.clone()
                } else {
                    format!("{}.pdf", self.name)
                };
                (name, mime.to_string())
            }
            _ => (self.name.clone(), self.mime_type.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmObjectType {
    #[serde(alias = "contacts")]
    Contact,
    #[serde(alias = "companies")]
    Company,
    #[serde(alias = "deals")]
    Deal,
    #[serde(alias = "tickets")]
    Ticket,
}

impl CrmObjectType {
    /// HubSpot CRM API 的路徑片段
    pub fn api_path(&self) -> &'static str {
        match self {
            CrmObjectType::Contact => "contacts",
            CrmObjectType::Company => "companies",
            CrmObjectType::Deal => "deals",
            CrmObjectType::Ticket => "tickets",
        }
    }
}

impl fmt::Display for CrmObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_path())
    }
}

impl FromStr for CrmObjectType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contact" | "contacts" => Ok(CrmObjectType::Contact),
            "company" | "companies" => Ok(CrmObjectType::Company),
            "deal" | "deals" => Ok(CrmObjectType::Deal),
            "ticket" | "tickets" => Ok(CrmObjectType::Ticket),
            other => Err(format!(
                "unknown CRM object type '{}' (expected contacts, companies, deals or tickets)",
                other
            )),
        }
    }
}

/// 找出檔案擁有者 email 的來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerSource {
    /// 檔案分享權限中的 email
    Permissions,
    /// Drive 的 owners 欄位
    Owners,
    /// 檔名中的 email，找不到時再看所在資料夾名稱
    FileName,
}

impl fmt::Display for OwnerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OwnerSource::Permissions => "permissions",
            OwnerSource::Owners => "owners",
            OwnerSource::FileName => "file-name",
        };
        f.write_str(name)
    }
}

impl FromStr for OwnerSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "permissions" => Ok(OwnerSource::Permissions),
            "owners" => Ok(OwnerSource::Owners),
            "file-name" | "filename" => Ok(OwnerSource::FileName),
            other => Err(format!(
                "unknown owner source '{}' (expected permissions, owners or file-name)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrmRecord {
    pub object_type: CrmObjectType,
    pub id: String,
}

impl CrmRecord {
    pub fn new(object_type: CrmObjectType, id: impl Into<String>) -> Self {
        Self {
            object_type,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoMatch {
        email: String,
        object_type: CrmObjectType,
    },
    Ambiguous {
        email: String,
        object_type: CrmObjectType,
        matches: usize,
    },
    LookupFailed {
        email: String,
        object_type: CrmObjectType,
        message: String,
    },
}

/// 一個檔案對應到 CRM 的解析結果
#[derive(Debug, Clone)]
pub struct FilePlan {
    pub file: DriveFile,
    pub owner_emails: Vec<String>,
    pub records: Vec<CrmRecord>,
    pub skipped: Vec<SkipReason>,
}

impl FilePlan {
    pub fn new(file: DriveFile, owner_emails: Vec<String>) -> Self {
        Self {
            file,
            owner_emails,
            records: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// 同一筆紀錄只會加入一次
    pub fn add_record(&mut self, record: CrmRecord) -> bool {
        if self.records.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn ids_of(&self, object_type: CrmObjectType) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.object_type == object_type)
            .map(|r| r.id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Attached,
    DryRun,
    NoOwners,
    NoMatch,
    Unsupported,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file_id: String,
    pub file_name: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub owner_emails: Vec<String>,
    #[serde(default)]
    pub attached_to: Vec<CrmRecord>,
    #[serde(default)]
    pub skipped: Vec<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hubspot_file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileOutcome {
    pub fn new(file: &DriveFile, status: OutcomeStatus) -> Self {
        Self {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            status,
            owner_emails: Vec::new(),
            attached_to: Vec::new(),
            skipped: Vec::new(),
            hubspot_file_id: None,
            message: None,
        }
    }

    pub fn from_plan(plan: &FilePlan, status: OutcomeStatus) -> Self {
        Self {
            owner_emails: plan.owner_emails.clone(),
            skipped: plan.skipped.clone(),
            ..Self::new(&plan.file, status)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub folder_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<FileOutcome>,
}

impl SyncReport {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(OutcomeStatus::Failed) > 0
    }
}

/// 快取在本機的 Google OAuth token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl StoredToken {
    /// 剩餘有效時間少於 `leeway_secs` 即視為過期
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_secs: i64) -> bool {
        !self.access_token.is_empty() && self.expires_at - chrono::Duration::seconds(leeway_secs) > now
    }
}

/// 各階段之間傳遞的中間結果
#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    pub plans: Vec<FilePlan>,
    pub outcomes: Vec<FileOutcome>,
}
