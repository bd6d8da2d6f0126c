use crate::adapters::drive::DEFAULT_DRIVE_API_BASE;
use crate::adapters::http::RetryPolicy;
use crate::adapters::hubspot::DEFAULT_HUBSPOT_API_BASE;
use crate::core::owner::OwnerSource;
use crate::domain::model::CrmObjectType;
use crate::domain::ports::SyncSettings;
use crate::utils::error::{Result, SyncError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub google: GoogleConfig,
    pub hubspot: HubSpotConfig,
    pub sync: SyncOptions,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub folder_id: String,
    pub credentials_path: Option<String>,
    /// 已取得的 access token，設定後就不走 OAuth 流程
    pub access_token: Option<String>,
    pub token_cache: String,
    pub interactive: bool,
    pub api_base: String,
    pub token_url: Option<String>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            folder_id: String::new(),
            credentials_path: None,
            access_token: None,
            token_cache: "token.json".to_string(),
            interactive: true,
            api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            token_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSpotConfig {
    pub access_token: String,
    pub api_base: String,
    pub folder_path: String,
}

impl Default for HubSpotConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_base: DEFAULT_HUBSPOT_API_BASE.to_string(),
            folder_path: "/imported-files".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub owner_sources: Vec<OwnerSource>,
    pub match_objects: Vec<CrmObjectType>,
    pub include_associated: Vec<CrmObjectType>,
    pub concurrent_files: usize,
    pub dry_run: bool,
    pub report_path: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            owner_sources: vec![OwnerSource::Permissions],
            match_objects: vec![CrmObjectType::Contact],
            include_associated: Vec::new(),
            concurrent_files: 5,
            dry_run: false,
            report_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            timeout_seconds: 60,
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            request_timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

impl SyncConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SyncError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| SyncError::InvalidConfigValueError {
            field: "toml_parsing".to_string(),
            value: String::new(),
            reason: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${HUBSPOT_ACCESS_TOKEN})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        use std::sync::OnceLock;

        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    fn validate_config(&self) -> Result<()> {
        if self.google.folder_id.trim().is_empty() {
            return Err(SyncError::MissingConfigError {
                field: "google.folder_id".to_string(),
            });
        }
        if self.hubspot.access_token.trim().is_empty() {
            return Err(SyncError::MissingConfigError {
                field: "hubspot.access_token".to_string(),
            });
        }

        match (&self.google.access_token, &self.google.credentials_path) {
            (Some(token), _) => validation::validate_non_empty_string("google.access_token", token)?,
            (None, credentials) => {
                let path = validation::validate_required_field("google.credentials_path", credentials)?;
                validation::validate_path("google.credentials_path", path)?;
                validation::validate_path("google.token_cache", &self.google.token_cache)?;
            }
        }

        validation::validate_url("google.api_base", &self.google.api_base)?;
        if let Some(token_url) = &self.google.token_url {
            validation::validate_url("google.token_url", token_url)?;
        }
        validation::validate_url("hubspot.api_base", &self.hubspot.api_base)?;
        validation::validate_folder_path("hubspot.folder_path", &self.hubspot.folder_path)?;
        validation::validate_positive_number("sync.concurrent_files", self.sync.concurrent_files, 1)?;

        if self.sync.owner_sources.is_empty() {
            return Err(SyncError::MissingConfigError {
                field: "sync.owner_sources".to_string(),
            });
        }
        if self.sync.match_objects.is_empty() {
            return Err(SyncError::MissingConfigError {
                field: "sync.match_objects".to_string(),
            });
        }
        for object_type in &self.sync.match_objects {
            if !matches!(object_type, CrmObjectType::Contact | CrmObjectType::Company) {
                return Err(SyncError::InvalidConfigValueError {
                    field: "sync.match_objects".to_string(),
                    value: object_type.to_string(),
                    reason: "only contacts and companies can be matched by email".to_string(),
                });
            }
        }
        if let Some(report_path) = &self.sync.report_path {
            validation::validate_path("sync.report_path", report_path)?;
        }

        Ok(())
    }
}

impl SyncSettings for SyncConfig {
    fn folder_id(&self) -> &str {
        &self.google.folder_id
    }

    fn owner_sources(&self) -> &[OwnerSource] {
        &self.sync.owner_sources
    }

    fn match_objects(&self) -> &[CrmObjectType] {
        &self.sync.match_objects
    }

    fn include_associated(&self) -> &[CrmObjectType] {
        &self.sync.include_associated
    }

    fn hubspot_folder_path(&self) -> &str {
        &self.hubspot.folder_path
    }

    fn concurrent_files(&self) -> usize {
        self.sync.concurrent_files.max(1)
    }

    fn dry_run(&self) -> bool {
        self.sync.dry_run
    }
}

impl Validate for SyncConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
