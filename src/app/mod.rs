//! 組裝各個 adapter 並執行一次同步

use crate::adapters::drive::GoogleDrive;
use crate::adapters::hubspot::HubSpotClient;
use crate::adapters::http::RetryPolicy;
use crate::adapters::oauth::{ClientSecrets, GoogleAuth, StaticAccessToken};
use crate::adapters::storage::FileTokenStore;
use crate::config::SyncConfig;
use crate::core::engine::SyncEngine;
use crate::core::sync::SyncPipeline;
use crate::domain::model::SyncReport;
use crate::domain::ports::AccessTokenProvider;
use crate::utils::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;

/// Google 存取憑證：外部提供的 token，或本機 OAuth 流程
pub enum GoogleCredentials {
    Static(StaticAccessToken),
    OAuth(GoogleAuth<FileTokenStore>),
}

#[async_trait]
impl AccessTokenProvider for GoogleCredentials {
    async fn access_token(&self) -> Result<String> {
        match self {
            GoogleCredentials::Static(token) => token.access_token().await,
            GoogleCredentials::OAuth(auth) => auth.access_token().await,
        }
    }
}

impl GoogleCredentials {
    pub fn from_config(config: &SyncConfig, client: Client, policy: RetryPolicy) -> Result<Self> {
        if let Some(token) = &config.google.access_token {
            tracing::debug!("Using the provided Google access token");
            return Ok(GoogleCredentials::Static(StaticAccessToken(token.clone())));
        }

        let path = config.google.credentials_path.as_deref().ok_or_else(|| {
            SyncError::MissingConfigError {
                field: "google.credentials_path".to_string(),
            }
        })?;
        let secrets = ClientSecrets::from_file(path)?;

        let mut auth = GoogleAuth::new(
            secrets,
            FileTokenStore::new(&config.google.token_cache),
            client,
        )
        .with_retry_policy(policy)
        .with_interactive(config.google.interactive);
        if let Some(token_url) = &config.google.token_url {
            auth = auth.with_token_url(token_url);
        }
        Ok(GoogleCredentials::OAuth(auth))
    }
}

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("drive-hubspot-sync/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub async fn run(config: SyncConfig) -> Result<SyncReport> {
    let client = http_client()?;
    let policy = config.http.retry_policy();

    let credentials = GoogleCredentials::from_config(&config, client.clone(), policy.clone())?;
    let drive = GoogleDrive::new(client.clone(), credentials)
        .with_api_base(&config.google.api_base)
        .with_retry_policy(policy.clone());
    let crm = HubSpotClient::new(client, &config.hubspot.access_token)
        .with_api_base(&config.hubspot.api_base)
        .with_retry_policy(policy);

    let folder_id = config.google.folder_id.clone();
    let dry_run = config.sync.dry_run;
    let report_path = config.sync.report_path.as_ref().map(PathBuf::from);

    let pipeline = SyncPipeline::new(drive, crm, config);
    SyncEngine::new(pipeline, folder_id, dry_run)
        .with_report_path(report_path)
        .run()
        .await
}
