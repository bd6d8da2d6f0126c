//! Google OAuth2 授權（installed app 流程）
//!
//! 1. 讀取本機 token 快取，仍有效就直接使用
//! 2. 過期且有 refresh token 時換發新的 access token
//! 3. 都沒有時開啟本機 loopback 監聽，讓使用者在瀏覽器完成授權

use crate::adapters::http::{send_with_retry, RetryPolicy};
use crate::domain::model::StoredToken;
use crate::domain::ports::{AccessTokenProvider, TokenStore};
use crate::utils::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use url::Url;

pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
const EXPIRY_LEEWAY_SECS: i64 = 60;
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REDIRECT_REQUEST_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            SyncError::config(format!(
                "cannot read Google credentials {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(content)?;
        file.installed.or(file.web).ok_or_else(|| {
            SyncError::config("Google credentials must contain an 'installed' or 'web' client")
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            // refresh 回應通常不會再帶 refresh_token
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + ChronoDuration::seconds(self.expires_in.unwrap_or(3600)),
            scope: self.scope,
        }
    }
}

/// 直接使用外部提供的 access token（例如 `gcloud auth print-access-token`）
#[derive(Debug, Clone)]
pub struct StaticAccessToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticAccessToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub struct GoogleAuth<S: TokenStore> {
    secrets: ClientSecrets,
    store: S,
    client: Client,
    policy: RetryPolicy,
    interactive: bool,
    cached: Mutex<Option<StoredToken>>,
}

impl<S: TokenStore> GoogleAuth<S> {
    pub fn new(secrets: ClientSecrets, store: S, client: Client) -> Self {
        Self {
            secrets,
            store,
            client,
            policy: RetryPolicy::default(),
            interactive: true,
            cached: Mutex::new(None),
        }
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.secrets.token_uri = token_url.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 關閉瀏覽器授權（排程執行時沒有人可以點擊同意）
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn consent_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.secrets.auth_uri)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.secrets.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", DRIVE_READONLY_SCOPE)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("state", state);
        Ok(url)
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = send_with_retry("Google OAuth", &self.policy, || {
            Ok(self.client.post(&self.secrets.token_uri).form(params))
        })
        .await
        .map_err(|e| match e {
            SyncError::HttpStatusError { status, body, .. } if status < 500 => {
                SyncError::auth(format!("token endpoint rejected the request ({}): {}", status, body))
            }
            other => other,
        })?;
        Ok(response.json().await?)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken> {
        tracing::info!("🔑 Refreshing Google access token");
        let response = self
            .request_token(&[
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        Ok(response.into_stored(Some(refresh_token.to_string())))
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<StoredToken> {
        let response = self
            .request_token(&[
                ("code", code),
                ("client_id", self.secrets.client_id.as_str()),
                ("client_secret", self.secrets.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await?;
        Ok(response.into_stored(None))
    }

    async fn authorize_interactively(&self) -> Result<StoredToken> {
        if !self.interactive {
            return Err(SyncError::auth(
                "no valid Google token cached and interactive authorization is disabled",
            ));
        }

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let redirect_uri = format!("http://127.0.0.1:{}", listener.local_addr()?.port());
        let state = format!(
            "{:x}{:x}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            std::process::id()
        );
        let url = self.consent_url(&redirect_uri, &state)?;

        tracing::info!("🌐 Waiting for Google authorization on {}", redirect_uri);
        println!("Open this URL in your browser to authorize Google Drive access:\n\n{}\n", url);

        let code = tokio::time::timeout(CONSENT_TIMEOUT, wait_for_code(&listener, &state))
            .await
            .map_err(|_| SyncError::auth("timed out waiting for Google authorization"))??;

        self.exchange_code(&code, &redirect_uri).await
    }

    async fn obtain_token(&self, current: Option<StoredToken>) -> Result<StoredToken> {
        if let Some(refresh_token) = current.and_then(|t| t.refresh_token) {
            match self.refresh(&refresh_token).await {
                Ok(token) => return Ok(token),
                Err(SyncError::AuthError { message }) => {
                    tracing::warn!("Refresh token rejected, re-authorizing: {}", message);
                }
                Err(e) => return Err(e),
            }
        }
        self.authorize_interactively().await
    }
}

#[async_trait]
impl<S: TokenStore> AccessTokenProvider for GoogleAuth<S> {
    async fn access_token(&self) -> Result<String> {
        // 持有鎖直到換發完成，避免並行任務重複 refresh
        let mut cached = self.cached.lock().await;

        if cached.is_none() {
            *cached = self.store.load().await?;
        }

        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(Utc::now(), EXPIRY_LEEWAY_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.obtain_token(cached.take()).await?;
        self.store.save(&token).await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }
}

/// 解析瀏覽器導回的請求目標，例如 `/?code=...&state=...`
pub fn parse_redirect(target: &str, expected_state: &str) -> Result<Option<String>> {
    let url = Url::parse(&format!("http://localhost{}", target))?;
    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(SyncError::auth(format!("authorization denied: {}", error)));
    }

    match code {
        Some(code) if state.as_deref() == Some(expected_state) => Ok(Some(code)),
        Some(_) => Err(SyncError::auth("authorization state mismatch")),
        None => Ok(None),
    }
}

async fn wait_for_code(listener: &TcpListener, state: &str) -> Result<String> {
    loop {
        let (mut socket, _) = listener.accept().await?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") && buf.len() < MAX_REDIRECT_REQUEST_BYTES {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let request = String::from_utf8_lossy(&buf);
        let target = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/");

        let outcome = parse_redirect(target, state);
        let (status, body) = match &outcome {
            Ok(Some(_)) => ("200 OK", "Authorization complete. You may close this window."),
            Ok(None) => ("404 Not Found", "Not found."),
            Err(_) => ("400 Bad Request", "Authorization failed. Check the terminal."),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        // 瀏覽器可能已經關閉連線，回應失敗不影響授權結果
        if let Err(e) = socket.write_all(response.as_bytes()).await {
            tracing::debug!("Could not answer loopback request {}: {}", target, e);
        } else if let Err(e) = socket.shutdown().await {
            tracing::debug!("Could not close loopback connection: {}", e);
        }

        // favicon 等其他請求就繼續等待
        if let Some(code) = outcome? {
            return Ok(code);
        }
    }
}
