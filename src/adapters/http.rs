use crate::utils::error::{Result, SyncError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response};
use std::time::Duration;

const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// 指數退避：delay * 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// 發送請求，遇到 429、5xx、逾時或連線錯誤時重試。
///
/// `build` 每次嘗試都會重新建立請求（multipart body 無法重複使用）。
pub async fn send_with_retry<F>(service: &str, policy: &RetryPolicy, build: F) -> Result<Response>
where
    F: Fn() -> Result<RequestBuilder>,
{
    send(service, policy, build, SyncError::is_retryable).await
}

/// 用於會在遠端建立資源的請求（上傳、建立 note）。
///
/// 逾時或 5xx 時伺服器可能已經處理過，重送會產生重複資源，所以只在 429 與連線失敗時重試。
pub async fn send_create_with_retry<F>(
    service: &str,
    policy: &RetryPolicy,
    build: F,
) -> Result<Response>
where
    F: Fn() -> Result<RequestBuilder>,
{
    send(service, policy, build, SyncError::is_safe_to_resend).await
}

async fn send<F>(
    service: &str,
    policy: &RetryPolicy,
    build: F,
    should_retry: fn(&SyncError) -> bool,
) -> Result<Response>
where
    F: Fn() -> Result<RequestBuilder>,
{
    let mut attempt = 0;

    loop {
        let (error, wait_hint) = match build()?.timeout(policy.request_timeout).send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let wait_hint = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                (
                    SyncError::HttpStatusError {
                        service: service.to_string(),
                        status,
                        body,
                    },
                    wait_hint,
                )
            }
            Err(e) => (SyncError::ApiError(e), None),
        };

        if !should_retry(&error) || attempt >= policy.max_retries {
            return Err(error);
        }

        let delay = wait_hint.unwrap_or_else(|| policy.backoff(attempt));
        attempt += 1;
        tracing::warn!(
            "🔄 {} request failed ({}), retry {}/{} in {:?}",
            service,
            error,
            attempt,
            policy.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}
