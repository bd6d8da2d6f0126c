use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Authentication error: {message}")]
    AuthError { message: String },

    #[error("{service} returned {status}: {body}")]
    HttpStatusError {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Unsupported file '{name}' ({mime_type})")]
    UnsupportedFileError { name: String, mime_type: String },

    #[error("Processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    Network,
    Remote,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::ConfigError { .. }
            | SyncError::MissingConfigError { .. }
            | SyncError::InvalidConfigValueError { .. }
            | SyncError::UrlError(_) => ErrorCategory::Configuration,
            SyncError::AuthError { .. } => ErrorCategory::Authentication,
            SyncError::HttpStatusError { status: 401, .. }
            | SyncError::HttpStatusError { status: 403, .. } => ErrorCategory::Authentication,
            SyncError::HttpStatusError { .. } => ErrorCategory::Remote,
            SyncError::ApiError(_) => ErrorCategory::Network,
            SyncError::SerializationError(_)
            | SyncError::UnsupportedFileError { .. }
            | SyncError::ProcessingError { .. } => ErrorCategory::Data,
            SyncError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Data => match self {
                SyncError::UnsupportedFileError { .. } => ErrorSeverity::Low,
                _ => ErrorSeverity::High,
            },
            ErrorCategory::Network | ErrorCategory::Remote => ErrorSeverity::Medium,
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Authentication | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 可以重試的錯誤（429、5xx、連線逾時）
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::HttpStatusError { status, .. } => *status == 429 || *status >= 500,
            SyncError::ApiError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// 只有確定伺服器沒處理過請求時才可重送：429 或連線失敗。
    /// 逾時與 5xx 可能已經建立了資源。
    pub fn is_safe_to_resend(&self) -> bool {
        match self {
            SyncError::HttpStatusError { status, .. } => *status == 429,
            SyncError::ApiError(e) => e.is_connect(),
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the command line flags, environment variables and config file"
            }
            ErrorCategory::Authentication => {
                "Delete the cached Google token or rotate the HubSpot private app token, then retry"
            }
            ErrorCategory::Network => "Check network connectivity and retry later",
            ErrorCategory::Remote => "The remote API rejected the request; inspect the response body",
            ErrorCategory::Data => "Inspect the offending file in Google Drive",
            ErrorCategory::System => "Check file permissions and free disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            SyncError::MissingConfigError { field } => {
                format!("缺少必要設定：{}", field)
            }
            SyncError::InvalidConfigValueError { field, reason, .. } => {
                format!("設定 {} 無效：{}", field, reason)
            }
            SyncError::AuthError { message } => format!("授權失敗：{}", message),
            SyncError::HttpStatusError {
                service, status, ..
            } => format!("{} 回應錯誤狀態碼 {}", service, status),
            SyncError::ApiError(_) => "無法連線到遠端服務".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> SyncError {
        SyncError::HttpStatusError {
            service: "HubSpot".to_string(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!SyncError::config("bad").is_retryable());
    }

    #[test]
    fn test_only_rate_limits_are_safe_to_resend() {
        let status = |status| SyncError::HttpStatusError {
            service: "HubSpot".to_string(),
            status,
            body: String::new(),
        };
        assert!(status(429).is_safe_to_resend());
        assert!(!status(502).is_safe_to_resend());
        assert!(!status(400).is_safe_to_resend());
    }

    #[test]
    fn test_auth_statuses_are_critical() {
        assert_eq!(status(401).category(), ErrorCategory::Authentication);
        assert_eq!(status(403).severity(), ErrorSeverity::Critical);
        assert_eq!(status(500).severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_unsupported_file_is_low_severity() {
        let err = SyncError::UnsupportedFileError {
            name: "form".to_string(),
            mime_type: "application/vnd.google-apps.form".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Low);
    }
}
