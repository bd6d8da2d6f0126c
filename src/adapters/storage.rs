use crate::domain::model::{StoredToken, SyncReport};
use crate::domain::ports::TokenStore;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};

/// 以 JSON 檔案保存 Google token
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<StoredToken>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(token) => Ok(Some(token)),
                Err(e) => {
                    // 損壞的快取當作沒有 token，重新授權即可
                    tracing::warn!(
                        "Ignoring unreadable token cache {}: {}",
                        self.path.display(),
                        e
                    );
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, token: &StoredToken) -> Result<()> {
        ensure_parent(&self.path).await?;
        let data = serde_json::to_vec_pretty(token)?;
        tokio::fs::write(&self.path, data).await?;
        tracing::debug!("Token cache written to {}", self.path.display());
        Ok(())
    }
}

pub async fn write_report(path: &Path, report: &SyncReport) -> Result<()> {
    ensure_parent(path).await?;
    let data = serde_json::to_vec_pretty(report)?;
    tokio::fs::write(path, data).await?;
    Ok(())
}
