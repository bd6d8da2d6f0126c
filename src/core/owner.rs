use crate::domain::model::{DownloadMode, DriveFile};
use crate::domain::ports::DriveSource;
use crate::utils::error::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

pub use crate::domain::model::OwnerSource;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

/// 去除空白並轉成小寫；不是合法 email 時回傳 None
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (local, domain) = trimmed.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

pub fn extract_emails(text: &str) -> Vec<String> {
    let mut set = EmailSet::default();
    for m in email_regex().find_iter(text) {
        set.insert(m.as_str());
    }
    set.into_vec()
}

/// 先看去掉副檔名的檔名，避免 `a@b.com.pdf` 被誤判成網域 `b.com.pdf`
fn emails_in_file_name(file: &DriveFile) -> Vec<String> {
    if file.download_mode() == DownloadMode::Media {
        if let Some(stem) = std::path::Path::new(&file.name)
            .file_stem()
            .and_then(|s| s.to_str())
        {
            let found = extract_emails(stem);
            if !found.is_empty() {
                return found;
            }
        }
    }
    extract_emails(&file.name)
}

/// 保持第一次出現順序的 email 集合
#[derive(Debug, Default)]
pub struct EmailSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl EmailSet {
    pub fn insert(&mut self, raw: &str) -> bool {
        match normalize_email(raw) {
            Some(email) if self.seen.insert(email.clone()) => {
                self.ordered.push(email);
                true
            }
            _ => false,
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

/// 依設定的來源順序收集檔案擁有者的 email
pub async fn resolve_owner_emails<D>(
    file: &DriveFile,
    sources: &[OwnerSource],
    drive: &D,
    folder_name: Option<&str>,
) -> Result<Vec<String>>
where
    D: DriveSource + ?Sized,
{
    let mut emails = EmailSet::default();

    for source in sources {
        match source {
            OwnerSource::Permissions => {
                for email in drive.permission_emails(&file.id).await? {
                    emails.insert(&email);
                }
            }
            OwnerSource::Owners => {
                for email in &file.owners {
                    emails.insert(email);
                }
            }
            OwnerSource::FileName => {
                let mut found = emails_in_file_name(file);
                if found.is_empty() {
                    found = folder_name.map(extract_emails).unwrap_or_default();
                }
                for email in &found {
                    emails.insert(email);
                }
            }
        }
    }

    let emails = emails.into_vec();
    tracing::debug!(
        "Resolved {} owner email(s) for '{}': {:?}",
        emails.len(),
        file.name,
        emails
    );
    Ok(emails)
}
