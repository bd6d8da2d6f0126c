use crate::adapters::http::{send_with_retry, RetryPolicy};
use crate::domain::model::{DownloadMode, DriveFile, FileContent};
use crate::domain::ports::{AccessTokenProvider, DriveSource};
use crate::utils::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const SERVICE: &str = "Google Drive";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, owners(emailAddress))";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<ApiFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFile {
    id: String,
    name: String,
    mime_type: String,
    // Drive 以字串回傳 size
    size: Option<String>,
    #[serde(default)]
    owners: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUser {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionListResponse {
    next_page_token: Option<String>,
    #[serde(default)]
    permissions: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct FileNameResponse {
    name: String,
}

impl From<ApiFile> for DriveFile {
    fn from(file: ApiFile) -> Self {
        DriveFile {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            owners: file
                .owners
                .into_iter()
                .filter_map(|o| o.email_address)
                .collect(),
            size: file.size.and_then(|s| s.parse().ok()),
        }
    }
}

/// 組出 Drive 查詢語法中的字串常值
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn folder_query(folder_id: &str) -> String {
    format!("'{}' in parents and trashed = false", escape_query_value(folder_id))
}

pub struct GoogleDrive<A: AccessTokenProvider> {
    client: Client,
    auth: A,
    api_base: String,
    policy: RetryPolicy,
}

impl<A: AccessTokenProvider> GoogleDrive<A> {
    pub fn new(client: Client, auth: A) -> Self {
        Self {
            client,
            auth,
            api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)?;
        url.path_segments_mut()
            .map_err(|_| SyncError::config(format!("invalid Drive API base: {}", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: &Url, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let token = self.auth.access_token().await?;
        send_with_retry(SERVICE, &self.policy, || {
            Ok(self
                .client
                .get(url.clone())
                .bearer_auth(&token)
                .query(query))
        })
        .await
    }
}

#[async_trait]
impl<A: AccessTokenProvider> DriveSource for GoogleDrive<A> {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let url = self.url(&["files"])?;
        let q = folder_query(folder_id);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: FileListResponse = {
                let mut query = vec![
                    ("q", q.as_str()),
                    ("fields", LIST_FIELDS),
                    ("pageSize", PAGE_SIZE),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get(&url, &query).await?.json().await?
            };
            tracing::debug!("Drive page returned {} file(s)", page.files.len());
            files.extend(page.files.into_iter().map(DriveFile::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(files)
    }

    async fn folder_name(&self, folder_id: &str) -> Result<String> {
        let url = self.url(&["files", folder_id])?;
        let response: FileNameResponse = self
            .get(&url, &[("fields", "name"), ("supportsAllDrives", "true")])
            .await?
            .json()
            .await?;
        Ok(response.name)
    }

    async fn permission_emails(&self, file_id: &str) -> Result<Vec<String>> {
        let url = self.url(&["files", file_id, "permissions"])?;
        let mut emails = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: PermissionListResponse = {
                let mut query = vec![
                    ("fields", "nextPageToken, permissions(emailAddress)"),
                    ("supportsAllDrives", "true"),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get(&url, &query).await?.json().await?
            };
            // anyone / domain 類型的權限沒有 email
            emails.extend(page.permissions.into_iter().filter_map(|p| p.email_address));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(emails)
    }

    async fn download(&self, file: &DriveFile) -> Result<FileContent> {
        let response = match file.download_mode() {
            DownloadMode::Export(mime_type) => {
                let url = self.url(&["files", file.id.as_str(), "export"])?;
                self.get(&url, &[("mimeType", mime_type)]).await?
            }
            DownloadMode::Media => {
                let url = self.url(&["files", file.id.as_str()])?;
                self.get(&url, &[("alt", "media"), ("supportsAllDrives", "true")])
                    .await?
            }
            DownloadMode::Unsupported => {
                return Err(SyncError::UnsupportedFileError {
                    name: file.name.clone(),
                    mime_type: file.mime_type.clone(),
                })
            }
        };

        let bytes = response.bytes().await?.to_vec();
        let (file_name, mime_type) = file.upload_name_and_type();
        tracing::debug!("Downloaded '{}' ({} bytes)", file.name, bytes.len());

        Ok(FileContent {
            file_name,
            mime_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::oauth::StaticAccessToken;
    use httpmock::prelude::*;
    use serde_json::json;

    fn drive(server: &MockServer) -> GoogleDrive<StaticAccessToken> {
        GoogleDrive::new(Client::new(), StaticAccessToken("ya29.test".to_string()))
            .with_api_base(server.url("/drive/v3"))
            .with_retry_policy(RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            })
    }

    fn without_page_token(req: &HttpMockRequest) -> bool {
        !req.query_params
            .as_ref()
            .is_some_and(|params| params.iter().any(|(k, _)| k == "pageToken"))
    }

    #[test]
    fn test_folder_query_escapes_quotes() {
        assert_eq!(
            folder_query("abc123"),
            "'abc123' in parents and trashed = false"
        );
        assert_eq!(folder_query(r"a'b\c"), r"'a\'b\\c' in parents and trashed = false");
    }

    #[test]
    fn test_api_file_conversion() {
        let api: ApiFile = serde_json::from_value(serde_json::json!({
            "id": "1",
            "name": "scan.png",
            "mimeType": "image/png",
            "size": "2048",
            "owners": [{"emailAddress": "owner@firm.com"}, {"displayName": "no email"}]
        }))
        .unwrap();

        let file = DriveFile::from(api);
        assert_eq!(file.size, Some(2048));
        assert_eq!(file.owners, vec!["owner@firm.com"]);
    }

    #[tokio::test]
    async fn test_list_folder_follows_next_page_token() {
        let server = MockServer::start();
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/drive/v3/files")
                .query_param("pageToken", "page-2");
            then.status(200).json_body(json!({
                "files": [{"id": "3", "name": "c.pdf", "mimeType": "application/pdf"}]
            }));
        });
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/drive/v3/files")
                .query_param("q", "'folder-1' in parents and trashed = false")
                .header("authorization", "Bearer ya29.test")
                .matches(without_page_token);
            then.status(200).json_body(json!({
                "nextPageToken": "page-2",
                "files": [
                    {"id": "1", "name": "a.pdf", "mimeType": "application/pdf"},
                    {"id": "2", "name": "b.pdf", "mimeType": "application/pdf"}
                ]
            }));
        });

        let files = drive(&server).list_folder("folder-1").await.unwrap();

        first.assert_hits(1);
        second.assert_hits(1);
        let ids: Vec<&str> = files.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_permission_emails_merge_pages() {
        let server = MockServer::start();
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/drive/v3/files/f1/permissions")
                .query_param("pageToken", "perm-2");
            then.status(200).json_body(json!({
                "permissions": [{"emailAddress": "bob@corp.com"}]
            }));
        });
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/drive/v3/files/f1/permissions")
                .matches(without_page_token);
            then.status(200).json_body(json!({
                "nextPageToken": "perm-2",
                "permissions": [{"emailAddress": "jane@acme.io"}, {"type": "anyone"}]
            }));
        });

        let emails = drive(&server).permission_emails("f1").await.unwrap();

        first.assert_hits(1);
        second.assert_hits(1);
        assert_eq!(emails, vec!["jane@acme.io", "bob@corp.com"]);
    }
}
