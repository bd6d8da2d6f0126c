use crate::adapters::http::{send_create_with_retry, send_with_retry, RetryPolicy};
use crate::domain::model::{CrmObjectType, CrmRecord, FileContent};
use crate::domain::ports::CrmClient;
use crate::utils::error::{Result, SyncError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_HUBSPOT_API_BASE: &str = "https://api.hubapi.com";
const SERVICE: &str = "HubSpot";
const SEARCH_LIMIT: usize = 10;
const ASSOCIATION_PAGE_LIMIT: &str = "500";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AssociationResponse {
    #[serde(default)]
    results: Vec<AssociationResult>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociationResult {
    to_object_id: Value,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct EngagementResponse {
    engagement: EngagementId,
}

#[derive(Debug, Deserialize)]
struct EngagementId {
    id: Value,
}

/// HubSpot 的 id 有時是字串有時是數字
fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 依物件類型決定搜尋條件：contact 比對 email，company 比對 email 網域
pub fn search_filter(object_type: CrmObjectType, email: &str) -> Result<(&'static str, String)> {
    match object_type {
        CrmObjectType::Contact => Ok(("email", email.to_string())),
        CrmObjectType::Company => email
            .rsplit_once('@')
            .map(|(_, domain)| ("domain", domain.to_string()))
            .ok_or_else(|| SyncError::processing(format!("'{}' has no domain", email))),
        other => Err(SyncError::config(format!(
            "{} cannot be matched by email; use it as an associated object instead",
            other
        ))),
    }
}

pub fn note_body(file_name: &str) -> String {
    format!("File uploaded from Google Drive: {}", file_name)
}

/// engagements v1 的 associations 欄位
pub fn note_payload(file_id: &str, records: &[CrmRecord], body: &str, timestamp_ms: i64) -> Value {
    let ids = |object_type: CrmObjectType| -> Vec<Value> {
        records
            .iter()
            .filter(|r| r.object_type == object_type)
            .map(|r| match r.id.parse::<u64>() {
                Ok(n) => json!(n),
                Err(_) => json!(r.id),
            })
            .collect()
    };

    json!({
        "engagement": {
            "active": true,
            "type": "NOTE",
            "timestamp": timestamp_ms
        },
        "associations": {
            "contactIds": ids(CrmObjectType::Contact),
            "companyIds": ids(CrmObjectType::Company),
            "dealIds": ids(CrmObjectType::Deal),
            "ticketIds": ids(CrmObjectType::Ticket)
        },
        "attachments": [{"id": file_id.parse::<u64>().map(|n| json!(n)).unwrap_or_else(|_| json!(file_id))}],
        "metadata": {
            "body": body
        }
    })
}

pub struct HubSpotClient {
    client: Client,
    access_token: String,
    api_base: String,
    policy: RetryPolicy,
}

impl HubSpotClient {
    pub fn new(client: Client, access_token: impl Into<String>) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            api_base: DEFAULT_HUBSPOT_API_BASE.to_string(),
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

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

#[async_trait]
impl CrmClient for HubSpotClient {
    async fn search_by_email(&self, object_type: CrmObjectType, email: &str) -> Result<Vec<String>> {
        let (property, value) = search_filter(object_type, email)?;
        let url = self.endpoint(&format!("/crm/v3/objects/{}/search", object_type.api_path()));
        let body = json!({
            "filterGroups": [{
                "filters": [{
                    "propertyName": property,
                    "operator": "EQ",
                    "value": value
                }]
            }],
            "properties": [property],
            "limit": SEARCH_LIMIT
        });

        let response: SearchResponse = send_with_retry(SERVICE, &self.policy, || {
            Ok(self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&body))
        })
        .await?
        .json()
        .await?;

        Ok(response.results.into_iter().map(|r| r.id).collect())
    }

    async fn associated(&self, record: &CrmRecord, target: CrmObjectType) -> Result<Vec<String>> {
        let url = self.endpoint(&format!(
            "/crm/v4/objects/{}/{}/associations/{}",
            record.object_type.api_path(),
            record.id,
            target.api_path()
        ));
        let mut ids = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![("limit", ASSOCIATION_PAGE_LIMIT.to_string())];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let page: AssociationResponse = send_with_retry(SERVICE, &self.policy, || {
                Ok(self
                    .client
                    .get(&url)
                    .bearer_auth(&self.access_token)
                    .query(&query))
            })
            .await?
            .json()
            .await?;

            ids.extend(page.results.iter().filter_map(|r| id_to_string(&r.to_object_id)));

            match page.paging.and_then(|p| p.next) {
                Some(next) => after = Some(next.after),
                None => break,
            }
        }

        Ok(ids)
    }

    async fn upload_file(&self, content: &FileContent, folder_path: &str) -> Result<String> {
        let url = self.endpoint("/files/v3/files");
        let options = json!({
            "access": "PRIVATE",
            "duplicateValidationStrategy": "NONE",
            "duplicateValidationScope": "EXACT_FOLDER"
        })
        .to_string();

        let response: UploadResponse = send_create_with_retry(SERVICE, &self.policy, || {
            let part = Part::bytes(content.bytes.clone())
                .file_name(content.file_name.clone())
                .mime_str(&content.mime_type)?;
            let form = Form::new()
                .part("file", part)
                .text("fileName", content.file_name.clone())
                .text("folderPath", folder_path.to_string())
                .text("options", options.clone());
            Ok(self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .multipart(form))
        })
        .await?
        .json()
        .await?;

        id_to_string(&response.id)
            .ok_or_else(|| SyncError::processing("HubSpot upload response has no file id"))
    }

    async fn create_note(
        &self,
        file_id: &str,
        records: &[CrmRecord],
        body: &str,
    ) -> Result<String> {
        let url = self.endpoint("/engagements/v1/engagements");
        let payload = note_payload(file_id, records, body, chrono::Utc::now().timestamp_millis());

        let response: EngagementResponse = send_create_with_retry(SERVICE, &self.policy, || {
            Ok(self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .json(&payload))
        })
        .await?
        .json()
        .await?;

        id_to_string(&response.engagement.id)
            .ok_or_else(|| SyncError::processing("HubSpot engagement response has no id"))
    }
}
