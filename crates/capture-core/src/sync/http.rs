//! HTTP client for the remote table API.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::{RecordId, Revision, RevisionId, TableName};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::remote::{PushOutcome, RemoteAuthority, RemoteError, RemoteResult, RemoteRevision};

const HTTP_TIMEOUT_SECS: u64 = 30;

/// `RemoteAuthority` backed by the `/v1/tables` JSON API.
#[derive(Clone)]
pub struct HttpRemoteAuthority {
    base_url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteAuthority {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteAuthority")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpRemoteAuthority {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            access_token: normalize_text_option(access_token),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                .build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn revisions_url(&self, table: &TableName) -> String {
        format!(
            "{}/v1/tables/{}/revisions",
            self.base_url,
            urlencoding::encode(table.as_str())
        )
    }

    fn record_url(&self, table: &TableName, record_id: &RecordId) -> String {
        format!(
            "{}/v1/tables/{}/records/{}/revisions",
            self.base_url,
            urlencoding::encode(table.as_str()),
            urlencoding::encode(&record_id.to_string())
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl RemoteAuthority for HttpRemoteAuthority {
    async fn pull_since(
        &self,
        table: &TableName,
        since: Option<i64>,
        limit: usize,
    ) -> RemoteResult<Vec<RemoteRevision>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let response = self
            .authorize(self.client.get(self.revisions_url(table)))
            .query(&query)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let payload = response.json::<RevisionsResponse<RemoteRevision>>().await?;
        Ok(payload.revisions)
    }

    async fn push_revision(
        &self,
        table: &TableName,
        record_id: &RecordId,
        revision: &Revision,
        acknowledged: &[RevisionId],
    ) -> RemoteResult<PushOutcome> {
        let body = PushRequest {
            record_id,
            revision,
            acknowledged,
        };
        let response = self
            .authorize(self.client.post(self.revisions_url(table)))
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let payload = response.json::<ConflictResponse>().await?;
            return Ok(PushOutcome::Conflict(payload.conflict));
        }

        let response = ensure_success(response).await?;
        let payload = response.json::<AcceptedResponse>().await?;
        Ok(PushOutcome::Accepted {
            server_rev_at: payload.server_rev_at,
        })
    }

    async fn fetch_revisions(
        &self,
        table: &TableName,
        record_id: &RecordId,
    ) -> RemoteResult<Vec<Revision>> {
        let response = self
            .authorize(self.client.get(self.record_url(table, record_id)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = ensure_success(response).await?;
        let payload = response.json::<RevisionsResponse<Revision>>().await?;
        Ok(payload.revisions)
    }
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    record_id: &'a RecordId,
    revision: &'a Revision,
    acknowledged: &'a [RevisionId],
}

#[derive(Debug, Deserialize)]
struct RevisionsResponse<T> {
    revisions: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AcceptedResponse {
    server_rev_at: i64,
}

#[derive(Debug, Deserialize)]
struct ConflictResponse {
    conflict: Revision,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn ensure_success(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        status: status.as_u16(),
        message: parse_api_error(&body),
    })
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return compact_text(&message);
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("remote URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}
