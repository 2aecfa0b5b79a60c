//! Remote pinning service clients

use super::kv::KvBackend;
use super::object::GraphArchive;
use super::PinningService;
use crate::error::{StoreError, StoreResult};
use crate::types::ContentId;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Content type of a bincode-encoded [`GraphArchive`] on the wire
pub const ARCHIVE_CONTENT_TYPE: &str = "application/vnd.pinset.archive";

/// Pin status of a root as reported by the service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinStatus {
    #[serde(default)]
    pub pins: Vec<serde_json::Value>,
}

impl PinStatus {
    /// A non-empty pin list means the root is pinned
    pub fn is_pinned(&self) -> bool {
        !self.pins.is_empty()
    }
}

/// Pinning service that keeps accepted archives in a local backend
pub struct LocalPinningService<K: KvBackend> {
    archives: K,
}

impl<K: KvBackend> LocalPinningService<K> {
    pub fn new(archives: K) -> Self {
        Self { archives }
    }

    fn key(root: &ContentId) -> Vec<u8> {
        format!("archive/{}", root).into_bytes()
    }
}

#[async_trait]
impl<K: KvBackend> PinningService for LocalPinningService<K> {
    async fn submit_archive(&self, data: Vec<u8>) -> StoreResult<ContentId> {
        let archive = GraphArchive::decode_verified(&data)?;
        let root = archive
            .roots
            .first()
            .cloned()
            .ok_or_else(|| StoreError::Rejected("archive has no root".to_string()))?;
        for root in &archive.roots {
            self.archives.put(&Self::key(root), &data)?;
        }
        debug!(root = %root, bytes = data.len(), "Accepted archive");
        Ok(root)
    }

    async fn status_of(&self, root: &ContentId) -> StoreResult<PinStatus> {
        let pins = if self.archives.contains(&Self::key(root))? {
            vec![serde_json::json!({ "peer": "local", "status": "Pinned" })]
        } else {
            Vec::new()
        };
        Ok(PinStatus { pins })
    }

    async fn fetch_archive(&self, root: &ContentId) -> StoreResult<Vec<u8>> {
        self.archives
            .get(&Self::key(root))?
            .ok_or_else(|| StoreError::NotFound(format!("archive for {}", root)))
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    cid: String,
}

/// HTTP pinning service client
///
/// Speaks the pinset archive protocol: request and response bodies for
/// archives are bincode-encoded [`GraphArchive`]s, not CAR files.
///
/// Endpoints: `POST {endpoint}/archives`, `GET {endpoint}/status/{root}` and
/// `GET {endpoint}/archives/{root}`.
pub struct HttpPinningService {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpPinningService {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        request_timeout: Duration,
    ) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn submit_url(&self) -> String {
        format!("{}/archives", self.endpoint)
    }

    pub fn status_url(&self, root: &ContentId) -> String {
        format!("{}/status/{}", self.endpoint, root)
    }

    pub fn fetch_url(&self, root: &ContentId) -> String {
        format!("{}/archives/{}", self.endpoint, root)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn rejected(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        StoreError::Rejected(format!("{}: {}", status, body))
    }
}

#[async_trait]
impl PinningService for HttpPinningService {
    async fn submit_archive(&self, data: Vec<u8>) -> StoreResult<ContentId> {
        let bytes = data.len();
        let response = self
            .authorized(self.client.post(self.submit_url()))
            .header(reqwest::header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE)
            .body(data)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        let body: SubmitResponse = response.json().await?;
        debug!(root = %body.cid, bytes, "Submitted archive");
        Ok(ContentId::new(body.cid))
    }

    async fn status_of(&self, root: &ContentId) -> StoreResult<PinStatus> {
        let response = self
            .authorized(self.client.get(self.status_url(root)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PinStatus::default());
        }
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_archive(&self, root: &ContentId) -> StoreResult<Vec<u8>> {
        let response = self
            .authorized(self.client.get(self.fetch_url(root)))
            .header(reqwest::header::ACCEPT, ARCHIVE_CONTENT_TYPE)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(root = %root, status = %response.status(), "Archive fetch failed");
            return Err(Self::rejected(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}
