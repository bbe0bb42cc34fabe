//! HTTP client for a remote metadata service.
//!
//! Each contract call is one request. Nothing is batched, retried or cached;
//! the only state shared between calls is the connection pool, so a
//! [`RemoteStore`] can be cloned and used from many tasks at once. Calls
//! issued concurrently are not ordered relative to each other.
//!
//! Status handling: 404 means absent, any other failure status is decoded
//! from the [`ApiResponse`] envelope into [`StoreError::Remote`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use crate::config::RemoteConfig;
use crate::error::{Result, StoreError};
use crate::model::{Block, DirectoryEntry, EntryRecord, FileEntry, NamespaceEntry, Snapshot};
use crate::oracle::{check_batch, check_count, TimestampOracle};
use crate::store::{CreateFile, MakeDirectory, MetadataStore};
use crate::types::{BlockId, EntryId, EntryTag, GenerationStamp};
use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Envelope carried by error responses and by mutations with nothing to
/// return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i32,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success() -> Self {
        Self {
            code: 0,
            error: "success".to_string(),
            response: None,
        }
    }

    pub fn failure(code: i32, error: impl Into<String>) -> Self {
        Self {
            code,
            error: error.into(),
            response: None,
        }
    }
}

/// Body of a child listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub response: Vec<EntryRecord>,
}

/// Body of an oracle response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsoResponse {
    pub timestamp: Vec<u64>,
    pub count: usize,
}

/// Metadata store backed by a remote service.
#[derive(Clone)]
pub struct RemoteStore {
    base: Url,
    prefix: Vec<String>,
    client: Client,
}

impl RemoteStore {
    /// Create a client for `endpoint` with default settings.
    pub fn new(endpoint: &str) -> Result<Self> {
        Self::from_config(&RemoteConfig {
            endpoint: endpoint.to_string(),
            ..RemoteConfig::default()
        })
    }

    /// Create a client for a service listening on `addr`.
    pub fn from_addr(addr: SocketAddr) -> Result<Self> {
        Self::new(&format!("http://{}", addr))
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let base = Url::parse(&config.endpoint)
            .map_err(|e| StoreError::Config(format!("Invalid endpoint: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Config(format!(
                "Endpoint {} cannot carry a path",
                config.endpoint
            )));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base,
            prefix: config
                .api_prefix
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            client,
        })
    }

    /// Check service health.
    pub async fn health(&self) -> Result<bool> {
        let url = self.url(false, &[&"health"])?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(response.status().is_success())
    }

    fn url(&self, prefixed: bool, segments: &[&dyn fmt::Display]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| StoreError::Config("Endpoint cannot carry a path".to_string()))?;
            path.pop_if_empty();
            if prefixed {
                path.extend(&self.prefix);
            }
            for segment in segments {
                path.push(&segment.to_string());
            }
        }
        Ok(url)
    }

    fn api(&self, segments: &[&dyn fmt::Display]) -> Result<Url> {
        self.url(true, segments)
    }

    /// Send one request. `None` means the service answered 404.
    async fn call(&self, op: &'static str, builder: RequestBuilder) -> Result<Option<Response>> {
        counter!("statestore_requests_total", "op" => op).increment(1);
        let result = self.execute(op, builder).await;
        if let Err(e) = &result {
            counter!("statestore_request_errors_total", "op" => op, "kind" => e.kind())
                .increment(1);
        }
        result
    }

    async fn execute(&self, op: &'static str, builder: RequestBuilder) -> Result<Option<Response>> {
        let request = builder
            .build()
            .map_err(|e| StoreError::Internal(format!("Failed to build request: {}", e)))?;
        let method = request.method().clone();
        let path = request.url().path().to_string();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status();
        trace!(op, %method, path = %path, status = status.as_u16(), "Metadata request");

        if status == StatusCode::NOT_FOUND {
            debug!(op, path = %path, "Not found");
            return Ok(None);
        }
        if !status.is_success() {
            let err = remote_error(status, response).await;
            warn!(op, path = %path, error = %err, "Metadata request failed");
            return Err(err);
        }
        Ok(Some(response))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        op: &'static str,
        builder: RequestBuilder,
    ) -> Result<Option<T>> {
        match self.call(op, builder).await? {
            Some(response) => decode(response).await.map(Some),
            None => Ok(None),
        }
    }

    /// Send a mutation whose 404 means the target is missing.
    async fn mutate(
        &self,
        op: &'static str,
        builder: RequestBuilder,
        target: impl FnOnce() -> String,
    ) -> Result<Response> {
        self.call(op, builder)
            .await?
            .ok_or_else(|| StoreError::TargetMissing(target()))
    }

    /// Send a delete. Deleting something already gone succeeds.
    async fn remove(&self, op: &'static str, url: Url) -> Result<()> {
        if self.call(op, self.client.delete(url)).await?.is_none() {
            debug!(op, "Remove target already absent");
        }
        Ok(())
    }

    async fn get_entry(&self, op: &'static str, url: Url) -> Result<Option<NamespaceEntry>> {
        self.fetch::<EntryRecord>(op, self.client.get(url))
            .await?
            .map(NamespaceEntry::try_from)
            .transpose()
    }
}

impl fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("base", &self.base.as_str())
            .field("prefix", &self.prefix)
            .finish()
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Decode(format!("Malformed response body: {}", e)))
}

/// Decode an optional block body, falling back when the service sent none.
async fn decode_block(response: Response, fallback: Block) -> Result<Block> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(fallback);
    }
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Decode(format!("Malformed block body: {}", e)))
}

async fn remote_error(status: StatusCode, response: Response) -> StoreError {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiResponse>(&body) {
        Ok(envelope) => StoreError::Remote {
            status: status.as_u16(),
            code: envelope.code,
            message: envelope.error,
        },
        Err(_) => StoreError::Remote {
            status: status.as_u16(),
            code: i32::from(status.as_u16()),
            message: body,
        },
    }
}

fn mismatch(id: EntryId, expected: EntryTag) -> StoreError {
    StoreError::ContractViolation(format!("entry {} is not a {}", id, expected))
}

#[async_trait]
impl TimestampOracle for RemoteStore {
    async fn next_batch(&self, n: usize) -> Result<Vec<u64>> {
        check_count(n)?;
        let mut url = self.api(&[&"tso"])?;
        url.query_pairs_mut().append_pair("count", &n.to_string());

        let response: TsoResponse = self
            .fetch("tso", self.client.get(url))
            .await?
            .ok_or_else(|| StoreError::Remote {
                status: StatusCode::NOT_FOUND.as_u16(),
                code: i32::from(StatusCode::NOT_FOUND.as_u16()),
                message: "oracle route not found".to_string(),
            })?;
        check_batch(&response.timestamp, n)?;
        Ok(response.timestamp)
    }
}

#[async_trait]
impl MetadataStore for RemoteStore {
    async fn create_file(&self, request: CreateFile) -> Result<FileEntry> {
        let entry = NamespaceEntry::File(request.into_entry());
        let id = entry.id();
        let url = self.api(&[&"file", &id])?;
        self.mutate(
            "create_file",
            self.client.put(url).json(&EntryRecord::from(&entry)),
            || format!("parent of file {}", id),
        )
        .await?;
        entry.into_file().ok_or_else(|| mismatch(id, EntryTag::File))
    }

    async fn mkdir(&self, request: MakeDirectory) -> Result<DirectoryEntry> {
        let entry = NamespaceEntry::Directory(request.into_entry());
        let id = entry.id();
        let url = self.api(&[&"directory", &id])?;
        self.mutate(
            "mkdir",
            self.client.put(url).json(&EntryRecord::from(&entry)),
            || format!("parent of directory {}", id),
        )
        .await?;
        entry
            .into_directory()
            .ok_or_else(|| mismatch(id, EntryTag::Directory))
    }

    async fn get_child(&self, directory: EntryId, name: &str) -> Result<Option<NamespaceEntry>> {
        let url = self.api(&[&"directory", &directory, &name])?;
        self.get_entry("get_child", url).await
    }

    async fn get_children(&self, directory: EntryId) -> Result<Vec<NamespaceEntry>> {
        let url = self.api(&[&"directory-children", &directory])?;
        let listing: Option<Listing> = self.fetch("get_children", self.client.get(url)).await?;
        listing
            .unwrap_or_default()
            .response
            .into_iter()
            .map(NamespaceEntry::try_from)
            .collect()
    }

    async fn get_file(&self, id: EntryId) -> Result<Option<FileEntry>> {
        let url = self.api(&[&"file", &id])?;
        match self.get_entry("get_file", url).await? {
            Some(entry) => entry
                .into_file()
                .map(Some)
                .ok_or_else(|| mismatch(id, EntryTag::File)),
            None => Ok(None),
        }
    }

    async fn get_directory(&self, id: EntryId) -> Result<Option<DirectoryEntry>> {
        let url = self.api(&[&"directory", &id])?;
        match self.get_entry("get_directory", url).await? {
            Some(entry) => entry
                .into_directory()
                .map(Some)
                .ok_or_else(|| mismatch(id, EntryTag::Directory)),
            None => Ok(None),
        }
    }

    async fn get_block(&self, file: EntryId, index: u64) -> Result<Option<Block>> {
        let url = self.api(&[&"file", &file, &index])?;
        self.fetch("get_block", self.client.get(url)).await
    }

    async fn add_block(
        &self,
        file: EntryId,
        block: BlockId,
        generation_stamp: GenerationStamp,
    ) -> Result<Block> {
        let mut url = self.api(&[&"file", &file, &block])?;
        url.query_pairs_mut()
            .append_pair("generation_time", &generation_stamp.to_string());
        let response = self
            .mutate("add_block", self.client.put(url), || format!("file {}", file))
            .await?;
        decode_block(response, Block::new(block, generation_stamp, file)).await
    }

    async fn update_block(&self, file: EntryId, block: Block) -> Result<Block> {
        let url = self.api(&[&"file", &file, &block.id])?;
        let response = self
            .mutate("update_block", self.client.post(url).json(&block), || {
                format!("file {}", file)
            })
            .await?;
        decode_block(response, block).await
    }

    async fn truncate_blocks(&self, file: EntryId, count: u64) -> Result<()> {
        let url = self.api(&[&"file-truncate", &file, &count])?;
        self.mutate("truncate_blocks", self.client.put(url), || {
            format!("file {}", file)
        })
        .await?;
        Ok(())
    }

    async fn rename(&self, old_parent: EntryId, entry: &NamespaceEntry) -> Result<()> {
        let id = entry.id();
        let url = self.api(&[&"directory", &id, &old_parent, &entry.parent_id()])?;
        self.mutate(
            "rename",
            self.client.put(url).json(&EntryRecord::from(entry)),
            || format!("entry {}", id),
        )
        .await?;
        Ok(())
    }

    async fn remove_child(&self, directory: EntryId, name: &str) -> Result<()> {
        let url = self.api(&[&"directory", &directory, &name])?;
        self.remove("remove_child", url).await
    }

    async fn remove_file(&self, id: EntryId) -> Result<()> {
        let url = self.api(&[&"file", &id])?;
        self.remove("remove_file", url).await
    }

    async fn remove_directory(&self, id: EntryId) -> Result<()> {
        let url = self.api(&[&"directory", &id])?;
        self.remove("remove_directory", url).await
    }

    async fn update_meta(&self, snapshot: Snapshot) -> Result<()> {
        let id = snapshot.entry.id();
        let kind = match snapshot.entry.tag() {
            EntryTag::File => "file",
            EntryTag::Directory => "directory",
        };
        let url = self.api(&[&kind, &id])?;
        let record = EntryRecord::from_snapshot(&snapshot);
        self.mutate("update_meta", self.client.post(url).json(&record), || {
            format!("{} {}", kind, id)
        })
        .await?;
        Ok(())
    }

    async fn add_replica(&self, block: BlockId, data_node_id: &str, storage_id: &str) -> Result<()> {
        let url = self.api(&[&"block", &"storage", &block, &data_node_id, &storage_id])?;
        self.mutate("add_replica", self.client.put(url), || format!("block {}", block))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let store = RemoteStore::new("http://127.0.0.1:8089/").unwrap();
        let url = store.api(&[&"directory", &7u64, &"a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8089/api/directory/7/a%20b%2Fc");

        let url = store.url(false, &[&"health"]).unwrap();
        assert_eq!(url.path(), "/health");
    }

    #[test]
    fn test_custom_prefix() {
        let store = RemoteStore::from_config(&RemoteConfig {
            endpoint: "http://meta.local:9000/base".to_string(),
            api_prefix: "/v2/ns".to_string(),
            ..RemoteConfig::default()
        })
        .unwrap();
        let url = store.api(&[&"file", &3u64]).unwrap();
        assert_eq!(url.path(), "/base/v2/ns/file/3");

        let store = RemoteStore::from_config(&RemoteConfig {
            api_prefix: String::new(),
            ..RemoteConfig::default()
        })
        .unwrap();
        assert_eq!(store.api(&[&"tso"]).unwrap().path(), "/tso");
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(matches!(
            RemoteStore::new("not a url"),
            Err(StoreError::Config(_))
        ));
        assert!(RemoteStore::new("mailto:ops@example.com").is_err());
    }

    #[test]
    fn test_envelope_shapes() {
        let json = serde_json::to_value(ApiResponse::success()).unwrap();
        assert_eq!(json, serde_json::json!({"code": 0, "error": "success"}));

        let listing: Listing = serde_json::from_str("{}").unwrap();
        assert!(listing.response.is_empty());

        let tso: TsoResponse = serde_json::from_str(r#"{"timestamp":[5,6],"count":2}"#).unwrap();
        assert_eq!(tso.timestamp, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_zero_batch_rejected_before_sending() {
        // nothing listens on this port; the call must fail before any I/O
        let store = RemoteStore::new("http://127.0.0.1:9").unwrap();
        assert!(matches!(
            store.next_batch(0).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
