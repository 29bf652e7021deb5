//! Workflow result retrieval
//!
//! Workers write their output as `result.json` under a results URL. This
//! module resolves such a URL to an [`ObjectStore`] and reads the file back.
//! It sits beside the publish pipeline and is not used by it.
//!
//! Supported roots:
//! - `file:///path/to/dir`
//! - `http://host/prefix/`, `https://host/prefix/`
//! - `gs://bucket/prefix`

use crate::auth::{MetadataServer, TokenProvider};
use crate::error::{PubSubError, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::path::PathBuf;

/// Name of the result file written by workflow runs
pub const RESULT_FILE: &str = "result.json";

pub const GCS_API_ROOT: &str = "https://storage.googleapis.com";

/// Read-only key/value object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the bytes at `path`, relative to the store root.
    ///
    /// A missing object is [`PubSubError::NotFound`].
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
}

/// Objects stored as files under a local directory
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.root.join(path.trim_start_matches('/'));
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PubSubError::NotFound(full.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Objects served over plain HTTP(S) GET
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    base: Url,
    http: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(base: Url, http: reqwest::Client) -> Self {
        Self {
            base: with_trailing_slash(base),
            http,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| PubSubError::Config(format!("invalid object path {path:?}: {e}")))?;
        fetch(self.http.get(url.clone()), &url).await
    }
}

/// Objects in a Google Cloud Storage bucket
pub struct GcsObjectStore {
    bucket: String,
    prefix: String,
    api_root: String,
    http: reqwest::Client,
    auth: Box<dyn TokenProvider>,
}

impl GcsObjectStore {
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        http: reqwest::Client,
        auth: Box<dyn TokenProvider>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            api_root: GCS_API_ROOT.to_string(),
            http,
            auth,
        }
    }

    /// Point at another storage endpoint (e.g. a local emulator).
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into().trim_end_matches('/').to_string();
        self
    }

    fn object_name(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.prefix)
        }
    }

    fn object_url(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.api_root)
            .map_err(|e| PubSubError::Config(format!("invalid storage api root: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| PubSubError::Config("storage api root cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o"])
            .push(&self.object_name(path));
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.object_url(path)?;
        let mut request = self.http.get(url.clone());
        if let Some(token) = self.auth.access_token(&self.http).await? {
            request = request.bearer_auth(token);
        }
        fetch(request, &url).await
    }
}

async fn fetch(request: reqwest::RequestBuilder, url: &Url) -> Result<Vec<u8>> {
    let response = request.send().await?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(PubSubError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PubSubError::from_status(status.as_u16(), body));
    }
    Ok(response.bytes().await?.to_vec())
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Resolve a store root from its URL.
///
/// `gs://` roots authenticate with the metadata server's default account.
pub fn store_from_url(url: &str) -> Result<Box<dyn ObjectStore>> {
    let parsed =
        Url::parse(url).map_err(|e| PubSubError::Config(format!("invalid store url {url:?}: {e}")))?;

    match parsed.scheme() {
        "file" => {
            let root = parsed
                .to_file_path()
                .map_err(|_| PubSubError::Config(format!("invalid file url {url:?}")))?;
            Ok(Box::new(LocalObjectStore::new(root)))
        }
        "http" | "https" => Ok(Box::new(HttpObjectStore::new(parsed, reqwest::Client::new()))),
        "gs" => {
            let bucket = parsed
                .host_str()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| PubSubError::Config(format!("missing bucket in {url:?}")))?;
            Ok(Box::new(GcsObjectStore::new(
                bucket,
                parsed.path(),
                reqwest::Client::new(),
                Box::new(MetadataServer::default()),
            )))
        }
        other => Err(PubSubError::Config(format!(
            "unsupported store scheme {other:?} in {url:?}"
        ))),
    }
}

/// Read and parse `result.json` from a store.
pub async fn fetch_results_json(store: &dyn ObjectStore) -> Result<serde_json::Value> {
    let bytes = store.get(RESULT_FILE).await?;
    if bytes.is_empty() {
        return Err(PubSubError::InvalidResponse(
            "Failed to get result json from result store.".to_string(),
        ));
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read and parse `result.json` under `results_url`.
pub async fn get_results_json(results_url: &str) -> Result<serde_json::Value> {
    let store = store_from_url(results_url)?;
    tracing::debug!(results_url = %results_url, "Fetching workflow results");
    fetch_results_json(store.as_ref()).await
}
