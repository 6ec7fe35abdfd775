use std::{io::Write, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use flate2::{Compression, write::GzEncoder};
use tracing::debug;

use crate::position::RawBatch;

/// Somewhere raw response bodies can be written to and read back from by key.
pub trait ObjectStore: Send + Sync {
    fn put(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// `raw/{source}/{yyyy}/{mm}/{dd}/{label}-{fetched_at}.json.gz`, dated by fetch time.
pub fn raw_key(batch: &RawBatch) -> String {
    let at = batch.fetched_at;
    format!(
        "raw/{}/{:04}/{:02}/{:02}/{}-{}.json.gz",
        batch.source,
        at.year(),
        at.month(),
        at.day(),
        batch.label,
        at.format("%Y%m%dT%H%M%SZ")
    )
}

/// Written once a historical day has been saved. Holds the key of that day's raw batch.
pub fn history_marker(date: NaiveDate) -> String {
    format!("raw/db4iot/saved/{date}")
}

/// Whether a historical day was already saved. A failed lookup counts as not saved.
pub async fn history_saved<S: ObjectStore>(store: &S, date: NaiveDate) -> bool {
    store.get(&history_marker(date)).await.is_ok()
}

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes)?;
    Ok(enc.finish()?)
}

/// Compresses and stores one raw batch, returning its key.
pub async fn save_raw<S: ObjectStore>(store: &S, batch: &RawBatch) -> Result<String> {
    let key = raw_key(batch);
    let compressed = gzip(&batch.body)?;
    debug!(%key, raw = batch.body.len(), compressed = compressed.len(), "saving raw batch");
    store
        .put(&key, compressed)
        .await
        .with_context(|| format!("saving raw batch {key}"))?;
    Ok(key)
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {parent:?}"))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {path:?}"))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {path:?}"))
    }
}

/// PUT/GET against `{base_url}/{key}`, e.g. a bucket endpoint that accepts pre-authorised writes.
pub struct HttpStore {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStore {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token,
        }
    }

    fn request(&self, method: reqwest::Method, key: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}/{}", self.base_url, key));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl ObjectStore for HttpStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let resp = self
            .request(reqwest::Method::PUT, key)
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("uploading {key}"))?;
        resp.error_for_status()
            .with_context(|| format!("uploading {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .request(reqwest::Method::GET, key)
            .send()
            .await
            .with_context(|| format!("downloading {key}"))?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("downloading {key}"))?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// The store picked at startup.
pub enum RawStore {
    Local(LocalStore),
    Http(HttpStore),
}

impl ObjectStore for RawStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        match self {
            RawStore::Local(s) => s.put(key, bytes).await,
            RawStore::Http(s) => s.put(key, bytes).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self {
            RawStore::Local(s) => s.get(key).await,
            RawStore::Http(s) => s.get(key).await,
        }
    }
}
