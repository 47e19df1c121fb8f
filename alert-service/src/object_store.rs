//! ObjectStore trait and implementations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

use crate::error::PersistenceError;
use crate::sigv4::{self, Credentials};

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

/// Key/value blob storage addressed by object key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), PersistenceError>;

    async fn object_exists(&self, key: &str) -> Result<bool, PersistenceError>;
}

// ------------------------------------------------------------------ //
//  InMemoryObjectStore (for tests)                                    //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Map-backed store for tests.
///
/// `fail_next(n)` fails the next `n` operations; `set_unavailable(true)`
/// fails every operation until switched back.
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, StoredObject>>>,
    failures: Arc<AtomicU32>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("store marked unavailable".into()));
        }
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(PersistenceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool, PersistenceError> {
        self.check_available()?;
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

// ------------------------------------------------------------------ //
//  S3ObjectStore (production)                                         //
// ------------------------------------------------------------------ //

/// S3 (or S3-compatible) bucket over plain HTTPS with SigV4 auth.
///
/// Path-style addressing: `{endpoint}/{bucket}/{key}`.
pub struct S3ObjectStore {
    http: reqwest::Client,
    endpoint: Url,
    bucket: String,
    region: String,
    credentials: Credentials,
}

impl S3ObjectStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        credentials: Credentials,
    ) -> Result<Self, PersistenceError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| PersistenceError::InvalidUrl(format!("{endpoint}: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(PersistenceError::InvalidUrl(format!("{endpoint}: no host")));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            bucket: bucket.to_string(),
            region: region.to_string(),
            credentials,
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, PersistenceError> {
        let raw = format!(
            "{}/{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            sigv4::encode_path(&self.bucket),
            sigv4::encode_path(key)
        );
        Url::parse(&raw).map_err(|e| PersistenceError::InvalidUrl(format!("{raw}: {e}")))
    }

    fn signed_request(
        &self,
        method: Method,
        url: Url,
        body: &[u8],
    ) -> Result<reqwest::RequestBuilder, PersistenceError> {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(PersistenceError::InvalidUrl(url.to_string())),
        };
        let signed = sigv4::sign(
            &sigv4::Request {
                method: method.as_str(),
                host: &host,
                path: url.path(),
                payload: body,
            },
            &self.credentials,
            &self.region,
            "s3",
            Utc::now(),
        );

        let mut builder = self
            .http
            .request(method, url)
            .header("authorization", signed.authorization)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256);
        if let Some(token) = signed.security_token {
            builder = builder.header("x-amz-security-token", token);
        }
        Ok(builder)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), PersistenceError> {
        let url = self.object_url(key)?;
        let resp = self
            .signed_request(Method::PUT, url, &body)?
            .header("content-type", content_type)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PersistenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        debug!(bucket = %self.bucket, key, "object written");
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool, PersistenceError> {
        let url = self.object_url(key)?;
        let resp = self.signed_request(Method::HEAD, url, &[])?.send().await?;
        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(PersistenceError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }
}
