//! Remote object-service primitives the adapters are built on.
//!
//! The split mirrors the two write models: OSS appends at an explicit
//! position, GCS streams through one ordered writer.

pub mod gcs;
pub mod memory;
pub mod oss;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::Method;
use std::time::Duration;

use crate::{ByteStream, Credential, ObjectMetadata, StorageError, StorageResult};

/// Core object operations - must be implemented by all remotes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write the whole stream to `bucket/key`, returning the byte count
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
    ) -> StorageResult<u64>;

    /// Fetch the full object
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Produce a URL authorizing `method` on the object for `valid_for`
    async fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        method: Method,
        valid_for: Duration,
        credential: &Credential,
    ) -> StorageResult<String>;
}

/// Position-addressed appends
#[async_trait]
pub trait AppendObjectStore: ObjectStore {
    /// Append `data` at `position` and return the next append position.
    ///
    /// `metadata` is applied when the append creates the object.
    async fn append_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        position: u64,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<u64>;
}

/// One-shot sequential writers
#[async_trait]
pub trait StreamingObjectStore: ObjectStore {
    /// Start a writer; the object becomes visible when the writer finishes
    async fn open_writer(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<Box<dyn ObjectWriter>>;
}

/// An ordered sink into a single remote object
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Flush and commit. Called at most once.
    async fn finish(&mut self) -> StorageResult<()>;
}

/// Non-success HTTP response from a remote
#[derive(Debug, thiserror::Error)]
#[error("HTTP {status}: {body}")]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
}

/// Turn a non-success response into a `StorageError`; 404 becomes `NotFound`
pub(crate) async fn check_response(
    response: reqwest::Response,
    bucket: &str,
    key: &str,
    context: &str,
) -> StorageResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(StorageError::not_found(bucket, key));
    }

    let body = response.text().await.unwrap_or_default();
    Err(StorageError::remote(
        context,
        HttpStatusError {
            status: status.as_u16(),
            body,
        },
    ))
}

/// Drain a byte stream into one buffer
pub(crate) async fn collect_body(mut body: ByteStream) -> StorageResult<Bytes> {
    let mut data = BytesMut::new();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data.freeze())
}

/// Encode an object key for a URL path, keeping `/` separators
pub(crate) fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
