//! The capability contract every backend satisfies.
//!
//! Exactly one adapter is bound per client. Both adapters share the
//! object-level operations through [`BoundStore`]; they differ only in how a
//! buffered upload session is opened.

pub mod gcs;
pub mod oss;

pub use gcs::GcsAdapter;
pub use oss::OssAdapter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::Method;
use tracing::debug;

use crate::content_type::{self, extension_for_subtype};
use crate::remote::ObjectStore;
use crate::url::UrlCodec;
use crate::{
    Backend, ByteStream, Credential, NamedFile, StorageConfig, StorageError, StorageResult,
    UploadBuffer,
};

/// Uniform object storage operations, independent of the provider
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// The provider this adapter is bound to
    fn backend(&self) -> Backend;

    /// Upload a named file as `base_name.<extension>`.
    ///
    /// The extension and content-type tag come from the file's declared
    /// MIME subtype, e.g. `application/vnd.android.package-archive`
    /// uploads as `base_name.apk`.
    async fn upload_file(
        &self,
        file: &NamedFile,
        bucket: &str,
        base_name: &str,
    ) -> StorageResult<String> {
        let subtype = file.mime_subtype()?;
        let name = format!("{}.{}", base_name, extension_for_subtype(&subtype));
        let body = file.open().await?;
        self.upload_reader(bucket, &name, body, &subtype).await
    }

    /// Write the whole stream to `bucket/name` and return the object URL.
    ///
    /// An empty `tag` is inferred from the extension of `name`.
    async fn upload_reader(
        &self,
        bucket: &str,
        name: &str,
        body: ByteStream,
        tag: &str,
    ) -> StorageResult<String>;

    async fn read_file(&self, bucket: &str, path: &str) -> StorageResult<Bytes>;

    /// Delete the object behind a URL previously returned by this backend
    async fn delete_file_using_url(&self, bucket: &str, url: &str) -> StorageResult<()>;

    /// Signed GET URL for the object behind `url`, valid until `expires_at`
    async fn temporary_serving_file(
        &self,
        bucket: &str,
        url: &str,
        expires_at: DateTime<Utc>,
        credential: &Credential,
    ) -> StorageResult<String>;

    /// Open an append session on `bucket/name`; `tag` must be explicit
    async fn upload_buffer(&self, bucket: &str, name: &str, tag: &str)
        -> StorageResult<UploadBuffer>;
}

/// A remote plus the URL codec and config of one backend
pub(crate) struct BoundStore<S: ?Sized, U> {
    pub(crate) backend: Backend,
    pub(crate) store: Arc<S>,
    pub(crate) urls: U,
    pub(crate) config: StorageConfig,
}

impl<S, U> BoundStore<S, U>
where
    S: ObjectStore + ?Sized,
    U: UrlCodec,
{
    pub(crate) async fn upload_reader(
        &self,
        bucket: &str,
        name: &str,
        body: ByteStream,
        tag: &str,
    ) -> StorageResult<String> {
        let metadata = content_type::resolve(tag, name)?;
        let written = self.store.put_object(bucket, name, body, &metadata).await?;

        debug!(backend = %self.backend, bucket, key = name, bytes = written, "uploaded object");
        Ok(self.urls.object_url(bucket, name))
    }

    pub(crate) async fn read_file(&self, bucket: &str, path: &str) -> StorageResult<Bytes> {
        self.store.get_object(bucket, path).await
    }

    pub(crate) async fn delete_file_using_url(&self, bucket: &str, url: &str) -> StorageResult<()> {
        let key = self.urls.object_key(bucket, url)?;
        self.store.delete_object(bucket, &key).await
    }

    pub(crate) async fn temporary_serving_file(
        &self,
        bucket: &str,
        url: &str,
        expires_at: DateTime<Utc>,
        credential: &Credential,
    ) -> StorageResult<String> {
        if credential.backend() != self.backend {
            return Err(StorageError::CredentialMismatch {
                expected: self.backend,
                found: credential.backend(),
            });
        }

        let valid_for = self.validity(expires_at, Utc::now())?;
        let key = self.urls.object_key(bucket, url)?;
        self.store
            .sign_url(bucket, &key, Method::GET, valid_for, credential)
            .await
    }

    /// Signature window from `now` until `expires_at`, in whole seconds
    fn validity(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> StorageResult<Duration> {
        let seconds = (expires_at - now).num_seconds();
        if seconds <= 0 {
            return Err(StorageError::invalid(format!(
                "storage: expiry {} is not in the future",
                expires_at.to_rfc3339()
            )));
        }

        let valid_for = Duration::from_secs(seconds as u64);
        if valid_for > self.config.max_signed_url_validity {
            return Err(StorageError::invalid(format!(
                "storage: signed URL validity of {}s exceeds the maximum of {}s",
                valid_for.as_secs(),
                self.config.max_signed_url_validity.as_secs()
            )));
        }
        Ok(valid_for)
    }
}
