use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::adapter::{BoundStore, StorageAdapter};
use crate::buffer::OffsetSink;
use crate::content_type;
use crate::remote::oss::OssStore;
use crate::remote::AppendObjectStore;
use crate::url::{OssUrls, UrlCodec};
use crate::{
    Backend, ByteStream, Credential, OssCredential, StorageConfig, StorageError, StorageResult,
    UploadBuffer,
};

/// Alibaba Cloud OSS adapter.
///
/// Buffered uploads use position-addressed appends, so a session first
/// clears any existing object at the key.
pub struct OssAdapter {
    inner: BoundStore<dyn AppendObjectStore, OssUrls>,
}

impl OssAdapter {
    pub fn new(credential: OssCredential, config: StorageConfig) -> Self {
        let urls = OssUrls::new(&credential.endpoint);
        Self::with_store(Arc::new(OssStore::new(credential)), urls, config)
    }

    /// Bind an arbitrary append-capable remote, e.g. `MemoryStore`
    pub fn with_store(store: Arc<dyn AppendObjectStore>, urls: OssUrls, config: StorageConfig) -> Self {
        Self {
            inner: BoundStore {
                backend: Backend::Oss,
                store,
                urls,
                config,
            },
        }
    }
}

#[async_trait]
impl StorageAdapter for OssAdapter {
    fn backend(&self) -> Backend {
        Backend::Oss
    }

    async fn upload_reader(
        &self,
        bucket: &str,
        name: &str,
        body: ByteStream,
        tag: &str,
    ) -> StorageResult<String> {
        self.inner.upload_reader(bucket, name, body, tag).await
    }

    async fn read_file(&self, bucket: &str, path: &str) -> StorageResult<Bytes> {
        self.inner.read_file(bucket, path).await
    }

    async fn delete_file_using_url(&self, bucket: &str, url: &str) -> StorageResult<()> {
        self.inner.delete_file_using_url(bucket, url).await
    }

    async fn temporary_serving_file(
        &self,
        bucket: &str,
        url: &str,
        expires_at: DateTime<Utc>,
        credential: &Credential,
    ) -> StorageResult<String> {
        self.inner
            .temporary_serving_file(bucket, url, expires_at, credential)
            .await
    }

    async fn upload_buffer(
        &self,
        bucket: &str,
        name: &str,
        tag: &str,
    ) -> StorageResult<UploadBuffer> {
        let metadata = content_type::resolve_required(tag, name)?;
        let store = &self.inner.store;

        // Appends must start from an empty object
        match store.delete_object(bucket, name).await {
            Ok(()) | Err(StorageError::NotFound { .. }) => {}
            Err(err) => warn!(bucket, key = name, error = %err, "could not clear object before append session"),
        }

        let position = store
            .append_object(bucket, name, Bytes::new(), 0, Some(&metadata))
            .await?;
        let sink = OffsetSink::new(store.clone(), bucket, name, position);

        Ok(UploadBuffer::new(
            Backend::Oss,
            bucket,
            name,
            self.inner.urls.object_url(bucket, name),
            Box::new(sink),
            self.inner.config.copy_chunk_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryStore, RemoteCall};
    use tracing_test::traced_test;

    fn adapter() -> (OssAdapter, MemoryStore) {
        let store = MemoryStore::new();
        let adapter = OssAdapter::with_store(
            Arc::new(store.clone()),
            OssUrls::new("oss-cn-hangzhou.aliyuncs.com"),
            StorageConfig::default(),
        );
        (adapter, store)
    }

    #[tokio::test]
    async fn test_buffer_clears_existing_object() {
        let (adapter, store) = adapter();
        store.insert("media", "log.csv", "stale content");

        let mut buffer = adapter.upload_buffer("media", "log.csv", "csv").await.unwrap();
        buffer.write("fresh").await.unwrap();
        buffer.close().await.unwrap();

        assert_eq!(store.contents("media", "log.csv").unwrap(), Bytes::from("fresh"));
        assert!(matches!(
            store.calls()[0],
            RemoteCall::Delete { ref key, .. } if key == "log.csv"
        ));
    }

    #[tokio::test]
    async fn test_buffer_applies_metadata_on_first_append() {
        let (adapter, store) = adapter();
        let mut buffer = adapter.upload_buffer("media", "export.csv", "csv").await.unwrap();
        buffer.close().await.unwrap();

        let object = store.object("media", "export.csv").unwrap();
        assert_eq!(object.metadata.content_type.as_deref(), Some("text/csv"));
        assert_eq!(
            object.metadata.content_disposition.as_deref(),
            Some("attachment;filename=export.csv")
        );
        assert!(object.appendable);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_clear_is_logged_and_surfaces_on_append() {
        let (adapter, store) = adapter();
        store.set_failing(true);

        let err = adapter.upload_buffer("media", "log.csv", "csv").await.unwrap_err();
        assert!(matches!(err, StorageError::Remote { .. }));
        assert!(logs_contain("could not clear object before append session"));
    }
}
