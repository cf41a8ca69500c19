use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::adapter::{BoundStore, StorageAdapter};
use crate::content_type;
use crate::remote::gcs::GcsStore;
use crate::remote::StreamingObjectStore;
use crate::url::{GcsUrls, UrlCodec};
use crate::{
    Backend, ByteStream, Credential, ServiceAccountKey, StorageConfig, StorageResult, UploadBuffer,
};

/// Google Cloud Storage adapter.
///
/// Buffered uploads stream through one resumable writer that starts empty.
pub struct GcsAdapter {
    inner: BoundStore<dyn StreamingObjectStore, GcsUrls>,
}

impl GcsAdapter {
    pub fn new(key: ServiceAccountKey, config: StorageConfig) -> StorageResult<Self> {
        let store = GcsStore::new(key, &config)?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Bind an arbitrary streaming remote, e.g. `MemoryStore`
    pub fn with_store(store: Arc<dyn StreamingObjectStore>, config: StorageConfig) -> Self {
        Self {
            inner: BoundStore {
                backend: Backend::Gcs,
                store,
                urls: GcsUrls::new(config.gcs_domain.as_str()),
                config,
            },
        }
    }
}

#[async_trait]
impl StorageAdapter for GcsAdapter {
    fn backend(&self) -> Backend {
        Backend::Gcs
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
        let writer = self.inner.store.open_writer(bucket, name, &metadata).await?;

        Ok(UploadBuffer::new(
            Backend::Gcs,
            bucket,
            name,
            self.inner.urls.object_url(bucket, name),
            writer,
            self.inner.config.copy_chunk_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryStore, RemoteCall};

    #[tokio::test]
    async fn test_buffer_does_not_clear_existing_object() {
        let store = MemoryStore::new();
        store.insert("media", "log.csv", "previous");
        let adapter = GcsAdapter::with_store(Arc::new(store.clone()), StorageConfig::default());

        let buffer = adapter.upload_buffer("media", "log.csv", "csv").await.unwrap();
        assert_eq!(buffer.url(), "https://storage.googleapis.com/media/log.csv");
        assert!(!store
            .calls()
            .iter()
            .any(|call| matches!(call, RemoteCall::Delete { .. })));
        // Previous content stays visible until the writer finishes
        assert_eq!(store.contents("media", "log.csv").unwrap(), Bytes::from("previous"));
        drop(buffer);
    }

    #[tokio::test]
    async fn test_custom_domain_flows_into_urls() {
        let store = MemoryStore::new();
        let config = StorageConfig::default().with_gcs_domain("http://localhost:4443");
        let adapter = GcsAdapter::with_store(Arc::new(store), config);

        let url = adapter
            .upload_reader("media", "a.png", crate::stream_from_bytes("png"), "")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:4443/media/a.png");
    }
}
