//! Incremental upload sessions.
//!
//! An [`UploadBuffer`] is `Open` from `upload_buffer` until the first
//! `close`, and `Closed` afterwards. Writes go straight to an
//! [`ObjectWriter`]: the GCS resumable writer keeps order on its single
//! stream, while [`OffsetSink`] turns each write into an OSS append at the
//! position the remote last reported.
//!
//! A failed write aborts the session. Later writes are refused and `close`
//! drops the writer without finalizing, so a partial object is never
//! committed as if it were complete.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::remote::{AppendObjectStore, ObjectWriter};
use crate::{Backend, StorageError, StorageResult};

/// Writer over position-addressed appends
pub(crate) struct OffsetSink {
    store: Arc<dyn AppendObjectStore>,
    bucket: String,
    key: String,
    position: u64,
}

impl OffsetSink {
    pub(crate) fn new(
        store: Arc<dyn AppendObjectStore>,
        bucket: &str,
        key: &str,
        position: u64,
    ) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            key: key.to_string(),
            position,
        }
    }
}

#[async_trait]
impl ObjectWriter for OffsetSink {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let len = data.len();
        // The remote's reply is the new cursor, whatever was sent
        self.position = self
            .store
            .append_object(&self.bucket, &self.key, data, self.position, None)
            .await?;
        debug!(bucket = %self.bucket, key = %self.key, bytes = len, position = self.position, "appended");
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<()> {
        // Every append is already durable
        Ok(())
    }
}

/// An open append session on one object
pub struct UploadBuffer {
    backend: Backend,
    bucket: String,
    key: String,
    url: String,
    copy_chunk_size: usize,
    writer: Option<Box<dyn ObjectWriter>>,
    aborted: bool,
}

impl UploadBuffer {
    pub(crate) fn new(
        backend: Backend,
        bucket: &str,
        key: &str,
        url: String,
        writer: Box<dyn ObjectWriter>,
        copy_chunk_size: usize,
    ) -> Self {
        info!(%backend, bucket, key, "upload buffer opened");
        Self {
            backend,
            bucket: bucket.to_string(),
            key: key.to_string(),
            url,
            copy_chunk_size: copy_chunk_size.max(1),
            writer: Some(writer),
            aborted: false,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object URL the session will produce on `close`
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Append `data` after everything written so far
    pub async fn write<B: Into<Bytes>>(&mut self, data: B) -> StorageResult<()> {
        let writer = self.writer.as_mut().ok_or(StorageError::BufferClosed)?;
        if self.aborted {
            return Err(StorageError::WriteAborted);
        }

        let result = writer.write(data.into()).await;
        if let Err(err) = &result {
            self.aborted = true;
            warn!(backend = %self.backend, bucket = %self.bucket, key = %self.key, error = %err, "upload buffer aborted");
        }
        result
    }

    /// True once a write has failed; the session can only be closed
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub async fn write_str(&mut self, data: &str) -> StorageResult<()> {
        self.write(Bytes::copy_from_slice(data.as_bytes())).await
    }

    /// Drain `reader` into the session, one write per read; returns the byte count
    pub async fn copy_from<R>(&mut self, reader: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if self.is_closed() {
            return Err(StorageError::BufferClosed);
        }

        let mut chunk = vec![0u8; self.copy_chunk_size];
        let mut copied = 0u64;
        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                return Ok(copied);
            }
            self.write(Bytes::copy_from_slice(&chunk[..read])).await?;
            copied += read as u64;
        }
    }

    /// Finalize the object and return its URL.
    ///
    /// The buffer is closed afterwards even when finalizing fails. An
    /// aborted session is closed without finalizing and returns `WriteAborted`.
    pub async fn close(&mut self) -> StorageResult<String> {
        let mut writer = self.writer.take().ok_or(StorageError::BufferClosed)?;
        if self.aborted {
            return Err(StorageError::WriteAborted);
        }
        writer.finish().await?;

        info!(backend = %self.backend, bucket = %self.bucket, key = %self.key, "upload buffer closed");
        Ok(self.url.clone())
    }
}

impl std::fmt::Debug for UploadBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadBuffer")
            .field("backend", &self.backend)
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .field("aborted", &self.aborted)
            .finish()
    }
}

impl Drop for UploadBuffer {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!(
                backend = %self.backend,
                bucket = %self.bucket,
                key = %self.key,
                "upload buffer dropped without close; object not finalized"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryStore, RemoteCall};
    use crate::remote::StreamingObjectStore;
    use crate::ObjectMetadata;
    use tracing_test::traced_test;

    async fn offset_buffer(store: &MemoryStore, chunk: usize) -> UploadBuffer {
        let position = store
            .append_object("b", "k", Bytes::new(), 0, None)
            .await
            .unwrap();
        let sink = OffsetSink::new(Arc::new(store.clone()), "b", "k", position);
        UploadBuffer::new(Backend::Oss, "b", "k", "url".to_string(), Box::new(sink), chunk)
    }

    #[tokio::test]
    async fn test_offsets_follow_remote() {
        let store = MemoryStore::new();
        let mut buffer = offset_buffer(&store, 64).await;
        buffer.write("abc").await.unwrap();
        buffer.write_str("de").await.unwrap();
        assert_eq!(buffer.close().await.unwrap(), "url");

        let positions: Vec<u64> = store
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::Append { position, .. } => Some(position),
                _ => None,
            })
            .collect();
        assert_eq!(positions, vec![0, 0, 3]);
        assert_eq!(store.contents("b", "k").unwrap(), Bytes::from("abcde"));
    }

    #[tokio::test]
    async fn test_copy_from_reader_in_chunks() {
        let store = MemoryStore::new();
        let mut buffer = offset_buffer(&store, 4).await;
        let mut reader: &[u8] = b"0123456789";

        assert_eq!(buffer.copy_from(&mut reader).await.unwrap(), 10);
        buffer.close().await.unwrap();

        assert_eq!(store.contents("b", "k").unwrap(), Bytes::from("0123456789"));
        // One initial append plus ceil(10 / 4) data appends
        assert_eq!(store.call_count(), 4);
    }

    #[tokio::test]
    async fn test_closed_buffer_rejects_everything() {
        let store = MemoryStore::new();
        let mut buffer = offset_buffer(&store, 64).await;
        buffer.write("a").await.unwrap();
        buffer.close().await.unwrap();
        let calls = store.call_count();

        assert!(buffer.is_closed());
        assert!(matches!(buffer.write("b").await, Err(StorageError::BufferClosed)));
        assert!(matches!(buffer.close().await, Err(StorageError::BufferClosed)));
        let mut reader: &[u8] = b"more";
        assert!(matches!(
            buffer.copy_from(&mut reader).await,
            Err(StorageError::BufferClosed)
        ));

        assert_eq!(store.call_count(), calls);
        assert_eq!(store.contents("b", "k").unwrap(), Bytes::from("a"));
    }

    #[tokio::test]
    async fn test_failed_finish_still_closes() {
        let store = MemoryStore::new();
        let writer = store
            .open_writer("b", "k", &ObjectMetadata::default())
            .await
            .unwrap();
        let mut buffer = UploadBuffer::new(Backend::Gcs, "b", "k", "url".to_string(), writer, 64);
        buffer.write("data").await.unwrap();

        store.set_failing(true);
        assert!(matches!(buffer.close().await, Err(StorageError::Remote { .. })));
        assert!(buffer.is_closed());

        store.set_failing(false);
        assert!(matches!(buffer.close().await, Err(StorageError::BufferClosed)));
        assert!(store.contents("b", "k").is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_write_aborts_without_finalizing() {
        let store = MemoryStore::new();
        let writer = store
            .open_writer("b", "k", &ObjectMetadata::default())
            .await
            .unwrap();
        let mut buffer = UploadBuffer::new(Backend::Gcs, "b", "k", "url".to_string(), writer, 64);
        buffer.write("A").await.unwrap();

        store.fail_nth_call(1);
        assert!(matches!(buffer.write("B").await, Err(StorageError::Remote { .. })));
        assert!(buffer.is_aborted());
        assert!(logs_contain("upload buffer aborted"));

        let calls = store.call_count();
        assert!(matches!(buffer.write("C").await, Err(StorageError::WriteAborted)));
        assert!(matches!(buffer.close().await, Err(StorageError::WriteAborted)));
        assert!(buffer.is_closed());
        assert!(matches!(buffer.close().await, Err(StorageError::BufferClosed)));

        // Nothing reached the remote after the failure and "A" was never committed
        assert_eq!(store.call_count(), calls);
        assert!(store.contents("b", "k").is_none());
    }

    #[tokio::test]
    async fn test_failed_copy_aborts_session() {
        let store = MemoryStore::new();
        let mut buffer = offset_buffer(&store, 2).await;
        let mut reader: &[u8] = b"abcdef";

        store.fail_nth_call(2);
        assert!(buffer.copy_from(&mut reader).await.is_err());
        assert!(buffer.is_aborted());
        assert!(matches!(buffer.close().await, Err(StorageError::WriteAborted)));
        assert_eq!(store.contents("b", "k").unwrap(), Bytes::from("ab"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drop_while_open_warns() {
        let store = MemoryStore::new();
        let buffer = offset_buffer(&store, 64).await;
        drop(buffer);
        assert!(logs_contain("upload buffer dropped without close"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_is_logged() {
        let store = MemoryStore::new();
        let mut buffer = offset_buffer(&store, 64).await;
        buffer.close().await.unwrap();
        drop(buffer);
        assert!(logs_contain("upload buffer closed"));
        assert!(!logs_contain("dropped without close"));
    }
}
