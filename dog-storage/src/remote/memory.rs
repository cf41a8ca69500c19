use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::Method;
use parking_lot::RwLock;

use crate::remote::{
    collect_body, AppendObjectStore, ObjectStore, ObjectWriter, StreamingObjectStore,
};
use crate::{ByteStream, Credential, ObjectMetadata, StorageError, StorageResult};

type ObjectKey = (String, String);

/// Failure raised by `MemoryStore`
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MemoryStoreError(String);

/// A remote operation observed by `MemoryStore`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Put { bucket: String, key: String, len: u64 },
    Get { bucket: String, key: String },
    Delete { bucket: String, key: String },
    Append { bucket: String, key: String, position: u64, len: u64 },
    Sign { bucket: String, key: String, method: String, valid_for: Duration },
    OpenWriter { bucket: String, key: String },
    Write { bucket: String, key: String, len: u64 },
    Finish { bucket: String, key: String, len: u64 },
}

/// Object as held by `MemoryStore`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
    /// Created by an append; only such objects accept further appends
    pub appendable: bool,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<ObjectKey, StoredObject>,
    calls: Vec<RemoteCall>,
    failing: bool,
    /// Operations left before a one-shot failure
    fail_countdown: Option<usize>,
}

impl MemoryState {
    fn check_available(&mut self, context: &str) -> StorageResult<()> {
        let scheduled = match self.fail_countdown {
            Some(0) => {
                self.fail_countdown = None;
                true
            }
            Some(left) => {
                self.fail_countdown = Some(left - 1);
                false
            }
            None => false,
        };

        if self.failing || scheduled {
            return Err(StorageError::remote(
                context,
                MemoryStoreError("memory store unavailable".to_string()),
            ));
        }
        Ok(())
    }
}

/// In-memory remote for testing and development.
///
/// Implements both write models: appends follow OSS rules (the position
/// must equal the current length) and writers follow GCS rules (content
/// becomes visible on `finish`). Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a call
    pub fn insert<B: Into<Bytes>>(&self, bucket: &str, key: &str, data: B) {
        self.state.write().objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.into(),
                ..StoredObject::default()
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .read()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn contents(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.object(bucket, key).map(|object| object.data)
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.read().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.read().calls.len()
    }

    pub fn clear_calls(&self) {
        self.state.write().calls.clear();
    }

    /// Remove an object without recording a call, as another client would
    pub fn remove(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .write()
            .objects
            .remove(&(bucket.to_string(), key.to_string()))
    }

    /// While set, every operation fails with a remote error and records nothing
    pub fn set_failing(&self, failing: bool) {
        self.state.write().failing = failing;
    }

    /// Fail only the `nth` operation from now (1-based), once
    pub fn fail_nth_call(&self, nth: usize) {
        self.state.write().fail_countdown = nth.checked_sub(1);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
    ) -> StorageResult<u64> {
        let data = collect_body(body).await?;
        let len = data.len() as u64;

        let mut state = self.state.write();
        state.check_available("could not write file")?;
        state.calls.push(RemoteCall::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            len,
        });
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                metadata: metadata.clone(),
                appendable: false,
            },
        );
        Ok(len)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let mut state = self.state.write();
        state.check_available("could not read file")?;
        state.calls.push(RemoteCall::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut state = self.state.write();
        state.check_available("could not delete file")?;
        state.calls.push(RemoteCall::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        state.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        method: Method,
        valid_for: Duration,
        _credential: &Credential,
    ) -> StorageResult<String> {
        let mut state = self.state.write();
        state.check_available("could not sign url")?;
        state.calls.push(RemoteCall::Sign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            method: method.to_string(),
            valid_for,
        });
        Ok(format!(
            "memory://{}/{}?method={}&expires_in={}",
            bucket,
            key,
            method,
            valid_for.as_secs()
        ))
    }
}

#[async_trait]
impl AppendObjectStore for MemoryStore {
    async fn append_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        position: u64,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<u64> {
        let mut state = self.state.write();
        state.check_available("could not append file")?;

        let object_key = (bucket.to_string(), key.to_string());
        let current = state.objects.get(&object_key).cloned();
        let mut object = match current {
            None if position == 0 => StoredObject {
                data: Bytes::new(),
                metadata: metadata.cloned().unwrap_or_default(),
                appendable: true,
            },
            Some(object) if object.appendable && object.data.len() as u64 == position => object,
            Some(object) if !object.appendable => {
                return Err(StorageError::remote(
                    "could not append file",
                    MemoryStoreError(format!("{}/{} is not appendable", bucket, key)),
                ))
            }
            existing => {
                let length = existing.map(|object| object.data.len()).unwrap_or(0);
                return Err(StorageError::remote(
                    "could not append file",
                    MemoryStoreError(format!(
                        "position {} not equal to length {}",
                        position, length
                    )),
                ));
            }
        };

        let mut combined = BytesMut::from(&object.data[..]);
        combined.extend_from_slice(&data);
        object.data = combined.freeze();
        let next_position = object.data.len() as u64;

        state.calls.push(RemoteCall::Append {
            bucket: bucket.to_string(),
            key: key.to_string(),
            position,
            len: data.len() as u64,
        });
        state.objects.insert(object_key, object);
        Ok(next_position)
    }
}

#[async_trait]
impl StreamingObjectStore for MemoryStore {
    async fn open_writer(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<Box<dyn ObjectWriter>> {
        let mut state = self.state.write();
        state.check_available("could not open writer")?;
        state.calls.push(RemoteCall::OpenWriter {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });

        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            metadata: metadata.clone(),
            staged: BytesMut::new(),
        }))
    }
}

struct MemoryWriter {
    state: Arc<RwLock<MemoryState>>,
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    staged: BytesMut,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let mut state = self.state.write();
        state.check_available("could not write file")?;
        state.calls.push(RemoteCall::Write {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            len: data.len() as u64,
        });
        self.staged.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<()> {
        let mut state = self.state.write();
        state.check_available("could not put file")?;

        let data = std::mem::take(&mut self.staged).freeze();
        state.calls.push(RemoteCall::Finish {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            len: data.len() as u64,
        });
        state.objects.insert(
            (self.bucket.clone(), self.key.clone()),
            StoredObject {
                data,
                metadata: self.metadata.clone(),
                appendable: false,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_from_bytes;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        let written = store
            .put_object("b", "k", stream_from_bytes("hello"), &ObjectMetadata::default())
            .await
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(store.get_object("b", "k").await.unwrap(), Bytes::from("hello"));

        store.delete_object("b", "k").await.unwrap();
        assert!(matches!(
            store.get_object("b", "k").await,
            Err(StorageError::NotFound { .. })
        ));
        // Deleting a missing object is not an error
        store.delete_object("b", "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_append_requires_matching_position() {
        let store = MemoryStore::new();
        let next = store
            .append_object("b", "log", Bytes::from("abc"), 0, None)
            .await
            .unwrap();
        assert_eq!(next, 3);

        let err = store
            .append_object("b", "log", Bytes::from("x"), 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Remote { .. }));
        assert_eq!(store.contents("b", "log").unwrap(), Bytes::from("abc"));
    }

    #[tokio::test]
    async fn test_append_to_put_object_fails() {
        let store = MemoryStore::new();
        store.insert("b", "plain", "data");
        assert!(store
            .append_object("b", "plain", Bytes::from("x"), 4, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_writer_visible_only_after_finish() {
        let store = MemoryStore::new();
        let mut writer = store
            .open_writer("b", "k", &ObjectMetadata::default())
            .await
            .unwrap();
        writer.write(Bytes::from("part")).await.unwrap();
        assert!(store.contents("b", "k").is_none());

        writer.finish().await.unwrap();
        assert_eq!(store.contents("b", "k").unwrap(), Bytes::from("part"));
    }

    #[tokio::test]
    async fn test_nth_call_fails_once() {
        let store = MemoryStore::new();
        store.fail_nth_call(2);

        store.delete_object("b", "first").await.unwrap();
        assert!(matches!(
            store.delete_object("b", "second").await,
            Err(StorageError::Remote { .. })
        ));
        store.delete_object("b", "third").await.unwrap();
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_store_records_nothing() {
        let store = MemoryStore::new();
        store.set_failing(true);
        assert!(store.delete_object("b", "k").await.is_err());
        assert_eq!(store.call_count(), 0);
    }
}
