use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::adapter::{GcsAdapter, OssAdapter, StorageAdapter};
use crate::config::credential_from_env;
use crate::error::InitError;
use crate::{
    Backend, ByteStream, Credential, NamedFile, StorageConfig, StorageError, StorageResult,
    UploadBuffer,
};

/// Entry point bound to exactly one backend.
///
/// Construction never fails: an unknown backend name, an unrecognized
/// credential or missing environment credentials are kept and returned by
/// every operation instead.
#[derive(Clone)]
pub struct StorageClient {
    adapter: Result<Arc<dyn StorageAdapter>, InitError>,
}

impl StorageClient {
    /// Select a backend by registry name (`GCS`, `OSS`, `ALIYUN`, any case),
    /// with credentials from the environment
    pub fn from_name(name: &str) -> Self {
        Self::from_name_with(name, StorageConfig::default())
    }

    pub fn from_name_with(name: &str, config: StorageConfig) -> Self {
        let adapter = match Backend::from_name(name) {
            Some(backend) => credential_from_env(backend)
                .and_then(|credential| build_adapter(credential, config))
                .map_err(InitError::capture),
            None => Err(InitError::UnsupportedClient(name.to_string())),
        };
        Self::deferred(adapter)
    }

    /// Select the backend matching the credential's variant
    pub fn from_credential(credential: Credential) -> Self {
        Self::from_credential_with(credential, StorageConfig::default())
    }

    pub fn from_credential_with(credential: Credential, config: StorageConfig) -> Self {
        Self::deferred(build_adapter(credential, config).map_err(InitError::capture))
    }

    /// Select the backend from the shape of a JSON credential document
    pub fn from_credential_json(json: &str) -> Self {
        Self::deferred(
            Credential::from_json(json)
                .and_then(|credential| build_adapter(credential, StorageConfig::default()))
                .map_err(InitError::capture),
        )
    }

    /// Bind an already-built adapter
    pub fn from_adapter(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter: Ok(adapter),
        }
    }

    fn deferred(adapter: Result<Arc<dyn StorageAdapter>, InitError>) -> Self {
        if let Err(err) = &adapter {
            warn!(error = %StorageError::from(err), "storage client unusable");
        }
        Self { adapter }
    }

    fn adapter(&self) -> StorageResult<&dyn StorageAdapter> {
        self.adapter.as_deref().map_err(StorageError::from)
    }

    /// The bound backend, or the construction error
    pub fn backend(&self) -> StorageResult<Backend> {
        Ok(self.adapter()?.backend())
    }

    pub async fn upload_file(
        &self,
        file: &NamedFile,
        bucket: &str,
        base_name: &str,
    ) -> StorageResult<String> {
        let adapter = self.adapter()?;
        require("bucket", bucket)?;
        require("name", base_name)?;
        adapter.upload_file(file, bucket, base_name).await
    }

    pub async fn upload_reader(
        &self,
        bucket: &str,
        name: &str,
        body: ByteStream,
        tag: &str,
    ) -> StorageResult<String> {
        let adapter = self.adapter()?;
        require("bucket", bucket)?;
        require("name", name)?;
        adapter.upload_reader(bucket, name, body, tag).await
    }

    pub async fn read_file(&self, bucket: &str, path: &str) -> StorageResult<Bytes> {
        let adapter = self.adapter()?;
        require("bucket", bucket)?;
        require("path", path)?;
        adapter.read_file(bucket, path).await
    }

    pub async fn delete_file_using_url(&self, bucket: &str, url: &str) -> StorageResult<()> {
        let adapter = self.adapter()?;
        require("bucket", bucket)?;
        require("url", url)?;
        adapter.delete_file_using_url(bucket, url).await
    }

    pub async fn temporary_serving_file(
        &self,
        bucket: &str,
        url: &str,
        expires_at: DateTime<Utc>,
        credential: &Credential,
    ) -> StorageResult<String> {
        let adapter = self.adapter()?;
        require("bucket", bucket)?;
        require("url", url)?;
        adapter
            .temporary_serving_file(bucket, url, expires_at, credential)
            .await
    }

    pub async fn upload_buffer(
        &self,
        bucket: &str,
        name: &str,
        tag: &str,
    ) -> StorageResult<UploadBuffer> {
        let adapter = self.adapter()?;
        require("bucket", bucket)?;
        require("name", name)?;
        adapter.upload_buffer(bucket, name, tag).await
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.adapter {
            Ok(adapter) => f
                .debug_struct("StorageClient")
                .field("backend", &adapter.backend())
                .finish(),
            Err(err) => f.debug_struct("StorageClient").field("error", err).finish(),
        }
    }
}

fn build_adapter(
    credential: Credential,
    config: StorageConfig,
) -> StorageResult<Arc<dyn StorageAdapter>> {
    match credential {
        Credential::Oss(credential) => Ok(Arc::new(OssAdapter::new(credential, config))),
        Credential::Gcs(key) => Ok(Arc::new(GcsAdapter::new(key, config)?)),
    }
}

fn require(field: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::invalid(format!("storage: {} must not be empty", field)));
    }
    Ok(())
}
