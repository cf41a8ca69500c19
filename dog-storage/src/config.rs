use std::time::Duration;

use crate::url::GCS_DOMAIN;
use crate::{Backend, Credential, OssCredential, ServiceAccountKey, StorageError, StorageResult};

/// GCS resumable uploads require every non-final chunk to be a multiple of this
pub const RESUMABLE_CHUNK_ALIGNMENT: usize = 256 * 1024;

pub const ENV_OSS_ENDPOINT: &str = "OSS_ENDPOINT";
pub const ENV_OSS_ACCESS_KEY_ID: &str = "OSS_ACCESS_KEY_ID";
pub const ENV_OSS_ACCESS_KEY_SECRET: &str = "OSS_ACCESS_KEY_SECRET";
pub const ENV_GCS_CREDENTIALS_BASE64: &str = "GCS_CREDENTIALS_BASE64";
pub const ENV_GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Tunables shared by the storage backends
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Public GCS domain, also the API base (override for emulators)
    pub gcs_domain: String,

    /// Bytes sent per resumable-upload request; set through `with_gcs_chunk_size`
    gcs_chunk_size: usize,

    /// Read size used when copying an async reader into an upload buffer
    pub copy_chunk_size: usize,

    /// Longest accepted signed URL window
    pub max_signed_url_validity: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gcs_domain: GCS_DOMAIN.to_string(),
            gcs_chunk_size: 8 * 1024 * 1024, // 8MB
            copy_chunk_size: 64 * 1024,
            max_signed_url_validity: Duration::from_secs(7 * 24 * 60 * 60), // GCS V4 maximum
        }
    }
}

impl StorageConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gcs_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.gcs_domain = domain.into();
        self
    }

    /// Set the resumable chunk size, rounded up to the 256 KiB alignment
    pub fn with_gcs_chunk_size(mut self, bytes: usize) -> Self {
        let chunks = bytes.div_ceil(RESUMABLE_CHUNK_ALIGNMENT).max(1);
        self.gcs_chunk_size = chunks * RESUMABLE_CHUNK_ALIGNMENT;
        self
    }

    /// Resumable chunk size, always a multiple of 256 KiB
    pub fn gcs_chunk_size(&self) -> usize {
        self.gcs_chunk_size
    }

    pub fn with_copy_chunk_size(mut self, bytes: usize) -> Self {
        self.copy_chunk_size = bytes.max(1);
        self
    }

    pub fn with_max_signed_url_validity(mut self, validity: Duration) -> Self {
        self.max_signed_url_validity = validity;
        self
    }
}

/// Load the credential for `backend` from the process environment.
///
/// OSS reads `OSS_ENDPOINT`, `OSS_ACCESS_KEY_ID` and `OSS_ACCESS_KEY_SECRET`.
/// GCS reads `GCS_CREDENTIALS_BASE64` first, then the key file named by
/// `GOOGLE_APPLICATION_CREDENTIALS`.
pub fn credential_from_env(backend: Backend) -> StorageResult<Credential> {
    match backend {
        Backend::Oss => Ok(Credential::Oss(OssCredential::new(
            require_env(ENV_OSS_ENDPOINT)?,
            require_env(ENV_OSS_ACCESS_KEY_ID)?,
            require_env(ENV_OSS_ACCESS_KEY_SECRET)?,
        ))),
        Backend::Gcs => {
            if let Some(encoded) = optional_env(ENV_GCS_CREDENTIALS_BASE64) {
                return Ok(Credential::Gcs(ServiceAccountKey::from_base64(&encoded)?));
            }
            match optional_env(ENV_GOOGLE_APPLICATION_CREDENTIALS) {
                Some(path) => Ok(Credential::Gcs(ServiceAccountKey::from_file(path)?)),
                None => Err(StorageError::config(format!(
                    "neither {} nor {} is set",
                    ENV_GCS_CREDENTIALS_BASE64, ENV_GOOGLE_APPLICATION_CREDENTIALS
                ))),
            }
        }
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn require_env(name: &str) -> StorageResult<String> {
    optional_env(name).ok_or_else(|| StorageError::config(format!("{} is not set", name)))
}
