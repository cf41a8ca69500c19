//! # dog-storage: Provider-agnostic object storage
//!
//! `dog-storage` uploads, reads, deletes and signs temporary URLs for objects
//! on Alibaba Cloud OSS or Google Cloud Storage behind one contract, so a
//! service never needs to know which provider is active.
//!
//! ## Key Features
//!
//! - **One contract**: [`StorageAdapter`] is implemented by [`OssAdapter`] and [`GcsAdapter`]
//! - **Shared content types**: one tag table drives MIME type and disposition on both providers
//! - **Append sessions**: [`UploadBuffer`] hides OSS offset appends and GCS resumable writers
//! - **Fail-late selection**: [`StorageClient`] is always usable, construction errors surface per call
//! - **Testable**: [`MemoryStore`] implements every remote primitive and records each call
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_storage::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> StorageResult<()> {
//! // Credentials come from OSS_* or GCS_CREDENTIALS_BASE64
//! let client = StorageClient::from_name("gcs");
//!
//! let url = client
//!     .upload_reader("media", "reports/q3.csv", stream_from_bytes("a,b\n1,2\n"), "")
//!     .await?;
//!
//! let mut buffer = client.upload_buffer("media", "logs/today.csv", "csv").await?;
//! buffer.write_str("ts,event\n").await?;
//! buffer.write_str("1700000000,login\n").await?;
//! let log_url = buffer.close().await?;
//!
//! client.delete_file_using_url("media", &url).await?;
//! # let _ = log_url;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  StorageClient  │  ← backend selection, preconditions
//! ├─────────────────┤
//! │ StorageAdapter  │  ← content types, URL codec, buffers
//! ├─────────────────┤
//! │   ObjectStore   │  ← remote primitives (OSS, GCS, memory)
//! └─────────────────┘
//! ```

pub mod adapter;
mod buffer;
mod client;
mod config;
pub mod content_type;
mod credential;
mod error;
pub mod remote;
mod types;
pub mod url;

// Re-export main types for clean API
pub use adapter::{GcsAdapter, OssAdapter, StorageAdapter};
pub use buffer::UploadBuffer;
pub use client::StorageClient;
pub use config::{
    credential_from_env, StorageConfig, ENV_GCS_CREDENTIALS_BASE64,
    ENV_GOOGLE_APPLICATION_CREDENTIALS, ENV_OSS_ACCESS_KEY_ID, ENV_OSS_ACCESS_KEY_SECRET,
    ENV_OSS_ENDPOINT, RESUMABLE_CHUNK_ALIGNMENT,
};
pub use content_type::{ContentType, MetadataSink, ObjectMetadata};
pub use credential::{Credential, OssCredential, ServiceAccountKey};
pub use error::{StorageError, StorageResult};
pub use remote::memory::{MemoryStore, RemoteCall, StoredObject};
pub use remote::{AppendObjectStore, ObjectStore, ObjectWriter, StreamingObjectStore};
pub use types::{stream_from_bytes, stream_from_reader, Backend, ByteStream, NamedFile};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        stream_from_bytes, stream_from_reader, Backend, ByteStream, Credential, NamedFile,
        StorageAdapter, StorageClient, StorageConfig, StorageError, StorageResult, UploadBuffer,
    };
}
