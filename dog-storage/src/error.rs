use thiserror::Error;

use crate::Backend;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Content type {tag} is not supported")]
    UnsupportedContentType { tag: String },

    #[error("Credential for {found} cannot be used with the {expected} backend")]
    CredentialMismatch { expected: Backend, found: Backend },

    #[error("The client {name} is not supported")]
    UnsupportedClient { name: String },

    #[error("Invalid client credential: shape matches no supported backend")]
    UnrecognizedCredential,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("URL {url} does not belong to this backend and bucket")]
    InvalidUrl { url: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Upload buffer is already closed")]
    BufferClosed,

    #[error("Upload aborted after a failed write; object not finalized")]
    WriteAborted,

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Wrap a remote failure with a short description of what was attempted
    pub fn remote<S, E>(context: S, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Remote {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn unsupported_content_type<S: Into<String>>(tag: S) -> Self {
        Self::UnsupportedContentType { tag: tag.into() }
    }

    pub fn not_found<B: Into<String>, K: Into<String>>(bucket: B, key: K) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// True for errors raised before any remote call was attempted
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Invalid { .. }
                | Self::UnsupportedContentType { .. }
                | Self::CredentialMismatch { .. }
                | Self::InvalidUrl { .. }
                | Self::BufferClosed
                | Self::WriteAborted
        )
    }
}

/// Construction failure kept by a client and reported on every call.
///
/// `StorageError` carries boxed sources and cannot be cloned, so the
/// client stores this instead and converts it on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InitError {
    UnsupportedClient(String),
    UnrecognizedCredential,
    Config(String),
    Decode(String),
}

impl From<&InitError> for StorageError {
    fn from(err: &InitError) -> Self {
        match err {
            InitError::UnsupportedClient(name) => StorageError::UnsupportedClient { name: name.clone() },
            InitError::UnrecognizedCredential => StorageError::UnrecognizedCredential,
            InitError::Config(message) => StorageError::config(message.clone()),
            InitError::Decode(message) => StorageError::decode(message.clone()),
        }
    }
}

impl InitError {
    /// Capture a construction-time `StorageError` for deferred reporting
    pub(crate) fn capture(err: StorageError) -> Self {
        match err {
            StorageError::UnsupportedClient { name } => InitError::UnsupportedClient(name),
            StorageError::UnrecognizedCredential => InitError::UnrecognizedCredential,
            StorageError::Decode { message } => InitError::Decode(message),
            other => InitError::Config(other.to_string()),
        }
    }
}
