use bytes::Bytes;
use futures_core::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::{StorageError, StorageResult};

/// Stream of bytes for object content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Names accepted by `StorageClient::from_name`, matched case-insensitively.
const REGISTRY: &[(&str, Backend)] = &[
    ("GCS", Backend::Gcs),
    ("ALIYUN", Backend::Oss),
    ("OSS", Backend::Oss),
];

/// The closed set of supported object storage providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Alibaba Cloud OSS: virtual-hosted URLs, position-addressed appends
    Oss,
    /// Google Cloud Storage: path-style URLs, sequential resumable writer
    Gcs,
}

impl Backend {
    /// Look a backend up by its registry name; case-insensitive, whitespace is not ignored
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = name.to_uppercase();
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == wanted)
            .map(|(_, backend)| *backend)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Oss => "OSS",
            Backend::Gcs => "GCS",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrap an in-memory payload as a `ByteStream`
pub fn stream_from_bytes<B: Into<Bytes>>(data: B) -> ByteStream {
    let data = data.into();
    Box::pin(futures_util::stream::iter(vec![Ok(data)]))
}

/// Wrap any async reader as a `ByteStream`
pub fn stream_from_reader<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(ReaderStream::new(reader))
}

/// Where a named file's bytes live until it is opened
#[derive(Debug, Clone)]
enum FileSource {
    Memory(Bytes),
    Disk(PathBuf),
}

/// A named upload with a declared MIME type, as received from a form post
#[derive(Debug, Clone)]
pub struct NamedFile {
    filename: String,
    content_type: String,
    source: FileSource,
}

impl NamedFile {
    /// A file whose content is already in memory
    pub fn from_bytes<N, C, B>(filename: N, content_type: C, data: B) -> Self
    where
        N: Into<String>,
        C: Into<String>,
        B: Into<Bytes>,
    {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            source: FileSource::Memory(data.into()),
        }
    }

    /// A file spooled to disk; opened lazily on upload
    pub fn from_path<N, C, P>(filename: N, content_type: C, path: P) -> Self
    where
        N: Into<String>,
        C: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            source: FileSource::Disk(path.into()),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Lower-cased MIME subtype, e.g. `vnd.android.package-archive`
    pub fn mime_subtype(&self) -> StorageResult<String> {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();

        match essence.split_once('/') {
            Some((_, subtype)) if !subtype.trim().is_empty() => Ok(subtype.trim().to_lowercase()),
            _ => Err(StorageError::invalid(format!(
                "storage: malformed content type {:?} on file {}",
                self.content_type, self.filename
            ))),
        }
    }

    /// Open the content as a byte stream
    pub async fn open(&self) -> StorageResult<ByteStream> {
        match &self.source {
            FileSource::Memory(data) => Ok(stream_from_bytes(data.clone())),
            FileSource::Disk(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(stream_from_reader(file))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_backend_registry_is_case_insensitive() {
        assert_eq!(Backend::from_name("gcs"), Some(Backend::Gcs));
        assert_eq!(Backend::from_name("Aliyun"), Some(Backend::Oss));
        assert_eq!(Backend::from_name("OsS"), Some(Backend::Oss));
        assert_eq!(Backend::from_name(" oss "), None);
        assert_eq!(Backend::from_name("azure"), None);
        assert_eq!(Backend::from_name(""), None);
    }

    #[test]
    fn test_mime_subtype() {
        let apk = NamedFile::from_bytes("app", "application/vnd.android.package-archive", "x");
        assert_eq!(apk.mime_subtype().unwrap(), "vnd.android.package-archive");

        let csv = NamedFile::from_bytes("r", "Text/CSV; charset=utf-8", "x");
        assert_eq!(csv.mime_subtype().unwrap(), "csv");

        let broken = NamedFile::from_bytes("r", "csv", "x");
        assert!(matches!(broken.mime_subtype(), Err(StorageError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_open_missing_path_fails() {
        let file = NamedFile::from_path("gone", "text/csv", "/definitely/not/here.csv");
        assert!(matches!(file.open().await, Err(StorageError::Io { .. })));
    }

    #[tokio::test]
    async fn test_open_memory_file() {
        let file = NamedFile::from_bytes("hello", "text/plain", "hello");
        let mut stream = file.open().await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert!(stream.next().await.is_none());
    }
}
