//! Content-type tags and the write metadata they resolve to.
//!
//! Both backends share this one table, so a tag accepted by one is accepted
//! with the same meaning by the other. Each remote decides how the resulting
//! [`ObjectMetadata`] is expressed on the wire through [`MetadataSink`].

use crate::{StorageError, StorageResult};

/// Tag meaning "infer from the object name's extension"
pub const INFER_FROM_NAME: &str = "";

/// Recognized content types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Csv,
    Png,
    Jpeg,
    Heic,
    Pdf,
    Zip,
    Apk,
    Html,
    Css,
    Js,
    Xlsx,
    Svg,
}

impl ContentType {
    pub const ALL: [ContentType; 12] = [
        ContentType::Csv,
        ContentType::Png,
        ContentType::Jpeg,
        ContentType::Heic,
        ContentType::Pdf,
        ContentType::Zip,
        ContentType::Apk,
        ContentType::Html,
        ContentType::Css,
        ContentType::Js,
        ContentType::Xlsx,
        ContentType::Svg,
    ];

    /// Exact tag lookup, including MIME-subtype aliases
    pub fn from_tag(tag: &str) -> Option<Self> {
        let content_type = match tag {
            "csv" => ContentType::Csv,
            "png" => ContentType::Png,
            "jpeg" | "jpg" => ContentType::Jpeg,
            "heic" => ContentType::Heic,
            "pdf" => ContentType::Pdf,
            "zip" => ContentType::Zip,
            "apk" | "vnd.android.package-archive" => ContentType::Apk,
            "html" => ContentType::Html,
            "css" => ContentType::Css,
            "js" => ContentType::Js,
            "xlsx" | "vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ContentType::Xlsx,
            "svg" | "svg+xml" => ContentType::Svg,
            _ => return None,
        };
        Some(content_type)
    }

    /// Canonical short tag
    pub fn tag(&self) -> &'static str {
        match self {
            ContentType::Csv => "csv",
            ContentType::Png => "png",
            ContentType::Jpeg => "jpeg",
            ContentType::Heic => "heic",
            ContentType::Pdf => "pdf",
            ContentType::Zip => "zip",
            ContentType::Apk => "apk",
            ContentType::Html => "html",
            ContentType::Css => "css",
            ContentType::Js => "js",
            ContentType::Xlsx => "xlsx",
            ContentType::Svg => "svg",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Csv => "text/csv",
            ContentType::Png => "image/png",
            ContentType::Jpeg => "image/jpeg",
            ContentType::Heic => "image/heic",
            ContentType::Pdf => "application/pdf",
            ContentType::Zip => "application/zip",
            ContentType::Apk => "application/vnd.android.package-archive",
            ContentType::Html => "text/html",
            ContentType::Css => "text/css",
            ContentType::Js => "application/javascript",
            ContentType::Xlsx => "application/vnd.ms-excel",
            ContentType::Svg => "image/svg+xml",
        }
    }

    /// Whether browsers should download rather than render the object
    pub fn is_attachment(&self) -> bool {
        matches!(
            self,
            ContentType::Csv | ContentType::Zip | ContentType::Apk | ContentType::Xlsx
        )
    }

    /// Metadata for an object stored under `object_name`
    pub fn metadata(&self, object_name: &str) -> ObjectMetadata {
        ObjectMetadata {
            content_type: Some(self.mime().to_string()),
            content_disposition: self
                .is_attachment()
                .then(|| format!("attachment;filename={}", object_name)),
        }
    }
}

/// Backend-neutral write metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl ObjectMetadata {
    /// No metadata: the backend applies its defaults
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.content_disposition.is_none()
    }

    /// Express this metadata through a backend-specific sink
    pub fn apply_to<S: MetadataSink + ?Sized>(&self, sink: &mut S) {
        if let Some(content_type) = &self.content_type {
            sink.set_content_type(content_type);
        }
        if let Some(disposition) = &self.content_disposition {
            sink.set_content_disposition(disposition);
        }
    }
}

/// How a backend records "set MIME type" and "set content disposition"
pub trait MetadataSink {
    fn set_content_type(&mut self, value: &str);
    fn set_content_disposition(&mut self, value: &str);
}

/// Resolve a caller-supplied tag for a one-shot upload.
///
/// An empty tag is inferred from the trailing extension of `object_name`
/// and fails open to empty metadata. A non-empty tag that is not in the
/// table is an error.
pub fn resolve(tag: &str, object_name: &str) -> StorageResult<ObjectMetadata> {
    if tag == INFER_FROM_NAME {
        return Ok(infer(object_name));
    }

    ContentType::from_tag(tag)
        .map(|content_type| content_type.metadata(object_name))
        .ok_or_else(|| StorageError::unsupported_content_type(tag))
}

/// Resolve a tag that must be explicit (append sessions have no data to infer from)
pub fn resolve_required(tag: &str, object_name: &str) -> StorageResult<ObjectMetadata> {
    if tag == INFER_FROM_NAME {
        return Err(StorageError::invalid(
            "storage: an explicit content type is required for buffered uploads",
        ));
    }
    resolve(tag, object_name)
}

/// Metadata inferred from the object name's extension; unknown extensions get none.
///
/// The extension is whatever follows the last dot, or the whole name when
/// there is no dot, so an object named `csv` is inferred as `text/csv`.
pub fn infer(object_name: &str) -> ObjectMetadata {
    let extension = object_name
        .rsplit_once('.')
        .map_or(object_name, |(_, extension)| extension)
        .trim()
        .to_lowercase();
    ContentType::from_tag(&extension)
        .map(|content_type| content_type.metadata(object_name))
        .unwrap_or_default()
}

/// Conventional file extension for a MIME subtype, when it differs from the subtype
pub fn extension_for_subtype(subtype: &str) -> &str {
    match subtype {
        "vnd.android.package-archive" => "apk",
        "svg+xml" => "svg",
        "vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<(&'static str, String)>,
    }

    impl MetadataSink for RecordingSink {
        fn set_content_type(&mut self, value: &str) {
            self.calls.push(("type", value.to_string()));
        }

        fn set_content_disposition(&mut self, value: &str) {
            self.calls.push(("disposition", value.to_string()));
        }
    }

    #[test]
    fn test_every_canonical_tag_round_trips() {
        for content_type in ContentType::ALL {
            assert_eq!(ContentType::from_tag(content_type.tag()), Some(content_type));
        }
    }

    #[test]
    fn test_inferred_matches_explicit() {
        let explicit = resolve("csv", "report.csv").unwrap();
        let inferred = resolve("", "report.csv").unwrap();
        assert_eq!(explicit, inferred);
        assert_eq!(inferred.content_type.as_deref(), Some("text/csv"));
        assert_eq!(
            inferred.content_disposition.as_deref(),
            Some("attachment;filename=report.csv")
        );
    }

    #[test]
    fn test_inference_uses_last_segment_lowercased() {
        let metadata = resolve("", "backups/2024.01.archive.ZIP").unwrap();
        assert_eq!(metadata.content_type.as_deref(), Some("application/zip"));
    }

    #[test]
    fn test_inference_fails_open() {
        assert!(resolve("", "notes.txt").unwrap().is_empty());
        assert!(resolve("", "README").unwrap().is_empty());
        assert!(resolve("", "").unwrap().is_empty());
    }

    #[test]
    fn test_name_without_dot_is_its_own_extension() {
        let metadata = resolve("", "csv").unwrap();
        assert_eq!(metadata.content_type.as_deref(), Some("text/csv"));
        assert_eq!(metadata, resolve("csv", "csv").unwrap());

        let metadata = resolve("", "PDF").unwrap();
        assert_eq!(metadata.content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn test_unknown_explicit_tag_is_error() {
        let err = resolve("docx", "letter.docx").unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedContentType { ref tag } if tag == "docx"));
    }

    #[test]
    fn test_explicit_tags_are_exact() {
        assert!(resolve("CSV", "report.csv").is_err());
    }

    #[test]
    fn test_aliases_share_semantics() {
        assert_eq!(
            resolve("vnd.android.package-archive", "app.apk").unwrap(),
            resolve("apk", "app.apk").unwrap()
        );
        assert_eq!(resolve("jpg", "a.jpg").unwrap(), resolve("jpeg", "a.jpg").unwrap());
        assert_eq!(resolve("svg+xml", "i.svg").unwrap(), resolve("svg", "i.svg").unwrap());
    }

    #[test]
    fn test_inline_types_have_no_disposition() {
        let metadata = resolve("png", "logo.png").unwrap();
        assert_eq!(metadata.content_type.as_deref(), Some("image/png"));
        assert!(metadata.content_disposition.is_none());
    }

    #[test]
    fn test_required_rejects_inference() {
        assert!(matches!(
            resolve_required("", "report.csv"),
            Err(StorageError::Invalid { .. })
        ));
        assert!(resolve_required("csv", "report.csv").is_ok());
    }

    #[test]
    fn test_extension_mapper() {
        assert_eq!(extension_for_subtype("vnd.android.package-archive"), "apk");
        assert_eq!(extension_for_subtype("svg+xml"), "svg");
        assert_eq!(extension_for_subtype("png"), "png");
    }

    #[test]
    fn test_apply_to_sink() {
        let mut sink = RecordingSink::default();
        resolve("xlsx", "q3.xlsx").unwrap().apply_to(&mut sink);
        assert_eq!(
            sink.calls,
            vec![
                ("type", "application/vnd.ms-excel".to_string()),
                ("disposition", "attachment;filename=q3.xlsx".to_string()),
            ]
        );

        let mut empty = RecordingSink::default();
        ObjectMetadata::default().apply_to(&mut empty);
        assert!(empty.calls.is_empty());
    }
}
