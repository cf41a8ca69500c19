//! Public object URLs per backend.
//!
//! GCS uses path-style URLs (`https://storage.googleapis.com/<bucket>/<key>`),
//! OSS uses virtual-hosted URLs (`https://<bucket>.<endpoint>/<key>`). Each
//! matches the provider's canonical shape so the URL is directly fetchable.

use crate::{StorageError, StorageResult};

/// Public GCS domain
pub const GCS_DOMAIN: &str = "https://storage.googleapis.com";

/// Builds object URLs and recovers object keys from them
pub trait UrlCodec: Send + Sync {
    fn object_url(&self, bucket: &str, key: &str) -> String;

    /// Left inverse of `object_url` for the same bucket
    fn object_key(&self, bucket: &str, url: &str) -> StorageResult<String>;
}

/// Path-style codec for GCS
#[derive(Debug, Clone)]
pub struct GcsUrls {
    domain: String,
}

impl GcsUrls {
    pub fn new<S: Into<String>>(domain: S) -> Self {
        let domain: String = domain.into();
        Self {
            domain: domain.trim_end_matches('/').to_string(),
        }
    }

    fn prefix(&self, bucket: &str) -> String {
        format!("{}/{}/", self.domain, bucket)
    }
}

impl Default for GcsUrls {
    fn default() -> Self {
        Self::new(GCS_DOMAIN)
    }
}

impl UrlCodec for GcsUrls {
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}{}", self.prefix(bucket), key)
    }

    fn object_key(&self, bucket: &str, url: &str) -> StorageResult<String> {
        url.strip_prefix(&self.prefix(bucket))
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidUrl { url: url.to_string() })
    }
}

/// Virtual-hosted codec for OSS
#[derive(Debug, Clone)]
pub struct OssUrls {
    host: String,
}

impl OssUrls {
    /// `endpoint` may carry an `http://` or `https://` scheme; it is dropped.
    pub fn new(endpoint: &str) -> Self {
        Self {
            host: strip_scheme(endpoint).trim_end_matches('/').to_string(),
        }
    }

    /// Endpoint host without scheme, e.g. `oss-cn-hangzhou.aliyuncs.com`
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host serving `bucket`
    pub fn bucket_host(&self, bucket: &str) -> String {
        format!("{}.{}", bucket, self.host)
    }
}

impl UrlCodec for OssUrls {
    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{}/{}", self.bucket_host(bucket), key)
    }

    fn object_key(&self, bucket: &str, url: &str) -> StorageResult<String> {
        let prefix = format!("{}/", self.bucket_host(bucket));
        strip_scheme(url)
            .strip_prefix(&prefix)
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidUrl { url: url.to_string() })
    }
}

fn strip_scheme(value: &str) -> &str {
    value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &[
        "report.csv",
        "nested/dir/file name.png",
        "",
        "trailing/",
        "unicode/überweisung.pdf",
        "storage.googleapis.com/media/x.js",
    ];

    #[test]
    fn test_gcs_round_trip() {
        let urls = GcsUrls::default();
        for key in KEYS {
            let url = urls.object_url("media", key);
            assert_eq!(urls.object_key("media", &url).unwrap(), *key);
        }
    }

    #[test]
    fn test_gcs_shape() {
        let urls = GcsUrls::default();
        assert_eq!(
            urls.object_url("media", "a/b.png"),
            "https://storage.googleapis.com/media/a/b.png"
        );
    }

    #[test]
    fn test_gcs_custom_domain_trailing_slash() {
        let urls = GcsUrls::new("http://localhost:4443/");
        assert_eq!(urls.object_url("b", "k"), "http://localhost:4443/b/k");
    }

    #[test]
    fn test_oss_round_trip() {
        let urls = OssUrls::new("https://oss-cn-hangzhou.aliyuncs.com");
        for key in KEYS {
            let url = urls.object_url("media", key);
            assert_eq!(urls.object_key("media", &url).unwrap(), *key);
        }
    }

    #[test]
    fn test_oss_shape_drops_endpoint_scheme() {
        for endpoint in [
            "oss-cn-hangzhou.aliyuncs.com",
            "http://oss-cn-hangzhou.aliyuncs.com",
            "https://oss-cn-hangzhou.aliyuncs.com/",
        ] {
            let urls = OssUrls::new(endpoint);
            assert_eq!(
                urls.object_url("media", "a.png"),
                "https://media.oss-cn-hangzhou.aliyuncs.com/a.png"
            );
        }
    }

    #[test]
    fn test_oss_accepts_http_scheme_on_decode() {
        let urls = OssUrls::new("oss-cn-hangzhou.aliyuncs.com");
        assert_eq!(
            urls.object_key("media", "http://media.oss-cn-hangzhou.aliyuncs.com/a.png")
                .unwrap(),
            "a.png"
        );
    }

    #[test]
    fn test_foreign_urls_are_rejected() {
        let gcs = GcsUrls::default();
        assert!(matches!(
            gcs.object_key("media", "https://storage.googleapis.com/other/a.png"),
            Err(StorageError::InvalidUrl { .. })
        ));

        let oss = OssUrls::new("oss-cn-hangzhou.aliyuncs.com");
        assert!(oss
            .object_key("media", "https://storage.googleapis.com/media/a.png")
            .is_err());
    }
}
