//! Alibaba Cloud OSS remote.
//!
//! Speaks the OSS REST API over reqwest with header signatures
//! (`Authorization: OSS <id>:<base64 hmac-sha1>`) and query-string
//! signatures for temporary URLs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use http::Method;
use sha1::Sha1;
use tracing::debug;

use crate::remote::{check_response, encode_key_path, AppendObjectStore, ObjectStore};
use crate::url::OssUrls;
use crate::{
    Backend, ByteStream, Credential, MetadataSink, ObjectMetadata, OssCredential, StorageError,
    StorageResult,
};

type HmacSha1 = Hmac<Sha1>;

const NEXT_APPEND_POSITION: &str = "x-oss-next-append-position";

/// Headers carrying OSS object metadata
#[derive(Debug, Default)]
struct OssHeaders(Vec<(&'static str, String)>);

impl MetadataSink for OssHeaders {
    fn set_content_type(&mut self, value: &str) {
        self.0.push(("Content-Type", value.to_string()));
    }

    fn set_content_disposition(&mut self, value: &str) {
        self.0.push(("Content-Disposition", value.to_string()));
    }
}

/// HTTP client for one OSS endpoint and key pair
pub struct OssStore {
    credential: OssCredential,
    urls: OssUrls,
    client: reqwest::Client,
}

impl OssStore {
    pub fn new(credential: OssCredential) -> Self {
        Self {
            urls: OssUrls::new(&credential.endpoint),
            credential,
            client: reqwest::Client::new(),
        }
    }

    fn request_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{}/{}", self.urls.bucket_host(bucket), encode_key_path(key))
    }

    /// Build a signed request; `subresource` is the signed query, e.g. `append&position=0`
    fn signed_request(
        &self,
        method: Method,
        bucket: &str,
        key: &str,
        subresource: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<reqwest::RequestBuilder> {
        let mut resource = canonical_resource(bucket, key);
        let mut url = self.request_url(bucket, key);
        if let Some(sub) = subresource {
            resource = format!("{}?{}", resource, sub);
            url = format!("{}?{}", url, sub);
        }

        let mut headers = OssHeaders::default();
        if let Some(metadata) = metadata {
            metadata.apply_to(&mut headers);
        }
        let content_type = metadata
            .and_then(|m| m.content_type.as_deref())
            .unwrap_or_default();

        let date = http_date(Utc::now());
        let string_to_sign = format!("{}\n\n{}\n{}\n{}", method, content_type, date, resource);
        let signature = signature(&self.credential.access_key_secret, &string_to_sign)?;

        let mut request = self
            .client
            .request(method, url)
            .header("Date", date)
            .header(
                "Authorization",
                format!("OSS {}:{}", self.credential.access_key_id, signature),
            );
        for (name, value) in headers.0 {
            request = request.header(name, value);
        }
        Ok(request)
    }

    /// Signed PUT streaming `body` chunked; the counter holds the bytes sent so far
    fn put_request(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
    ) -> StorageResult<(reqwest::RequestBuilder, Arc<AtomicU64>)> {
        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();
        let body = body.inspect(move |chunk| {
            if let Ok(chunk) = chunk {
                counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
        });

        let request = self
            .signed_request(Method::PUT, bucket, key, None, Some(metadata))?
            .body(reqwest::Body::wrap_stream(body));
        Ok((request, sent))
    }

    /// Query-string signed URL valid until `expires`
    fn presign(&self, method: &Method, bucket: &str, key: &str, expires: i64) -> StorageResult<String> {
        let string_to_sign = format!(
            "{}\n\n\n{}\n{}",
            method,
            expires,
            canonical_resource(bucket, key)
        );
        let signature = signature(&self.credential.access_key_secret, &string_to_sign)?;

        Ok(format!(
            "{}?OSSAccessKeyId={}&Expires={}&Signature={}",
            self.request_url(bucket, key),
            urlencoding::encode(&self.credential.access_key_id),
            expires,
            urlencoding::encode(&signature)
        ))
    }
}

#[async_trait]
impl ObjectStore for OssStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
    ) -> StorageResult<u64> {
        let (request, sent) = self.put_request(bucket, key, body, metadata)?;
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::remote("could not write file", e))?;
        check_response(response, bucket, key, "could not write file").await?;

        let len = sent.load(Ordering::Relaxed);
        debug!(bucket, key, bytes = len, "oss put object");
        Ok(len)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let response = self
            .signed_request(Method::GET, bucket, key, None, None)?
            .send()
            .await
            .map_err(|e| StorageError::remote("could not read file", e))?;
        let response = check_response(response, bucket, key, "could not read file").await?;

        let data = response
            .bytes()
            .await
            .map_err(|e| StorageError::remote("could not read file", e))?;
        debug!(bucket, key, bytes = data.len(), "oss get object");
        Ok(data)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let response = self
            .signed_request(Method::DELETE, bucket, key, None, None)?
            .send()
            .await
            .map_err(|e| StorageError::remote("could not delete file", e))?;
        check_response(response, bucket, key, "could not delete file").await?;

        debug!(bucket, key, "oss delete object");
        Ok(())
    }

    async fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        method: Method,
        valid_for: Duration,
        credential: &Credential,
    ) -> StorageResult<String> {
        if !matches!(credential, Credential::Oss(_)) {
            return Err(StorageError::CredentialMismatch {
                expected: Backend::Oss,
                found: credential.backend(),
            });
        }

        let expires = Utc::now().timestamp() + valid_for.as_secs() as i64;
        self.presign(&method, bucket, key, expires)
    }
}

#[async_trait]
impl AppendObjectStore for OssStore {
    async fn append_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        position: u64,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<u64> {
        let subresource = format!("append&position={}", position);
        let len = data.len();

        let response = self
            .signed_request(Method::POST, bucket, key, Some(&subresource), metadata)?
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::remote("could not write file", e))?;
        let response = check_response(response, bucket, key, "could not write file").await?;

        let next_position = response
            .headers()
            .get(NEXT_APPEND_POSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| {
                StorageError::remote(
                    "could not write file",
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("response is missing {}", NEXT_APPEND_POSITION),
                    ),
                )
            })?;

        debug!(bucket, key, position, bytes = len, next_position, "oss append object");
        Ok(next_position)
    }
}

fn canonical_resource(bucket: &str, key: &str) -> String {
    format!("/{}/{}", bucket, key)
}

/// RFC 1123 date as OSS expects in the `Date` header
fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// base64(hmac-sha1(secret, string_to_sign))
fn signature(secret: &str, string_to_sign: &str) -> StorageResult<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| StorageError::config(format!("invalid access key secret: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> OssStore {
        OssStore::new(OssCredential::new(
            "https://oss-cn-hangzhou.aliyuncs.com",
            "LTAI-test",
            "test-secret",
        ))
    }

    #[test]
    fn test_signature_vector() {
        let string_to_sign = "GET\n\n\n1700000000\n/media/reports/q3.csv";
        assert_eq!(
            signature("test-secret", string_to_sign).unwrap(),
            "SkbJTAD92e80TwN9XEMwRsfOOXU="
        );
    }

    #[test]
    fn test_put_body_is_streamed() {
        let metadata = ObjectMetadata::default();
        let (request, sent) = store()
            .put_request("media", "big.csv", crate::stream_from_bytes("a,b\n"), &metadata)
            .unwrap();
        let request = request.build().unwrap();

        let body = request.body().unwrap();
        assert!(body.as_bytes().is_none());
        assert!(request.headers().get(reqwest::header::CONTENT_LENGTH).is_none());
        // Nothing is read from the stream until the request is sent
        assert_eq!(sent.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_http_date_format() {
        let now = Utc.with_ymd_and_hms(2005, 11, 17, 18, 49, 58).unwrap();
        assert_eq!(http_date(now), "Thu, 17 Nov 2005 18:49:58 GMT");
    }

    #[test]
    fn test_presigned_url_shape() {
        let url = store()
            .presign(&Method::GET, "media", "reports/q3.csv", 1_700_000_000)
            .unwrap();
        assert_eq!(
            url,
            "https://media.oss-cn-hangzhou.aliyuncs.com/reports/q3.csv\
             ?OSSAccessKeyId=LTAI-test&Expires=1700000000\
             &Signature=SkbJTAD92e80TwN9XEMwRsfOOXU%3D"
        );
    }

    #[tokio::test]
    async fn test_sign_rejects_foreign_credential() {
        let foreign = Credential::Gcs(crate::ServiceAccountKey::default());
        let err = store()
            .sign_url("media", "a.png", Method::GET, Duration::from_secs(60), &foreign)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::CredentialMismatch {
                expected: Backend::Oss,
                found: Backend::Gcs
            }
        ));
    }

    #[test]
    fn test_metadata_headers() {
        let mut headers = OssHeaders::default();
        crate::content_type::resolve("csv", "q3.csv")
            .unwrap()
            .apply_to(&mut headers);
        assert_eq!(
            headers.0,
            vec![
                ("Content-Type", "text/csv".to_string()),
                ("Content-Disposition", "attachment;filename=q3.csv".to_string()),
            ]
        );
    }
}
