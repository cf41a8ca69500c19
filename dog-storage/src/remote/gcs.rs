//! Google Cloud Storage remote.
//!
//! Authenticates with a service-account JWT bearer grant, downloads and
//! deletes through the JSON API, writes through resumable upload sessions
//! and signs V4 query-string URLs with the caller's service-account key.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use http::Method;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::remote::{
    check_response, encode_key_path, HttpStatusError, ObjectStore, ObjectWriter,
    StreamingObjectStore,
};
use crate::{
    Backend, ByteStream, Credential, MetadataSink, ObjectMetadata, ServiceAccountKey,
    StorageConfig, StorageError, StorageResult,
};

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const SIGNING_ALGORITHM: &str = "GOOG4-RSA-SHA256";

/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// JSON object resource carrying GCS metadata
#[derive(Debug, Default)]
struct ObjectResource(Map<String, Value>);

impl MetadataSink for ObjectResource {
    fn set_content_type(&mut self, value: &str) {
        self.0.insert("contentType".to_string(), Value::from(value));
    }

    fn set_content_disposition(&mut self, value: &str) {
        self.0.insert("contentDisposition".to_string(), Value::from(value));
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// HTTP client for GCS bound to one service account
pub struct GcsStore {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    api_base: String,
    chunk_size: usize,
    client: reqwest::Client,
    token: Mutex<Option<AccessToken>>,
}

impl GcsStore {
    pub fn new(key: ServiceAccountKey, config: &StorageConfig) -> StorageResult<Self> {
        let encoding_key = signing_key(&key)?;
        // Resumable sessions answer 308 without a Location; never follow it
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| StorageError::config(format!("could not build http client: {}", e)))?;

        Ok(Self {
            key,
            encoding_key,
            api_base: config.gcs_domain.trim_end_matches('/').to_string(),
            chunk_size: config.gcs_chunk_size(),
            client,
            token: Mutex::new(None),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.api_base,
            urlencoding::encode(bucket),
            urlencoding::encode(key)
        )
    }

    /// Current OAuth2 access token, fetched again shortly before expiry
    async fn bearer(&self) -> StorageResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let token = self.fetch_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch_token(&self) -> StorageResult<AccessToken> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: STORAGE_SCOPE,
            aud: self.key.token_endpoint(),
            iat: now,
            exp: now + 3600,
        };
        let mut header = Header::new(Algorithm::RS256);
        if !self.key.private_key_id.is_empty() {
            header.kid = Some(self.key.private_key_id.clone());
        }
        let assertion = jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| StorageError::remote("could not sign token request", e))?;

        let response = self
            .client
            .post(self.key.token_endpoint())
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StorageError::remote("could not fetch access token", e))?;
        let response = check_response(response, "", "", "could not fetch access token").await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| StorageError::remote("could not fetch access token", e))?;

        let lifetime = body.expires_in.unwrap_or(3600) - TOKEN_EXPIRY_MARGIN_SECS;
        debug!(client_email = %self.key.client_email, lifetime, "gcs access token refreshed");
        Ok(AccessToken {
            value: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime.max(0)),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteStream,
        metadata: &ObjectMetadata,
    ) -> StorageResult<u64> {
        let mut writer = self.open_writer(bucket, key, metadata).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            writer.write(chunk).await?;
        }
        writer.finish().await?;

        debug!(bucket, key, bytes = written, "gcs put object");
        Ok(written)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let token = self.bearer().await?;
        let response = self
            .client
            .get(format!("{}?alt=media", self.object_url(bucket, key)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::remote("could not read file", e))?;
        let response = check_response(response, bucket, key, "could not read file").await?;

        let data = response
            .bytes()
            .await
            .map_err(|e| StorageError::remote("could not read file", e))?;
        debug!(bucket, key, bytes = data.len(), "gcs get object");
        Ok(data)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let token = self.bearer().await?;
        let response = self
            .client
            .delete(self.object_url(bucket, key))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::remote("could not delete file", e))?;
        check_response(response, bucket, key, "could not delete file").await?;

        debug!(bucket, key, "gcs delete object");
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
        let Credential::Gcs(signer) = credential else {
            return Err(StorageError::CredentialMismatch {
                expected: Backend::Gcs,
                found: credential.backend(),
            });
        };

        let request = V4Request {
            domain: &self.api_base,
            bucket,
            key,
            method: &method,
            client_email: &signer.client_email,
            now: Utc::now(),
            expires_in: valid_for.as_secs(),
        };
        request.signed_url(&signing_key(signer)?)
    }
}

#[async_trait]
impl StreamingObjectStore for GcsStore {
    async fn open_writer(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<Box<dyn ObjectWriter>> {
        let mut resource = ObjectResource::default();
        metadata.apply_to(&mut resource);

        let token = self.bearer().await?;
        let response = self
            .client
            .post(format!(
                "{}/upload/storage/v1/b/{}/o?uploadType=resumable&name={}",
                self.api_base,
                urlencoding::encode(bucket),
                urlencoding::encode(key)
            ))
            .bearer_auth(token)
            .json(&Value::Object(resource.0))
            .send()
            .await
            .map_err(|e| StorageError::remote("could not open writer", e))?;
        let response = check_response(response, bucket, key, "could not open writer").await?;

        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::remote(
                    "could not open writer",
                    HttpStatusError {
                        status: response.status().as_u16(),
                        body: "resumable session has no Location header".to_string(),
                    },
                )
            })?;

        debug!(bucket, key, "gcs resumable session opened");
        Ok(Box::new(ResumableWriter {
            client: self.client.clone(),
            session_url,
            bucket: bucket.to_string(),
            key: key.to_string(),
            chunk_size: self.chunk_size,
            pending: BytesMut::new(),
            offset: 0,
            failed: false,
        }))
    }
}

/// Sequential writer over one resumable upload session.
///
/// Bytes are held until a full chunk is available; every chunk but the
/// last is a multiple of the 256 KiB alignment.
struct ResumableWriter {
    client: reqwest::Client,
    session_url: String,
    bucket: String,
    key: String,
    chunk_size: usize,
    pending: BytesMut,
    offset: u64,
    /// Set once a chunk is lost; the session can no longer complete
    failed: bool,
}

impl ResumableWriter {
    async fn send_chunk(&mut self, chunk: Bytes, total: Option<u64>) -> StorageResult<()> {
        let len = chunk.len() as u64;
        let response = self
            .client
            .put(&self.session_url)
            .header(CONTENT_RANGE, content_range(self.offset, len, total))
            .body(chunk)
            .send()
            .await
            .map_err(|e| StorageError::remote("could not write file", e))?;

        if total.is_some() {
            check_response(response, &self.bucket, &self.key, "could not put file").await?;
        } else if response.status() == StatusCode::PERMANENT_REDIRECT {
            let persisted = persisted_length(response.headers());
            if persisted != self.offset + len {
                return Err(StorageError::remote(
                    "could not write file",
                    HttpStatusError {
                        status: response.status().as_u16(),
                        body: format!(
                            "session persisted {} of {} bytes",
                            persisted,
                            self.offset + len
                        ),
                    },
                ));
            }
        } else {
            let status = response.status().as_u16();
            check_response(response, &self.bucket, &self.key, "could not write file").await?;
            return Err(StorageError::remote(
                "could not write file",
                HttpStatusError {
                    status,
                    body: "resumable session completed before the final chunk".to_string(),
                },
            ));
        }

        self.offset += len;
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for ResumableWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        if self.failed {
            return Err(StorageError::WriteAborted);
        }

        self.pending.extend_from_slice(&data);
        while self.pending.len() >= self.chunk_size {
            let chunk = self.pending.split_to(self.chunk_size).freeze();
            if let Err(err) = self.send_chunk(chunk, None).await {
                self.failed = true;
                return Err(err);
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<()> {
        if self.failed {
            return Err(StorageError::WriteAborted);
        }

        let chunk = self.pending.split().freeze();
        let total = self.offset + chunk.len() as u64;
        self.send_chunk(chunk, Some(total)).await?;

        debug!(bucket = %self.bucket, key = %self.key, bytes = total, "gcs resumable session finished");
        Ok(())
    }
}

/// `Content-Range` for a chunk; `total` is known only on the final chunk
fn content_range(offset: u64, len: u64, total: Option<u64>) -> String {
    let total = total.map_or_else(|| "*".to_string(), |total| total.to_string());
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total)
    }
}

/// Bytes the session has persisted, from a `Range: bytes=0-N` header
fn persisted_length(headers: &HeaderMap) -> u64 {
    headers
        .get(RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit_once('-'))
        .and_then(|(_, last)| last.parse::<u64>().ok())
        .map_or(0, |last| last + 1)
}

fn signing_key(key: &ServiceAccountKey) -> StorageResult<EncodingKey> {
    EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| StorageError::config(format!("invalid service account private key: {}", e)))
}

/// Inputs of a V4 query-string signature
struct V4Request<'a> {
    domain: &'a str,
    bucket: &'a str,
    key: &'a str,
    method: &'a Method,
    client_email: &'a str,
    now: DateTime<Utc>,
    expires_in: u64,
}

impl V4Request<'_> {
    fn host(&self) -> &str {
        self.domain
            .strip_prefix("https://")
            .or_else(|| self.domain.strip_prefix("http://"))
            .unwrap_or(self.domain)
    }

    fn path(&self) -> String {
        format!("/{}/{}", self.bucket, encode_key_path(self.key))
    }

    fn scope(&self) -> String {
        format!("{}/auto/storage/goog4_request", self.now.format("%Y%m%d"))
    }

    fn timestamp(&self) -> String {
        self.now.format("%Y%m%dT%H%M%SZ").to_string()
    }

    /// Query parameters, already in sorted order
    fn canonical_query(&self) -> String {
        let credential = format!("{}/{}", self.client_email, self.scope());
        format!(
            "X-Goog-Algorithm={}&X-Goog-Credential={}&X-Goog-Date={}&X-Goog-Expires={}&X-Goog-SignedHeaders=host",
            SIGNING_ALGORITHM,
            urlencoding::encode(&credential),
            self.timestamp(),
            self.expires_in
        )
    }

    fn canonical_request(&self) -> String {
        format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            self.method,
            self.path(),
            self.canonical_query(),
            self.host()
        )
    }

    fn string_to_sign(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}",
            SIGNING_ALGORITHM,
            self.timestamp(),
            self.scope(),
            hex::encode(Sha256::digest(self.canonical_request().as_bytes()))
        )
    }

    fn signed_url(&self, key: &EncodingKey) -> StorageResult<String> {
        let signature =
            jsonwebtoken::crypto::sign(self.string_to_sign().as_bytes(), key, Algorithm::RS256)
                .map_err(|e| StorageError::remote("could not sign url", e))?;
        let signature = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| StorageError::decode(format!("malformed signature: {}", e)))?;

        Ok(format!(
            "{}{}?{}&X-Goog-Signature={}",
            self.domain,
            self.path(),
            self.canonical_query(),
            hex::encode(signature)
        ))
    }
}
