//! Amazon S3 object storage.
//!
//! Downloads and uploads document bytes with the S3 REST API and AWS
//! Signature V4 authentication. Custom endpoints (MinIO, LocalStack) are
//! addressed path-style: `<endpoint>/<bucket>/<key>`.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "tutor-documents"
//! region = "us-east-1"
//! prefix = "uploads/"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials)
//!
//! Requests are retried on 429, 5xx and network errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use tutor_rag_core::error::StorageError;

use crate::config::StorageConfig;
use crate::retry::{retry, RequestError, RetryPolicy};
use crate::storage::ObjectStorage;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// Where one object lives.
#[derive(Debug, PartialEq)]
struct ObjectTarget {
    url: String,
    host: String,
    canonical_uri: String,
}

pub struct S3Storage {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    prefix: String,
    creds: AwsCredentials,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl S3Storage {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .context("storage.bucket is required for the s3 backend")?;
        Ok(Self {
            bucket,
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            prefix: config.prefix.clone(),
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
            policy: RetryPolicy::with_retries(config.max_retries),
        })
    }

    fn key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else if self.prefix.ends_with('/') {
            format!("{}{}", self.prefix, path)
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn target(&self, path: &str) -> ObjectTarget {
        let encoded_key = self
            .key(path)
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");

        match &self.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let canonical_uri = format!("/{}/{}", uri_encode(&self.bucket), encoded_key);
                ObjectTarget {
                    url: format!("{}://{}{}", scheme, host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{}", encoded_key);
                ObjectTarget {
                    url: format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
        }
    }

    /// SigV4 headers (including `Authorization`) for one request.
    fn sign(
        &self,
        method: &str,
        target: &ObjectTarget,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, RequestError> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), target.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method, target.canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3")
                .map_err(RequestError::permanent)?;
        let signature = hex::encode(
            hmac_sha256(&signing_key, string_to_sign.as_bytes()).map_err(RequestError::permanent)?,
        );

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        out.push(("authorization".to_string(), authorization));
        Ok(out)
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = &self.target(path);
        let payload_hash = &hex_sha256(b"");
        let this = self;

        let found = retry(
            &self.policy,
            "s3 get",
            RequestError::is_retryable,
            move || async move {
                let headers = this.sign("GET", target, payload_hash, Utc::now())?;
                let mut req = this.client.get(&target.url);
                for (k, v) in &headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| RequestError::from_transport("S3", &e))?;
                let status = resp.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(RequestError::from_status("S3 GetObject", status, &body));
                }
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| RequestError::from_transport("S3", &e))?;
                Ok(Some(bytes.to_vec()))
            },
        )
        .await
        .map_err(|e| StorageError::Request(format!("s3://{}/{}: {}", self.bucket, path, e)))?;

        found.ok_or_else(|| StorageError::NotFound(format!("s3://{}/{}", self.bucket, path)))
    }

    async fn upload(&self, path: &str, bytes: &[u8], mime_type: &str) -> Result<(), StorageError> {
        let target = &self.target(path);
        let payload_hash = &hex_sha256(bytes);
        let this = self;

        retry(
            &self.policy,
            "s3 put",
            RequestError::is_retryable,
            move || async move {
                let headers = this.sign("PUT", target, payload_hash, Utc::now())?;
                let mut req = this
                    .client
                    .put(&target.url)
                    .header("content-type", mime_type)
                    .body(bytes.to_vec());
                for (k, v) in &headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| RequestError::from_transport("S3", &e))?;
                let status = resp.status();
                if !status.is_success() {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(RequestError::from_status("S3 PutObject", status, &body));
                }
                Ok(())
            },
        )
        .await
        .map_err(|e| StorageError::Request(format!("s3://{}/{}: {}", self.bucket, path, e)))
    }
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, String> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| format!("HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, String> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving `A-Z a-z 0-9 - _ . ~` as-is.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
