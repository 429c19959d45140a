use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, StatusCode};
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;

use super::{BlobCache, CacheError, CacheKey};
use crate::config::Config;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICE: &str = "s3";
const PUBLIC_READ: &str = "public-read";

type HmacSha256 = Hmac<Sha256>;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Host of the object store, optionally with an `http://` or `https://` scheme.
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

impl S3Settings {
    pub fn from_config(config: &Config) -> Result<Self, CacheError> {
        if config.s3_endpoint.is_empty() {
            return Err(CacheError::NotConfigured("s3_endpoint is empty".to_string()));
        }
        if config.s3_bucket_name.is_empty() {
            return Err(CacheError::NotConfigured("s3_bucket_name is empty".to_string()));
        }
        Ok(Self {
            endpoint: config.s3_endpoint.clone(),
            region: config.s3_region.clone(),
            bucket: config.s3_bucket_name.clone(),
            access_key: config.s3_access_key.clone(),
            secret_key: config.s3_secret_key.clone(),
        })
    }

    fn scheme_and_host(&self) -> (&str, &str) {
        if let Some(host) = self.endpoint.strip_prefix("http://") {
            ("http", host.trim_end_matches('/'))
        } else {
            let host = self
                .endpoint
                .strip_prefix("https://")
                .unwrap_or(&self.endpoint);
            ("https", host.trim_end_matches('/'))
        }
    }

    /// Virtual-hosted bucket host: `{bucket}.{endpoint}`.
    fn bucket_host(&self) -> String {
        format!("{}.{}", self.bucket, self.scheme_and_host().1)
    }
}

/// Blob cache backed by an S3-compatible object store, signed with AWS SigV4.
#[derive(Debug, Clone)]
pub struct S3BlobCache {
    http: Client,
    settings: S3Settings,
}

impl S3BlobCache {
    pub fn new(settings: S3Settings) -> Result<Self, CacheError> {
        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &S3Settings {
        &self.settings
    }

    fn object_path(key: &CacheKey) -> String {
        format!("/{}", uri_encode_path(key.as_str()))
    }

    fn signed(
        &self,
        builder: RequestBuilder,
        method: &str,
        key: &CacheKey,
        extra_headers: &[(&str, &str)],
        payload: &[u8],
    ) -> Result<RequestBuilder, CacheError> {
        let now = OffsetDateTime::now_utc();
        let payload_hash = sha256_hex(payload);
        let amz_date = amz_datetime(now)?;

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.settings.bucket_host());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), amz_date);
        for (name, value) in extra_headers {
            headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
        }

        let authorization = SigningRequest {
            method,
            canonical_uri: &Self::object_path(key),
            canonical_query: "",
            headers: &headers,
            payload_hash: &payload_hash,
        }
        .authorization(&self.settings, now)?;

        let builder = headers
            .iter()
            .filter(|(name, _)| name.as_str() != "host")
            .fold(builder, |b, (name, value)| b.header(name.as_str(), value.as_str()));
        Ok(builder.header(reqwest::header::AUTHORIZATION, authorization))
    }
}

#[async_trait]
impl BlobCache for S3BlobCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let url = self.locator(key);
        debug!(key = %key, url = %url, "fetching cached page");
        let request = self.signed(self.http.get(&url), "GET", key, &[], b"")?;
        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => Err(CacheError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            }),
        }
    }

    async fn put(
        &self,
        key: &CacheKey,
        html: &str,
        content_type: &str,
    ) -> Result<String, CacheError> {
        let url = self.locator(key);
        debug!(key = %key, bucket = %self.settings.bucket, "storing page");
        let request = self.signed(
            self.http.put(&url),
            "PUT",
            key,
            &[("content-type", content_type), ("x-amz-acl", PUBLIC_READ)],
            html.as_bytes(),
        )?;
        let response = request.body(html.to_string()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::Status {
                status: status.as_u16(),
                key: key.to_string(),
            });
        }
        debug!(url = %url, "stored page");
        Ok(url)
    }

    fn locator(&self, key: &CacheKey) -> String {
        let (scheme, _) = self.settings.scheme_and_host();
        format!(
            "{scheme}://{}{}",
            self.settings.bucket_host(),
            Self::object_path(key)
        )
    }
}

/// The parts of a request covered by a SigV4 signature.
struct SigningRequest<'a> {
    method: &'a str,
    canonical_uri: &'a str,
    canonical_query: &'a str,
    /// Lower-case header names to trimmed values.
    headers: &'a BTreeMap<String, String>,
    payload_hash: &'a str,
}

impl SigningRequest<'_> {
    fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    fn canonical_request(&self) -> String {
        let canonical_headers: String = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            self.canonical_uri,
            self.canonical_query,
            canonical_headers,
            self.signed_headers(),
            self.payload_hash
        )
    }

    fn signature(&self, settings: &S3Settings, at: OffsetDateTime) -> Result<String, CacheError> {
        let date = amz_date(at)?;
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", settings.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
            amz_datetime(at)?,
            sha256_hex(self.canonical_request().as_bytes())
        );

        let secret = format!("AWS4{}", settings.secret_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, settings.region.as_bytes())?;
        let k_service = hmac(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac(&k_service, b"aws4_request")?;
        Ok(hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?))
    }

    fn authorization(&self, settings: &S3Settings, at: OffsetDateTime) -> Result<String, CacheError> {
        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{}/{}/{SERVICE}/aws4_request, SignedHeaders={}, Signature={}",
            settings.access_key,
            amz_date(at)?,
            settings.region,
            self.signed_headers(),
            self.signature(settings, at)?
        ))
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CacheError::NotConfigured(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn amz_datetime(at: OffsetDateTime) -> Result<String, CacheError> {
    at.format(format_description!(
        "[year][month][day]T[hour][minute][second]Z"
    ))
    .map_err(|e| CacheError::Transport(e.to_string()))
}

fn amz_date(at: OffsetDateTime) -> Result<String, CacheError> {
    at.format(format_description!("[year][month][day]"))
        .map_err(|e| CacheError::Transport(e.to_string()))
}

/// Percent-encodes everything except unreserved characters and `/`.
fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
