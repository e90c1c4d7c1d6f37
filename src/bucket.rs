//! Object storage for hosted images.
//!
//! Two bucket kinds are supported:
//!
//! - **directory**: objects are files under a local root and are served
//!   back under `public_url` (the `nk serve` `/files/{*key}` route does this);
//! - **s3**: objects are written to an S3-compatible bucket with signed
//!   `PUT`/`DELETE` requests.
//!
//! # Configuration
//!
//! ```toml
//! [hosted.bucket]
//! kind = "s3"
//! bucket = "note-images"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! ```
//!
//! # Environment Variables
//!
//! The S3 kind reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and the
//! optional `AWS_SESSION_TOKEN` at request time.
//!
//! # Authentication
//!
//! Requests are signed with AWS Signature Version 4 using HMAC-SHA256
//! (`hmac` + `sha2`), no AWS SDK involved.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::BucketConfig;
use crate::error::{NoteError, Result};
use crate::images::generate_image_id;

type HmacSha256 = Hmac<Sha256>;

/// Where uploaded images end up.
#[derive(Debug, Clone)]
pub enum ImageBucket {
    Directory(DirectoryBucket),
    S3(S3Bucket),
}

#[derive(Debug, Clone)]
pub struct DirectoryBucket {
    root: PathBuf,
    public_url: String,
}

#[derive(Debug, Clone)]
pub struct S3Bucket {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_url: Option<String>,
}

impl ImageBucket {
    pub fn from_config(config: &BucketConfig) -> Self {
        match config {
            BucketConfig::Directory { root, public_url } => ImageBucket::Directory(DirectoryBucket {
                root: root.clone(),
                public_url: public_url.trim_end_matches('/').to_string(),
            }),
            BucketConfig::S3 {
                bucket,
                region,
                endpoint_url,
                public_url,
            } => ImageBucket::S3(S3Bucket {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint_url: endpoint_url
                    .as_ref()
                    .map(|e| e.trim_end_matches('/').to_string()),
                public_url: public_url
                    .as_ref()
                    .map(|p| p.trim_end_matches('/').to_string()),
            }),
        }
    }

    /// Store `bytes` under a new `key` and return the public URL. An existing
    /// object is never replaced.
    pub async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<String> {
        validate_key(key)?;
        match self {
            ImageBucket::Directory(dir) => {
                let path = dir.root.join(key);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = match std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                {
                    Ok(f) => f,
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        return Err(NoteError::backend(format!(
                            "object '{}' already exists",
                            key
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };
                file.write_all(bytes)?;
                debug!(key, bytes = bytes.len(), "bucket: wrote object");
                Ok(format!("{}/{}", dir.public_url, key))
            }
            ImageBucket::S3(s3) => {
                s3.send("PUT", key, Some(content_type), bytes).await?;
                Ok(s3.public_url_for(key))
            }
        }
    }

    /// Delete the object a public URL points at. Unknown URLs are ignored.
    pub async fn delete_url(&self, url: &str) -> Result<()> {
        let key = match self.key_for_url(url) {
            Some(k) => k,
            None => {
                debug!(url, "bucket: url not owned by this bucket, skipping delete");
                return Ok(());
            }
        };
        validate_key(&key)?;
        match self {
            ImageBucket::Directory(dir) => match std::fs::remove_file(dir.root.join(&key)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            ImageBucket::S3(s3) => s3.send("DELETE", &key, None, &[]).await,
        }
    }

    /// Map a public URL back to its object key.
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        let base = match self {
            ImageBucket::Directory(dir) => dir.public_url.clone(),
            ImageBucket::S3(s3) => s3.public_base(),
        };
        url.strip_prefix(&base)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }

    /// Read an object from a directory bucket (used to serve `/files/...`).
    pub fn read_local(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        match self {
            ImageBucket::Directory(dir) => match std::fs::read(dir.root.join(key)) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            ImageBucket::S3(_) => Ok(None),
        }
    }
}

/// Build an object key `<owner>/<image id>_<file name>` with a filesystem-safe name.
pub fn object_key(owner: &str, file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    let safe = if safe.is_empty() { "image" } else { safe };
    format!("{}/{}_{}", owner, generate_image_id(), safe)
}

fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(NoteError::validation(format!("invalid object key '{}'", key)))
    }
}

// ============ S3 ============

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| NoteError::config("AWS_ACCESS_KEY_ID environment variable not set"))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| NoteError::config("AWS_SECRET_ACCESS_KEY environment variable not set"))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

impl S3Bucket {
    /// Host used for signing. Custom endpoints are addressed path-style.
    fn host(&self) -> String {
        match &self.endpoint_url {
            Some(endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn scheme(&self) -> &str {
        match &self.endpoint_url {
            Some(endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    fn canonical_uri(&self, key: &str) -> String {
        let encoded = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint_url {
            Some(_) => format!("/{}/{}", self.bucket, encoded),
            None => format!("/{}", encoded),
        }
    }

    fn public_base(&self) -> String {
        match (&self.public_url, &self.endpoint_url) {
            (Some(p), _) => p.clone(),
            (None, Some(endpoint)) => format!("{}/{}", endpoint, self.bucket),
            (None, None) => format!("https://{}", self.host()),
        }
    }

    fn public_url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base(), key)
    }

    async fn send(
        &self,
        method: &str,
        key: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<()> {
        let creds = AwsCredentials::from_env()?;
        let host = self.host();
        let canonical_uri = self.canonical_uri(key);
        let url = format!("{}://{}{}", self.scheme(), host, canonical_uri);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        if let Some(ref token) = creds.session_token {
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
            method, canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&creds.secret_access_key, &date_stamp, &self.region, "s3")?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let client = reqwest::Client::new();
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| NoteError::backend(format!("invalid HTTP method: {}", e)))?;
        let mut req = client
            .request(method.clone(), &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }
        if method == reqwest::Method::PUT {
            req = req.header("If-None-Match", "*");
        }
        if let Some(ref token) = creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req.body(body.to_vec()).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(NoteError::backend(format!(
                "S3 {} s3://{}/{} failed (HTTP {}): {}",
                method,
                self.bucket,
                key,
                status,
                text.chars().take(500).collect::<String>()
            )));
        }
        debug!(%method, key, "bucket: s3 request ok");
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| NoteError::backend(format!("invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

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
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir_bucket(root: &Path) -> ImageBucket {
        ImageBucket::from_config(&BucketConfig::Directory {
            root: root.to_path_buf(),
            public_url: "http://localhost:7340/files/".to_string(),
        })
    }

    #[test]
    fn object_keys_are_sanitized() {
        let key = object_key("u1", "../my photo.png");
        assert!(key.starts_with("u1/"));
        assert!(key.ends_with("_my_photo.png"));
        assert!(validate_key(&key).is_ok());
    }

    #[test]
    fn object_keys_differ_for_the_same_name() {
        let keys: std::collections::HashSet<String> =
            (0..500).map(|_| object_key("u1", "image.png")).collect();
        assert_eq!(keys.len(), 500);
    }

    #[tokio::test]
    async fn directory_put_never_overwrites() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bucket = dir_bucket(tmp.path());
        bucket.put("u1/1_a.png", "image/png", b"first").await.unwrap();
        let err = bucket
            .put("u1/1_a.png", "image/png", b"second")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(bucket.read_local("u1/1_a.png").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn url_maps_back_to_key() {
        let bucket = dir_bucket(Path::new("/tmp/unused"));
        assert_eq!(
            bucket.key_for_url("http://localhost:7340/files/u1/1_a.png"),
            Some("u1/1_a.png".to_string())
        );
        assert_eq!(bucket.key_for_url("https://elsewhere/u1/1_a.png"), None);
    }

    #[tokio::test]
    async fn directory_put_read_delete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let bucket = dir_bucket(tmp.path());
        let url = bucket.put("u1/1_a.png", "image/png", b"png").await.unwrap();
        assert_eq!(url, "http://localhost:7340/files/u1/1_a.png");
        assert_eq!(bucket.read_local("u1/1_a.png").unwrap(), Some(b"png".to_vec()));
        bucket.delete_url(&url).await.unwrap();
        assert_eq!(bucket.read_local("u1/1_a.png").unwrap(), None);
    }

    #[test]
    fn s3_path_style_with_endpoint() {
        let bucket = ImageBucket::from_config(&BucketConfig::S3 {
            bucket: "imgs".into(),
            region: "us-east-1".into(),
            endpoint_url: Some("http://localhost:9000/".into()),
            public_url: None,
        });
        let ImageBucket::S3(s3) = &bucket else {
            panic!("expected s3 bucket");
        };
        assert_eq!(s3.host(), "localhost:9000");
        assert_eq!(s3.scheme(), "http");
        assert_eq!(s3.canonical_uri("u1/a b.png"), "/imgs/u1/a%20b.png");
        assert_eq!(
            bucket.key_for_url("http://localhost:9000/imgs/u1/x.png"),
            Some("u1/x.png".to_string())
        );
    }

    #[test]
    fn signing_key_is_deterministic() {
        let a = derive_signing_key("secret", "20240101", "us-east-1", "s3").unwrap();
        let b = derive_signing_key("secret", "20240101", "us-east-1", "s3").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
