//! Remote object storage for staged files.
//!
//! Files are addressed as `s3://bucket/key`. Two backends:
//!
//! - [`HttpObjectStore`]: any S3-compatible endpoint, path-style URLs,
//!   requests signed with AWS Signature Version 4
//! - [`LocalObjectStore`]: a directory tree, for development and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use prefab_core::{GatewayError, PrefabResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::constants::DEFAULT_S3_REGION;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

// ============================================================================
// OBJECT REFERENCES
// ============================================================================

/// Parsed `s3://bucket/key` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn parse(uri: &str) -> PrefabResult<Self> {
        let rest = uri.strip_prefix("s3://").ok_or_else(|| {
            GatewayError::Validation(format!("'{}' is not an s3:// reference", uri))
        })?;
        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(GatewayError::Validation(format!(
                "'{}' must name a bucket and a key",
                uri
            ))),
        }
    }

    /// Extension of the key including the dot, or empty.
    pub fn extension(&self) -> String {
        Path::new(&self.key)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy the object to `dest`, returning the number of bytes written.
    async fn download(&self, object: &ObjectRef, dest: &Path) -> PrefabResult<u64>;

    async fn upload(&self, src: &Path, object: &ObjectRef) -> PrefabResult<()>;

    /// Bucket that receives uploaded outputs.
    fn output_bucket(&self) -> &str;
}

// ============================================================================
// S3-COMPATIBLE BACKEND
// ============================================================================

#[derive(Clone)]
pub struct S3Config {
    /// Base URL, e.g. `https://s3.us-east-1.amazonaws.com` or `http://minio:9000`
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: SecretString,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Config {
    /// `None` unless endpoint, bucket and both keys are set.
    ///
    /// - `PREFAB_S3_ENDPOINT`, `PREFAB_S3_BUCKET`
    /// - `PREFAB_S3_ACCESS_KEY`, `PREFAB_S3_SECRET_KEY`
    /// - `PREFAB_S3_REGION` (default: us-east-1)
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|s| !s.trim().is_empty());
        Some(Self {
            endpoint: var("PREFAB_S3_ENDPOINT")?.trim_end_matches('/').to_string(),
            region: var("PREFAB_S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
            bucket: var("PREFAB_S3_BUCKET")?,
            access_key: var("PREFAB_S3_ACCESS_KEY")?,
            secret_key: SecretString::from(var("PREFAB_S3_SECRET_KEY")?),
        })
    }
}

pub struct HttpObjectStore {
    client: reqwest::Client,
    config: S3Config,
}

/// Headers to attach to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub host: String,
    pub amz_date: String,
    pub content_sha256: String,
    pub authorization: String,
}

impl HttpObjectStore {
    pub fn new(client: reqwest::Client, config: S3Config) -> Self {
        Self { client, config }
    }

    fn object_url(&self, object: &ObjectRef) -> PrefabResult<reqwest::Url> {
        let raw = format!(
            "{}/{}/{}",
            self.config.endpoint,
            uri_encode(&object.bucket),
            encode_key(&object.key)
        );
        reqwest::Url::parse(&raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid object URL {}: {}", raw, e)))
    }

    /// SigV4 headers for `method` on `url` at `now`.
    pub fn sign(&self, method: &str, url: &reqwest::Url, now: DateTime<Utc>) -> PrefabResult<SignedHeaders> {
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => {
                return Err(GatewayError::Configuration(
                    "object store endpoint has no host".to_string(),
                ))
            }
        };
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let canonical_request = format!(
            "{method}\n{path}\n{query}\nhost:{host}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}",
            path = url.path(),
            query = url.query().unwrap_or(""),
        );
        let scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = derive_signing_key(
            self.config.secret_key.expose_secret(),
            &date,
            &self.config.region,
            "s3",
        )?;
        let signature = hex::encode(hmac(&signing_key, string_to_sign.as_bytes())?);

        Ok(SignedHeaders {
            host,
            amz_date,
            content_sha256: UNSIGNED_PAYLOAD.to_string(),
            authorization: format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.config.access_key, scope, SIGNED_HEADERS, signature
            ),
        })
    }

    fn signed(&self, builder: reqwest::RequestBuilder, headers: SignedHeaders) -> reqwest::RequestBuilder {
        builder
            .header("host", headers.host)
            .header("x-amz-date", headers.amz_date)
            .header("x-amz-content-sha256", headers.content_sha256)
            .header("authorization", headers.authorization)
    }
}

fn unavailable(action: &str, object: &ObjectRef, e: impl fmt::Display) -> GatewayError {
    GatewayError::Unavailable(format!("{} {} failed: {}", action, object, e))
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn download(&self, object: &ObjectRef, dest: &Path) -> PrefabResult<u64> {
        let url = self.object_url(object)?;
        let headers = self.sign("GET", &url, Utc::now())?;
        let response = self
            .signed(self.client.get(url), headers)
            .send()
            .await
            .map_err(|e| unavailable("download", object, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(format!("object {} does not exist", object)));
        }
        if !status.is_success() {
            return Err(unavailable("download", object, status));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| unavailable("download", object, e))?;
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to write {}: {}", dest.display(), e)))?;
        Ok(bytes.len() as u64)
    }

    async fn upload(&self, src: &Path, object: &ObjectRef) -> PrefabResult<()> {
        let body = tokio::fs::read(src)
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to read {}: {}", src.display(), e)))?;
        let url = self.object_url(object)?;
        let headers = self.sign("PUT", &url, Utc::now())?;
        let response = self
            .signed(self.client.put(url), headers)
            .body(body)
            .send()
            .await
            .map_err(|e| unavailable("upload", object, e))?;
        if !response.status().is_success() {
            return Err(unavailable("upload", object, response.status()));
        }
        Ok(())
    }

    fn output_bucket(&self) -> &str {
        &self.config.bucket
    }
}

fn hmac(key: &[u8], data: &[u8]) -> PrefabResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| GatewayError::Internal("Failed to initialize HMAC".to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// SigV4 signing key: HMAC chain over date, region, service.
fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> PrefabResult<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// Percent-encode everything outside the SigV4 unreserved set.
fn uri_encode(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

// ============================================================================
// LOCAL DIRECTORY BACKEND
// ============================================================================

/// Objects live at `{root}/{bucket}/{key}`.
pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    /// Filesystem path for `object`. Keys may not climb out of the bucket.
    pub fn path_for(&self, object: &ObjectRef) -> PrefabResult<PathBuf> {
        let relative = Path::new(&object.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || object.bucket.contains('/') || object.bucket.starts_with('.') {
            return Err(GatewayError::Validation(format!(
                "object reference {} is not a plain path",
                object
            )));
        }
        Ok(self.root.join(&object.bucket).join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download(&self, object: &ObjectRef, dest: &Path) -> PrefabResult<u64> {
        let src = self.path_for(object)?;
        match tokio::fs::copy(&src, dest).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GatewayError::NotFound(
                format!("object {} does not exist", object),
            )),
            Err(e) => Err(unavailable("download", object, e)),
        }
    }

    async fn upload(&self, src: &Path, object: &ObjectRef) -> PrefabResult<()> {
        let dest = self.path_for(object)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable("upload", object, e))?;
        }
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| unavailable("upload", object, e))?;
        Ok(())
    }

    fn output_bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use prefab_core::ErrorKind;

    #[test]
    fn test_parse_reference() {
        let obj = ObjectRef::parse("s3://inputs/user-1/map.png").unwrap();
        assert_eq!(obj.bucket, "inputs");
        assert_eq!(obj.key, "user-1/map.png");
        assert_eq!(obj.extension(), ".png");
        assert_eq!(obj.to_string(), "s3://inputs/user-1/map.png");

        assert_eq!(ObjectRef::new("b", "README").extension(), "");
        for bad in ["https://x/y", "s3://bucket", "s3:///key", "s3://bucket/"] {
            assert_eq!(
                ObjectRef::parse(bad).unwrap_err().kind(),
                ErrorKind::Validation,
                "{bad}"
            );
        }
    }

    #[test]
    fn test_signing_key_matches_published_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_sign_request_headers() {
        let store = HttpObjectStore::new(
            reqwest::Client::new(),
            S3Config {
                endpoint: "http://minio.local:9000".to_string(),
                region: "us-east-1".to_string(),
                bucket: "outputs".to_string(),
                access_key: "AKIDEXAMPLE".to_string(),
                secret_key: SecretString::from("secret"),
            },
        );
        let url = store
            .object_url(&ObjectRef::new("outputs", "job 1/chart.png"))
            .unwrap();
        assert_eq!(url.path(), "/outputs/job%201/chart.png");

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let a = store.sign("PUT", &url, now).unwrap();
        let b = store.sign("PUT", &url, now).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.host, "minio.local:9000");
        assert_eq!(a.amz_date, "20240101T120000Z");
        assert!(a
            .authorization
            .starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/us-east-1/s3/aws4_request"));

        let get = store.sign("GET", &url, now).unwrap();
        assert_ne!(get.authorization, a.authorization);
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b+c~d"), "a%20b%2Bc~d");
        assert_eq!(encode_key("dir/sub dir/f.txt"), "dir/sub%20dir/f.txt");
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path(), "outputs");

        let src = scratch.path().join("report.csv");
        tokio::fs::write(&src, b"a,b\n1,2\n").await.unwrap();
        let object = ObjectRef::new("outputs", "job-1/report.csv");
        store.upload(&src, &object).await.unwrap();

        let dest = scratch.path().join("copy.csv");
        assert_eq!(store.download(&object, &dest).await.unwrap(), 8);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"a,b\n1,2\n");

        let missing = store
            .download(&ObjectRef::new("outputs", "nope.csv"), &dest)
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_local_store_rejects_traversal() {
        let store = LocalObjectStore::new("/tmp/objects", "outputs");
        let err = store
            .path_for(&ObjectRef::new("outputs", "../../etc/passwd"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
