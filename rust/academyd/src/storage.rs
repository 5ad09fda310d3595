//! Object storage with time-limited signed URLs.
//!
//! `FsObjectStore` keeps object bytes under `<root>/<bucket>/objects/<path>`
//! and the content type under `<root>/<bucket>/types/<path>`. URLs carry
//! `expires` (unix seconds) and `signature`, the hex HMAC-SHA256 of
//! `<bucket>/<path>:<expires>`.

use crate::error::{ServiceError, ServiceResult};
use crate::validate::is_safe_file_name;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const REPORT_CARDS_BUCKET: &str = "report-cards";
pub const STORAGE_DIR: &str = "storage";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub trait ObjectStore: Send {
    /// Writes (or overwrites) an object.
    fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> ServiceResult<()>;
    fn get(&self, bucket: &str, path: &str) -> ServiceResult<Option<StoredObject>>;
    fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> ServiceResult<String>;
    /// `Forbidden` when the signature is wrong or `expires` has passed.
    fn verify(&self, bucket: &str, path: &str, expires: i64, signature: &str) -> ServiceResult<()>;
}

/// Splits an object path into its segments, rejecting anything that could
/// leave the bucket.
pub fn object_segments(path: &str) -> ServiceResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| !is_safe_file_name(s)) {
        return Err(ServiceError::invalid(format!("invalid object path: {}", path)));
    }
    Ok(segments)
}

pub struct FsObjectStore {
    root: PathBuf,
    public_url: String,
    secret: Vec<u8>,
}

impl FsObjectStore {
    pub fn new(workspace: &Path, public_url: &str, secret: &[u8]) -> Self {
        Self {
            root: workspace.join(STORAGE_DIR),
            public_url: public_url.trim_end_matches('/').to_string(),
            secret: secret.to_vec(),
        }
    }

    fn locate(&self, bucket: &str, kind: &str, path: &str) -> ServiceResult<PathBuf> {
        if !is_safe_file_name(bucket) {
            return Err(ServiceError::invalid(format!("invalid bucket: {}", bucket)));
        }
        let mut out = self.root.join(bucket).join(kind);
        for segment in object_segments(path)? {
            out.push(segment);
        }
        Ok(out)
    }

    fn mac(&self, bucket: &str, path: &str, expires: i64) -> ServiceResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ServiceError::Internal(format!("signing key rejected: {}", e)))?;
        mac.update(format!("{}/{}:{}", bucket, path, expires).as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, bucket: &str, path: &str, expires: i64) -> ServiceResult<String> {
        Ok(hex::encode(self.mac(bucket, path, expires)?.finalize().into_bytes()))
    }
}

fn write_file(target: &Path, bytes: &[u8]) -> ServiceResult<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, bytes)?;
    Ok(())
}

impl ObjectStore for FsObjectStore {
    fn put(&self, bucket: &str, path: &str, bytes: &[u8], content_type: &str) -> ServiceResult<()> {
        let object = self.locate(bucket, "objects", path)?;
        let meta = self.locate(bucket, "types", path)?;
        write_file(&object, bytes)?;
        write_file(&meta, content_type.as_bytes())?;
        info!(bucket, path, size = bytes.len(), "object stored");
        Ok(())
    }

    fn get(&self, bucket: &str, path: &str) -> ServiceResult<Option<StoredObject>> {
        let object = self.locate(bucket, "objects", path)?;
        if !object.is_file() {
            return Ok(None);
        }
        let bytes = std::fs::read(&object)?;
        let content_type = std::fs::read_to_string(self.locate(bucket, "types", path)?)
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        Ok(Some(StoredObject {
            bytes,
            content_type,
        }))
    }

    fn signed_url(&self, bucket: &str, path: &str, ttl: Duration) -> ServiceResult<String> {
        let segments = object_segments(path)?;
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.sign(bucket, path, expires)?;
        let encoded: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        Ok(format!(
            "{}/storage/{}/{}?expires={}&signature={}",
            self.public_url,
            urlencoding::encode(bucket),
            encoded.join("/"),
            expires,
            signature
        ))
    }

    fn verify(&self, bucket: &str, path: &str, expires: i64, signature: &str) -> ServiceResult<()> {
        let provided = hex::decode(signature)
            .map_err(|_| ServiceError::Forbidden("invalid signature".to_string()))?;
        self.mac(bucket, path, expires)?
            .verify_slice(&provided)
            .map_err(|_| ServiceError::Forbidden("invalid signature".to_string()))?;
        if expires < chrono::Utc::now().timestamp() {
            return Err(ServiceError::Forbidden("signed URL expired".to_string()));
        }
        Ok(())
    }
}
