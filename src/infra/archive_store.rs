use {
    crate::domain::error::AuditError,
    crate::domain::repository::{ArchiveStore, RepoFuture},
    chrono::Utc,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    std::{
        path::{Component, Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Archive store on the local filesystem. Download links are signed with a
/// shared key and carry their own expiry.
pub struct FsArchiveStore {
    root: PathBuf,
    base_url: String,
    signing_key: Arc<str>,
}

impl FsArchiveStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>, signing_key: Arc<str>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_key,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, AuditError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(AuditError::Validation(format!("invalid archive path: {path}")));
        }
        Ok(self.root.join(relative))
    }

    fn sign(&self, path: &str, expires: i64) -> Result<String, AuditError> {
        sign(&self.signing_key, path, expires)
    }

    /// Check a signature produced by `signed_url` against the current time.
    /// The comparison is constant-time.
    pub fn verify_signature(&self, path: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        link_mac(&self.signing_key, path, expires).is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
    }
}

fn link_mac(key: &str, path: &str, expires: i64) -> Result<HmacSha256, AuditError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| AuditError::Archive(format!("invalid signing key: {e}")))?;
    mac.update(path.as_bytes());
    mac.update(b"|");
    mac.update(expires.to_string().as_bytes());
    Ok(mac)
}

/// HMAC-SHA256 over `path|expires`, hex encoded.
pub fn sign(key: &str, path: &str, expires: i64) -> Result<String, AuditError> {
    let mac = link_mac(key, path, expires)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

impl ArchiveStore for FsArchiveStore {
    fn put(&self, path: &str, bytes: Vec<u8>) -> RepoFuture<'_, u64> {
        let target = self.resolve(path);
        Box::pin(async move {
            let target = target?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Write-then-rename so a crash never leaves a truncated archive.
            let tmp = target.with_extension("gz.partial");
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &target).await?;
            Ok(bytes.len() as u64)
        })
    }

    fn get(&self, path: &str) -> RepoFuture<'_, Option<Vec<u8>>> {
        let target = self.resolve(path);
        Box::pin(async move {
            match tokio::fs::read(target?).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn signed_url(&self, path: &str, ttl: Duration) -> RepoFuture<'_, String> {
        let path = path.to_string();
        Box::pin(async move {
            self.resolve(&path)?;
            let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
            let signature = self.sign(&path, expires)?;
            Ok(format!(
                "{}/{}?expires={expires}&signature={signature}",
                self.base_url, path
            ))
        })
    }
}
