use {
    crate::domain::audit::{AuditLogArchive, AuditLogEntry, NewArchive},
    crate::domain::error::AuditError,
    crate::domain::id::TenantId,
    crate::domain::repository::{ArchiveStore, AuditRepository, TenantRepository},
    chrono::{DateTime, Datelike, Duration, Utc},
    flate2::{Compression, read::GzDecoder, write::GzEncoder},
    std::{
        collections::{BTreeMap, HashSet},
        io::{Read, Write},
        sync::{Arc, Mutex},
    },
    tokio::{
        sync::{Semaphore, watch},
        task::JoinSet,
    },
    uuid::Uuid,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    /// Nothing older than the cutoff; no file, no manifest.
    Empty,
    /// Another run for this tenant is in progress.
    Skipped,
    Archived {
        archive: AuditLogArchive,
        deleted: u64,
    },
}

/// `audit-logs/{tenant}/{year}/{month}.jsonl.gz`
pub fn archive_path(tenant_id: &TenantId, at: DateTime<Utc>) -> String {
    format!(
        "audit-logs/{}/{:04}/{:02}.jsonl.gz",
        tenant_id,
        at.year(),
        at.month()
    )
}

/// Moves aged audit entries from hot storage into compressed monthly files.
pub struct ArchivalManager {
    audit: Arc<dyn AuditRepository>,
    tenants: Arc<dyn TenantRepository>,
    store: Arc<dyn ArchiveStore>,
    retention: Duration,
    in_flight: Mutex<HashSet<TenantId>>,
}

impl ArchivalManager {
    pub fn new(
        audit: Arc<dyn AuditRepository>,
        tenants: Arc<dyn TenantRepository>,
        store: Arc<dyn ArchiveStore>,
        retention_days: u32,
    ) -> Self {
        Self {
            audit,
            tenants,
            store,
            retention: Duration::days(i64::from(retention_days)),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub async fn run_tenant(&self, tenant_id: &TenantId) -> Result<ArchiveOutcome, AuditError> {
        self.run_tenant_at(tenant_id, Utc::now()).await
    }

    /// One archival run as of `now`. Any failure before the manifest is
    /// recorded leaves hot storage untouched.
    pub async fn run_tenant_at(
        &self,
        tenant_id: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<ArchiveOutcome, AuditError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, tenant_id) else {
            tracing::info!(tenant_id = %tenant_id, "archival already running, skipped");
            return Ok(ArchiveOutcome::Skipped);
        };

        let cutoff = now - self.retention;
        let entries = self.audit.entries_before(tenant_id, cutoff).await?;
        let (Some(first), Some(last)) = (
            entries.iter().map(|e| e.created_at).min(),
            entries.iter().map(|e| e.created_at).max(),
        ) else {
            tracing::debug!(tenant_id = %tenant_id, %cutoff, "nothing to archive");
            return Ok(ArchiveOutcome::Empty);
        };

        let path = archive_path(tenant_id, now);
        let previous = match self.store.get(&path).await? {
            Some(bytes) => decode_archive(&bytes)?,
            None => Vec::new(),
        };
        let bytes = encode_archive(merge_entries(previous, &entries))?;
        let size_bytes = self.store.put(&path, bytes).await?;

        let archive = self
            .audit
            .insert_archive(&NewArchive {
                id: manifest_id(tenant_id, &path, &entries),
                tenant_id: tenant_id.clone(),
                archive_path: path.clone(),
                start_date: first,
                end_date: last,
                row_count: entries.len() as i64,
                size_bytes: size_bytes as i64,
            })
            .await?;

        // Re-derive the selection from the cutoff rather than deleting by id.
        let deleted = self.audit.delete_before(tenant_id, cutoff).await?;
        if deleted != entries.len() as u64 {
            tracing::warn!(
                tenant_id = %tenant_id,
                exported = entries.len(),
                deleted,
                "deleted row count differs from exported count"
            );
        }

        tracing::info!(
            tenant_id = %tenant_id,
            archive_path = %path,
            row_count = archive.row_count,
            size_bytes = archive.size_bytes,
            deleted,
            "audit entries archived"
        );
        Ok(ArchiveOutcome::Archived { archive, deleted })
    }

    /// Archive every audit-enabled tenant, `concurrency` at a time. Shutdown
    /// is honoured between tenants only; started runs finish.
    pub async fn run_all(
        self: &Arc<Self>,
        concurrency: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Vec<(TenantId, Result<ArchiveOutcome, AuditError>)>, AuditError> {
        let tenants = self.tenants.audit_enabled_tenants().await?;
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for tenant_id in tenants {
            if *shutdown.borrow() {
                tracing::info!("archival cancelled, not starting remaining tenants");
                break;
            }
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let manager = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let result = manager.run_tenant(&tenant_id).await;
                if let Err(e) = &result {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "archival run failed");
                }
                (tenant_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "archival task panicked"),
            }
        }
        Ok(results)
    }
}

/// Namespace for manifest ids derived from the rows they describe.
const MANIFEST_NAMESPACE: Uuid = Uuid::from_u128(0x2b8e_5d41_c7f0_4a93_9d26_81e4_f05c_7a18);

/// A run that exported the same rows into the same file gets the same
/// manifest id, so retrying after a failed delete reuses the manifest.
fn manifest_id(tenant_id: &TenantId, path: &str, entries: &[AuditLogEntry]) -> Uuid {
    let mut ids: Vec<Uuid> = entries.iter().map(|e| e.id).collect();
    ids.sort_unstable();
    let mut key = format!("{tenant_id}|{path}");
    for id in ids {
        key.push('|');
        key.push_str(&id.to_string());
    }
    Uuid::new_v5(&MANIFEST_NAMESPACE, key.as_bytes())
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<TenantId>>,
    tenant_id: TenantId,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<TenantId>>, tenant_id: &TenantId) -> Option<Self> {
        let mut running = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !running.insert(tenant_id.clone()) {
            return None;
        }
        Some(Self {
            set,
            tenant_id: tenant_id.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut running = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        running.remove(&self.tenant_id);
    }
}

/// Union by id, oldest first. Rows exported by an earlier run that failed
/// before deleting appear in both inputs and are kept once.
fn merge_entries(previous: Vec<AuditLogEntry>, current: &[AuditLogEntry]) -> Vec<AuditLogEntry> {
    let mut by_id: BTreeMap<Uuid, AuditLogEntry> =
        previous.into_iter().map(|e| (e.id, e)).collect();
    for entry in current {
        by_id.insert(entry.id, entry.clone());
    }
    let mut merged: Vec<_> = by_id.into_values().collect();
    merged.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    merged
}

/// Newline-delimited JSON, gzip-compressed.
pub fn encode_archive(entries: Vec<AuditLogEntry>) -> Result<Vec<u8>, AuditError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for entry in &entries {
        serde_json::to_writer(&mut encoder, entry)?;
        encoder.write_all(b"\n")?;
    }
    Ok(encoder.finish()?)
}

pub fn decode_archive(bytes: &[u8]) -> Result<Vec<AuditLogEntry>, AuditError> {
    let mut text = String::new();
    GzDecoder::new(bytes)
        .read_to_string(&mut text)
        .map_err(|e| AuditError::Archive(format!("corrupt archive: {e}")))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AuditError::from))
        .collect()
}
