//! In-memory implementations of every repository trait. Backs the test suite
//! and local runs without Postgres. Failures can be injected per operation.

use {
    crate::domain::audit::{
        AuditLogArchive, AuditLogEntry, AuditLogFilters, NewArchive, NewAuditEntry, Page,
    },
    crate::domain::entity::Junction,
    crate::domain::error::AuditError,
    crate::domain::event::{HandlerType, Operation, QueueMessage, Row, value_as_id},
    crate::domain::id::TenantId,
    crate::domain::repository::{
        ArchiveStore, AuditRepository, JobQueue, JunctionLookup, QueuedJob, RepoFuture,
        SubscriptionRepository, TenantRepository,
    },
    crate::domain::subscription::{NewSubscription, Subscription},
    chrono::{DateTime, Utc},
    std::{
        collections::{HashMap, HashSet},
        sync::{Mutex, MutexGuard},
        time::Duration,
    },
    uuid::Uuid,
};

const MAX_ATTEMPTS: i32 = 5;
const STALE_AFTER_MINUTES: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub id: Uuid,
    pub message: QueueMessage,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct TenantState {
    provisioned: bool,
    enabled: bool,
}

#[derive(Default)]
struct State {
    subscriptions: Vec<Subscription>,
    entries: Vec<AuditLogEntry>,
    archives: Vec<AuditLogArchive>,
    tenants: HashMap<TenantId, TenantState>,
    junction_rows: Vec<(TenantId, String, Row)>,
    jobs: Vec<MemoryJob>,
    insert_calls: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing: Mutex<HashSet<&'static str>>,
}

fn ready<T: Send + 'static>(result: Result<T, AuditError>) -> RepoFuture<'static, T> {
    Box::pin(std::future::ready(result))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make every call to `operation` fail with a database error until cleared.
    pub fn fail_on(&self, operation: &'static str) {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(operation);
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn check(&self, operation: &'static str) -> Result<(), AuditError> {
        if self
            .failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(operation)
        {
            return Err(AuditError::Database(sqlx::Error::Protocol(format!(
                "injected failure in {operation}"
            ))));
        }
        Ok(())
    }

    /// Insert an entry with an explicit `created_at`, bypassing the store clock.
    pub fn seed_entry(&self, entry: NewAuditEntry, created_at: DateTime<Utc>) {
        self.state()
            .entries
            .push(AuditLogEntry::from_new(entry, created_at));
    }

    pub fn insert_junction_row(&self, tenant_id: &TenantId, table: &str, row: Row) {
        self.state()
            .junction_rows
            .push((tenant_id.clone(), table.to_string(), row));
    }

    pub fn remove_junction_rows(&self, table: &str) {
        self.state().junction_rows.retain(|(_, t, _)| t != table);
    }

    pub fn entries(&self, tenant_id: &TenantId) -> Vec<AuditLogEntry> {
        self.state()
            .entries
            .iter()
            .filter(|e| &e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn archives(&self) -> Vec<AuditLogArchive> {
        self.state().archives.clone()
    }

    /// Number of `insert_entries` round trips so far.
    pub fn insert_calls(&self) -> usize {
        self.state().insert_calls
    }

    pub fn jobs(&self) -> Vec<MemoryJob> {
        self.state().jobs.clone()
    }

    /// Move every claim time back by `by`, as if the workers had stalled.
    pub fn backdate_claims(&self, by: chrono::TimeDelta) {
        for job in self.state().jobs.iter_mut() {
            if let Some(at) = job.claimed_at.as_mut() {
                *at -= by;
            }
        }
    }

    pub fn subscriptions(&self, tenant_id: &TenantId) -> Vec<Subscription> {
        self.state()
            .subscriptions
            .iter()
            .filter(|s| &s.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

fn newest_first(entries: &mut [AuditLogEntry]) {
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn paginate<T>(items: Vec<T>, page: Page) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset as usize)
        .take(page.limit as usize)
        .collect()
}

fn upsert_locked(state: &mut State, subscription: &NewSubscription) -> Subscription {
    let now = Utc::now();
    if let Some(existing) = state
        .subscriptions
        .iter_mut()
        .find(|s| s.tenant_id == subscription.tenant_id && s.name == subscription.name)
    {
        existing.table = subscription.table.clone();
        existing.operations = subscription.operations.clone();
        existing.handler_type = subscription.handler_type;
        existing.config = subscription.config.clone();
        existing.filter = subscription.filter.clone();
        existing.active = subscription.active;
        existing.updated_at = now;
        return existing.clone();
    }
    let stored = Subscription {
        id: subscription.id,
        name: subscription.name.clone(),
        table: subscription.table.clone(),
        tenant_id: subscription.tenant_id.clone(),
        operations: subscription.operations.clone(),
        handler_type: subscription.handler_type,
        config: subscription.config.clone(),
        filter: subscription.filter.clone(),
        active: subscription.active,
        created_at: now,
        updated_at: now,
    };
    state.subscriptions.push(stored.clone());
    stored
}

impl SubscriptionRepository for MemoryStore {
    fn upsert(&self, subscription: &NewSubscription) -> RepoFuture<'_, Subscription> {
        let result = self
            .check("upsert_subscription")
            .map(|()| upsert_locked(&mut self.state(), subscription));
        ready(result)
    }

    fn upsert_all(&self, subscriptions: &[NewSubscription]) -> RepoFuture<'_, u64> {
        let result = self.check("upsert_subscription").map(|()| {
            let mut state = self.state();
            for subscription in subscriptions {
                upsert_locked(&mut state, subscription);
            }
            subscriptions.len() as u64
        });
        ready(result)
    }

    fn delete(&self, id: Uuid) -> RepoFuture<'_, bool> {
        let result = self.check("delete_subscription").map(|()| {
            let mut state = self.state();
            let before = state.subscriptions.len();
            state.subscriptions.retain(|s| s.id != id);
            state.subscriptions.len() != before
        });
        ready(result)
    }

    fn delete_by_name(&self, tenant_id: &TenantId, name: &str) -> RepoFuture<'_, bool> {
        let result = self.check("delete_subscription").map(|()| {
            let mut state = self.state();
            let before = state.subscriptions.len();
            state
                .subscriptions
                .retain(|s| !(&s.tenant_id == tenant_id && s.name == name));
            state.subscriptions.len() != before
        });
        ready(result)
    }

    fn delete_by_handler(
        &self,
        tenant_id: &TenantId,
        handler_type: HandlerType,
    ) -> RepoFuture<'_, u64> {
        let result = self.check("delete_subscription").map(|()| {
            let mut state = self.state();
            let before = state.subscriptions.len();
            state
                .subscriptions
                .retain(|s| !(&s.tenant_id == tenant_id && s.handler_type == handler_type));
            (before - state.subscriptions.len()) as u64
        });
        ready(result)
    }

    fn audit_subscription_names(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<String>> {
        let result = self.check("audit_subscription_names").and_then(|()| {
            let state = self.state();
            let provisioned = state
                .tenants
                .get(tenant_id)
                .is_some_and(|t| t.provisioned);
            if !provisioned {
                return Err(AuditError::NotProvisioned(format!("tenant {tenant_id}")));
            }
            Ok(state
                .subscriptions
                .iter()
                .filter(|s| &s.tenant_id == tenant_id && s.handler_type == HandlerType::Audit)
                .map(|s| s.name.clone())
                .collect())
        });
        ready(result)
    }

    fn active_for(
        &self,
        tenant_id: &TenantId,
        table: &str,
        operation: Operation,
    ) -> RepoFuture<'_, Vec<Subscription>> {
        let result = self.check("active_subscriptions").map(|()| {
            self.state()
                .subscriptions
                .iter()
                .filter(|s| &s.tenant_id == tenant_id && s.matches(table, operation))
                .cloned()
                .collect()
        });
        ready(result)
    }

    fn list(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<Subscription>> {
        let result = self
            .check("list_subscriptions")
            .map(|()| self.subscriptions(tenant_id));
        ready(result)
    }
}

impl AuditRepository for MemoryStore {
    fn insert_entries(&self, entries: &[NewAuditEntry]) -> RepoFuture<'_, u64> {
        let result = self.check("insert_entries").map(|()| {
            let now = Utc::now();
            let mut state = self.state();
            state.insert_calls += 1;
            let mut written = 0;
            for entry in entries {
                let exists = state
                    .entries
                    .iter()
                    .any(|e| e.tenant_id == entry.tenant_id && e.id == entry.id);
                if !exists {
                    state.entries.push(AuditLogEntry::from_new(entry.clone(), now));
                    written += 1;
                }
            }
            written
        });
        ready(result)
    }

    fn entity_log(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
        page: Page,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>> {
        let result = self.check("entity_log").map(|()| {
            let mut rows: Vec<_> = self
                .entries(tenant_id)
                .into_iter()
                .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
                .collect();
            newest_first(&mut rows);
            paginate(rows, page)
        });
        ready(result)
    }

    fn global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
        page: Page,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>> {
        let result = self.check("global_log").map(|()| {
            let mut rows: Vec<_> = self
                .entries(tenant_id)
                .into_iter()
                .filter(|e| filters.matches(e))
                .collect();
            newest_first(&mut rows);
            paginate(rows, page)
        });
        ready(result)
    }

    fn count_global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
    ) -> RepoFuture<'_, i64> {
        let result = self.check("count_global_log").map(|()| {
            self.entries(tenant_id)
                .iter()
                .filter(|e| filters.matches(e))
                .count() as i64
        });
        ready(result)
    }

    fn entries_before(
        &self,
        tenant_id: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>> {
        let result = self.check("entries_before").map(|()| {
            let mut rows: Vec<_> = self
                .entries(tenant_id)
                .into_iter()
                .filter(|e| e.created_at < cutoff)
                .collect();
            rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            rows
        });
        ready(result)
    }

    fn delete_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> RepoFuture<'_, u64> {
        let result = self.check("delete_before").map(|()| {
            let mut state = self.state();
            let before = state.entries.len();
            state
                .entries
                .retain(|e| !(&e.tenant_id == tenant_id && e.created_at < cutoff));
            (before - state.entries.len()) as u64
        });
        ready(result)
    }

    fn insert_archive(&self, archive: &NewArchive) -> RepoFuture<'_, AuditLogArchive> {
        let result = self.check("insert_archive").map(|()| {
            let mut state = self.state();
            if let Some(existing) = state.archives.iter_mut().find(|a| a.id == archive.id) {
                existing.size_bytes = archive.size_bytes;
                return existing.clone();
            }
            let stored = AuditLogArchive {
                id: archive.id,
                tenant_id: archive.tenant_id.clone(),
                archive_path: archive.archive_path.clone(),
                start_date: archive.start_date,
                end_date: archive.end_date,
                row_count: archive.row_count,
                size_bytes: archive.size_bytes,
                created_at: Utc::now(),
            };
            state.archives.push(stored.clone());
            stored
        });
        ready(result)
    }

    fn list_archives(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<AuditLogArchive>> {
        let result = self.check("list_archives").map(|()| {
            let mut rows: Vec<_> = self
                .state()
                .archives
                .iter()
                .filter(|a| &a.tenant_id == tenant_id)
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            rows
        });
        ready(result)
    }

    fn find_archive(&self, id: Uuid) -> RepoFuture<'_, Option<AuditLogArchive>> {
        let result = self
            .check("find_archive")
            .map(|()| self.state().archives.iter().find(|a| a.id == id).cloned());
        ready(result)
    }
}

impl TenantRepository for MemoryStore {
    fn provision_audit_storage(&self, tenant_id: &TenantId) -> RepoFuture<'_, ()> {
        let result = self.check("provision_audit_storage").map(|()| {
            self.state()
                .tenants
                .entry(tenant_id.clone())
                .or_default()
                .provisioned = true;
        });
        ready(result)
    }

    fn set_audit_enabled(&self, tenant_id: &TenantId, enabled: bool) -> RepoFuture<'_, ()> {
        let result = self.check("set_audit_enabled").map(|()| {
            self.state()
                .tenants
                .entry(tenant_id.clone())
                .or_default()
                .enabled = enabled;
        });
        ready(result)
    }

    fn audit_enabled(&self, tenant_id: &TenantId) -> RepoFuture<'_, bool> {
        let result = self
            .check("audit_enabled")
            .map(|()| self.state().tenants.get(tenant_id).is_some_and(|t| t.enabled));
        ready(result)
    }

    fn audit_enabled_tenants(&self) -> RepoFuture<'_, Vec<TenantId>> {
        let result = self.check("audit_enabled_tenants").map(|()| {
            let mut tenants: Vec<_> = self
                .state()
                .tenants
                .iter()
                .filter(|(_, t)| t.enabled)
                .map(|(id, _)| id.clone())
                .collect();
            tenants.sort();
            tenants
        });
        ready(result)
    }
}

impl JunctionLookup for MemoryStore {
    fn find_owner(
        &self,
        tenant_id: &TenantId,
        junction: &Junction,
        record_id: &str,
    ) -> RepoFuture<'_, Option<String>> {
        let result = self.check("find_owner").map(|()| {
            self.state()
                .junction_rows
                .iter()
                .filter(|(t, table, _)| t == tenant_id && table == junction.table)
                .find(|(_, _, row)| {
                    row.get(junction.foreign_key).and_then(value_as_id).as_deref()
                        == Some(record_id)
                })
                .and_then(|(_, _, row)| row.get(junction.entity_id_column).and_then(value_as_id))
        });
        ready(result)
    }
}

impl JobQueue for MemoryStore {
    fn enqueue(&self, messages: &[QueueMessage]) -> RepoFuture<'_, u64> {
        let result = self.check("enqueue").map(|()| {
            let mut state = self.state();
            for message in messages {
                state.jobs.push(MemoryJob {
                    id: Uuid::now_v7(),
                    message: message.clone(),
                    status: JobStatus::Pending,
                    attempts: 0,
                    last_error: None,
                    claimed_at: None,
                });
            }
            messages.len() as u64
        });
        ready(result)
    }

    fn claim(&self, limit: i64) -> RepoFuture<'_, Vec<QueuedJob>> {
        let result = self.check("claim").map(|()| {
            let mut state = self.state();
            state
                .jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Pending)
                .take(limit.max(0) as usize)
                .map(|j| {
                    j.status = JobStatus::Processing;
                    j.claimed_at = Some(Utc::now());
                    QueuedJob {
                        id: j.id,
                        message: j.message.clone(),
                        attempts: j.attempts,
                    }
                })
                .collect()
        });
        ready(result)
    }

    fn complete(&self, id: Uuid) -> RepoFuture<'_, ()> {
        let result = self.check("complete").map(|()| {
            if let Some(job) = self.state().jobs.iter_mut().find(|j| j.id == id) {
                job.status = JobStatus::Completed;
            }
        });
        ready(result)
    }

    /// Retries become claimable immediately; there is no backoff clock here.
    fn fail(&self, id: Uuid, error: &str) -> RepoFuture<'_, ()> {
        let result = self.check("fail").map(|()| {
            if let Some(job) = self.state().jobs.iter_mut().find(|j| j.id == id) {
                job.attempts += 1;
                job.last_error = Some(error.to_string());
                job.status = if job.attempts >= MAX_ATTEMPTS {
                    JobStatus::Failed
                } else {
                    JobStatus::Pending
                };
            }
        });
        ready(result)
    }

    fn reap_stale(&self) -> RepoFuture<'_, u64> {
        let result = self.check("reap_stale").map(|()| {
            let cutoff = Utc::now() - chrono::TimeDelta::minutes(STALE_AFTER_MINUTES);
            let mut reaped = 0;
            for job in self.state().jobs.iter_mut() {
                let stale = job.status == JobStatus::Processing
                    && job.claimed_at.is_some_and(|at| at < cutoff);
                if stale {
                    job.status = JobStatus::Pending;
                    job.claimed_at = None;
                    reaped += 1;
                }
            }
            reaped
        });
        ready(result)
    }
}

/// In-memory `ArchiveStore`. Signed URLs are `memory://` links with an expiry.
#[derive(Default)]
pub struct MemoryArchiveStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<bool>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(path)
            .cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self
            .objects
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|p| p.into_inner()) = failing;
    }

    fn check(&self) -> Result<(), AuditError> {
        if *self.failing.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(AuditError::Archive("injected archive store failure".into()));
        }
        Ok(())
    }
}

impl ArchiveStore for MemoryArchiveStore {
    fn put(&self, path: &str, bytes: Vec<u8>) -> RepoFuture<'_, u64> {
        let result = self.check().map(|()| {
            let len = bytes.len() as u64;
            self.objects
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(path.to_string(), bytes);
            len
        });
        ready(result)
    }

    fn get(&self, path: &str) -> RepoFuture<'_, Option<Vec<u8>>> {
        let result = self.check().map(|()| self.object(path));
        ready(result)
    }

    fn signed_url(&self, path: &str, ttl: Duration) -> RepoFuture<'_, String> {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        ready(Ok(format!("memory://{path}?expires={expires}")))
    }
}
