//! Persistence seams. One method per operation, object-safe so services hold
//! `Arc<dyn ...>` and tests swap in the in-memory store.

use {
    super::audit::{AuditLogArchive, AuditLogEntry, AuditLogFilters, NewArchive, NewAuditEntry, Page},
    super::entity::Junction,
    super::error::AuditError,
    super::event::{HandlerType, Operation, QueueMessage},
    super::id::TenantId,
    super::subscription::{NewSubscription, Subscription},
    chrono::{DateTime, Utc},
    std::{future::Future, pin::Pin, time::Duration},
    uuid::Uuid,
};

pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuditError>> + Send + 'a>>;

pub trait SubscriptionRepository: Send + Sync {
    /// Insert or update keyed on `(tenant_id, name)`; returns the stored row.
    fn upsert(&self, subscription: &NewSubscription) -> RepoFuture<'_, Subscription>;

    /// Upsert every subscription or none of them.
    fn upsert_all(&self, subscriptions: &[NewSubscription]) -> RepoFuture<'_, u64>;

    /// Returns `true` if a row was removed.
    fn delete(&self, id: Uuid) -> RepoFuture<'_, bool>;

    fn delete_by_name(&self, tenant_id: &TenantId, name: &str) -> RepoFuture<'_, bool>;

    fn delete_by_handler(
        &self,
        tenant_id: &TenantId,
        handler_type: HandlerType,
    ) -> RepoFuture<'_, u64>;

    /// Names of the tenant's AUDIT subscriptions.
    /// Fails with `AuditError::NotProvisioned` before the tenant is provisioned.
    fn audit_subscription_names(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<String>>;

    /// Active subscriptions on `table` whose operations include `operation`.
    fn active_for(
        &self,
        tenant_id: &TenantId,
        table: &str,
        operation: Operation,
    ) -> RepoFuture<'_, Vec<Subscription>>;

    fn list(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<Subscription>>;
}

pub trait AuditRepository: Send + Sync {
    /// Bulk insert in one round trip; returns the number of rows written.
    /// Entries whose `(tenant_id, id)` already exists are skipped.
    fn insert_entries(&self, entries: &[NewAuditEntry]) -> RepoFuture<'_, u64>;

    /// Newest first.
    fn entity_log(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
        page: Page,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>>;

    /// Newest first.
    fn global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
        page: Page,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>>;

    fn count_global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
    ) -> RepoFuture<'_, i64>;

    /// Oldest first.
    fn entries_before(
        &self,
        tenant_id: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>>;

    fn delete_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> RepoFuture<'_, u64>;

    /// Re-inserting a known id refreshes its size and returns the stored row.
    fn insert_archive(&self, archive: &NewArchive) -> RepoFuture<'_, AuditLogArchive>;

    /// Newest first.
    fn list_archives(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<AuditLogArchive>>;

    fn find_archive(&self, id: Uuid) -> RepoFuture<'_, Option<AuditLogArchive>>;
}

pub trait TenantRepository: Send + Sync {
    /// Idempotently create the tenant's audit storage.
    fn provision_audit_storage(&self, tenant_id: &TenantId) -> RepoFuture<'_, ()>;

    fn set_audit_enabled(&self, tenant_id: &TenantId, enabled: bool) -> RepoFuture<'_, ()>;

    /// `false` for unknown tenants.
    fn audit_enabled(&self, tenant_id: &TenantId) -> RepoFuture<'_, bool>;

    fn audit_enabled_tenants(&self) -> RepoFuture<'_, Vec<TenantId>>;
}

/// Looks up the owner of an indirect row through its junction table.
pub trait JunctionLookup: Send + Sync {
    /// `Ok(None)` when no junction row references `record_id`.
    fn find_owner(
        &self,
        tenant_id: &TenantId,
        junction: &Junction,
        record_id: &str,
    ) -> RepoFuture<'_, Option<String>>;
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub message: QueueMessage,
    pub attempts: i32,
}

/// At-least-once queue transport for `QueueMessage`s.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, messages: &[QueueMessage]) -> RepoFuture<'_, u64>;

    /// Claim up to `limit` pending jobs, marking them as processing.
    fn claim(&self, limit: i64) -> RepoFuture<'_, Vec<QueuedJob>>;

    fn complete(&self, id: Uuid) -> RepoFuture<'_, ()>;

    /// Record a failure and reschedule with backoff, or give up permanently.
    fn fail(&self, id: Uuid, error: &str) -> RepoFuture<'_, ()>;

    /// Reset jobs stuck in processing back to pending; returns how many.
    fn reap_stale(&self) -> RepoFuture<'_, u64>;
}

/// Blob store backing audit archives.
pub trait ArchiveStore: Send + Sync {
    /// Write (or overwrite) the object at `path`; returns bytes written.
    fn put(&self, path: &str, bytes: Vec<u8>) -> RepoFuture<'_, u64>;

    fn get(&self, path: &str) -> RepoFuture<'_, Option<Vec<u8>>>;

    fn signed_url(&self, path: &str, ttl: Duration) -> RepoFuture<'_, String>;
}
