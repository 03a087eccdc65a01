use {
    super::subscriptions::SubscriptionRegistry,
    crate::domain::audit::{
        AuditLogArchive, AuditLogEntry, AuditLogFilters, AuditLogPage, NewAuditEntry, Page,
    },
    crate::domain::error::AuditError,
    crate::domain::id::TenantId,
    crate::domain::repository::{ArchiveStore, AuditRepository, TenantRepository},
    std::{sync::Arc, time::Duration},
    uuid::Uuid,
};

/// Per-tenant audit log: writes, entity/global reads, lifecycle and archive reads.
#[derive(Clone)]
pub struct AuditLogStore {
    audit: Arc<dyn AuditRepository>,
    tenants: Arc<dyn TenantRepository>,
    subscriptions: SubscriptionRegistry,
    archives: Arc<dyn ArchiveStore>,
    download_ttl: Duration,
}

impl AuditLogStore {
    pub fn new(
        audit: Arc<dyn AuditRepository>,
        tenants: Arc<dyn TenantRepository>,
        subscriptions: SubscriptionRegistry,
        archives: Arc<dyn ArchiveStore>,
        download_ttl: Duration,
    ) -> Self {
        Self {
            audit,
            tenants,
            subscriptions,
            archives,
            download_ttl,
        }
    }

    /// Bulk insert. An empty batch never reaches the repository.
    pub async fn insert_batch(
        &self,
        tenant_id: &TenantId,
        entries: &[NewAuditEntry],
    ) -> Result<u64, AuditError> {
        if entries.is_empty() {
            return Ok(0);
        }
        if let Some(foreign) = entries.iter().find(|e| &e.tenant_id != tenant_id) {
            return Err(AuditError::Validation(format!(
                "entry {} belongs to tenant {}, not {tenant_id}",
                foreign.id, foreign.tenant_id
            )));
        }
        let written = self.audit.insert_entries(entries).await?;
        tracing::debug!(tenant_id = %tenant_id, written, "audit entries inserted");
        Ok(written)
    }

    /// History of one entity across every table composing it, newest first.
    pub async fn get_entity_log(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
        page: Page,
    ) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.audit
            .entity_log(tenant_id, entity_type, entity_id, page)
            .await
    }

    /// Filtered tenant-wide log. `count` is the number of rows matching the
    /// filters, independent of the page.
    pub async fn get_global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
        page: Page,
    ) -> Result<AuditLogPage, AuditError> {
        let data = self.audit.global_log(tenant_id, filters, page).await?;
        let count = self.audit.count_global_log(tenant_id, filters).await?;
        Ok(AuditLogPage { data, count })
    }

    /// Provision storage, create the AUDIT subscriptions, then raise the flag.
    /// Safe to repeat. If a tenant that was not enabled fails partway, its
    /// AUDIT subscriptions are removed again so capture stays off.
    pub async fn enable(&self, tenant_id: &TenantId) -> Result<(), AuditError> {
        let was_enabled = self.tenants.audit_enabled(tenant_id).await?;
        self.tenants.provision_audit_storage(tenant_id).await?;

        let result = async {
            let created = self.subscriptions.sync(tenant_id).await?;
            self.tenants.set_audit_enabled(tenant_id, true).await?;
            Ok::<_, AuditError>(created)
        }
        .await;

        match result {
            Ok(created) => {
                tracing::info!(tenant_id = %tenant_id, subscriptions_created = created, "audit log enabled");
                Ok(())
            }
            Err(e) => {
                if !was_enabled {
                    if let Err(rollback) = self.subscriptions.delete_audit_subscriptions(tenant_id).await {
                        tracing::error!(tenant_id = %tenant_id, error = %rollback, "failed to remove audit subscriptions after enable failure");
                    }
                }
                Err(e)
            }
        }
    }

    /// Lower the flag and drop the AUDIT subscriptions. History is kept.
    /// If the subscriptions cannot be removed the flag is restored.
    pub async fn disable(&self, tenant_id: &TenantId) -> Result<(), AuditError> {
        let was_enabled = self.tenants.audit_enabled(tenant_id).await?;
        self.tenants.set_audit_enabled(tenant_id, false).await?;

        match self.subscriptions.delete_audit_subscriptions(tenant_id).await {
            Ok(removed) => {
                tracing::info!(tenant_id = %tenant_id, subscriptions_removed = removed, "audit log disabled");
                Ok(())
            }
            Err(e) => {
                if was_enabled {
                    if let Err(restore) = self.tenants.set_audit_enabled(tenant_id, true).await {
                        tracing::error!(tenant_id = %tenant_id, error = %restore, "failed to restore audit flag");
                    }
                }
                Err(e)
            }
        }
    }

    pub async fn is_enabled(&self, tenant_id: &TenantId) -> Result<bool, AuditError> {
        self.tenants.audit_enabled(tenant_id).await
    }

    pub async fn list_archives(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<AuditLogArchive>, AuditError> {
        self.audit.list_archives(tenant_id).await
    }

    /// Short-lived signed URL for an archive file.
    pub async fn get_archive_download_url(&self, archive_id: Uuid) -> Result<String, AuditError> {
        let archive = self
            .audit
            .find_archive(archive_id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("archive {archive_id}")))?;
        self.archives
            .signed_url(&archive.archive_path, self.download_ttl)
            .await
    }
}
