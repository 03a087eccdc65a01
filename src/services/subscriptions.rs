use {
    super::registry::EntityRegistry,
    crate::domain::error::AuditError,
    crate::domain::event::HandlerType,
    crate::domain::id::TenantId,
    crate::domain::repository::SubscriptionRepository,
    crate::domain::subscription::{
        CreateSubscription, NewSubscription, Subscription, audit_subscription_name,
    },
    std::{collections::HashSet, sync::Arc},
    uuid::Uuid,
};

/// CRUD and idempotent provisioning over the subscription store.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    repo: Arc<dyn SubscriptionRepository>,
    entities: Arc<EntityRegistry>,
}

impl SubscriptionRegistry {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, entities: Arc<EntityRegistry>) -> Self {
        Self { repo, entities }
    }

    pub async fn create(
        &self,
        tenant_id: &TenantId,
        params: CreateSubscription,
    ) -> Result<Subscription, AuditError> {
        let new = NewSubscription::validate(tenant_id.clone(), params)?;
        let stored = self.repo.upsert(&new).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            subscription_id = %stored.id,
            name = %stored.name,
            table = %stored.table,
            handler_type = %stored.handler_type,
            "subscription upserted"
        );
        Ok(stored)
    }

    /// Idempotent: deleting an unknown id is not an error.
    pub async fn delete(&self, id: Uuid) -> Result<(), AuditError> {
        if self.repo.delete(id).await? {
            tracing::info!(subscription_id = %id, "subscription deleted");
        }
        Ok(())
    }

    pub async fn delete_by_name(&self, tenant_id: &TenantId, name: &str) -> Result<(), AuditError> {
        if self.repo.delete_by_name(tenant_id, name).await? {
            tracing::info!(tenant_id = %tenant_id, name, "subscription deleted");
        }
        Ok(())
    }

    pub async fn list(&self, tenant_id: &TenantId) -> Result<Vec<Subscription>, AuditError> {
        self.repo.list(tenant_id).await
    }

    /// Create `audit-{table}` for every auditable table that lacks one, in a
    /// single all-or-nothing write. Returns how many were created. Never
    /// removes subscriptions, and is a quiet no-op while the tenant's
    /// subscription store is unprovisioned.
    pub async fn sync(&self, tenant_id: &TenantId) -> Result<usize, AuditError> {
        let existing = match self.repo.audit_subscription_names(tenant_id).await {
            Ok(names) => names.into_iter().collect::<HashSet<_>>(),
            Err(AuditError::NotProvisioned(msg)) => {
                tracing::debug!(tenant_id = %tenant_id, reason = %msg, "subscription store not provisioned, skipping sync");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let missing: Vec<NewSubscription> = self
            .entities
            .all_auditable_tables()
            .iter()
            .copied()
            .filter(|table| !existing.contains(&audit_subscription_name(table)))
            .map(|table| NewSubscription::audit_for_table(tenant_id.clone(), table))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        self.repo.upsert_all(&missing).await?;
        tracing::info!(tenant_id = %tenant_id, created = missing.len(), "audit subscriptions synced");
        Ok(missing.len())
    }

    /// Remove every AUDIT subscription for the tenant.
    pub async fn delete_audit_subscriptions(&self, tenant_id: &TenantId) -> Result<u64, AuditError> {
        self.repo
            .delete_by_handler(tenant_id, HandlerType::Audit)
            .await
    }
}
