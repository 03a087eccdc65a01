use {
    super::registry::{EntityMatch, EntityRegistry},
    crate::domain::entity::TableConfig,
    crate::domain::error::AuditError,
    crate::domain::event::{CapturedEvent, RowChange, value_as_id},
    crate::domain::id::TenantId,
    crate::domain::repository::JunctionLookup,
    std::sync::Arc,
};

/// A captured change attributed to one business entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub entity_type: &'static str,
    pub entity_label: &'static str,
    pub entity_id: String,
}

/// Turns table-level changes into entity-level attributions.
pub struct EntityResolver {
    registry: Arc<EntityRegistry>,
    junctions: Arc<dyn JunctionLookup>,
}

impl EntityResolver {
    pub fn new(registry: Arc<EntityRegistry>, junctions: Arc<dyn JunctionLookup>) -> Self {
        Self {
            registry,
            junctions,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Attribute `event` to every entity its table belongs to. Each match is
    /// resolved independently; matches that resolve to nothing are left out.
    pub async fn resolve_all(
        &self,
        tenant_id: &TenantId,
        event: &CapturedEvent,
    ) -> Result<Vec<Attribution>, AuditError> {
        let mut out = Vec::new();
        for matched in self.registry.entity_configs_for(&event.table) {
            if let Some(attribution) = self.resolve(tenant_id, event, matched).await? {
                out.push(attribution);
            }
        }
        Ok(out)
    }

    /// Resolve one `(event, table config)` pair. `Ok(None)` means the change
    /// is not audit-worthy for this entity or its owner could not be found.
    pub async fn resolve(
        &self,
        tenant_id: &TenantId,
        event: &CapturedEvent,
        matched: &EntityMatch,
    ) -> Result<Option<Attribution>, AuditError> {
        let entity_id = match matched.table_config {
            TableConfig::Extension { .. } if matches!(event.change, RowChange::Insert { .. }) => {
                tracing::debug!(
                    table = %event.table,
                    record_id = %event.record_id,
                    entity_type = matched.entity_type,
                    "extension insert, not audited"
                );
                return Ok(None);
            }
            TableConfig::Root { .. } | TableConfig::Extension { .. } => {
                Some(event.record_id.clone())
            }
            TableConfig::Child {
                entity_id_column, ..
            } => {
                let owner = event.change.current().get(entity_id_column).and_then(value_as_id);
                if owner.is_none() {
                    tracing::debug!(
                        table = %event.table,
                        record_id = %event.record_id,
                        column = entity_id_column,
                        "child row has no owning entity id"
                    );
                }
                owner
            }
            TableConfig::Indirect { junction, .. } => {
                let owner = self
                    .junctions
                    .find_owner(tenant_id, &junction, &event.record_id)
                    .await?;
                if owner.is_none() {
                    tracing::debug!(
                        table = %event.table,
                        record_id = %event.record_id,
                        junction = junction.table,
                        "no junction row, dropping attribution"
                    );
                }
                owner
            }
        };

        Ok(entity_id.map(|entity_id| Attribution {
            entity_type: matched.entity_type,
            entity_label: matched.label,
            entity_id,
        }))
    }
}
