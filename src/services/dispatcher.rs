use {
    super::audit_log::AuditLogStore,
    super::diff::{DiffOptions, diff_change},
    super::resolver::EntityResolver,
    crate::domain::audit::NewAuditEntry,
    crate::domain::error::AuditError,
    crate::domain::event::{HandlerType, Operation, QueueMessage},
    crate::domain::id::TenantId,
    crate::domain::repository::RepoFuture,
    std::{collections::HashMap, sync::Arc},
    tokio::task::JoinSet,
    chrono::SecondsFormat,
    uuid::Uuid,
};

/// Namespace for audit entry ids derived from the change that produced them.
const AUDIT_ENTRY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b0a_8e15_c0d2_7a9f_3b61);

/// Same message, same attribution, same id. A redelivered job therefore
/// rewrites rows that already exist instead of adding new ones.
fn audit_entry_id(message: &QueueMessage, entity_type: &str, entity_id: &str) -> Uuid {
    let event = &message.event;
    let key = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        message.subscription_id,
        event.table,
        event.record_id,
        event.operation(),
        event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        entity_type,
        entity_id,
    );
    Uuid::new_v5(&AUDIT_ENTRY_NAMESPACE, key.as_bytes())
}

/// Delivery target for a non-audit handler type (webhook, workflow, ...).
pub trait MessageHandler: Send + Sync {
    fn handle<'a>(&'a self, message: &'a QueueMessage) -> RepoFuture<'a, ()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Processed, nothing to do. Not retried.
    Dropped(String),
    Failed { error: String, permanent: bool },
}

impl DispatchOutcome {
    fn failed(e: &AuditError) -> Self {
        Self::Failed {
            error: e.to_string(),
            permanent: e.is_permanent(),
        }
    }
}

enum Prepared {
    Done(DispatchOutcome),
    Audit {
        tenant_id: TenantId,
        entries: Vec<NewAuditEntry>,
    },
}

/// Routes queue messages to their handler type. Each message is processed
/// in its own task so one failure never blocks another; audit entries from
/// the whole batch are then written with one insert per tenant.
pub struct Dispatcher {
    resolver: Arc<EntityResolver>,
    store: AuditLogStore,
    handlers: HashMap<HandlerType, Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new(resolver: Arc<EntityResolver>, store: AuditLogStore) -> Self {
        Self {
            resolver,
            store,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, handler_type: HandlerType, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(handler_type, handler);
        self
    }

    /// Outcomes are returned in the order of `messages`.
    pub async fn dispatch(self: &Arc<Self>, messages: Vec<QueueMessage>) -> Vec<DispatchOutcome> {
        let total = messages.len();
        let mut tasks = JoinSet::new();
        for (index, message) in messages.into_iter().enumerate() {
            let dispatcher = Arc::clone(self);
            tasks.spawn(async move { (index, dispatcher.prepare(message).await) });
        }

        let mut prepared: Vec<Option<Prepared>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => prepared[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "dispatch task panicked"),
            }
        }

        let mut outcomes: Vec<Option<DispatchOutcome>> = (0..total).map(|_| None).collect();
        let mut batches: HashMap<TenantId, (Vec<usize>, Vec<NewAuditEntry>)> = HashMap::new();
        for (index, item) in prepared.into_iter().enumerate() {
            match item {
                Some(Prepared::Done(outcome)) => outcomes[index] = Some(outcome),
                Some(Prepared::Audit { tenant_id, entries }) => {
                    let batch = batches.entry(tenant_id).or_default();
                    batch.0.push(index);
                    batch.1.extend(entries);
                }
                None => {
                    outcomes[index] = Some(DispatchOutcome::Failed {
                        error: "dispatch task panicked".into(),
                        permanent: false,
                    })
                }
            }
        }

        for (tenant_id, (indices, entries)) in batches {
            let outcome = match self.store.insert_batch(&tenant_id, &entries).await {
                Ok(written) => {
                    tracing::debug!(tenant_id = %tenant_id, written, messages = indices.len(), "audit batch written");
                    DispatchOutcome::Delivered
                }
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, messages = indices.len(), "audit batch insert failed");
                    DispatchOutcome::failed(&e)
                }
            };
            for index in indices {
                outcomes[index] = Some(outcome.clone());
            }
        }

        outcomes
            .into_iter()
            .map(|o| {
                o.unwrap_or(DispatchOutcome::Failed {
                    error: "no outcome recorded".into(),
                    permanent: false,
                })
            })
            .collect()
    }

    async fn prepare(&self, message: QueueMessage) -> Prepared {
        if message.handler_type == HandlerType::Audit {
            return match self.audit_entries(&message).await {
                Ok(entries) if entries.is_empty() => Prepared::Done(DispatchOutcome::Dropped(
                    "no audit-worthy attribution".into(),
                )),
                Ok(entries) => Prepared::Audit {
                    tenant_id: message.tenant_id.clone(),
                    entries,
                },
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %message.subscription_id,
                        table = %message.event.table,
                        error = %e,
                        "audit message failed"
                    );
                    Prepared::Done(DispatchOutcome::failed(&e))
                }
            };
        }

        let Some(handler) = self.handlers.get(&message.handler_type) else {
            tracing::warn!(handler_type = %message.handler_type, "no handler registered");
            return Prepared::Done(DispatchOutcome::Failed {
                error: format!("no handler registered for {}", message.handler_type),
                permanent: false,
            });
        };

        match handler.handle(&message).await {
            Ok(()) => Prepared::Done(DispatchOutcome::Delivered),
            Err(e) => {
                tracing::warn!(
                    subscription_id = %message.subscription_id,
                    handler_type = %message.handler_type,
                    error = %e,
                    "handler failed"
                );
                Prepared::Done(DispatchOutcome::failed(&e))
            }
        }
    }

    /// Resolve, diff and build the entries one AUDIT message produces.
    pub async fn audit_entries(
        &self,
        message: &QueueMessage,
    ) -> Result<Vec<NewAuditEntry>, AuditError> {
        let event = &message.event;
        let attributions = self
            .resolver
            .resolve_all(&message.tenant_id, event)
            .await?;
        if attributions.is_empty() {
            return Ok(Vec::new());
        }

        let options = DiffOptions::from_handler_config(&message.handler_config);
        let diff = diff_change(&event.change, &options);
        if event.operation() == Operation::Update && diff.is_empty() {
            tracing::debug!(
                table = %event.table,
                record_id = %event.record_id,
                "update touched only skipped fields"
            );
            return Ok(Vec::new());
        }

        let registry = self.resolver.registry();
        let table_label = registry.table_label(&event.table);
        let actor_id = message.actor_id.clone().or_else(|| event.actor_id.clone());
        let diff = (!diff.is_empty()).then_some(diff);

        Ok(attributions
            .into_iter()
            .map(|a| NewAuditEntry {
                id: audit_entry_id(message, a.entity_type, &a.entity_id),
                tenant_id: message.tenant_id.clone(),
                table_name: event.table.clone(),
                entity_type: a.entity_type.to_string(),
                entity_id: a.entity_id,
                operation: event.operation(),
                actor_id: actor_id.clone(),
                diff: diff.clone(),
                metadata: Some(serde_json::json!({
                    "tableLabel": table_label,
                    "entityLabel": a.entity_label,
                    "subscriptionId": message.subscription_id,
                    "capturedAt": event.timestamp,
                })),
            })
            .collect())
    }
}
