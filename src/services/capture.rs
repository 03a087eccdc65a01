use {
    crate::domain::error::AuditError,
    crate::domain::event::{CapturedEvent, QueueMessage},
    crate::domain::id::TenantId,
    crate::domain::repository::{JobQueue, SubscriptionRepository},
    crate::domain::subscription::Subscription,
    serde_json::Value,
    std::sync::Arc,
};

/// Fans one captured change out to every matching subscription's queue.
#[derive(Clone)]
pub struct CaptureService {
    subscriptions: Arc<dyn SubscriptionRepository>,
    queue: Arc<dyn JobQueue>,
}

impl CaptureService {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            subscriptions,
            queue,
        }
    }

    /// Enqueue one message per active subscription on `(table, tenant)` that
    /// wants this operation. Returns the number of messages enqueued.
    pub async fn capture(
        &self,
        tenant_id: &TenantId,
        event: CapturedEvent,
    ) -> Result<u64, AuditError> {
        let subscriptions = self
            .subscriptions
            .active_for(tenant_id, &event.table, event.operation())
            .await?;
        let messages = build_messages(tenant_id, &subscriptions, &event);
        if messages.is_empty() {
            return Ok(0);
        }

        let enqueued = self.queue.enqueue(&messages).await?;
        tracing::debug!(
            tenant_id = %tenant_id,
            table = %event.table,
            operation = %event.operation(),
            enqueued,
            "change captured"
        );
        Ok(enqueued)
    }
}

pub fn build_messages(
    tenant_id: &TenantId,
    subscriptions: &[Subscription],
    event: &CapturedEvent,
) -> Vec<QueueMessage> {
    subscriptions
        .iter()
        .filter(|s| &s.tenant_id == tenant_id && s.matches(&event.table, event.operation()))
        .filter(|s| filter_matches(&s.filter, event))
        .map(|s| QueueMessage {
            subscription_id: s.id,
            trigger_type: event.operation(),
            handler_type: s.handler_type,
            handler_config: s.config.clone(),
            tenant_id: tenant_id.clone(),
            actor_id: event.actor_id.clone(),
            event: event.clone(),
        })
        .collect()
}

/// A subscription filter matches when the row's current snapshot contains it,
/// with the same semantics as Postgres `jsonb @>`. An empty filter matches
/// everything; a column named by the filter must be present in the row.
pub fn filter_matches(filter: &Value, event: &CapturedEvent) -> bool {
    let Some(conditions) = filter.as_object() else {
        return true;
    };
    let row = event.change.current();
    conditions.iter().all(|(column, expected)| {
        row.get(column)
            .is_some_and(|actual| json_contains(actual, expected))
    })
}

/// `container @> contained`. Objects match on a subset of keys, arrays when
/// every wanted element is contained in some element, numbers by value.
pub fn json_contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Object(haystack), Value::Object(needle)) => needle.iter().all(|(key, wanted)| {
            haystack
                .get(key)
                .is_some_and(|actual| json_contains(actual, wanted))
        }),
        (Value::Array(haystack), Value::Array(needle)) => needle
            .iter()
            .all(|wanted| haystack.iter().any(|actual| json_contains(actual, wanted))),
        (Value::Number(a), Value::Number(b)) => a == b || a.as_f64() == b.as_f64(),
        _ => container == contained,
    }
}
