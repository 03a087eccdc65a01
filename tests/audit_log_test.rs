mod common;

use change_audit::domain::audit::{AuditLogFilters, Page};
use change_audit::domain::error::AuditError;
use change_audit::domain::event::{HandlerType, Operation};
use change_audit::domain::id::TenantId;
use change_audit::domain::repository::{RepoFuture, SubscriptionRepository};
use change_audit::domain::subscription::{CreateSubscription, NewSubscription, Subscription};
use change_audit::infra::memory::MemoryStore;
use change_audit::services::{
    audit_log::AuditLogStore, capture::CaptureService, subscriptions::SubscriptionRegistry,
};
use common::*;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Writes the first few subscriptions of a bulk upsert, then fails.
struct PartialWriteRepo {
    inner: Arc<MemoryStore>,
    written_before_failure: usize,
}

impl SubscriptionRepository for PartialWriteRepo {
    fn upsert(&self, subscription: &NewSubscription) -> RepoFuture<'_, Subscription> {
        self.inner.upsert(subscription)
    }

    fn upsert_all(&self, subscriptions: &[NewSubscription]) -> RepoFuture<'_, u64> {
        let head: Vec<_> = subscriptions
            .iter()
            .take(self.written_before_failure)
            .cloned()
            .collect();
        Box::pin(async move {
            for subscription in &head {
                self.inner.upsert(subscription).await?;
            }
            Err(AuditError::Database(sqlx::Error::Protocol(
                "connection reset mid-batch".into(),
            )))
        })
    }

    fn delete(&self, id: Uuid) -> RepoFuture<'_, bool> {
        self.inner.delete(id)
    }

    fn delete_by_name(&self, tenant_id: &TenantId, name: &str) -> RepoFuture<'_, bool> {
        self.inner.delete_by_name(tenant_id, name)
    }

    fn delete_by_handler(&self, tenant_id: &TenantId, handler_type: HandlerType) -> RepoFuture<'_, u64> {
        self.inner.delete_by_handler(tenant_id, handler_type)
    }

    fn audit_subscription_names(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<String>> {
        self.inner.audit_subscription_names(tenant_id)
    }

    fn active_for(
        &self,
        tenant_id: &TenantId,
        table: &str,
        operation: Operation,
    ) -> RepoFuture<'_, Vec<Subscription>> {
        self.inner.active_for(tenant_id, table, operation)
    }

    fn list(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<Subscription>> {
        self.inner.list(tenant_id)
    }
}

#[tokio::test]
async fn global_log_count_is_independent_of_page() {
    let h = harness();
    let t = tenant("acme");
    let mut entries: Vec<_> = (0..25)
        .map(|i| new_entry(&t, "customer", &format!("cust_{i}")))
        .collect();
    entries.extend((0..7).map(|i| new_entry(&t, "supplier", &format!("sup_{i}"))));
    h.audit_log.insert_batch(&t, &entries).await.unwrap();

    let filters = AuditLogFilters {
        entity_type: Some("customer".into()),
        ..Default::default()
    };
    let page = h
        .audit_log
        .get_global_log(&t, &filters, Page::new(Some(10), Some(0)).unwrap())
        .await
        .unwrap();

    assert_eq!(page.data.len(), 10);
    assert_eq!(page.count, 25);
    assert!(page.data.iter().all(|e| e.entity_type == "customer"));

    let last = h
        .audit_log
        .get_global_log(&t, &filters, Page::new(Some(10), Some(20)).unwrap())
        .await
        .unwrap();
    assert_eq!(last.data.len(), 5);
    assert_eq!(last.count, 25);
}

#[tokio::test]
async fn global_log_filters_combine() {
    let h = harness();
    let t = tenant("acme");
    let mut by_bob = new_entry(&t, "item", "item_1");
    by_bob.actor_id = Some("bob".into());
    by_bob.operation = Operation::Delete;
    let mut searchable = new_entry(&t, "item", "item_2");
    searchable.table_name = "itemCost".into();
    h.audit_log
        .insert_batch(&t, &[by_bob, searchable, new_entry(&t, "item", "item_3")])
        .await
        .unwrap();

    let by_actor = AuditLogFilters {
        actor_id: Some("bob".into()),
        operation: Some(Operation::Delete),
        ..Default::default()
    };
    let result = h.audit_log.get_global_log(&t, &by_actor, Page::default()).await.unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(result.data[0].entity_id, "item_1");

    let search = AuditLogFilters {
        search: Some("ITEMCOST".into()),
        ..Default::default()
    };
    let result = h.audit_log.get_global_log(&t, &search, Page::default()).await.unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(result.data[0].entity_id, "item_2");
}

#[tokio::test]
async fn entity_log_is_newest_first_and_tenant_scoped() {
    let h = harness();
    let t = tenant("acme");
    let other = tenant("globex");

    let mut older = new_entry(&t, "customer", "cust_1");
    older.table_name = "customer".into();
    let mut newer = new_entry(&t, "customer", "cust_1");
    newer.table_name = "customerLocation".into();
    h.store.seed_entry(older, at(2024, 1, 1));
    h.store.seed_entry(newer, at(2024, 2, 1));
    h.store.seed_entry(new_entry(&other, "customer", "cust_1"), at(2024, 3, 1));
    h.store.seed_entry(new_entry(&t, "customer", "cust_2"), at(2024, 3, 1));

    let log = h
        .audit_log
        .get_entity_log(&t, "customer", "cust_1", Page::default())
        .await
        .unwrap();
    let tables: Vec<_> = log.iter().map(|e| e.table_name.as_str()).collect();
    assert_eq!(tables, vec!["customerLocation", "customer"]);

    let paged = h
        .audit_log
        .get_entity_log(&t, "customer", "cust_1", Page::new(Some(1), Some(1)).unwrap())
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].table_name, "customer");
}

#[tokio::test]
async fn page_limits_are_clamped_and_validated() {
    assert_eq!(Page::new(None, None).unwrap(), Page { limit: 50, offset: 0 });
    assert_eq!(Page::new(Some(10_000), None).unwrap().limit, 500);
    assert!(matches!(Page::new(Some(0), None), Err(AuditError::Validation(_))));
    assert!(matches!(Page::new(None, Some(-1)), Err(AuditError::Validation(_))));
}

#[tokio::test]
async fn empty_batch_makes_no_round_trip() {
    let h = harness();
    let t = tenant("acme");

    assert_eq!(h.audit_log.insert_batch(&t, &[]).await.unwrap(), 0);
    assert_eq!(h.store.insert_calls(), 0);

    h.audit_log
        .insert_batch(&t, &[new_entry(&t, "item", "a"), new_entry(&t, "item", "b")])
        .await
        .unwrap();
    assert_eq!(h.store.insert_calls(), 1);
}

#[tokio::test]
async fn batch_rejects_entries_of_another_tenant() {
    let h = harness();
    let t = tenant("acme");
    let err = h
        .audit_log
        .insert_batch(&t, &[new_entry(&tenant("globex"), "item", "a")])
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::Validation(_)));
    assert_eq!(h.store.insert_calls(), 0);
}

#[tokio::test]
async fn read_failures_are_never_masked_as_empty() {
    let h = harness();
    let t = tenant("acme");
    h.store.fail_on("count_global_log");

    let err = h
        .audit_log
        .get_global_log(&t, &AuditLogFilters::default(), Page::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::Database(_)));

    h.store.fail_on("entity_log");
    assert!(h
        .audit_log
        .get_entity_log(&t, "customer", "cust_1", Page::default())
        .await
        .is_err());
}

#[tokio::test]
async fn enable_provisions_subscribes_and_is_repeatable() {
    let h = harness();
    let t = tenant("acme");
    assert!(!h.audit_log.is_enabled(&t).await.unwrap());

    h.audit_log.enable(&t).await.unwrap();
    h.audit_log.enable(&t).await.unwrap();

    assert!(h.audit_log.is_enabled(&t).await.unwrap());
    let audit_subs: Vec<_> = h
        .store
        .subscriptions(&t)
        .into_iter()
        .filter(|s| s.handler_type == HandlerType::Audit)
        .collect();
    assert_eq!(audit_subs.len(), h.entities.all_auditable_tables().len());
}

#[tokio::test]
async fn enable_failure_leaves_flag_down() {
    let h = harness();
    let t = tenant("acme");
    h.store.fail_on("upsert_subscription");

    assert!(h.audit_log.enable(&t).await.is_err());
    assert!(!h.audit_log.is_enabled(&t).await.unwrap());
}

#[tokio::test]
async fn enable_failure_mid_batch_leaves_no_audit_capture() {
    let h = harness();
    let t = tenant("acme");
    let repo: Arc<dyn SubscriptionRepository> = Arc::new(PartialWriteRepo {
        inner: h.store.clone(),
        written_before_failure: 3,
    });
    let subscriptions = SubscriptionRegistry::new(repo.clone(), h.entities.clone());
    let audit_log = AuditLogStore::new(
        h.store.clone(),
        h.store.clone(),
        subscriptions,
        h.archives.clone(),
        std::time::Duration::from_secs(900),
    );

    assert!(audit_log.enable(&t).await.is_err());

    assert!(!audit_log.is_enabled(&t).await.unwrap());
    assert!(h
        .store
        .subscriptions(&t)
        .iter()
        .all(|s| s.handler_type != HandlerType::Audit));

    let capture = CaptureService::new(repo, h.store.clone());
    let queued = capture
        .capture(
            &t,
            update_event("customer", json!({"id": "cust_1", "name": "A"}), json!({"id": "cust_1", "name": "B"})),
        )
        .await
        .unwrap();
    assert_eq!(queued, 0);
}

#[tokio::test]
async fn enable_failure_after_sync_removes_subscriptions() {
    let h = harness();
    let t = tenant("acme");
    h.store.fail_on("set_audit_enabled");

    assert!(h.audit_log.enable(&t).await.is_err());
    assert!(h.store.subscriptions(&t).is_empty());

    h.store.clear_failures();
    h.audit_log.enable(&t).await.unwrap();
    assert_eq!(
        h.store.subscriptions(&t).len(),
        h.entities.all_auditable_tables().len()
    );
}

#[tokio::test]
async fn failed_reenable_keeps_existing_subscriptions() {
    let h = harness();
    let t = tenant("acme");
    h.audit_log.enable(&t).await.unwrap();
    h.store.fail_on("set_audit_enabled");

    assert!(h.audit_log.enable(&t).await.is_err());
    assert!(h.audit_log.is_enabled(&t).await.unwrap());
    assert_eq!(
        h.store.subscriptions(&t).len(),
        h.entities.all_auditable_tables().len()
    );
}

#[tokio::test]
async fn disable_removes_audit_subscriptions_but_keeps_history() {
    let h = harness();
    let t = tenant("acme");
    h.audit_log.enable(&t).await.unwrap();
    h.subscriptions
        .create(
            &t,
            CreateSubscription {
                name: "hook".into(),
                table: "item".into(),
                operations: vec![Operation::Insert],
                handler_type: "WEBHOOK".into(),
                config: None,
                filter: None,
                active: None,
            },
        )
        .await
        .unwrap();
    h.audit_log
        .insert_batch(&t, &[new_entry(&t, "item", "item_1")])
        .await
        .unwrap();

    h.audit_log.disable(&t).await.unwrap();

    assert!(!h.audit_log.is_enabled(&t).await.unwrap());
    let names: Vec<_> = h.store.subscriptions(&t).into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["hook".to_string()]);
    assert_eq!(h.store.entries(&t).len(), 1);
}

#[tokio::test]
async fn disable_failure_restores_flag() {
    let h = harness();
    let t = tenant("acme");
    h.audit_log.enable(&t).await.unwrap();
    h.store.fail_on("delete_subscription");

    assert!(h.audit_log.disable(&t).await.is_err());
    assert!(h.audit_log.is_enabled(&t).await.unwrap());
}

#[tokio::test]
async fn archive_download_url_requires_known_archive() {
    let h = harness();
    let err = h
        .audit_log
        .get_archive_download_url(Uuid::now_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::NotFound(_)));
}
