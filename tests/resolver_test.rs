mod common;

use common::*;
use change_audit::domain::event::Operation;
use change_audit::domain::error::AuditError;
use serde_json::json;

#[tokio::test]
async fn root_update_is_attributed_with_field_diff() {
    let h = harness();
    let t = tenant("acme");
    let event = update_event(
        "customer",
        json!({"id": "cust_1", "name": "Acme", "updatedAt": "2024-01-01"}),
        json!({"id": "cust_1", "name": "Acme Inc", "updatedAt": "2024-01-02"}),
    );

    let entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();

    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.entity_type, "customer");
    assert_eq!(entry.entity_id, "cust_1");
    assert_eq!(entry.operation, Operation::Update);
    let diff = entry.diff.as_ref().unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff.get("name").unwrap().old, json!("Acme"));
    assert_eq!(diff.get("name").unwrap().new, json!("Acme Inc"));

    let metadata = entry.metadata.as_ref().unwrap();
    assert_eq!(metadata["tableLabel"], "Customer");
    assert_eq!(metadata["entityLabel"], "Customer");
}

#[tokio::test]
async fn extension_insert_yields_nothing() {
    let h = harness();
    let t = tenant("acme");
    let event = insert_event("customerPayment", json!({"id": "cust_1", "paymentTermId": null}));

    let entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn extension_update_is_attributed_to_parent() {
    let h = harness();
    let t = tenant("acme");
    let event = update_event(
        "customerPayment",
        json!({"id": "cust_1", "paymentTermId": null}),
        json!({"id": "cust_1", "paymentTermId": "net30"}),
    );

    let entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entity_type, "customer");
    assert_eq!(entries[0].entity_id, "cust_1");
}

#[tokio::test]
async fn indirect_row_resolves_through_junction() {
    let h = harness();
    let t = tenant("acme");
    h.store.insert_junction_row(
        &t,
        "customerContact",
        row(json!({"id": "cc_1", "contactId": "contact_9", "customerId": "cust_1"})),
    );
    let event = insert_event("contact", json!({"id": "contact_9", "email": "a@acme.test"}));

    let entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entity_type, "customer");
    assert_eq!(entries[0].entity_id, "cust_1");
    assert_eq!(entries[0].table_name, "contact");
}

#[tokio::test]
async fn indirect_miss_is_dropped_not_failed() {
    let h = harness();
    let t = tenant("acme");
    // Junction row deleted before the contact update is dispatched.
    h.store.insert_junction_row(
        &t,
        "customerContact",
        row(json!({"contactId": "contact_9", "customerId": "cust_1"})),
    );
    h.store.remove_junction_rows("customerContact");
    let event = update_event(
        "contact",
        json!({"id": "contact_9", "email": "a@acme.test"}),
        json!({"id": "contact_9", "email": "b@acme.test"}),
    );

    let entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn shared_table_fans_out_to_every_entity() {
    let h = harness();
    let t = tenant("acme");
    h.store.insert_junction_row(
        &t,
        "customerContact",
        row(json!({"contactId": "contact_9", "customerId": "cust_1"})),
    );
    h.store.insert_junction_row(
        &t,
        "supplierContact",
        row(json!({"contactId": "contact_9", "supplierId": "sup_4"})),
    );
    let event = delete_event("contact", json!({"id": "contact_9", "email": "a@acme.test"}));

    let mut entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();
    entries.sort_by(|a, b| a.entity_type.cmp(&b.entity_type));

    let owners: Vec<_> = entries
        .iter()
        .map(|e| (e.entity_type.as_str(), e.entity_id.as_str()))
        .collect();
    assert_eq!(owners, vec![("customer", "cust_1"), ("supplier", "sup_4")]);
}

#[tokio::test]
async fn junction_rows_of_other_tenants_are_invisible() {
    let h = harness();
    h.store.insert_junction_row(
        &tenant("other"),
        "customerContact",
        row(json!({"contactId": "contact_9", "customerId": "cust_1"})),
    );
    let event = insert_event("contact", json!({"id": "contact_9"}));

    let entries = h
        .dispatcher
        .audit_entries(&audit_message(&tenant("acme"), event))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn child_uses_new_image_and_old_image_on_delete() {
    let h = harness();
    let t = tenant("acme");

    let insert = insert_event(
        "salesOrderLine",
        json!({"id": "sol_1", "salesOrderId": "so_7", "quantity": 2}),
    );
    let entries = h.dispatcher.audit_entries(&audit_message(&t, insert)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entity_type, "salesOrder");
    assert_eq!(entries[0].entity_id, "so_7");

    let delete = delete_event(
        "salesOrderLine",
        json!({"id": "sol_1", "salesOrderId": "so_7", "quantity": 2}),
    );
    let entries = h.dispatcher.audit_entries(&audit_message(&t, delete)).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entity_id, "so_7");
    assert_eq!(entries[0].diff.as_ref().unwrap().get("quantity").unwrap().new, json!(null));
}

#[tokio::test]
async fn child_without_owner_or_with_numeric_owner() {
    let h = harness();
    let t = tenant("acme");

    let orphan = insert_event("purchaseOrderLine", json!({"id": "pol_1", "purchaseOrderId": null}));
    assert!(h
        .dispatcher
        .audit_entries(&audit_message(&t, orphan))
        .await
        .unwrap()
        .is_empty());

    let numeric = insert_event("purchaseOrderLine", json!({"id": 11, "purchaseOrderId": 42}));
    let entries = h.dispatcher.audit_entries(&audit_message(&t, numeric)).await.unwrap();
    assert_eq!(entries[0].entity_id, "42");
}

#[tokio::test]
async fn update_touching_only_skipped_fields_is_dropped() {
    let h = harness();
    let t = tenant("acme");
    let event = update_event(
        "item",
        json!({"id": "item_1", "name": "Bolt", "updatedAt": "a", "updatedBy": "u1"}),
        json!({"id": "item_1", "name": "Bolt", "updatedAt": "b", "updatedBy": "u2"}),
    );

    let entries = h.dispatcher.audit_entries(&audit_message(&t, event)).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn handler_config_overrides_skip_list() {
    let h = harness();
    let t = tenant("acme");
    let event = update_event(
        "item",
        json!({"id": "item_1", "name": "Bolt", "sku": "B-1"}),
        json!({"id": "item_1", "name": "Bolt M8", "sku": "B-2"}),
    );
    let mut message = audit_message(&t, event);
    message.handler_config = json!({"skipFields": ["sku"]});

    let entries = h.dispatcher.audit_entries(&message).await.unwrap();
    let diff = entries[0].diff.as_ref().unwrap();
    assert!(diff.get("name").is_some());
    assert!(diff.get("sku").is_none());
}

#[tokio::test]
async fn unknown_table_yields_nothing() {
    let h = harness();
    let event = insert_event("journal", json!({"id": "j_1"}));
    let entries = h
        .dispatcher
        .audit_entries(&audit_message(&tenant("acme"), event))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn junction_lookup_failure_propagates() {
    let h = harness();
    h.store.fail_on("find_owner");
    let event = insert_event("address", json!({"id": "addr_1"}));

    let err = h
        .dispatcher
        .audit_entries(&audit_message(&tenant("acme"), event))
        .await
        .unwrap_err();
    assert!(matches!(err, AuditError::Database(_)));
}
