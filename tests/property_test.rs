use change_audit::domain::event::{Operation, RawCapturedEvent, Row, CapturedEvent};
use change_audit::infra::memory::MemoryStore;
use change_audit::services::diff::{apply, diff};
use change_audit::services::registry::{EntityRegistry, title_case};
use change_audit::services::resolver::EntityResolver;
use change_audit::domain::entity::TableConfig;
use change_audit::domain::id::TenantId;
use chrono::Utc;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
        prop::collection::btree_map("[a-c]", any::<i16>(), 0..3)
            .prop_map(|m| json!(m)),
    ]
}

fn arb_row() -> impl Strategy<Value = Row> {
    prop::collection::btree_map("[a-f]{1,2}", arb_value(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn event(table: &str, operation: Operation, old: Option<Row>, new: Option<Row>) -> CapturedEvent {
    CapturedEvent::try_from(RawCapturedEvent {
        table: table.to_string(),
        operation,
        record_id: Some("rec_1".into()),
        old,
        new,
        actor_id: None,
        timestamp: Utc::now(),
    })
    .unwrap()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Applying diff(A, B) onto A reproduces B on every field either side has.
    #[test]
    fn diff_round_trip(a in arb_row(), b in arb_row()) {
        let d = diff(Some(&a), Some(&b), &[]);
        let rebuilt = apply(&a, &d);
        for (key, value) in &b {
            prop_assert_eq!(rebuilt.get(key), Some(value));
        }
        for key in a.keys().filter(|k| !b.contains_key(*k)) {
            prop_assert_eq!(rebuilt.get(key), Some(&Value::Null));
        }
    }

    /// A field shows up in the diff iff it changed and is not skipped.
    #[test]
    fn diff_reports_exactly_changed_fields(a in arb_row(), b in arb_row(), skip in "[a-f]{1,2}") {
        let d = diff(Some(&a), Some(&b), &[skip.as_str()]);
        let null = Value::Null;
        for key in a.keys().chain(b.keys()) {
            let changed = a.get(key).unwrap_or(&null) != b.get(key).unwrap_or(&null);
            let expected = changed && key != &skip;
            prop_assert_eq!(d.get(key).is_some(), expected, "field {}", key);
        }
    }

    #[test]
    fn diff_of_identical_rows_is_empty(a in arb_row()) {
        prop_assert!(diff(Some(&a), Some(&a.clone()), &[]).is_empty());
    }

    /// Title Case output has no separators and starts each word upper-case.
    #[test]
    fn title_case_shape(name in "[a-z]{1,6}([_A-Z][a-z]{1,6}){0,3}") {
        let label = title_case(&name);
        prop_assert!(!label.contains('_'));
        prop_assert!(!label.contains("  "));
        for word in label.split(' ') {
            let first = word.chars().next().unwrap();
            prop_assert!(first.is_uppercase(), "{} in {}", word, label);
        }
    }

    /// Root and Extension tables resolve to the record id (except Extension
    /// INSERTs); Child tables resolve to the owning column of the current image.
    #[test]
    fn direct_resolution_rules(
        owner in "[a-z0-9]{1,10}",
        op in prop_oneof![
            Just(Operation::Insert),
            Just(Operation::Update),
            Just(Operation::Delete),
        ],
    ) {
        let registry = Arc::new(EntityRegistry::builtin().unwrap());
        let resolver = EntityResolver::new(registry.clone(), Arc::new(MemoryStore::new()));
        let tenant = TenantId::new("acme").unwrap();
        let rt = runtime();

        for table in registry.all_auditable_tables() {
            let row: Row = json!({"id": "rec_1", "customerId": owner, "supplierId": owner,
                "salesOrderId": owner, "purchaseOrderId": owner})
                .as_object()
                .cloned()
                .unwrap();
            let (old, new) = match op {
                Operation::Insert => (None, Some(row)),
                Operation::Update => (Some(row.clone()), Some(row)),
                _ => (Some(row), None),
            };
            let ev = event(table, op, old, new);

            for matched in registry.entity_configs_for(table) {
                let result = rt.block_on(resolver.resolve(&tenant, &ev, matched)).unwrap();
                match matched.table_config {
                    TableConfig::Root { .. } => {
                        prop_assert_eq!(result.map(|a| a.entity_id), Some("rec_1".to_string()));
                    }
                    TableConfig::Extension { .. } => {
                        let expected = (op != Operation::Insert).then(|| "rec_1".to_string());
                        prop_assert_eq!(result.map(|a| a.entity_id), expected);
                    }
                    TableConfig::Child { .. } => {
                        prop_assert_eq!(result.map(|a| a.entity_id), Some(owner.clone()));
                    }
                    // No junction rows exist, so every indirect lookup misses.
                    TableConfig::Indirect { .. } => prop_assert!(result.is_none()),
                }
            }
        }
    }
}
