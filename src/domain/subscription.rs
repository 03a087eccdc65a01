use {
    super::error::AuditError,
    super::event::{HandlerType, Operation},
    super::id::TenantId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    uuid::Uuid,
};

/// A registered interest in one table's change stream for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    pub table: String,
    pub tenant_id: TenantId,
    pub operations: Vec<Operation>,
    pub handler_type: HandlerType,
    pub config: Value,
    pub filter: Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, table: &str, operation: Operation) -> bool {
        self.active && self.table == table && self.operations.contains(&operation)
    }
}

/// Caller-supplied parameters for `SubscriptionRegistry::create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscription {
    pub name: String,
    pub table: String,
    pub operations: Vec<Operation>,
    pub handler_type: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Validated subscription ready to be upserted on `(tenant_id, name)`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubscription {
    pub id: Uuid,
    pub name: String,
    pub table: String,
    pub tenant_id: TenantId,
    pub operations: Vec<Operation>,
    pub handler_type: HandlerType,
    pub config: Value,
    pub filter: Value,
    pub active: bool,
}

impl NewSubscription {
    pub fn validate(tenant_id: TenantId, params: CreateSubscription) -> Result<Self, AuditError> {
        let name = params.name.trim().to_string();
        if name.is_empty() {
            return Err(AuditError::Validation("subscription name is required".into()));
        }
        let table = params.table.trim().to_string();
        if table.is_empty() {
            return Err(AuditError::Validation("subscription table is required".into()));
        }
        if params.operations.is_empty() {
            return Err(AuditError::Validation(
                "subscription needs at least one operation".into(),
            ));
        }
        let handler_type = HandlerType::try_from(params.handler_type.as_str())?;

        let mut operations = params.operations;
        operations.sort_by_key(|op| Operation::ALL.iter().position(|o| o == op));
        operations.dedup();

        Ok(Self {
            id: Uuid::now_v7(),
            name,
            table,
            tenant_id,
            operations,
            handler_type,
            config: object_or_empty(params.config)?,
            filter: object_or_empty(params.filter)?,
            active: params.active.unwrap_or(true),
        })
    }

    /// The AUDIT subscription `sync`/`enable` provision for one table.
    pub fn audit_for_table(tenant_id: TenantId, table: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: audit_subscription_name(table),
            table: table.to_string(),
            tenant_id,
            operations: vec![Operation::Insert, Operation::Update, Operation::Delete],
            handler_type: HandlerType::Audit,
            config: Value::Object(Default::default()),
            filter: Value::Object(Default::default()),
            active: true,
        }
    }
}

pub fn audit_subscription_name(table: &str) -> String {
    format!("audit-{table}")
}

fn object_or_empty(value: Option<Value>) -> Result<Value, AuditError> {
    match value {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(v @ Value::Object(_)) => Ok(v),
        Some(other) => Err(AuditError::Validation(format!(
            "subscription config/filter must be an object, got: {other}"
        ))),
    }
}
