use {
    super::error::AuditError,
    super::id::TenantId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    std::fmt,
    uuid::Uuid,
};

/// A row snapshot as captured by the trigger: column name → JSON value.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Truncate,
}

impl Operation {
    pub const ALL: [Operation; 4] = [Self::Insert, Self::Update, Self::Delete, Self::Truncate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Operation {
    type Error = AuditError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "TRUNCATE" => Ok(Self::Truncate),
            other => Err(AuditError::Validation(format!("unknown operation: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HandlerType {
    Webhook,
    Workflow,
    Sync,
    Search,
    Audit,
}

impl HandlerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "WEBHOOK",
            Self::Workflow => "WORKFLOW",
            Self::Sync => "SYNC",
            Self::Search => "SEARCH",
            Self::Audit => "AUDIT",
        }
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for HandlerType {
    type Error = AuditError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "WEBHOOK" => Ok(Self::Webhook),
            "WORKFLOW" => Ok(Self::Workflow),
            "SYNC" => Ok(Self::Sync),
            "SEARCH" => Ok(Self::Search),
            "AUDIT" => Ok(Self::Audit),
            other => Err(AuditError::Validation(format!(
                "unknown handler type: {other}"
            ))),
        }
    }
}

/// Row images carried by a captured change. Which snapshots exist is fixed
/// by the operation, so invalid combinations cannot be represented.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert { new: Row },
    Update { old: Row, new: Row },
    Delete { old: Row },
    Truncate { old: Row },
}

impl RowChange {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Insert { .. } => Operation::Insert,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
            Self::Truncate { .. } => Operation::Truncate,
        }
    }

    pub fn old(&self) -> Option<&Row> {
        match self {
            Self::Insert { .. } => None,
            Self::Update { old, .. } | Self::Delete { old } | Self::Truncate { old } => Some(old),
        }
    }

    pub fn new_row(&self) -> Option<&Row> {
        match self {
            Self::Insert { new } | Self::Update { new, .. } => Some(new),
            Self::Delete { .. } | Self::Truncate { .. } => None,
        }
    }

    /// The snapshot that describes the row's current identity: `new` when the
    /// row still exists, `old` when it is gone.
    pub fn current(&self) -> &Row {
        match self {
            Self::Insert { new } | Self::Update { new, .. } => new,
            Self::Delete { old } | Self::Truncate { old } => old,
        }
    }
}

/// One row-level change as captured inside the originating transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCapturedEvent", into = "RawCapturedEvent")]
pub struct CapturedEvent {
    pub table: String,
    pub record_id: String,
    pub change: RowChange,
    pub actor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CapturedEvent {
    pub fn operation(&self) -> Operation {
        self.change.operation()
    }
}

/// Wire shape of a captured change, before envelope validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCapturedEvent {
    pub table: String,
    pub operation: Operation,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub old: Option<Row>,
    #[serde(default)]
    pub new: Option<Row>,
    #[serde(default)]
    pub actor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<RawCapturedEvent> for CapturedEvent {
    type Error = AuditError;

    fn try_from(raw: RawCapturedEvent) -> Result<Self, Self::Error> {
        if raw.table.trim().is_empty() {
            return Err(AuditError::Validation("captured event has empty table".into()));
        }

        let change = match (raw.operation, raw.old, raw.new) {
            (Operation::Insert, None, Some(new)) => RowChange::Insert { new },
            (Operation::Update, Some(old), Some(new)) => RowChange::Update { old, new },
            (Operation::Delete, Some(old), None) => RowChange::Delete { old },
            (Operation::Truncate, Some(old), None) => RowChange::Truncate { old },
            (op, old, new) => {
                return Err(AuditError::Validation(format!(
                    "{op} event on {} has old={} new={}",
                    raw.table,
                    if old.is_some() { "present" } else { "null" },
                    if new.is_some() { "present" } else { "null" },
                )));
            }
        };

        let record_id = match raw.record_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => change
                .current()
                .get("id")
                .and_then(value_as_id)
                .ok_or_else(|| {
                    AuditError::Validation(format!(
                        "{} event on {} has no record id",
                        change.operation(),
                        raw.table
                    ))
                })?,
        };

        Ok(Self {
            table: raw.table,
            record_id,
            change,
            actor_id: raw.actor_id,
            timestamp: raw.timestamp,
        })
    }
}

impl From<CapturedEvent> for RawCapturedEvent {
    fn from(event: CapturedEvent) -> Self {
        let operation = event.operation();
        let (old, new) = match event.change {
            RowChange::Insert { new } => (None, Some(new)),
            RowChange::Update { old, new } => (Some(old), Some(new)),
            RowChange::Delete { old } | RowChange::Truncate { old } => (Some(old), None),
        };
        Self {
            table: event.table,
            operation,
            record_id: Some(event.record_id),
            old,
            new,
            actor_id: event.actor_id,
            timestamp: event.timestamp,
        }
    }
}

/// Render a column value as an entity id. Strings pass through, numbers are
/// stringified, anything else (null, objects) is not an id.
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Payload enqueued once per (captured change, matching subscription).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub subscription_id: Uuid,
    pub trigger_type: Operation,
    pub handler_type: HandlerType,
    pub handler_config: Value,
    pub tenant_id: TenantId,
    pub actor_id: Option<String>,
    pub event: CapturedEvent,
}
