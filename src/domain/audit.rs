use {
    super::error::AuditError,
    super::event::Operation,
    super::id::TenantId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::BTreeMap,
    uuid::Uuid,
};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Field path → before/after, holding only changed, non-skipped fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditDiff(pub BTreeMap<String, FieldChange>);

impl AuditDiff {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Entry produced by the audit handler, before the store assigns `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub table_name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: Operation,
    pub actor_id: Option<String>,
    pub diff: Option<AuditDiff>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub table_name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: Operation,
    pub actor_id: Option<String>,
    pub diff: Option<AuditDiff>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn from_new(entry: NewAuditEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id: entry.id,
            tenant_id: entry.tenant_id,
            table_name: entry.table_name,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            operation: entry.operation,
            actor_id: entry.actor_id,
            diff: entry.diff,
            metadata: entry.metadata,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Clamp a caller-supplied page: limit into `1..=MAX_PAGE_LIMIT`, offset ≥ 0.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Result<Self, AuditError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        let offset = offset.unwrap_or(0);
        if limit < 1 {
            return Err(AuditError::Validation(format!(
                "limit must be positive, got: {limit}"
            )));
        }
        if offset < 0 {
            return Err(AuditError::Validation(format!(
                "offset cannot be negative, got: {offset}"
            )));
        }
        Ok(Self {
            limit: limit.min(MAX_PAGE_LIMIT),
            offset,
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

/// Predicates for the tenant-wide audit log query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditLogFilters {
    pub entity_type: Option<String>,
    pub actor_id: Option<String>,
    pub operation: Option<Operation>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

impl AuditLogFilters {
    /// In-process evaluation of the same predicate the SQL builder emits.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(entity_type) = &self.entity_type {
            if &entry.entity_type != entity_type {
                return false;
            }
        }
        if let Some(actor_id) = &self.actor_id {
            if entry.actor_id.as_ref() != Some(actor_id) {
                return false;
            }
        }
        if let Some(operation) = self.operation {
            if entry.operation != operation {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if entry.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.created_at > end {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let diff_text = entry
                .diff
                .as_ref()
                .and_then(|d| serde_json::to_string(d).ok())
                .unwrap_or_default();
            let hit = entry.entity_id.to_lowercase().contains(&needle)
                || entry.table_name.to_lowercase().contains(&needle)
                || diff_text.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditLogPage {
    pub data: Vec<AuditLogEntry>,
    pub count: i64,
}

/// Manifest row for one archival run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogArchive {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub archive_path: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub row_count: i64,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewArchive {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub archive_path: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub row_count: i64,
    pub size_bytes: i64,
}
