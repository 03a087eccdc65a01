//! Field-level diffs between two row snapshots.
//!
//! Values are compared structurally, so `{"a":1,"b":2}` and `{"b":2,"a":1}`
//! are equal. A JSON-object column counts as a single field unless it is
//! listed in `flatten`, in which case its leaves are diffed as dot-paths.

use {
    crate::domain::audit::{AuditDiff, FieldChange},
    crate::domain::event::{Row, RowChange},
    serde_json::{Map, Value},
    std::collections::{BTreeMap, BTreeSet},
};

/// Bookkeeping columns that change on every write.
pub const DEFAULT_SKIP_FIELDS: &[&str] = &["updatedAt", "updatedBy"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub skip_fields: Vec<String>,
    pub flatten: Vec<String>,
}

impl DiffOptions {
    pub fn with_defaults() -> Self {
        Self {
            skip_fields: DEFAULT_SKIP_FIELDS.iter().map(|s| s.to_string()).collect(),
            flatten: Vec::new(),
        }
    }

    /// Read `skipFields` / `flattenFields` from an AUDIT subscription config,
    /// falling back to the defaults for whichever is absent.
    pub fn from_handler_config(config: &Value) -> Self {
        let mut options = Self::with_defaults();
        if let Some(skip) = string_list(config, "skipFields") {
            options.skip_fields = skip;
        }
        if let Some(flatten) = string_list(config, "flattenFields") {
            options.flatten = flatten;
        }
        options
    }

    fn skips(&self, field: &str) -> bool {
        self.skip_fields.iter().any(|s| s == field)
    }
}

fn string_list(config: &Value, key: &str) -> Option<Vec<String>> {
    config.get(key)?.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}

/// Diff two snapshots; `None` stands for the missing side of an INSERT or DELETE.
pub fn diff(old: Option<&Row>, new: Option<&Row>, skip_fields: &[&str]) -> AuditDiff {
    let options = DiffOptions {
        skip_fields: skip_fields.iter().map(|s| s.to_string()).collect(),
        flatten: Vec::new(),
    };
    diff_with_options(old, new, &options)
}

pub fn diff_with_options(old: Option<&Row>, new: Option<&Row>, options: &DiffOptions) -> AuditDiff {
    let empty = Map::new();
    let old = flatten_row(old.unwrap_or(&empty), &options.flatten);
    let new = flatten_row(new.unwrap_or(&empty), &options.flatten);

    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changes = BTreeMap::new();

    for key in keys {
        let root = key.split('.').next().unwrap_or(key.as_str());
        if options.skips(key) || options.skips(root) {
            continue;
        }
        let before = old.get(key).cloned().unwrap_or(Value::Null);
        let after = new.get(key).cloned().unwrap_or(Value::Null);
        if before != after {
            changes.insert(
                key.clone(),
                FieldChange {
                    old: before,
                    new: after,
                },
            );
        }
    }

    AuditDiff(changes)
}

/// Diff the row images carried by a captured change.
pub fn diff_change(change: &RowChange, options: &DiffOptions) -> AuditDiff {
    diff_with_options(change.old(), change.new_row(), options)
}

fn flatten_row(row: &Row, flatten: &[String]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in row {
        match value {
            Value::Object(inner) if flatten.iter().any(|f| f == key) => {
                flatten_into(key, inner, &mut out);
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

fn flatten_into(prefix: &str, object: &Map<String, Value>, out: &mut BTreeMap<String, Value>) {
    for (key, value) in object {
        let path = format!("{prefix}.{key}");
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(&path, inner, out),
            _ => {
                out.insert(path, value.clone());
            }
        }
    }
}

/// Apply a diff's `new` side onto a row. Used to reconstruct history.
pub fn apply(row: &Row, diff: &AuditDiff) -> Row {
    let mut out = row.clone();
    for (field, change) in &diff.0 {
        out.insert(field.clone(), change.new.clone());
    }
    out
}
