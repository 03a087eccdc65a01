use {
    crate::domain::entity::{ENTITY_MAP, EntityDefinition, TABLE_LABELS, TableConfig},
    crate::domain::error::AuditError,
    std::collections::{HashMap, HashSet},
};

/// One entity a table contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMatch {
    pub entity_type: &'static str,
    pub label: &'static str,
    pub table_config: TableConfig,
}

/// Lookup indexes derived once from the static entity map.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    definitions: Vec<EntityDefinition>,
    by_table: HashMap<&'static str, Vec<EntityMatch>>,
    entity_labels: HashMap<&'static str, &'static str>,
    table_labels: HashMap<&'static str, &'static str>,
    all_tables: Vec<&'static str>,
}

impl EntityRegistry {
    pub fn new(definitions: &[EntityDefinition]) -> Result<Self, AuditError> {
        let mut by_table: HashMap<&'static str, Vec<EntityMatch>> = HashMap::new();
        let mut entity_labels = HashMap::new();
        let mut all_tables = Vec::new();
        let mut seen_tables = HashSet::new();

        for def in definitions {
            validate_definition(def)?;
            if entity_labels.insert(def.key, def.label).is_some() {
                return Err(AuditError::Configuration(format!(
                    "entity type {} declared twice",
                    def.key
                )));
            }

            let mut tables_in_entity = HashSet::new();
            for config in def.tables {
                let table = config.table();
                if !tables_in_entity.insert(table) {
                    return Err(AuditError::Configuration(format!(
                        "table {table} listed twice under entity {}",
                        def.key
                    )));
                }
                by_table.entry(table).or_default().push(EntityMatch {
                    entity_type: def.key,
                    label: def.label,
                    table_config: *config,
                });
                if seen_tables.insert(table) {
                    all_tables.push(table);
                }
            }
        }

        Ok(Self {
            definitions: definitions.to_vec(),
            by_table,
            entity_labels,
            table_labels: TABLE_LABELS.iter().copied().collect(),
            all_tables,
        })
    }

    /// Registry over the built-in entity map.
    pub fn builtin() -> Result<Self, AuditError> {
        Self::new(ENTITY_MAP)
    }

    pub fn is_auditable_table(&self, table: &str) -> bool {
        self.by_table.contains_key(table)
    }

    /// Every entity `table` belongs to. Callers must fan out over all matches.
    pub fn entity_configs_for(&self, table: &str) -> &[EntityMatch] {
        self.by_table.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deduplicated, in declaration order.
    pub fn all_auditable_tables(&self) -> &[&'static str] {
        &self.all_tables
    }

    pub fn definitions(&self) -> &[EntityDefinition] {
        &self.definitions
    }

    pub fn entity_label(&self, entity_type: &str) -> Option<&'static str> {
        self.entity_labels.get(entity_type).copied()
    }

    /// Configured label, or the physical name in Title Case.
    pub fn table_label(&self, table: &str) -> String {
        match self.table_labels.get(table) {
            Some(label) => (*label).to_string(),
            None => title_case(table),
        }
    }
}

fn validate_definition(def: &EntityDefinition) -> Result<(), AuditError> {
    if !is_identifier(def.key) {
        return Err(AuditError::Configuration(format!(
            "invalid entity key: {:?}",
            def.key
        )));
    }
    if def.tables.is_empty() {
        return Err(AuditError::Configuration(format!(
            "entity {} has no tables",
            def.key
        )));
    }

    let mut roots = 0;
    for config in def.tables {
        let columns: Vec<&str> = match *config {
            TableConfig::Root { table } => {
                roots += 1;
                vec![table]
            }
            TableConfig::Extension { table } => vec![table],
            TableConfig::Child {
                table,
                entity_id_column,
            } => vec![table, entity_id_column],
            TableConfig::Indirect { table, junction } => vec![
                table,
                junction.table,
                junction.foreign_key,
                junction.entity_id_column,
            ],
        };
        if let Some(bad) = columns.iter().find(|c| !is_identifier(c)) {
            return Err(AuditError::Configuration(format!(
                "entity {}: {} table config has invalid identifier {bad:?}",
                def.key,
                config.role()
            )));
        }
    }

    if roots != 1 {
        return Err(AuditError::Configuration(format!(
            "entity {} must have exactly one root table, found {roots}",
            def.key
        )));
    }
    Ok(())
}

/// Table and column names are interpolated into lookups, so keep them plain.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `purchaseOrderLine` / `purchase_order_line` → `Purchase Order Line`.
pub fn title_case(name: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if c == '_' || c == '-' || c == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
