use {
    crate::domain::entity::Junction,
    crate::domain::id::TenantId,
    crate::domain::repository::{JunctionLookup, RepoFuture},
    sqlx::PgPool,
};

/// Junction lookups against the tenant's business tables.
///
/// Identifiers come from the compile-time entity map and are validated by
/// `EntityRegistry::new`, so quoting them into the statement is safe.
pub struct PgJunctionLookup {
    pool: PgPool,
    tenant_column: Option<String>,
}

impl PgJunctionLookup {
    /// `tenant_column` scopes lookups when business tables are shared
    /// between tenants (e.g. `companyId`).
    pub fn new(pool: PgPool, tenant_column: Option<String>) -> Self {
        Self {
            pool,
            tenant_column,
        }
    }

    fn statement(&self, junction: &Junction) -> String {
        let mut sql = format!(
            r#"SELECT "{owner}"::text FROM "{table}" WHERE "{fk}"::text = $1"#,
            owner = junction.entity_id_column,
            table = junction.table,
            fk = junction.foreign_key,
        );
        if let Some(column) = &self.tenant_column {
            sql.push_str(&format!(r#" AND "{column}"::text = $2"#));
        }
        sql.push_str(" LIMIT 1");
        sql
    }
}

impl JunctionLookup for PgJunctionLookup {
    fn find_owner(
        &self,
        tenant_id: &TenantId,
        junction: &Junction,
        record_id: &str,
    ) -> RepoFuture<'_, Option<String>> {
        let sql = self.statement(junction);
        let tenant_id = tenant_id.clone();
        let record_id = record_id.to_string();
        Box::pin(async move {
            let mut query = sqlx::query_scalar::<_, Option<String>>(&sql).bind(record_id);
            if self.tenant_column.is_some() {
                query = query.bind(tenant_id.into_inner());
            }
            let owner = query.fetch_optional(&self.pool).await?;
            Ok(owner.flatten())
        })
    }
}
