use {
    crate::domain::error::AuditError,
    crate::domain::id::TenantId,
    crate::domain::repository::{RepoFuture, TenantRepository},
    sqlx::PgPool,
};

pub struct PgTenantRepository {
    pool: PgPool,
}

impl PgTenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Tenant row, partition and provisioned marker in one transaction.
    /// The advisory lock serializes concurrent provisioning of the same tenant,
    /// since `CREATE TABLE IF NOT EXISTS` alone can still race.
    async fn provision(&self, tenant_id: TenantId) -> Result<(), AuditError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("audit-provision:{tenant_id}"))
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO tenants (tenant_id) VALUES ($1) ON CONFLICT (tenant_id) DO NOTHING")
            .bind(tenant_id.as_str())
            .execute(&mut *tx)
            .await?;

        // DDL cannot take bind parameters. TenantId is restricted to
        // [A-Za-z0-9_-], so it is safe inside both quotes.
        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" PARTITION OF audit_log FOR VALUES IN ('{}')"#,
            tenant_id.partition_name(),
            tenant_id.as_str()
        );
        sqlx::query(&ddl).execute(&mut *tx).await?;

        sqlx::query(
            "UPDATE tenants \
             SET audit_provisioned_at = COALESCE(audit_provisioned_at, now()), updated_at = now() \
             WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(tenant_id = %tenant_id, "audit storage provisioned");
        Ok(())
    }
}

impl TenantRepository for PgTenantRepository {
    fn provision_audit_storage(&self, tenant_id: &TenantId) -> RepoFuture<'_, ()> {
        Box::pin(self.provision(tenant_id.clone()))
    }

    fn set_audit_enabled(&self, tenant_id: &TenantId, enabled: bool) -> RepoFuture<'_, ()> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO tenants (tenant_id, audit_log_enabled)
                VALUES ($1, $2)
                ON CONFLICT (tenant_id) DO UPDATE
                SET audit_log_enabled = EXCLUDED.audit_log_enabled, updated_at = now()
                "#,
            )
            .bind(tenant_id.as_str())
            .bind(enabled)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn audit_enabled(&self, tenant_id: &TenantId) -> RepoFuture<'_, bool> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let enabled: Option<bool> =
                sqlx::query_scalar("SELECT audit_log_enabled FROM tenants WHERE tenant_id = $1")
                    .bind(tenant_id.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(enabled.unwrap_or(false))
        })
    }

    fn audit_enabled_tenants(&self) -> RepoFuture<'_, Vec<TenantId>> {
        Box::pin(async move {
            let ids: Vec<String> = sqlx::query_scalar(
                "SELECT tenant_id FROM tenants WHERE audit_log_enabled ORDER BY tenant_id",
            )
            .fetch_all(&self.pool)
            .await?;
            ids.into_iter().map(TenantId::new).collect()
        })
    }
}
