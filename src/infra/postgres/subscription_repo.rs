use {
    crate::domain::error::AuditError,
    crate::domain::event::{HandlerType, Operation},
    crate::domain::id::TenantId,
    crate::domain::repository::{RepoFuture, SubscriptionRepository},
    crate::domain::subscription::{NewSubscription, Subscription},
    chrono::{DateTime, Utc},
    sqlx::{PgConnection, PgPool},
    uuid::Uuid,
};

const SUBSCRIPTION_COLUMNS: &str = "id, name, table_name, tenant_id, operations, handler_type, \
                                    config, filter, active, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    name: String,
    table_name: String,
    tenant_id: String,
    operations: Vec<String>,
    handler_type: String,
    config: serde_json::Value,
    filter: serde_json::Value,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = AuditError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let operations = row
            .operations
            .iter()
            .map(|op| Operation::try_from(op.as_str()))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            id: row.id,
            name: row.name,
            table: row.table_name,
            tenant_id: TenantId::new(row.tenant_id)?,
            operations,
            handler_type: HandlerType::try_from(row.handler_type.as_str())?,
            config: row.config,
            filter: row.filter,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_subscriptions(rows: Vec<SubscriptionRow>) -> Result<Vec<Subscription>, AuditError> {
    rows.into_iter().map(Subscription::try_from).collect()
}

pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn upsert_row(
    conn: &mut PgConnection,
    sub: &NewSubscription,
) -> Result<Subscription, AuditError> {
    let operations: Vec<&str> = sub.operations.iter().map(|op| op.as_str()).collect();
    // The id is kept on conflict so existing references stay valid.
    let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
        r#"
        INSERT INTO event_subscriptions
            (id, name, table_name, tenant_id, operations, handler_type, config, filter, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (tenant_id, name) DO UPDATE SET
            table_name = EXCLUDED.table_name,
            operations = EXCLUDED.operations,
            handler_type = EXCLUDED.handler_type,
            config = EXCLUDED.config,
            filter = EXCLUDED.filter,
            active = EXCLUDED.active,
            updated_at = now()
        RETURNING {SUBSCRIPTION_COLUMNS}
        "#
    ))
    .bind(sub.id)
    .bind(&sub.name)
    .bind(&sub.table)
    .bind(sub.tenant_id.as_str())
    .bind(&operations)
    .bind(sub.handler_type.as_str())
    .bind(&sub.config)
    .bind(&sub.filter)
    .bind(sub.active)
    .fetch_one(&mut *conn)
    .await?;
    Subscription::try_from(row)
}

impl SubscriptionRepository for PgSubscriptionRepository {
    fn upsert(&self, subscription: &NewSubscription) -> RepoFuture<'_, Subscription> {
        let sub = subscription.clone();
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            upsert_row(&mut *conn, &sub).await
        })
    }

    fn upsert_all(&self, subscriptions: &[NewSubscription]) -> RepoFuture<'_, u64> {
        let subs = subscriptions.to_vec();
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;
            for sub in &subs {
                upsert_row(&mut *tx, sub).await?;
            }
            tx.commit().await?;
            Ok(subs.len() as u64)
        })
    }

    fn delete(&self, id: Uuid) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM event_subscriptions WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn delete_by_name(&self, tenant_id: &TenantId, name: &str) -> RepoFuture<'_, bool> {
        let tenant_id = tenant_id.clone();
        let name = name.to_string();
        Box::pin(async move {
            let result =
                sqlx::query("DELETE FROM event_subscriptions WHERE tenant_id = $1 AND name = $2")
                    .bind(tenant_id.as_str())
                    .bind(&name)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn delete_by_handler(
        &self,
        tenant_id: &TenantId,
        handler_type: HandlerType,
    ) -> RepoFuture<'_, u64> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM event_subscriptions WHERE tenant_id = $1 AND handler_type = $2",
            )
            .bind(tenant_id.as_str())
            .bind(handler_type.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
    }

    fn audit_subscription_names(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<String>> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let provisioned: Option<bool> = sqlx::query_scalar(
                "SELECT audit_provisioned_at IS NOT NULL FROM tenants WHERE tenant_id = $1",
            )
            .bind(tenant_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            if provisioned != Some(true) {
                return Err(AuditError::NotProvisioned(tenant_id.to_string()));
            }

            let names = sqlx::query_scalar::<_, String>(
                "SELECT name FROM event_subscriptions \
                 WHERE tenant_id = $1 AND handler_type = 'AUDIT' ORDER BY name",
            )
            .bind(tenant_id.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(names)
        })
    }

    fn active_for(
        &self,
        tenant_id: &TenantId,
        table: &str,
        operation: Operation,
    ) -> RepoFuture<'_, Vec<Subscription>> {
        let tenant_id = tenant_id.clone();
        let table = table.to_string();
        Box::pin(async move {
            let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM event_subscriptions \
                 WHERE tenant_id = $1 AND table_name = $2 AND active AND $3 = ANY(operations) \
                 ORDER BY created_at, id"
            ))
            .bind(tenant_id.as_str())
            .bind(&table)
            .bind(operation.as_str())
            .fetch_all(&self.pool)
            .await?;
            into_subscriptions(rows)
        })
    }

    fn list(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<Subscription>> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM event_subscriptions \
                 WHERE tenant_id = $1 ORDER BY name"
            ))
            .bind(tenant_id.as_str())
            .fetch_all(&self.pool)
            .await?;
            into_subscriptions(rows)
        })
    }
}
