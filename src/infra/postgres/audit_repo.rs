use {
    crate::domain::audit::{
        AuditDiff, AuditLogArchive, AuditLogEntry, AuditLogFilters, NewArchive, NewAuditEntry,
        Page,
    },
    crate::domain::error::AuditError,
    crate::domain::event::Operation,
    crate::domain::id::TenantId,
    crate::domain::repository::{AuditRepository, RepoFuture},
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Postgres, QueryBuilder, types::Json},
    uuid::Uuid,
};

/// Stay well under Postgres' 65535 bind parameters per statement.
const INSERT_CHUNK: usize = 5_000;

const ENTRY_COLUMNS: &str = "id, tenant_id, table_name, entity_type, entity_id, operation, \
                             actor_id, diff, metadata, created_at";

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    tenant_id: String,
    table_name: String,
    entity_type: String,
    entity_id: String,
    operation: String,
    actor_id: Option<String>,
    diff: Option<Json<AuditDiff>>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for AuditLogEntry {
    type Error = AuditError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: TenantId::new(row.tenant_id)?,
            table_name: row.table_name,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            operation: Operation::try_from(row.operation.as_str())?,
            actor_id: row.actor_id,
            diff: row.diff.map(|d| d.0),
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ArchiveRow {
    id: Uuid,
    tenant_id: String,
    archive_path: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    row_count: i64,
    size_bytes: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<ArchiveRow> for AuditLogArchive {
    type Error = AuditError;

    fn try_from(row: ArchiveRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            tenant_id: TenantId::new(row.tenant_id)?,
            archive_path: row.archive_path,
            start_date: row.start_date,
            end_date: row.end_date,
            row_count: row.row_count,
            size_bytes: row.size_bytes,
            created_at: row.created_at,
        })
    }
}

fn into_entries(rows: Vec<EntryRow>) -> Result<Vec<AuditLogEntry>, AuditError> {
    rows.into_iter().map(AuditLogEntry::try_from).collect()
}

/// Escape LIKE metacharacters so user search text matches literally.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Shared by the page query and the count query so both see the same rows.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: &TenantId, filters: &AuditLogFilters) {
    qb.push(" WHERE tenant_id = ")
        .push_bind(tenant_id.as_str().to_string());
    if let Some(entity_type) = &filters.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(actor_id) = &filters.actor_id {
        qb.push(" AND actor_id = ").push_bind(actor_id.clone());
    }
    if let Some(operation) = filters.operation {
        qb.push(" AND operation = ").push_bind(operation.as_str());
    }
    if let Some(start) = filters.start_date {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filters.end_date {
        qb.push(" AND created_at <= ").push_bind(end);
    }
    if let Some(search) = filters.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        qb.push(" AND (entity_id ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR table_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR diff::text ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_entries_inner(&self, entries: Vec<NewAuditEntry>) -> Result<u64, AuditError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in entries.chunks(INSERT_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO audit_log \
                 (id, tenant_id, table_name, entity_type, entity_id, operation, actor_id, diff, metadata) ",
            );
            qb.push_values(chunk, |mut row, e| {
                row.push_bind(e.id)
                    .push_bind(e.tenant_id.as_str().to_string())
                    .push_bind(e.table_name.clone())
                    .push_bind(e.entity_type.clone())
                    .push_bind(e.entity_id.clone())
                    .push_bind(e.operation.as_str())
                    .push_bind(e.actor_id.clone())
                    .push_bind(e.diff.clone().map(Json))
                    .push_bind(e.metadata.clone());
            });
            // Redelivered entries carry the ids they were first written with.
            qb.push(" ON CONFLICT (tenant_id, id) DO NOTHING");
            written += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

impl AuditRepository for PgAuditRepository {
    fn insert_entries(&self, entries: &[NewAuditEntry]) -> RepoFuture<'_, u64> {
        let entries = entries.to_vec();
        Box::pin(async move { self.insert_entries_inner(entries).await })
    }

    fn entity_log(
        &self,
        tenant_id: &TenantId,
        entity_type: &str,
        entity_id: &str,
        page: Page,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>> {
        let tenant_id = tenant_id.clone();
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_string();
        Box::pin(async move {
            let rows = sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_log \
                 WHERE tenant_id = $1 AND entity_type = $2 AND entity_id = $3 \
                 ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
            ))
            .bind(tenant_id.as_str())
            .bind(&entity_type)
            .bind(&entity_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
            into_entries(rows)
        })
    }

    fn global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
        page: Page,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM audit_log"));
        push_filters(&mut qb, tenant_id, filters);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);
        Box::pin(async move {
            let rows = qb.build_query_as::<EntryRow>().fetch_all(&self.pool).await?;
            into_entries(rows)
        })
    }

    fn count_global_log(
        &self,
        tenant_id: &TenantId,
        filters: &AuditLogFilters,
    ) -> RepoFuture<'_, i64> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM audit_log");
        push_filters(&mut qb, tenant_id, filters);
        Box::pin(async move {
            let count = qb
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await?;
            Ok(count)
        })
    }

    fn entries_before(
        &self,
        tenant_id: &TenantId,
        cutoff: DateTime<Utc>,
    ) -> RepoFuture<'_, Vec<AuditLogEntry>> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let rows = sqlx::query_as::<_, EntryRow>(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_log \
                 WHERE tenant_id = $1 AND created_at < $2 \
                 ORDER BY created_at, id"
            ))
            .bind(tenant_id.as_str())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
            into_entries(rows)
        })
    }

    fn delete_before(&self, tenant_id: &TenantId, cutoff: DateTime<Utc>) -> RepoFuture<'_, u64> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM audit_log WHERE tenant_id = $1 AND created_at < $2")
                .bind(tenant_id.as_str())
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
    }

    fn insert_archive(&self, archive: &NewArchive) -> RepoFuture<'_, AuditLogArchive> {
        let archive = archive.clone();
        Box::pin(async move {
            let row = sqlx::query_as::<_, ArchiveRow>(
                r#"
                INSERT INTO audit_log_archives
                    (id, tenant_id, archive_path, start_date, end_date, row_count, size_bytes)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET size_bytes = EXCLUDED.size_bytes
                RETURNING id, tenant_id, archive_path, start_date, end_date,
                          row_count, size_bytes, created_at
                "#,
            )
            .bind(archive.id)
            .bind(archive.tenant_id.as_str())
            .bind(&archive.archive_path)
            .bind(archive.start_date)
            .bind(archive.end_date)
            .bind(archive.row_count)
            .bind(archive.size_bytes)
            .fetch_one(&self.pool)
            .await?;
            AuditLogArchive::try_from(row)
        })
    }

    fn list_archives(&self, tenant_id: &TenantId) -> RepoFuture<'_, Vec<AuditLogArchive>> {
        let tenant_id = tenant_id.clone();
        Box::pin(async move {
            let rows = sqlx::query_as::<_, ArchiveRow>(
                r#"
                SELECT id, tenant_id, archive_path, start_date, end_date,
                       row_count, size_bytes, created_at
                FROM audit_log_archives
                WHERE tenant_id = $1
                ORDER BY created_at DESC, id DESC
                "#,
            )
            .bind(tenant_id.as_str())
            .fetch_all(&self.pool)
            .await?;
            rows.into_iter().map(AuditLogArchive::try_from).collect()
        })
    }

    fn find_archive(&self, id: Uuid) -> RepoFuture<'_, Option<AuditLogArchive>> {
        Box::pin(async move {
            let row = sqlx::query_as::<_, ArchiveRow>(
                r#"
                SELECT id, tenant_id, archive_path, start_date, end_date,
                       row_count, size_bytes, created_at
                FROM audit_log_archives
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            row.map(AuditLogArchive::try_from).transpose()
        })
    }
}
