use {
    crate::domain::error::AuditError,
    crate::domain::event::QueueMessage,
    crate::domain::repository::{JobQueue, QueuedJob, RepoFuture},
    sqlx::{PgPool, Postgres, QueryBuilder, types::Json},
    uuid::Uuid,
};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
}

/// `event_queue`-backed job queue. The capture trigger writes the same table.
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn claim_inner(&self, limit: i64) -> Result<Vec<QueuedJob>, AuditError> {
        let mut tx = self.pool.begin().await?;

        // SKIP LOCKED keeps concurrent workers from claiming the same rows.
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE event_queue
            SET status = 'processing', updated_at = now()
            WHERE id IN (
                SELECT id FROM event_queue
                WHERE status = 'pending' AND scheduled_at <= now()
                ORDER BY scheduled_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, attempts
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<QueueMessage>(row.payload) {
                Ok(message) => jobs.push(QueuedJob {
                    id: row.id,
                    message,
                    attempts: row.attempts,
                }),
                Err(e) => {
                    // Retrying cannot fix a payload that does not parse.
                    tracing::warn!(job_id = %row.id, error = %e, "undecodable queue payload");
                    sqlx::query(
                        "UPDATE event_queue SET status = 'failed', last_error = $2, updated_at = now() \
                         WHERE id = $1",
                    )
                    .bind(row.id)
                    .bind(e.to_string())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(jobs)
    }
}

impl JobQueue for PgJobQueue {
    fn enqueue(&self, messages: &[QueueMessage]) -> RepoFuture<'_, u64> {
        let messages = messages.to_vec();
        Box::pin(async move {
            if messages.is_empty() {
                return Ok(0);
            }
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO event_queue (subscription_id, tenant_id, payload) ");
            qb.push_values(&messages, |mut row, m| {
                row.push_bind(m.subscription_id)
                    .push_bind(m.tenant_id.as_str().to_string())
                    .push_bind(Json(m.clone()));
            });
            let result = qb.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
    }

    fn claim(&self, limit: i64) -> RepoFuture<'_, Vec<QueuedJob>> {
        Box::pin(self.claim_inner(limit))
    }

    fn complete(&self, id: Uuid) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE event_queue SET status = 'completed', updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    /// Exponential backoff via `scheduled_at`; `failed` once attempts run out.
    fn fail(&self, id: Uuid, error: &str) -> RepoFuture<'_, ()> {
        let error = error.to_string();
        Box::pin(async move {
            sqlx::query(
                r#"
                UPDATE event_queue
                SET attempts = attempts + 1,
                    last_error = $2,
                    status = CASE
                        WHEN attempts + 1 >= max_attempts THEN 'failed'
                        ELSE 'pending'
                    END,
                    scheduled_at = CASE
                        WHEN attempts + 1 >= max_attempts THEN scheduled_at
                        ELSE now() + make_interval(secs => power(2, attempts + 1)::int)
                    END,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(&error)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn reap_stale(&self) -> RepoFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE event_queue
                SET status = 'pending', updated_at = now()
                WHERE status = 'processing' AND updated_at < now() - interval '2 minutes'
                "#,
            )
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
    }
}
