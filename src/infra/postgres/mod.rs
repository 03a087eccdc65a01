pub mod audit_repo;
pub mod job_repo;
pub mod junction_repo;
pub mod subscription_repo;
pub mod tenant_repo;

pub use {
    audit_repo::PgAuditRepository, job_repo::PgJobQueue, junction_repo::PgJunctionLookup,
    subscription_repo::PgSubscriptionRepository, tenant_repo::PgTenantRepository,
};

pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
