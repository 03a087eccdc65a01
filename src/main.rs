use {
    change_audit::{
        AppState,
        adapters::http,
        config::Config,
        infra::{
            archive_store::FsArchiveStore,
            postgres::{
                self, PgAuditRepository, PgJobQueue, PgJunctionLookup, PgSubscriptionRepository,
                PgTenantRepository,
            },
        },
        services::{
            archival::ArchivalManager, audit_log::AuditLogStore, capture::CaptureService,
            dispatcher::Dispatcher, registry::EntityRegistry, resolver::EntityResolver,
            subscriptions::SubscriptionRegistry, worker,
        },
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("invalid configuration");
    let entities = Arc::new(EntityRegistry::builtin().expect("invalid entity map"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    postgres::run_migrations(&pool)
        .await
        .expect("failed to run migrations");

    let subscription_repo = Arc::new(PgSubscriptionRepository::new(pool.clone()));
    let audit_repo = Arc::new(PgAuditRepository::new(pool.clone()));
    let tenant_repo = Arc::new(PgTenantRepository::new(pool.clone()));
    let queue = Arc::new(PgJobQueue::new(pool.clone()));
    let junctions = Arc::new(PgJunctionLookup::new(pool, Some("companyId".into())));
    let archive_files = Arc::new(FsArchiveStore::new(
        &config.archive_root,
        &config.archive_base_url,
        config.archive_signing_key.clone(),
    ));

    let subscriptions = SubscriptionRegistry::new(subscription_repo.clone(), entities.clone());
    let audit_log = AuditLogStore::new(
        audit_repo.clone(),
        tenant_repo.clone(),
        subscriptions.clone(),
        archive_files.clone(),
        config.archive_url_ttl,
    );
    let resolver = Arc::new(EntityResolver::new(entities.clone(), junctions));
    let dispatcher = Arc::new(Dispatcher::new(resolver, audit_log.clone()));
    let archival = Arc::new(ArchivalManager::new(
        audit_repo,
        tenant_repo,
        archive_files.clone(),
        config.retention_days,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = [
        tokio::spawn(worker::run_dispatch_worker(
            queue.clone(),
            dispatcher,
            config.dispatch_batch_size,
            config.dispatch_poll_interval,
            shutdown_rx.clone(),
        )),
        tokio::spawn(worker::run_reaper(queue.clone(), shutdown_rx.clone())),
        tokio::spawn(worker::run_archival_scheduler(
            archival,
            config.archive_interval,
            config.archive_concurrency,
            shutdown_rx,
        )),
    ];

    let state = AppState {
        entities,
        audit_log,
        subscriptions,
        capture: CaptureService::new(subscription_repo, queue),
        archive_files,
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "worker task panicked");
        }
    }
    tracing::info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
