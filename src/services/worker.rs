use {
    super::archival::ArchivalManager,
    super::dispatcher::{DispatchOutcome, Dispatcher},
    crate::domain::error::AuditError,
    crate::domain::repository::JobQueue,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Poll the queue and dispatch claimed jobs until shutdown.
pub async fn run_dispatch_worker(
    queue: Arc<dyn JobQueue>,
    dispatcher: Arc<Dispatcher>,
    batch_size: i64,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("dispatch worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("dispatch worker shutting down");
                return;
            }
            _ = tokio::time::sleep(poll_interval) => {}
        }

        match poll_once(&*queue, &dispatcher, batch_size).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(jobs = n, "dispatch cycle finished"),
            Err(e) => tracing::error!(error = %e, "worker poll error"),
        }
    }
}

/// Claim one batch, dispatch it, and settle each job by its own outcome.
/// Returns the number of jobs claimed.
pub async fn poll_once(
    queue: &dyn JobQueue,
    dispatcher: &Arc<Dispatcher>,
    batch_size: i64,
) -> Result<usize, AuditError> {
    let jobs = queue.claim(batch_size).await?;
    if jobs.is_empty() {
        return Ok(0);
    }

    let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
    let messages = jobs.into_iter().map(|j| j.message).collect();
    let outcomes = dispatcher.dispatch(messages).await;

    // A job that cannot be settled stays 'processing' until the reaper
    // returns it to the queue; the rest of the batch is still settled.
    for (id, outcome) in ids.iter().zip(outcomes) {
        let settled = match outcome {
            DispatchOutcome::Delivered => queue.complete(*id).await,
            DispatchOutcome::Dropped(reason) => {
                tracing::debug!(job_id = %id, reason = %reason, "job dropped");
                queue.complete(*id).await
            }
            DispatchOutcome::Failed {
                error,
                permanent: true,
            } => {
                tracing::warn!(job_id = %id, error = %error, "permanent failure, completing (no retry)");
                queue.complete(*id).await
            }
            DispatchOutcome::Failed { error, .. } => {
                tracing::error!(job_id = %id, error = %error, "job failed, scheduling retry");
                queue.fail(*id, &error).await
            }
        };
        if let Err(e) = settled {
            tracing::error!(job_id = %id, error = %e, "failed to settle job");
        }
    }

    Ok(ids.len())
}

/// Periodically reset jobs stuck in 'processing' back to 'pending'.
pub async fn run_reaper(queue: Arc<dyn JobQueue>, mut shutdown: watch::Receiver<bool>) {
    tracing::info!("stale job reaper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("stale job reaper shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        }

        match queue.reap_stale().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "reaped stale jobs"),
            Err(e) => tracing::error!(error = %e, "reaper error"),
        }
    }
}

/// Run archival for every enabled tenant once per `interval`.
pub async fn run_archival_scheduler(
    manager: Arc<ArchivalManager>,
    interval: Duration,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "archival scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("archival scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match manager.run_all(concurrency, &shutdown).await {
            Ok(results) => {
                let failed = results.iter().filter(|(_, r)| r.is_err()).count();
                tracing::info!(tenants = results.len(), failed, "archival cycle finished");
            }
            Err(e) => tracing::error!(error = %e, "archival cycle error"),
        }
    }
}
