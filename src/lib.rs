pub mod adapters;
pub mod config;
pub mod domain;
pub mod infra;
pub mod services;

use {
    infra::archive_store::FsArchiveStore,
    services::{
        audit_log::AuditLogStore, capture::CaptureService, registry::EntityRegistry,
        subscriptions::SubscriptionRegistry,
    },
    std::sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub entities: Arc<EntityRegistry>,
    pub audit_log: AuditLogStore,
    pub subscriptions: SubscriptionRegistry,
    pub capture: CaptureService,
    /// Serves the signed links handed out by `audit_log`.
    pub archive_files: Arc<FsArchiveStore>,
}
