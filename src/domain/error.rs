use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("not provisioned: {0}")]
    NotProvisioned(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive: {0}")]
    Archive(String),

    #[error("signature: {0}")]
    Signature(String),

    #[error("handler: {0}")]
    Handler(String),
}

impl AuditError {
    /// Errors that will fail the same way on every retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Configuration(_))
    }
}
