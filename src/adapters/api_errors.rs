use crate::domain::error::AuditError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

// Обертка (Newtype) для доменной ошибки, чтобы реализовать для нее трейт Axum
pub struct ApiError(pub AuditError);

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            AuditError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                msg.clone(),
            ),
            AuditError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AuditError::NotProvisioned(tenant) => (
                StatusCode::CONFLICT,
                "not_provisioned",
                format!("audit storage is not provisioned for tenant {tenant}"),
            ),
            AuditError::Signature(_) => (
                StatusCode::FORBIDDEN,
                "signature_error",
                "invalid or expired download link".to_string(),
            ),
            err => {
                tracing::error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
