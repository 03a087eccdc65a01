use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::AuditError;

const MAX_LEN: usize = 48;

/// Tenant (company) identifier. Restricted to `[A-Za-z0-9_-]{1,48}` because
/// it is embedded in per-tenant partition names, which Postgres caps at 63 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Result<Self, AuditError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_LEN {
            return Err(AuditError::Validation(format!(
                "TenantId must be 1-{MAX_LEN} characters, got {} characters",
                id.len()
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AuditError::Validation(format!(
                "TenantId may only contain [A-Za-z0-9_-], got: {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Name of this tenant's `audit_log` partition. Quote it when used in DDL.
    pub fn partition_name(&self) -> String {
        format!("audit_log_{}", self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = AuditError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_ids() {
        assert!(TenantId::new("acme").is_ok());
        assert!(TenantId::new("tenant_01-b").is_ok());
    }

    #[test]
    fn rejects_unsafe_ids() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("a'; drop table x").is_err());
        assert!(TenantId::new("a".repeat(49)).is_err());
    }

    #[test]
    fn partition_name_keeps_tenant_case() {
        let id = TenantId::new("Acme-Corp").unwrap();
        assert_eq!(id.partition_name(), "audit_log_Acme-Corp");
    }
}
