//! Tenant errors and their public shape.

use crate::tenant::TenantStatus;
use silo_db::DbError;
use silo_queue::QueueError;
use uuid::Uuid;

/// Result type for tenant operations.
pub type TenantResult<T> = Result<T, TenantError>;

/// Tenant resolution and management errors.
///
/// The `Display` output carries internal detail and is meant for logs.
/// Callers facing end users should render [`TenantError::public_message`].
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Tenant is {0}")]
    NotActive(TenantStatus),

    #[error("User {user_id} has no access to tenant {tenant_id}")]
    AccessDenied { user_id: Uuid, tenant_id: Uuid },

    /// The tenant's database could not be reached. For an active tenant this
    /// means the control plane and the physical databases disagree.
    #[error("Failed to open pool for database code {database_code}: {source}")]
    PoolCreation {
        database_code: String,
        #[source]
        source: DbError,
    },

    #[error("Control-plane store error: {0}")]
    Store(String),

    #[error("Timed out during {0}")]
    Timeout(&'static str),

    #[error("Invalid tenant input: {0}")]
    Invalid(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Provisioning queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Feature not enabled: {0}")]
    FeatureDisabled(String),

    #[error("Missing permission: {0}")]
    PermissionMissing(String),
}

/// Externally visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicErrorKind {
    NotFound,
    Forbidden,
    Internal,
    BadRequest,
    Conflict,
}

const FORBIDDEN_MESSAGE: &str = "access to this tenant is not available";

impl TenantError {
    pub fn public_kind(&self) -> PublicErrorKind {
        match self {
            TenantError::NotFound(_) => PublicErrorKind::NotFound,
            TenantError::NotActive(_)
            | TenantError::AccessDenied { .. }
            | TenantError::FeatureDisabled(_)
            | TenantError::PermissionMissing(_) => PublicErrorKind::Forbidden,
            TenantError::PoolCreation { .. }
            | TenantError::Store(_)
            | TenantError::Timeout(_)
            | TenantError::Queue(_) => PublicErrorKind::Internal,
            TenantError::Invalid(_) => PublicErrorKind::BadRequest,
            TenantError::Conflict(_) => PublicErrorKind::Conflict,
        }
    }

    /// Message safe to return to callers.
    ///
    /// An inactive tenant and a non-member principal produce the same text.
    pub fn public_message(&self) -> String {
        match self {
            TenantError::NotFound(_) => "tenant not found".to_string(),
            TenantError::NotActive(_) | TenantError::AccessDenied { .. } => {
                FORBIDDEN_MESSAGE.to_string()
            }
            TenantError::FeatureDisabled(slug) => format!("feature '{}' is not enabled", slug),
            TenantError::PermissionMissing(slug) => format!("permission '{}' is required", slug),
            TenantError::Invalid(msg) | TenantError::Conflict(msg) => msg.clone(),
            _ => "internal error".to_string(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self.public_kind() {
            PublicErrorKind::NotFound => 404,
            PublicErrorKind::Forbidden => 403,
            PublicErrorKind::Internal => 500,
            PublicErrorKind::BadRequest => 400,
            PublicErrorKind::Conflict => 409,
        }
    }
}

impl From<DbError> for TenantError {
    fn from(err: DbError) -> Self {
        TenantError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_and_denied_look_identical() {
        let inactive = TenantError::NotActive(TenantStatus::Suspended);
        let denied = TenantError::AccessDenied {
            user_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
        };

        assert_eq!(inactive.public_kind(), denied.public_kind());
        assert_eq!(inactive.public_message(), denied.public_message());
        assert_eq!(inactive.http_status(), 403);
        assert_ne!(inactive.to_string(), denied.to_string());
    }

    #[test]
    fn test_http_statuses() {
        assert_eq!(TenantError::NotFound("X".into()).http_status(), 404);
        assert_eq!(TenantError::Invalid("bad".into()).http_status(), 400);
        assert_eq!(TenantError::Conflict("taken".into()).http_status(), 409);
        assert_eq!(TenantError::Timeout("tenant lookup").http_status(), 500);
        let pool = TenantError::PoolCreation {
            database_code: "abc".into(),
            source: DbError::Connection("refused".into()),
        };
        assert_eq!(pool.http_status(), 500);
        assert_eq!(pool.public_message(), "internal error");
    }

    #[test]
    fn test_not_found_hides_routing_code() {
        let err = TenantError::NotFound("FR34JJO390G".into());
        assert!(!err.public_message().contains("FR34JJO390G"));
    }
}
