use axum::http::StatusCode;
use thiserror::Error;

/// Unified error type for all core operations.
///
/// Cross-tenant access is reported as `NotFound` so that probing for
/// rows owned by another company is indistinguishable from probing for
/// rows that do not exist.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("the operation timed out waiting for a lock, retry the request")]
    Contention,

    #[error("external service error: {0}")]
    External(String),

    #[error("database error")]
    Database(diesel::result::Error),

    #[error("connection pool error")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl From<diesel::result::Error> for ServiceError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => Self::NotFound,
            diesel::result::Error::DatabaseError(_, ref info)
                if info.message().contains("lock timeout") =>
            {
                Self::Contention
            }
            other => Self::Database(other),
        }
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Contention => StatusCode::SERVICE_UNAVAILABLE,
            Self::External(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True if a unique-constraint violation was raised for the named
    /// constraint or column.
    pub fn is_unique_violation(err: &diesel::result::Error, needle: &str) -> bool {
        matches!(
            err,
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) if info.message().contains(needle)
                || info.constraint_name().is_some_and(|c| c.contains(needle))
        )
    }
}

impl From<ServiceError> for (StatusCode, String) {
    fn from(err: ServiceError) -> Self {
        let status = err.status_code();
        let message = match &err {
            // Never leak driver/transaction detail to callers.
            ServiceError::Database(e) => {
                log::error!("database error: {e}");
                "internal error".to_string()
            }
            ServiceError::Pool(e) => {
                log::error!("connection pool error: {e}");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ServiceError::Validation("bad".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ServiceError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::Conflict("dup".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::Contention.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::External("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: ServiceError = diesel::result::Error::NotFound.into();
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[test]
    fn test_database_error_message_is_generic() {
        let err: ServiceError = diesel::result::Error::RollbackTransaction.into();
        let (status, message): (StatusCode, String) = err.into();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "internal error");
    }
}
