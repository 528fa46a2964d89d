use sea_orm::error::DbErr;
use uuid::Uuid;

/// Core error taxonomy for ledger operations.
///
/// Callers branch on retryability: [`ServiceError::is_retryable`] is true
/// exactly for transient storage failures (connection loss, conflicts, lock
/// timeouts), where retrying the same request may succeed. Everything else
/// requires the caller to change the request first.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid movement: {0}")]
    InvalidMovement(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Timed out waiting for the stock lock on product {0}")]
    LockTimeout(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// This is the single source of truth for the retryability
    /// classification; transient storage failures qualify, business-rule
    /// rejections never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::LockTimeout(_)
        )
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::db_error("connection reset").is_retryable());
        assert!(ServiceError::LockTimeout(Uuid::new_v4()).is_retryable());
        assert!(!ServiceError::InsufficientStock("10 < 20".into()).is_retryable());
        assert!(!ServiceError::InvalidMovement("amount must be positive".into()).is_retryable());
        assert!(!ServiceError::ProductNotFound(Uuid::new_v4()).is_retryable());
    }
}
