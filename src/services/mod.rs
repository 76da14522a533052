//! Permission-checked operations over the record store.
//!
//! Each function takes the acting [`Caller`](crate::access::Caller), checks
//! the operation it needs, validates input, and then writes through
//! [`RecordDb`](crate::db::RecordDb).

pub mod reference;
pub mod setup;
pub mod tax;
pub mod users;

use thiserror::Error;

use crate::access::AccessError;
use crate::credentials::CredentialError;
use crate::db::DbError;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// A submitted field failed validation.
    #[error("{field}: {message}")]
    Invalid { field: String, message: String },

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Db(DbError),
}

impl ServiceError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// The field an `Invalid` error points at.
    pub fn field(&self) -> Option<&str> {
        match self {
            ServiceError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Uniqueness conflicts become field errors naming the column.
impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Duplicate { column, .. } => ServiceError::Invalid {
                field: column,
                message: "already in use".to_string(),
            },
            other => ServiceError::Db(other),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_maps_to_field_error() {
        let err: ServiceError = DbError::Duplicate {
            table: "users".to_string(),
            column: "email".to_string(),
        }
        .into();
        assert_eq!(err.field(), Some("email"));
        assert_eq!(err.to_string(), "email: already in use");

        let other: ServiceError = DbError::NotFound { entity: "user", id: 3 }.into();
        assert!(matches!(other, ServiceError::Db(DbError::NotFound { .. })));
        assert_eq!(other.field(), None);
    }
}
