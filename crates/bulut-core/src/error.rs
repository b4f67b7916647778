// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for bulut-core.

use thiserror::Error;

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the persistence layer.
///
/// Lookups return `Ok(None)` for missing rows; `NotFound` is reserved for
/// writes that target a row that does not exist.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The targeted row does not exist (or is soft-deleted).
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity kind ("namespace", "deployment", ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A uniqueness constraint was violated.
    #[error("{entity} '{key}' already exists")]
    AlreadyExists {
        /// Entity kind.
        entity: &'static str,
        /// The conflicting key.
        key: String,
    },

    /// Input validation failed before reaching the database.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether this error means the target row is missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Attach entity context to a unique violation coming back from an insert.
    pub(crate) fn on_conflict(err: sqlx::Error, entity: &'static str, key: &str) -> Self {
        if is_unique_violation(&err) {
            Self::AlreadyExists {
                entity,
                key: key.to_string(),
            }
        } else {
            err.into()
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases = vec![
            (
                CoreError::NotFound {
                    entity: "deployment",
                    id: "d1".to_string(),
                },
                "NOT_FOUND",
            ),
            (
                CoreError::AlreadyExists {
                    entity: "namespace",
                    key: "acme".to_string(),
                },
                "ALREADY_EXISTS",
            ),
            (CoreError::validation("name", "must not be empty"), "VALIDATION_ERROR"),
            (sqlx::Error::PoolTimedOut.into(), "DATABASE_ERROR"),
        ];

        for (error, code) in cases {
            assert_eq!(error.error_code(), code, "wrong code for {error}");
        }
    }

    #[test]
    fn test_display_includes_context() {
        let err = CoreError::NotFound {
            entity: "deployment",
            id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "deployment 'abc' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_non_unique_error_maps_to_database() {
        let err = CoreError::on_conflict(sqlx::Error::RowNotFound, "namespace", "acme");
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }
}
