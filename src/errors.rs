//! Typed error hierarchy for the repair shop service.
//!
//! `ShopError` covers storage, validation and permission failures raised by
//! the store and the server actions. The HTTP layer maps it onto `ApiError`.

use std::collections::BTreeMap;

use thiserror::Error;

/// Per-field validation messages, keyed by field name.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ShopError {
    #[error("Customer ID #{id} not found")]
    CustomerNotFound { id: i64 },

    #[error("Ticket ID #{id} not found")]
    TicketNotFound { id: i64 },

    #[error("Customer ID #{id} is not active")]
    CustomerInactive { id: i64 },

    /// A write hit a uniqueness constraint. `detail` names the constraint.
    #[error("Unique entry required. {detail}")]
    Duplicate { detail: String },

    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(FieldErrors),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShopError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ShopError::CustomerNotFound { .. } | ShopError::TicketNotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for ShopError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
                let detail = message
                    .clone()
                    .unwrap_or_else(|| "UNIQUE constraint failed".to_string());
                return ShopError::Duplicate { detail };
            }
        }
        ShopError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn customer_not_found_carries_id() {
        let err = ShopError::CustomerNotFound { id: 42 };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Customer ID #42 not found");
    }

    #[test]
    fn duplicate_message_prefix() {
        let err = ShopError::Duplicate {
            detail: "UNIQUE constraint failed: customers.email".into(),
        };
        assert!(err.to_string().starts_with("Unique entry required. "));
        assert!(!err.is_not_found());
    }

    #[test]
    fn unique_violation_maps_to_duplicate() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (email TEXT UNIQUE); INSERT INTO t VALUES ('a@b.co');")
            .unwrap();
        let err: ShopError = conn
            .execute("INSERT INTO t VALUES ('a@b.co')", [])
            .unwrap_err()
            .into();
        match err {
            ShopError::Duplicate { detail } => assert!(detail.contains("t.email")),
            other => panic!("Expected Duplicate, got {other:?}"),
        }
    }

    #[test]
    fn other_sqlite_errors_map_to_database() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: ShopError = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, ShopError::Database(_)));
    }

    #[test]
    fn validation_error_counts_fields() {
        let mut fields = FieldErrors::new();
        fields.insert("title".into(), "Title is required".into());
        let err = ShopError::Validation(fields);
        assert!(err.to_string().contains("1 field"));
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ShopError::LockPoisoned);
        assert_std_error(&ShopError::Forbidden("x".into()));
    }
}
