//! Shared type definitions for the database layer.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Duplicate value for {table}.{column}")]
    Duplicate { table: String, column: String },

    #[error("Foreign key constraint failed: {0}")]
    ForeignKey(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl DbError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DbError::Duplicate { .. })
    }
}

/// Classify constraint failures at the persistence boundary so callers can
/// match on a variant instead of inspecting SQLite messages.
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref code, Some(ref msg)) = err {
            match code.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    if let Some((table, column)) = parse_unique_target(msg) {
                        return DbError::Duplicate { table, column };
                    }
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return DbError::ForeignKey(msg.clone());
                }
                _ => {}
            }
        }
        DbError::Sqlite(err)
    }
}

/// Extract `(table, columns)` from "UNIQUE constraint failed: t.a, t.b".
fn parse_unique_target(msg: &str) -> Option<(String, String)> {
    let targets = msg.split_once("constraint failed:")?.1.trim();
    let mut table = None;
    let mut columns = Vec::new();
    for target in targets.split(',') {
        let (t, c) = target.trim().split_once('.')?;
        table.get_or_insert_with(|| t.to_string());
        columns.push(c.to_string());
    }
    Some((table?, columns.join(", ")))
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// Storage format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// A row from the `currencies` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbCurrency {
    pub id: i64,
    pub iso_code: String,
    pub name: String,
    pub symbol: Option<String>,
    /// Reference currency for exchange-rate tables.
    pub is_base: bool,
}

/// A row from the `countries` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbCountry {
    pub id: i64,
    pub name: String,
    pub iso_code: String,
    pub currency_id: i64,
}

/// A row from the `exchange_rates` table: 1 origin = `rate` destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbExchangeRate {
    pub id: i64,
    pub origin_currency_id: i64,
    pub destination_currency_id: i64,
    pub rate_date: NaiveDate,
    pub rate: Decimal,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A row from the `roles` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbRole {
    pub id: i64,
    pub name: String,
    pub description: String,
}

/// A row from the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub surname: String,
    pub age: Option<u32>,
    pub email: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub phone: Option<String>,
    pub created_at: String,
    pub is_active: bool,
    pub role_id: i64,
    pub country_id: i64,
}

impl fmt::Display for DbUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} <{}>", self.name, self.surname, self.email)
    }
}

/// Insert payload for `users`. The credential is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub surname: String,
    pub age: Option<u32>,
    pub email: String,
    pub phone: Option<String>,
    pub credential_hash: String,
    pub is_active: bool,
    pub role_id: i64,
    pub country_id: i64,
    pub created_at: String,
}

/// Editable user fields. `credential_hash: None` keeps the stored hash.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub name: String,
    pub surname: String,
    pub age: Option<u32>,
    pub email: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub role_id: i64,
    pub country_id: i64,
    pub credential_hash: Option<String>,
}

/// A user joined with its role and country names, for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListing {
    #[serde(flatten)]
    pub user: DbUser,
    pub role_name: String,
    pub country_name: String,
}

/// A row from `user_history`: the user's values before an edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUserHistory {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub surname: String,
    pub age: Option<u32>,
    pub email: String,
    pub phone: Option<String>,
    pub modified_at: String,
}

/// Dashboard counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: i64,
    pub recent: i64,
    pub active: i64,
}

// ---------------------------------------------------------------------------
// Tax records
// ---------------------------------------------------------------------------

/// A row from the `subsidiaries` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbSubsidiary {
    pub id: i64,
    pub legal_name: String,
    pub tax_id: String,
    pub main_activity: String,
    pub tax_regime: String,
    pub country_id: i64,
}

/// A row from the `tax_qualifications` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbTaxQualification {
    pub id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub tax_amount: Decimal,
    pub status: String,
    pub created_by: i64,
    pub modified_by: Option<i64>,
    pub subsidiary_id: i64,
}

// ---------------------------------------------------------------------------
// Import audit log
// ---------------------------------------------------------------------------

/// Persisted status of an import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImportStatus {
    Pending,
    Validated,
    Importing,
    Imported,
    Cancelled,
    Failed,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Validated => "VALIDATED",
            ImportStatus::Importing => "IMPORTING",
            ImportStatus::Imported => "IMPORTED",
            ImportStatus::Cancelled => "CANCELLED",
            ImportStatus::Failed => "FAILED",
        }
    }

    /// Terminal statuses are never rewritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Imported | ImportStatus::Cancelled | ImportStatus::Failed
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown import status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ImportStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ImportStatus::Pending),
            "VALIDATED" => Ok(ImportStatus::Validated),
            "IMPORTING" => Ok(ImportStatus::Importing),
            "IMPORTED" => Ok(ImportStatus::Imported),
            "CANCELLED" => Ok(ImportStatus::Cancelled),
            "FAILED" => Ok(ImportStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A row from the `import_audit` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbImportAudit {
    pub id: i64,
    pub uploaded_at: String,
    pub filename: String,
    pub file_path: Option<String>,
    pub file_sha256: Option<String>,
    pub uploaded_by: Option<i64>,
    pub row_count: i64,
    pub imported_count: i64,
    pub error_count: i64,
    pub errors: Vec<String>,
    pub status: ImportStatus,
}

/// Final counters written when an import attempt completes.
#[derive(Debug, Clone)]
pub struct ImportAuditResult {
    pub status: ImportStatus,
    pub row_count: i64,
    pub imported_count: i64,
    pub error_count: i64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unique_target_single_column() {
        let parsed = parse_unique_target("UNIQUE constraint failed: users.email");
        assert_eq!(parsed, Some(("users".to_string(), "email".to_string())));
    }

    #[test]
    fn test_parse_unique_target_composite() {
        let parsed = parse_unique_target(
            "UNIQUE constraint failed: tax_qualifications.subsidiary_id, tax_qualifications.period_start",
        );
        assert_eq!(
            parsed,
            Some((
                "tax_qualifications".to_string(),
                "subsidiary_id, period_start".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_unique_target_rejects_other_messages() {
        assert_eq!(parse_unique_target("database is locked"), None);
    }

    #[test]
    fn test_import_status_text_is_uppercase_vocabulary() {
        assert_eq!("IMPORTED".parse::<ImportStatus>().unwrap(), ImportStatus::Imported);
        assert!("imported".parse::<ImportStatus>().is_err());
        assert!("DONE".parse::<ImportStatus>().is_err());
        assert!(ImportStatus::Failed.is_terminal());
        assert!(!ImportStatus::Pending.is_terminal());
    }
}
