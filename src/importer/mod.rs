//! Bulk user import.
//!
//! An uploaded spreadsheet is archived, recorded in the import audit log,
//! validated as a whole, and then processed one row at a time. Every data
//! row yields exactly one [`RowOutcome`]; a failing row never stops the
//! rows after it. Only an unreadable file or a missing column aborts the
//! batch, and then no row is touched.

pub mod report;
pub mod sheet;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::access::{AccessError, Caller, Operation};
use crate::archive::archive_upload;
use crate::credentials::CredentialHasher;
use crate::db::{
    normalize_email, DbError, ImportAuditResult, ImportStatus, NewImportAudit, NewUser, RecordDb,
};
use crate::util::sha256_hex;

pub use report::{ImportReport, ImportSummary, RowError, RowOutcome, RowOutcomeKind};
pub use sheet::{ImportRow, REQUIRED_COLUMNS};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl ImportError {
    /// Errors that reject the whole file before any row is processed and
    /// are recorded on the audit entry as `FAILED`.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_) | ImportError::MissingColumns(_)
        )
    }
}

/// Runs imports against one database with one hashing primitive.
pub struct Importer<'a, H: CredentialHasher + ?Sized> {
    db: &'a RecordDb,
    hasher: &'a H,
    archive_dir: Option<PathBuf>,
}

impl<'a, H: CredentialHasher + ?Sized> Importer<'a, H> {
    pub fn new(db: &'a RecordDb, hasher: &'a H) -> Self {
        Self {
            db,
            hasher,
            archive_dir: None,
        }
    }

    /// Keep a copy of every upload under `dir`.
    pub fn with_archive_dir(mut self, dir: PathBuf) -> Self {
        self.archive_dir = Some(dir);
        self
    }

    /// Import users from `bytes`, timestamping created rows with the
    /// current time.
    pub fn run_import(
        &self,
        caller: &Caller,
        filename: &str,
        bytes: &[u8],
    ) -> Result<ImportReport, ImportError> {
        self.run_import_at(caller, filename, bytes, Utc::now())
    }

    /// Import users from `bytes`. Every created row gets `now` as its
    /// creation time.
    pub fn run_import_at(
        &self,
        caller: &Caller,
        filename: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<ImportReport, ImportError> {
        if let Err(e) = caller.require(Operation::ImportUsers) {
            log::warn!("Import of '{}' refused for {}: {}", filename, caller.email, e);
            return Err(e.into());
        }

        log::info!(
            "Import started: '{}' ({} bytes) by {}",
            filename,
            bytes.len(),
            caller.email
        );

        let archived = self.archive(filename, bytes, now);
        let uploaded_at = now.to_rfc3339();
        let sha = sha256_hex(bytes);
        let audit_id = self.db.create_import_audit(&NewImportAudit {
            uploaded_at: &uploaded_at,
            filename,
            file_path: archived.as_deref(),
            file_sha256: Some(&sha),
            uploaded_by: Some(caller.user_id),
        })?;

        let rows = match sheet::parse_workbook(filename, bytes) {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Import {} rejected: {}", audit_id, e);
                self.db.finish_import_audit(
                    audit_id,
                    &ImportAuditResult {
                        status: ImportStatus::Failed,
                        row_count: 0,
                        imported_count: 0,
                        error_count: 1,
                        errors: vec![e.to_string()],
                    },
                )?;
                return Err(e);
            }
        };

        let created_at = now.to_rfc3339();
        let mut report = ImportReport::new(audit_id);
        for row in &rows {
            let outcome = match self.process_row(row, &created_at) {
                Ok(user_id) => RowOutcome::created(row.row_number, user_id, row.email.trim()),
                Err(err) => {
                    log::debug!("Import {}: {}", audit_id, err);
                    RowOutcome::failed(row.row_number, &err)
                }
            };
            report.record(outcome);
        }

        self.db.finish_import_audit(audit_id, &report.audit_result())?;

        if report.errors > 0 {
            log::warn!(
                "Import {} finished with errors: {} of {} row(s) skipped",
                audit_id,
                report.errors,
                report.rows_seen
            );
        }
        log::info!(
            "Import {} complete: {} row(s), {} created, {} error(s)",
            audit_id,
            report.rows_seen,
            report.created,
            report.errors
        );
        Ok(report)
    }

    /// Archive the upload. A failed archive is logged and the import
    /// continues without a stored file path.
    fn archive(&self, filename: &str, bytes: &[u8], now: DateTime<Utc>) -> Option<String> {
        let dir = self.archive_dir.as_ref()?;
        match archive_upload(dir, filename, bytes, now) {
            Ok(path) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                log::warn!("Could not archive upload '{}': {}", filename, e);
                None
            }
        }
    }

    /// Validate and persist one row. Returns the new user's id.
    fn process_row(&self, row: &ImportRow, created_at: &str) -> Result<i64, RowError> {
        let n = row.row_number;
        let unknown = |detail: String| RowError::UnknownFailure { row: n, detail };

        let role_id = match row.role_id.trim().parse::<i64>() {
            Ok(id) if self.db.role_exists(id).map_err(|e| unknown(e.to_string()))? => id,
            _ => {
                return Err(RowError::MissingRole {
                    row: n,
                    role_id: row.role_id.trim().to_string(),
                })
            }
        };

        let country_id = match row.country_id.trim().parse::<i64>() {
            Ok(id) if self.db.country_exists(id).map_err(|e| unknown(e.to_string()))? => id,
            _ => {
                return Err(RowError::MissingCountry {
                    row: n,
                    country_id: row.country_id.trim().to_string(),
                })
            }
        };

        let age = match row.age.trim() {
            "" => None,
            raw => Some(
                raw.parse::<u32>()
                    .map_err(|_| unknown(format!("invalid age '{}'", raw)))?,
            ),
        };

        let email = normalize_email(&row.email);
        if email.is_empty() {
            return Err(unknown("email is empty".to_string()));
        }
        let phone = match row.phone.trim() {
            "" => None,
            p => Some(p.to_string()),
        };

        if row.secret.is_empty() {
            return Err(unknown("secret is empty".to_string()));
        }
        let credential_hash = self
            .hasher
            .hash(&row.secret)
            .map_err(|e| unknown(e.to_string()))?;

        let user = NewUser {
            name: row.name.trim().to_string(),
            surname: row.surname.trim().to_string(),
            age,
            email: email.clone(),
            phone,
            credential_hash,
            is_active: true,
            role_id,
            country_id,
            created_at: created_at.to_string(),
        };

        match self.db.insert_user(&user) {
            Ok(id) => Ok(id),
            Err(DbError::Duplicate { .. }) => Err(RowError::DuplicateKey { row: n, email }),
            Err(e) => Err(unknown(e.to_string())),
        }
    }
}
