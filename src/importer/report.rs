//! Per-row outcomes and the aggregate report of an import run.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::db::{ImportAuditResult, ImportStatus};

/// Why a single row was skipped. Row errors never abort the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("Row {row}: role id {role_id} does not exist")]
    MissingRole { row: usize, role_id: String },

    #[error("Row {row}: country id {country_id} does not exist")]
    MissingCountry { row: usize, country_id: String },

    #[error("Row {row}: a user with email {email} or the same phone already exists")]
    DuplicateKey { row: usize, email: String },

    #[error("Row {row}: {detail}")]
    UnknownFailure { row: usize, detail: String },
}

impl RowError {
    pub fn kind(&self) -> RowOutcomeKind {
        match self {
            RowError::MissingRole { .. } => RowOutcomeKind::MissingRole,
            RowError::MissingCountry { .. } => RowOutcomeKind::MissingCountry,
            RowError::DuplicateKey { .. } => RowOutcomeKind::DuplicateKey,
            RowError::UnknownFailure { .. } => RowOutcomeKind::UnknownFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RowOutcomeKind {
    Created,
    MissingRole,
    MissingCountry,
    DuplicateKey,
    UnknownFailure,
}

impl RowOutcomeKind {
    pub fn is_error(&self) -> bool {
        !matches!(self, RowOutcomeKind::Created)
    }
}

/// Result of processing one data row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    /// 1-based data row index.
    pub row: usize,
    pub kind: RowOutcomeKind,
    pub detail: String,
    /// Id of the created user, for `Created` outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl RowOutcome {
    pub fn created(row: usize, user_id: i64, email: &str) -> Self {
        Self {
            row,
            kind: RowOutcomeKind::Created,
            detail: format!("Row {}: created {}", row, email),
            user_id: Some(user_id),
        }
    }

    pub fn failed(row: usize, err: &RowError) -> Self {
        Self {
            row,
            kind: err.kind(),
            detail: err.to_string(),
            user_id: None,
        }
    }
}

/// Aggregate result of one import run, outcomes in file order.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub audit_id: i64,
    pub rows_seen: usize,
    pub created: usize,
    pub errors: usize,
    pub outcomes: Vec<RowOutcome>,
}

impl ImportReport {
    pub fn new(audit_id: i64) -> Self {
        Self {
            audit_id,
            ..Self::default()
        }
    }

    /// Append an outcome and bump the matching counter.
    pub fn record(&mut self, outcome: RowOutcome) {
        self.rows_seen += 1;
        if outcome.kind.is_error() {
            self.errors += 1;
        } else {
            self.created += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Some rows were created and some were skipped.
    pub fn is_partial(&self) -> bool {
        self.created > 0 && self.errors > 0
    }

    /// Details of every failed row, in file order.
    pub fn error_details(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.kind.is_error())
            .map(|o| o.detail.clone())
            .collect()
    }

    /// Final audit counters for this run.
    pub fn audit_result(&self) -> ImportAuditResult {
        ImportAuditResult {
            status: ImportStatus::Imported,
            row_count: self.rows_seen as i64,
            imported_count: self.created as i64,
            error_count: self.errors as i64,
            errors: self.error_details(),
        }
    }

    /// Caller-facing summary listing at most `limit` error details.
    pub fn summary(&self, limit: usize) -> ImportSummary {
        let details = self.error_details();
        let omitted = details.len().saturating_sub(limit);
        ImportSummary {
            total_rows: self.rows_seen,
            created: self.created,
            errors: self.errors,
            first_errors: details.into_iter().take(limit).collect(),
            omitted_errors: omitted,
        }
    }
}

/// Truncated view of a report for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total_rows: usize,
    pub created: usize,
    pub errors: usize,
    pub first_errors: Vec<String>,
    pub omitted_errors: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} row(s): {} created, {} error(s)",
            self.total_rows, self.created, self.errors
        )?;
        for detail in &self.first_errors {
            write!(f, "\n  - {}", detail)?;
        }
        if self.omitted_errors > 0 {
            write!(f, "\n  ... and {} more error(s)", self.omitted_errors)?;
        }
        Ok(())
    }
}
