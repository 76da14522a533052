use super::*;

/// Values captured when an import attempt starts.
#[derive(Debug, Clone)]
pub struct NewImportAudit<'a> {
    pub uploaded_at: &'a str,
    pub filename: &'a str,
    pub file_path: Option<&'a str>,
    pub file_sha256: Option<&'a str>,
    pub uploaded_by: Option<i64>,
}

impl RecordDb {
    // =========================================================================
    // Import audit log
    // =========================================================================

    /// Open a `PENDING` audit entry for an import attempt.
    pub fn create_import_audit(&self, entry: &NewImportAudit<'_>) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO import_audit (uploaded_at, filename, file_path, file_sha256, uploaded_by, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.uploaded_at,
                entry.filename,
                entry.file_path,
                entry.file_sha256,
                entry.uploaded_by,
                ImportStatus::Pending.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Write the final counters and status of an attempt.
    ///
    /// Only entries still in a non-terminal status are updated, so a finished
    /// entry cannot be rewritten. Returns `NotFound` otherwise.
    pub fn finish_import_audit(&self, id: i64, result: &ImportAuditResult) -> Result<(), DbError> {
        let errors_json = serde_json::to_string(&result.errors).unwrap_or_else(|_| "[]".into());
        let changed = self.conn.execute(
            "UPDATE import_audit
             SET status = ?2, row_count = ?3, imported_count = ?4, error_count = ?5, errors = ?6
             WHERE id = ?1 AND status IN ('PENDING', 'VALIDATED', 'IMPORTING')",
            params![
                id,
                result.status.as_str(),
                result.row_count,
                result.imported_count,
                result.error_count,
                errors_json,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "open import audit entry",
                id,
            });
        }
        Ok(())
    }

    pub fn get_import_audit(&self, id: i64) -> Result<Option<DbImportAudit>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uploaded_at, filename, file_path, file_sha256, uploaded_by,
                    row_count, imported_count, error_count, errors, status
             FROM import_audit WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_import_audit_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Most recent import attempts first.
    pub fn list_import_audits(&self, limit: usize) -> Result<Vec<DbImportAudit>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, uploaded_at, filename, file_path, file_sha256, uploaded_by,
                    row_count, imported_count, error_count, errors, status
             FROM import_audit
             ORDER BY uploaded_at DESC, id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_import_audit_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    fn map_import_audit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbImportAudit> {
        let errors_json: String = row.get(9)?;
        let errors: Vec<String> =
            serde_json::from_str(&errors_json).map_err(|e| conversion_error(9, e))?;
        let status: String = row.get(10)?;
        Ok(DbImportAudit {
            id: row.get(0)?,
            uploaded_at: row.get(1)?,
            filename: row.get(2)?,
            file_path: row.get(3)?,
            file_sha256: row.get(4)?,
            uploaded_by: row.get(5)?,
            row_count: row.get(6)?,
            imported_count: row.get(7)?,
            error_count: row.get(8)?,
            errors,
            status: status.parse().map_err(|e| conversion_error(10, e))?,
        })
    }
}
