use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::*;

const QUALIFICATION_COLUMNS: &str = "id, period_start, period_end, tax_amount, status,
     created_by, modified_by, subsidiary_id";

/// Insert payload for `subsidiaries`.
#[derive(Debug, Clone)]
pub struct NewSubsidiary {
    pub legal_name: String,
    pub tax_id: String,
    pub main_activity: String,
    pub tax_regime: String,
    pub country_id: i64,
}

/// Insert payload for `tax_qualifications`.
#[derive(Debug, Clone)]
pub struct NewTaxQualification {
    pub subsidiary_id: i64,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub tax_amount: Decimal,
    pub status: String,
    pub created_by: i64,
}

impl RecordDb {
    // =========================================================================
    // Subsidiaries
    // =========================================================================

    pub fn insert_subsidiary(&self, subsidiary: &NewSubsidiary) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO subsidiaries (legal_name, tax_id, main_activity, tax_regime, country_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                subsidiary.legal_name.trim(),
                subsidiary.tax_id.trim(),
                subsidiary.main_activity,
                subsidiary.tax_regime,
                subsidiary.country_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_subsidiary(&self, id: i64) -> Result<Option<DbSubsidiary>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, legal_name, tax_id, main_activity, tax_regime, country_id
             FROM subsidiaries WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_subsidiary_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All subsidiaries ordered by legal name.
    pub fn list_subsidiaries(&self) -> Result<Vec<DbSubsidiary>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, legal_name, tax_id, main_activity, tax_regime, country_id
             FROM subsidiaries ORDER BY legal_name",
        )?;
        let rows = stmt.query_map([], Self::map_subsidiary_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a subsidiary together with its tax qualifications.
    pub fn delete_subsidiary(&self, id: i64) -> Result<(), DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM subsidiaries WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "subsidiary",
                id,
            });
        }
        Ok(())
    }

    fn map_subsidiary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbSubsidiary> {
        Ok(DbSubsidiary {
            id: row.get(0)?,
            legal_name: row.get(1)?,
            tax_id: row.get(2)?,
            main_activity: row.get(3)?,
            tax_regime: row.get(4)?,
            country_id: row.get(5)?,
        })
    }

    // =========================================================================
    // Tax qualifications
    // =========================================================================

    /// Insert a qualification. One per (subsidiary, period start).
    pub fn insert_tax_qualification(&self, q: &NewTaxQualification) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO tax_qualifications (
                period_start, period_end, tax_amount, status, created_by, subsidiary_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                q.period_start.format(DATE_FORMAT).to_string(),
                q.period_end.format(DATE_FORMAT).to_string(),
                q.tax_amount.round_dp(2).to_string(),
                q.status,
                q.created_by,
                q.subsidiary_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Change amount, status and period end, recording who made the change.
    pub fn update_tax_qualification(
        &self,
        id: i64,
        period_end: NaiveDate,
        tax_amount: Decimal,
        status: &str,
        modified_by: i64,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE tax_qualifications
             SET period_end = ?2, tax_amount = ?3, status = ?4, modified_by = ?5
             WHERE id = ?1",
            params![
                id,
                period_end.format(DATE_FORMAT).to_string(),
                tax_amount.round_dp(2).to_string(),
                status,
                modified_by,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "tax qualification",
                id,
            });
        }
        Ok(())
    }

    pub fn get_tax_qualification(&self, id: i64) -> Result<Option<DbTaxQualification>, DbError> {
        let sql = format!(
            "SELECT {} FROM tax_qualifications WHERE id = ?1",
            QUALIFICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_qualification_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Qualifications of one subsidiary, latest period first.
    pub fn list_tax_qualifications(
        &self,
        subsidiary_id: i64,
    ) -> Result<Vec<DbTaxQualification>, DbError> {
        let sql = format!(
            "SELECT {} FROM tax_qualifications WHERE subsidiary_id = ?1 ORDER BY period_start DESC",
            QUALIFICATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![subsidiary_id], Self::map_qualification_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    fn map_qualification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbTaxQualification> {
        Ok(DbTaxQualification {
            id: row.get(0)?,
            period_start: date_column(row, 1)?,
            period_end: date_column(row, 2)?,
            tax_amount: decimal_column(row, 3)?,
            status: row.get(4)?,
            created_by: row.get(5)?,
            modified_by: row.get(6)?,
            subsidiary_id: row.get(7)?,
        })
    }
}
