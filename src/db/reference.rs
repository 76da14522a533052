use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::*;

impl RecordDb {
    // =========================================================================
    // Currencies
    // =========================================================================

    /// Insert a currency. ISO codes are stored upper-cased.
    pub fn insert_currency(
        &self,
        iso_code: &str,
        name: &str,
        symbol: Option<&str>,
        is_base: bool,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO currencies (iso_code, name, symbol, is_base)
             VALUES (UPPER(?1), ?2, ?3, ?4)",
            params![iso_code.trim(), name.trim(), symbol, is_base as i32],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_currency(&self, id: i64) -> Result<Option<DbCurrency>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, iso_code, name, symbol, is_base FROM currencies WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_currency_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_currency_by_code(&self, iso_code: &str) -> Result<Option<DbCurrency>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, iso_code, name, symbol, is_base FROM currencies WHERE iso_code = UPPER(?1)",
        )?;
        let mut rows = stmt.query_map(params![iso_code.trim()], Self::map_currency_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All currencies ordered by ISO code.
    pub fn list_currencies(&self) -> Result<Vec<DbCurrency>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, iso_code, name, symbol, is_base FROM currencies ORDER BY iso_code",
        )?;
        let rows = stmt.query_map([], Self::map_currency_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    fn map_currency_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbCurrency> {
        Ok(DbCurrency {
            id: row.get(0)?,
            iso_code: row.get(1)?,
            name: row.get(2)?,
            symbol: row.get(3)?,
            is_base: row.get::<_, i32>(4)? != 0,
        })
    }

    // =========================================================================
    // Countries
    // =========================================================================

    pub fn insert_country(&self, name: &str, iso_code: &str, currency_id: i64) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO countries (name, iso_code, currency_id) VALUES (?1, UPPER(?2), ?3)",
            params![name.trim(), iso_code.trim(), currency_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_country(&self, id: i64) -> Result<Option<DbCountry>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, iso_code, currency_id FROM countries WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], Self::map_country_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn country_exists(&self, id: i64) -> Result<bool, DbError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM countries WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    /// All countries ordered by name.
    pub fn list_countries(&self) -> Result<Vec<DbCountry>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, iso_code, currency_id FROM countries ORDER BY name")?;
        let rows = stmt.query_map([], Self::map_country_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a country. Fails with [`DbError::ForeignKey`] while users or
    /// subsidiaries still reference it.
    pub fn delete_country(&self, id: i64) -> Result<(), DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM countries WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound {
                entity: "country",
                id,
            });
        }
        Ok(())
    }

    fn map_country_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbCountry> {
        Ok(DbCountry {
            id: row.get(0)?,
            name: row.get(1)?,
            iso_code: row.get(2)?,
            currency_id: row.get(3)?,
        })
    }

    // =========================================================================
    // Exchange rates
    // =========================================================================

    /// Record `1 origin = rate destination` for a date. One rate per
    /// (origin, destination, date); a second insert is a duplicate.
    pub fn insert_exchange_rate(
        &self,
        origin_currency_id: i64,
        destination_currency_id: i64,
        rate_date: NaiveDate,
        rate: Decimal,
    ) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO exchange_rates (origin_currency_id, destination_currency_id, rate_date, rate)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                origin_currency_id,
                destination_currency_id,
                rate_date.format(DATE_FORMAT).to_string(),
                rate.round_dp(6).to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent rate for the pair on or before `on`.
    pub fn find_exchange_rate(
        &self,
        origin_currency_id: i64,
        destination_currency_id: i64,
        on: NaiveDate,
    ) -> Result<Option<DbExchangeRate>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, origin_currency_id, destination_currency_id, rate_date, rate
             FROM exchange_rates
             WHERE origin_currency_id = ?1 AND destination_currency_id = ?2 AND rate_date <= ?3
             ORDER BY rate_date DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(
            params![
                origin_currency_id,
                destination_currency_id,
                on.format(DATE_FORMAT).to_string()
            ],
            Self::map_exchange_rate_row,
        )?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Every rate recorded for a currency pair, newest first.
    pub fn list_exchange_rates(
        &self,
        origin_currency_id: i64,
        destination_currency_id: i64,
    ) -> Result<Vec<DbExchangeRate>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, origin_currency_id, destination_currency_id, rate_date, rate
             FROM exchange_rates
             WHERE origin_currency_id = ?1 AND destination_currency_id = ?2
             ORDER BY rate_date DESC",
        )?;
        let rows = stmt.query_map(
            params![origin_currency_id, destination_currency_id],
            Self::map_exchange_rate_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    fn map_exchange_rate_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbExchangeRate> {
        Ok(DbExchangeRate {
            id: row.get(0)?,
            origin_currency_id: row.get(1)?,
            destination_currency_id: row.get(2)?,
            rate_date: date_column(row, 3)?,
            rate: decimal_column(row, 4)?,
        })
    }
}
