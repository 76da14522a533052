//! SQLite-backed record store for reference data, identities, tax records,
//! and the import audit log.
//!
//! The database lives at `{dataDir}/taxrecords.db`. Uniqueness and foreign-key
//! rules are declared in the schema and enforced by SQLite; constraint
//! failures surface as [`DbError::Duplicate`] / [`DbError::ForeignKey`].

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::config::Config;

pub mod types;
pub use types::*;

pub mod imports;
pub mod reference;
pub mod tax;
pub mod users;

pub use imports::NewImportAudit;
pub use tax::{NewSubsidiary, NewTaxQualification};
pub(crate) use users::normalize_email;

/// File name of the database inside the data directory.
pub const DB_FILE_NAME: &str = "taxrecords.db";

pub struct RecordDb {
    conn: Connection,
}

impl RecordDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT").map_err(DbError::from)?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database in the configured data directory.
    pub fn open(config: &Config) -> Result<Self, DbError> {
        let dir = config.data_dir()?;
        Self::open_at(dir.join(DB_FILE_NAME))
    }

    /// Open a database at an explicit path and bring its schema up to date.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        // Cascade/restrict rules on roles, countries and users depend on this.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("Opened record database at {}", path.display());
        Ok(Self { conn })
    }

    /// Path of the main database file, if it is on disk.
    pub fn path(&self) -> Option<&Path> {
        self.conn.path().map(Path::new).filter(|p| !p.as_os_str().is_empty())
    }

    /// Number of rows in `table`. Only used with compile-time table names.
    pub(crate) fn count_rows(&self, table: &str) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(self.conn.query_row(&sql, params![], |row| row.get(0))?)
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    /// Create a temporary database for testing.
    ///
    /// The `TempDir` is leaked so the directory outlives the test body; the OS
    /// cleans it up. Foreign keys stay enabled so cascade rules are exercised.
    pub fn test_db() -> RecordDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        RecordDb::open_at(path).expect("Failed to open test database")
    }

    /// Reference rows most tests need.
    pub struct Seed {
        pub currency_id: i64,
        pub country_id: i64,
        pub role_id: i64,
    }

    /// Insert one currency, one country and an "admin" role.
    pub fn seed_reference(db: &RecordDb) -> Seed {
        let currency_id = db
            .insert_currency("CLP", "Peso chileno", Some("$"), true)
            .expect("currency");
        let country_id = db.insert_country("Chile", "CL", currency_id).expect("country");
        let role_id = db.insert_role("admin", "Full access").expect("role");
        Seed {
            currency_id,
            country_id,
            role_id,
        }
    }

    pub fn sample_user(seed: &Seed, email: &str) -> NewUser {
        NewUser {
            name: "Ana".to_string(),
            surname: "Rojas".to_string(),
            age: Some(34),
            email: email.to_string(),
            phone: None,
            credential_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            is_active: true,
            role_id: seed.role_id,
            country_id: seed.country_id,
            created_at: "2025-03-01T12:00:00+00:00".to_string(),
        }
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    pub fn amount(s: &str) -> Decimal {
        s.parse().expect("valid decimal")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        assert_eq!(db.count_rows("users").unwrap(), 0);
        assert_eq!(db.count_rows("roles").unwrap(), 0);
        assert_eq!(db.count_rows("import_audit").unwrap(), 0);
        assert!(db.path().is_some());
    }

    #[test]
    fn test_open_creates_missing_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join(DB_FILE_NAME);
        let db = RecordDb::open_at(path.clone()).expect("open");
        drop(db);
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DB_FILE_NAME);
        {
            let db = RecordDb::open_at(path.clone()).unwrap();
            db.insert_role("auditor", "Read only").unwrap();
        }
        let db = RecordDb::open_at(path).unwrap();
        assert_eq!(db.list_roles().unwrap().len(), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.insert_role("temp", "")?;
            Err(DbError::NotFound {
                entity: "role",
                id: 0,
            })
        });
        assert!(result.is_err());
        assert_eq!(db.count_rows("roles").unwrap(), 0);
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        let id = db
            .with_transaction(|tx| tx.insert_role("editor", "Edits records"))
            .expect("commit");
        assert_eq!(db.get_role(id).unwrap().map(|r| r.name), Some("editor".to_string()));
    }
}
