use chrono::{DateTime, Duration, Utc};

use super::*;

const USER_COLUMNS: &str = "u.id, u.name, u.surname, u.age, u.email, u.credential_hash, u.phone,
     u.created_at, u.is_active, u.role_id, u.country_id";

/// Trimmed and lower-cased with full Unicode case mapping. SQLite's
/// `LOWER()` folds ASCII only.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl RecordDb {
    // =========================================================================
    // Roles
    // =========================================================================

    pub fn insert_role(&self, name: &str, description: &str) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO roles (name, description) VALUES (?1, ?2)",
            params![name.trim(), description.trim()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_role(&self, id: i64) -> Result<Option<DbRole>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description FROM roles WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], Self::map_role_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_role_by_name(&self, name: &str) -> Result<Option<DbRole>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description FROM roles WHERE name = ?1")?;
        let mut rows = stmt.query_map(params![name.trim()], Self::map_role_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn role_exists(&self, id: i64) -> Result<bool, DbError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM roles WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    /// All roles ordered by name.
    pub fn list_roles(&self) -> Result<Vec<DbRole>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description FROM roles ORDER BY name")?;
        let rows = stmt.query_map([], Self::map_role_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Delete a role. Users holding the role are deleted with it.
    pub fn delete_role(&self, id: i64) -> Result<(), DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM roles WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound { entity: "role", id });
        }
        Ok(())
    }

    fn map_role_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbRole> {
        Ok(DbRole {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user. Email is stored normalized; a clash on email or phone
    /// comes back as [`DbError::Duplicate`].
    pub fn insert_user(&self, user: &NewUser) -> Result<i64, DbError> {
        let email = normalize_email(&user.email);
        self.conn.execute(
            "INSERT INTO users (
                name, surname, age, email, credential_hash, phone,
                created_at, is_active, role_id, country_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.name,
                user.surname,
                user.age,
                email,
                user.credential_hash,
                user.phone,
                user.created_at,
                user.is_active as i32,
                user.role_id,
                user.country_id,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<DbUser>, DbError> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = ?1", USER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_user_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Look up a user by email (case-insensitive).
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<DbUser>, DbError> {
        let sql = format!("SELECT {} FROM users u WHERE u.email = ?1", USER_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![normalize_email(email)], Self::map_user_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Users joined with role and country names, ordered by name.
    pub fn list_users(&self) -> Result<Vec<UserListing>, DbError> {
        let sql = format!(
            "SELECT {}, r.name, c.name
             FROM users u
             JOIN roles r ON r.id = u.role_id
             JOIN countries c ON c.id = u.country_id
             ORDER BY u.name, u.surname, u.id",
            USER_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(UserListing {
                user: Self::map_user_row(row)?,
                role_name: row.get(11)?,
                country_name: row.get(12)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Apply `changes` to a user, first copying the current values into
    /// `user_history`. Both writes share one transaction.
    pub fn update_user(
        &self,
        id: i64,
        changes: &UserChanges,
        modified_at: &str,
    ) -> Result<(), DbError> {
        self.with_transaction(|db| {
            let snapshot = db.conn.execute(
                "INSERT INTO user_history (user_id, name, surname, age, email, phone, modified_at)
                 SELECT id, name, surname, age, email, phone, ?2 FROM users WHERE id = ?1",
                params![id, modified_at],
            )?;
            if snapshot == 0 {
                return Err(DbError::NotFound { entity: "user", id });
            }

            db.conn.execute(
                "UPDATE users SET
                    name = ?2, surname = ?3, age = ?4, email = ?5, phone = ?6,
                    is_active = ?7, role_id = ?8, country_id = ?9,
                    credential_hash = COALESCE(?10, credential_hash)
                 WHERE id = ?1",
                params![
                    id,
                    changes.name,
                    changes.surname,
                    changes.age,
                    normalize_email(&changes.email),
                    changes.phone,
                    changes.is_active as i32,
                    changes.role_id,
                    changes.country_id,
                    changes.credential_hash,
                ],
            )?;
            Ok(())
        })
    }

    /// Replace only the stored credential hash.
    pub fn set_credential_hash(&self, id: i64, credential_hash: &str) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE users SET credential_hash = ?2 WHERE id = ?1",
            params![id, credential_hash],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound { entity: "user", id });
        }
        Ok(())
    }

    /// Delete a user and its history. Fails with [`DbError::ForeignKey`]
    /// while tax qualifications name the user as creator or modifier.
    pub fn delete_user(&self, id: i64) -> Result<(), DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound { entity: "user", id });
        }
        Ok(())
    }

    /// Prior versions of a user, newest first.
    pub fn get_user_history(&self, user_id: i64) -> Result<Vec<DbUserHistory>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, surname, age, email, phone, modified_at
             FROM user_history WHERE user_id = ?1
             ORDER BY modified_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(DbUserHistory {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                surname: row.get(3)?,
                age: row.get(4)?,
                email: row.get(5)?,
                phone: row.get(6)?,
                modified_at: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Total users, users created within `recent_days` of `now`, active users.
    pub fn user_stats(&self, now: DateTime<Utc>, recent_days: i64) -> Result<UserStats, DbError> {
        let since = (now - Duration::days(recent_days)).to_rfc3339();
        Ok(self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN created_at >= ?1 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN is_active != 0 THEN 1 ELSE 0 END), 0)
             FROM users",
            params![since],
            |row| {
                Ok(UserStats {
                    total: row.get(0)?,
                    recent: row.get(1)?,
                    active: row.get(2)?,
                })
            },
        )?)
    }

    pub fn count_users(&self) -> Result<i64, DbError> {
        self.count_rows("users")
    }

    fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbUser> {
        Ok(DbUser {
            id: row.get(0)?,
            name: row.get(1)?,
            surname: row.get(2)?,
            age: row.get(3)?,
            email: row.get(4)?,
            credential_hash: row.get(5)?,
            phone: row.get(6)?,
            created_at: row.get(7)?,
            is_active: row.get::<_, i32>(8)? != 0,
            role_id: row.get(9)?,
            country_id: row.get(10)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;

    fn changes_from(user: &DbUser) -> UserChanges {
        UserChanges {
            name: user.name.clone(),
            surname: user.surname.clone(),
            age: user.age,
            email: user.email.clone(),
            phone: user.phone.clone(),
            is_active: user.is_active,
            role_id: user.role_id,
            country_id: user.country_id,
            credential_hash: None,
        }
    }

    #[test]
    fn test_insert_user_normalizes_email() {
        let db = test_db();
        let seed = seed_reference(&db);
        let id = db
            .insert_user(&sample_user(&seed, "  Ana.Rojas@Example.COM "))
            .unwrap();

        let user = db.get_user(id).unwrap().expect("user");
        assert_eq!(user.email, "ana.rojas@example.com");
        let by_email = db.get_user_by_email("ANA.ROJAS@example.com").unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(id));
    }

    #[test]
    fn test_duplicate_email_differing_only_in_case() {
        let db = test_db();
        let seed = seed_reference(&db);
        db.insert_user(&sample_user(&seed, "ana@example.com")).unwrap();

        let err = db
            .insert_user(&sample_user(&seed, "ANA@example.com"))
            .unwrap_err();
        match err {
            DbError::Duplicate { table, column } => {
                assert_eq!(table, "users");
                assert_eq!(column, "email");
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn test_non_ascii_email_case_is_folded_everywhere() {
        let db = test_db();
        let seed = seed_reference(&db);
        let ana = db.insert_user(&sample_user(&seed, "ÁNA@example.com")).unwrap();
        let other = db.insert_user(&sample_user(&seed, "otra@example.com")).unwrap();

        assert_eq!(db.get_user(ana).unwrap().unwrap().email, "ána@example.com");
        for lookup in ["ÁNA@example.com", "ána@example.com", " Ána@EXAMPLE.com "] {
            let found = db.get_user_by_email(lookup).unwrap();
            assert_eq!(found.map(|u| u.id), Some(ana), "lookup {lookup}");
        }

        let err = db
            .insert_user(&sample_user(&seed, "Ána@example.com"))
            .unwrap_err();
        assert!(err.is_duplicate());

        let mut changes = changes_from(&db.get_user(other).unwrap().unwrap());
        changes.email = "ÁNA@example.com".to_string();
        let err = db.update_user(other, &changes, "2025-04-01T00:00:00+00:00").unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(db.count_users().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_phone_is_rejected_but_missing_phones_are_not() {
        let db = test_db();
        let seed = seed_reference(&db);
        db.insert_user(&sample_user(&seed, "a@example.com")).unwrap();
        db.insert_user(&sample_user(&seed, "b@example.com")).unwrap();

        let mut first = sample_user(&seed, "c@example.com");
        first.phone = Some("+56912345678".to_string());
        db.insert_user(&first).unwrap();

        let mut second = sample_user(&seed, "d@example.com");
        second.phone = Some("+56912345678".to_string());
        let err = db.insert_user(&second).unwrap_err();
        assert!(
            matches!(err, DbError::Duplicate { ref column, .. } if column == "phone"),
            "got {err:?}"
        );
    }

    #[test]
    fn test_update_user_snapshots_previous_values() {
        let db = test_db();
        let seed = seed_reference(&db);
        let id = db.insert_user(&sample_user(&seed, "ana@example.com")).unwrap();
        let before = db.get_user(id).unwrap().unwrap();

        let mut changes = changes_from(&before);
        changes.surname = "Rojas Diaz".to_string();
        changes.age = Some(35);
        db.update_user(id, &changes, "2025-04-01T00:00:00+00:00").unwrap();

        changes.email = "ana.rd@example.com".to_string();
        db.update_user(id, &changes, "2025-05-01T00:00:00+00:00").unwrap();

        let after = db.get_user(id).unwrap().unwrap();
        assert_eq!(after.surname, "Rojas Diaz");
        assert_eq!(after.email, "ana.rd@example.com");
        assert_eq!(after.credential_hash, before.credential_hash);

        let history = db.get_user_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].email, "ana@example.com");
        assert_eq!(history[0].surname, "Rojas Diaz");
        assert_eq!(history[1].surname, "Rojas");
        assert_eq!(history[1].age, Some(34));
    }

    #[test]
    fn test_failed_update_leaves_no_history() {
        let db = test_db();
        let seed = seed_reference(&db);
        db.insert_user(&sample_user(&seed, "taken@example.com")).unwrap();
        let id = db.insert_user(&sample_user(&seed, "ana@example.com")).unwrap();

        let mut changes = changes_from(&db.get_user(id).unwrap().unwrap());
        changes.email = "taken@example.com".to_string();
        let err = db.update_user(id, &changes, "2025-04-01T00:00:00+00:00").unwrap_err();
        assert!(err.is_duplicate());
        assert!(db.get_user_history(id).unwrap().is_empty());
    }

    #[test]
    fn test_update_missing_user_is_not_found() {
        let db = test_db();
        let seed = seed_reference(&db);
        let id = db.insert_user(&sample_user(&seed, "ana@example.com")).unwrap();
        let changes = changes_from(&db.get_user(id).unwrap().unwrap());

        let err = db.update_user(id + 100, &changes, "2025-04-01T00:00:00+00:00");
        assert!(matches!(err, Err(DbError::NotFound { entity: "user", .. })));
    }

    #[test]
    fn test_deleting_role_cascades_to_users_and_history() {
        let db = test_db();
        let seed = seed_reference(&db);
        let id = db.insert_user(&sample_user(&seed, "ana@example.com")).unwrap();
        let changes = changes_from(&db.get_user(id).unwrap().unwrap());
        db.update_user(id, &changes, "2025-04-01T00:00:00+00:00").unwrap();

        db.delete_role(seed.role_id).unwrap();

        assert_eq!(db.count_users().unwrap(), 0);
        assert_eq!(db.count_rows("user_history").unwrap(), 0);
    }

    #[test]
    fn test_list_users_joins_names_in_name_order() {
        let db = test_db();
        let seed = seed_reference(&db);
        let mut zoe = sample_user(&seed, "zoe@example.com");
        zoe.name = "Zoe".to_string();
        db.insert_user(&zoe).unwrap();
        db.insert_user(&sample_user(&seed, "ana@example.com")).unwrap();

        let listing = db.list_users().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].user.name, "Ana");
        assert_eq!(listing[1].user.name, "Zoe");
        assert_eq!(listing[0].role_name, "admin");
        assert_eq!(listing[0].country_name, "Chile");
    }

    #[test]
    fn test_user_stats_counts_recent_and_active() {
        let db = test_db();
        let seed = seed_reference(&db);
        let now: DateTime<Utc> = "2025-03-10T00:00:00Z".parse().unwrap();

        let mut old = sample_user(&seed, "old@example.com");
        old.created_at = "2025-01-01T00:00:00+00:00".to_string();
        old.is_active = false;
        db.insert_user(&old).unwrap();

        let mut recent = sample_user(&seed, "recent@example.com");
        recent.created_at = "2025-03-08T09:30:00+00:00".to_string();
        db.insert_user(&recent).unwrap();

        let stats = db.user_stats(now, 7).unwrap();
        assert_eq!(
            stats,
            UserStats {
                total: 2,
                recent: 1,
                active: 1
            }
        );
    }

    #[test]
    fn test_user_stats_on_empty_store() {
        let db = test_db();
        let stats = db.user_stats(Utc::now(), 7).unwrap();
        assert_eq!(stats, UserStats::default());
    }
}
