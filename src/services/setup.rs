// First-run setup: configured roles, base currency and country, first admin.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::users::{is_valid_email, validate_secret};
use super::ServiceError;
use crate::config::Config;
use crate::credentials::CredentialHasher;
use crate::db::{normalize_email, NewUser, RecordDb};

/// Values needed to bring up an empty database.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub admin_name: String,
    pub admin_surname: String,
    pub admin_email: String,
    pub admin_secret: String,
    pub currency_code: String,
    pub currency_name: String,
    pub country_name: String,
    pub country_code: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub roles_created: Vec<String>,
    /// Set only when the database had no users.
    pub admin_user_id: Option<i64>,
}

/// Role names the configuration refers to, plus `viewer`, without repeats.
fn configured_roles(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in config
        .admin_roles
        .iter()
        .chain(config.editor_roles.iter())
        .map(String::as_str)
        .chain(std::iter::once("viewer"))
    {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Create missing roles and, on a database without users, the base
/// currency, its country, and an administrator. Safe to run repeatedly.
pub fn bootstrap<H: CredentialHasher + ?Sized>(
    db: &RecordDb,
    hasher: &H,
    config: &Config,
    input: &Bootstrap,
    now: DateTime<Utc>,
) -> Result<BootstrapReport, ServiceError> {
    let admin_role = config
        .admin_roles
        .first()
        .cloned()
        .ok_or_else(|| ServiceError::invalid("adminRoles", "at least one admin role is required"))?;

    db.with_transaction(|db| {
        let mut report = BootstrapReport::default();
        for name in configured_roles(config) {
            if db.get_role_by_name(&name)?.is_none() {
                db.insert_role(&name, "")?;
                report.roles_created.push(name);
            }
        }

        if db.count_users()? > 0 {
            return Ok(report);
        }

        if !is_valid_email(&input.admin_email) {
            return Err(ServiceError::invalid("email", "is not a valid email address"));
        }
        validate_secret(&input.admin_secret, &input.admin_secret)?;

        let currency_id = match db.get_currency_by_code(&input.currency_code)? {
            Some(currency) => currency.id,
            None => db.insert_currency(&input.currency_code, &input.currency_name, None, true)?,
        };
        let existing_country = db
            .list_countries()?
            .into_iter()
            .find(|c| c.iso_code.eq_ignore_ascii_case(input.country_code.trim()));
        let country_id = match existing_country {
            Some(country) => country.id,
            None => db.insert_country(&input.country_name, &input.country_code, currency_id)?,
        };
        let role_id = db
            .get_role_by_name(&admin_role)?
            .map(|r| r.id)
            .ok_or_else(|| ServiceError::invalid("adminRoles", "admin role was not created"))?;

        let user_id = db.insert_user(&NewUser {
            name: input.admin_name.trim().to_string(),
            surname: input.admin_surname.trim().to_string(),
            age: None,
            email: normalize_email(&input.admin_email),
            phone: None,
            credential_hash: hasher.hash(&input.admin_secret)?,
            is_active: true,
            role_id,
            country_id,
            created_at: now.to_rfc3339(),
        })?;
        log::info!("Created first administrator {}", input.admin_email.trim());
        report.admin_user_id = Some(user_id);
        Ok(report)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{authenticate, PermissionLevel};
    use crate::credentials::test_support::fast_hasher;
    use crate::db::test_utils::test_db;

    fn input() -> Bootstrap {
        Bootstrap {
            admin_name: "Root".to_string(),
            admin_surname: "Admin".to_string(),
            admin_email: "Root@Example.com".to_string(),
            admin_secret: "first-secret".to_string(),
            currency_code: "clp".to_string(),
            currency_name: "Peso chileno".to_string(),
            country_name: "Chile".to_string(),
            country_code: "CL".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        "2025-03-10T09:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_bootstrap_creates_admin_once() {
        let db = test_db();
        let hasher = fast_hasher();
        let config = Config::default();

        let first = bootstrap(&db, &hasher, &config, &input(), now()).unwrap();
        assert_eq!(first.roles_created, vec!["admin", "editor", "viewer"]);
        assert!(first.admin_user_id.is_some());

        let caller =
            authenticate(&db, &hasher, &config, "root@example.com", "first-secret").unwrap();
        assert_eq!(caller.level, PermissionLevel::Admin);
        assert!(db.get_currency_by_code("CLP").unwrap().unwrap().is_base);

        let second = bootstrap(&db, &hasher, &config, &input(), now()).unwrap();
        assert_eq!(second, BootstrapReport::default());
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn test_bootstrap_rejects_short_secret_and_rolls_back() {
        let db = test_db();
        let mut weak = input();
        weak.admin_secret = "short".to_string();

        let err = bootstrap(&db, &fast_hasher(), &Config::default(), &weak, now()).unwrap_err();
        assert_eq!(err.field(), Some("secret"));
        assert!(db.list_roles().unwrap().is_empty());
        assert_eq!(db.count_users().unwrap(), 0);
    }

    #[test]
    fn test_configured_roles_deduplicates() {
        let config = Config {
            admin_roles: vec!["jefe".to_string(), "admin".to_string()],
            editor_roles: vec!["admin".to_string(), "contador".to_string()],
            ..Config::default()
        };
        assert_eq!(configured_roles(&config), vec!["jefe", "admin", "contador", "viewer"]);
    }
}
