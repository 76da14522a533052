// User account service: form validation, history on edit, dashboard counters.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::ServiceError;
use crate::access::{AccessError, Caller, Operation};
use crate::config::Config;
use crate::credentials::{verify_credential, CredentialHasher};
use crate::db::{
    normalize_email, DbError, DbUserHistory, NewUser, RecordDb, UserChanges, UserListing,
    UserStats,
};

/// Shortest secret accepted on create or change.
pub const MIN_SECRET_LEN: usize = 8;

/// Submitted user fields. On update a blank `secret` keeps the stored one.
#[derive(Debug, Clone, Default)]
pub struct UserForm {
    pub name: String,
    pub surname: String,
    pub age: Option<u32>,
    pub email: String,
    pub phone: Option<String>,
    pub secret: String,
    pub secret_confirmation: String,
    pub is_active: bool,
    pub role_id: i64,
    pub country_id: i64,
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex should compile"))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email.trim())
}

pub(crate) fn validate_secret(secret: &str, confirmation: &str) -> Result<(), ServiceError> {
    if secret != confirmation {
        return Err(ServiceError::invalid("secret_confirmation", "does not match the secret"));
    }
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(ServiceError::invalid(
            "secret",
            format!("must be at least {} characters", MIN_SECRET_LEN),
        ));
    }
    Ok(())
}

fn validate_form(db: &RecordDb, form: &UserForm, secret_required: bool) -> Result<(), ServiceError> {
    if form.name.trim().is_empty() {
        return Err(ServiceError::invalid("name", "is required"));
    }
    if form.surname.trim().is_empty() {
        return Err(ServiceError::invalid("surname", "is required"));
    }
    if !is_valid_email(&form.email) {
        return Err(ServiceError::invalid("email", "is not a valid email address"));
    }
    if secret_required || !form.secret.is_empty() {
        validate_secret(&form.secret, &form.secret_confirmation)?;
    }
    if !db.role_exists(form.role_id)? {
        return Err(ServiceError::invalid("role_id", "does not exist"));
    }
    if !db.country_exists(form.country_id)? {
        return Err(ServiceError::invalid("country_id", "does not exist"));
    }
    Ok(())
}

fn normalized_phone(phone: &Option<String>) -> Option<String> {
    phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

pub fn create_user<H: CredentialHasher + ?Sized>(
    db: &RecordDb,
    hasher: &H,
    caller: &Caller,
    form: &UserForm,
    now: DateTime<Utc>,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageUsers)?;
    validate_form(db, form, true)?;

    let email = normalize_email(&form.email);
    let id = db.insert_user(&NewUser {
        name: form.name.trim().to_string(),
        surname: form.surname.trim().to_string(),
        age: form.age,
        email: email.clone(),
        phone: normalized_phone(&form.phone),
        credential_hash: hasher.hash(&form.secret)?,
        is_active: form.is_active,
        role_id: form.role_id,
        country_id: form.country_id,
        created_at: now.to_rfc3339(),
    })?;

    log::info!("{} created user {} ({})", caller.email, id, email);
    Ok(id)
}

/// Edit a user. The previous values are kept in the user's history.
pub fn update_user<H: CredentialHasher + ?Sized>(
    db: &RecordDb,
    hasher: &H,
    caller: &Caller,
    id: i64,
    form: &UserForm,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    caller.require(Operation::ManageUsers)?;
    if db.get_user(id)?.is_none() {
        return Err(DbError::NotFound { entity: "user", id }.into());
    }
    validate_form(db, form, false)?;

    let credential_hash = if form.secret.is_empty() {
        None
    } else {
        Some(hasher.hash(&form.secret)?)
    };

    db.update_user(
        id,
        &UserChanges {
            name: form.name.trim().to_string(),
            surname: form.surname.trim().to_string(),
            age: form.age,
            email: normalize_email(&form.email),
            phone: normalized_phone(&form.phone),
            is_active: form.is_active,
            role_id: form.role_id,
            country_id: form.country_id,
            credential_hash,
        },
        &now.to_rfc3339(),
    )?;

    log::info!("{} updated user {}", caller.email, id);
    Ok(())
}

pub fn delete_user(db: &RecordDb, caller: &Caller, id: i64) -> Result<(), ServiceError> {
    caller.require(Operation::ManageUsers)?;
    if caller.user_id == id {
        return Err(ServiceError::invalid("id", "cannot delete your own account"));
    }
    db.delete_user(id)?;
    log::info!("{} deleted user {}", caller.email, id);
    Ok(())
}

pub fn list_users(db: &RecordDb, caller: &Caller) -> Result<Vec<UserListing>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.list_users()?)
}

pub fn user_history(
    db: &RecordDb,
    caller: &Caller,
    id: i64,
) -> Result<Vec<DbUserHistory>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.get_user_history(id)?)
}

/// Dashboard counters; "recent" uses the configured window.
pub fn user_stats(
    db: &RecordDb,
    caller: &Caller,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<UserStats, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.user_stats(now, config.recent_window_days)?)
}

/// Change the caller's own secret after checking the current one.
pub fn change_own_secret<H: CredentialHasher + ?Sized>(
    db: &RecordDb,
    hasher: &H,
    caller: &Caller,
    current: &str,
    new_secret: &str,
    confirmation: &str,
) -> Result<(), ServiceError> {
    let user = db.get_user(caller.user_id)?.ok_or(DbError::NotFound {
        entity: "user",
        id: caller.user_id,
    })?;
    if !verify_credential(hasher, &user, current) {
        return Err(AccessError::InvalidCredentials.into());
    }
    validate_secret(new_secret, confirmation)?;

    db.set_credential_hash(user.id, &hasher.hash(new_secret)?)?;
    log::info!("{} changed their secret", caller.email);
    Ok(())
}
