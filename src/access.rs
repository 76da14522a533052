//! Caller identity and role-based permissions.
//!
//! Operations that need to know who is acting take a [`Caller`] argument.
//! A caller is produced by [`authenticate`], which checks the stored
//! credential, and carries the permission level its role maps to.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::credentials::{verify_credential, CredentialHasher};
use crate::db::{DbError, RecordDb};

/// Permission levels, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionLevel {
    /// Read records only
    #[default]
    Viewer,
    /// Create and edit users and tax records, run imports
    Editor,
    /// Manage roles and reference data
    Admin,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionLevel::Viewer => write!(f, "VIEWER"),
            PermissionLevel::Editor => write!(f, "EDITOR"),
            PermissionLevel::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Operations guarded by a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadRecords,
    ImportUsers,
    ManageUsers,
    ManageTaxRecords,
    ManageRoles,
    ManageReferenceData,
}

impl Operation {
    pub fn required_level(&self) -> PermissionLevel {
        match self {
            Operation::ReadRecords => PermissionLevel::Viewer,
            Operation::ImportUsers | Operation::ManageUsers | Operation::ManageTaxRecords => {
                PermissionLevel::Editor
            }
            Operation::ManageRoles | Operation::ManageReferenceData => PermissionLevel::Admin,
        }
    }
}

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Invalid email or secret")]
    InvalidCredentials,

    #[error("Account {0} is inactive")]
    Inactive(String),

    #[error("{operation:?} requires {required} access; caller has {actual}")]
    Forbidden {
        operation: Operation,
        required: PermissionLevel,
        actual: PermissionLevel,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub user_id: i64,
    pub email: String,
    pub role: String,
    pub level: PermissionLevel,
}

impl Caller {
    pub fn can(&self, operation: Operation) -> bool {
        self.level >= operation.required_level()
    }

    /// `Ok(())` when allowed, [`AccessError::Forbidden`] otherwise.
    pub fn require(&self, operation: Operation) -> Result<(), AccessError> {
        if self.can(operation) {
            Ok(())
        } else {
            Err(AccessError::Forbidden {
                operation,
                required: operation.required_level(),
                actual: self.level,
            })
        }
    }
}

/// Map a role name to its permission level. Unlisted roles are viewers.
pub fn level_for_role(config: &Config, role_name: &str) -> PermissionLevel {
    if config.admin_roles.iter().any(|r| r == role_name) {
        PermissionLevel::Admin
    } else if config.editor_roles.iter().any(|r| r == role_name) {
        PermissionLevel::Editor
    } else {
        PermissionLevel::Viewer
    }
}

/// Resolve a caller from email and secret.
///
/// Unknown emails and wrong secrets produce the same error.
pub fn authenticate<H: CredentialHasher + ?Sized>(
    db: &RecordDb,
    hasher: &H,
    config: &Config,
    email: &str,
    secret: &str,
) -> Result<Caller, AccessError> {
    let user = db
        .get_user_by_email(email)?
        .ok_or(AccessError::InvalidCredentials)?;

    if !verify_credential(hasher, &user, secret) {
        log::warn!("Failed sign-in for {}", user.email);
        return Err(AccessError::InvalidCredentials);
    }
    if !user.is_active {
        return Err(AccessError::Inactive(user.email));
    }

    let role = db.get_role(user.role_id)?.ok_or(DbError::NotFound {
        entity: "role",
        id: user.role_id,
    })?;
    let level = level_for_role(config, &role.name);

    log::info!("Authenticated {} as {} ({})", user.email, role.name, level);
    Ok(Caller {
        user_id: user.id,
        email: user.email,
        role: role.name,
        level,
    })
}
