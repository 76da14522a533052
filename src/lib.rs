//! Tax qualification records with reference data, user accounts, and a
//! bulk user import pipeline, stored in SQLite.

pub mod access;
pub mod archive;
pub mod config;
pub mod credentials;
pub mod db;
pub mod importer;
mod migrations;
pub mod services;
pub mod util;
