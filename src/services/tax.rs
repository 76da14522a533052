// Tax records service: subsidiaries and their per-period tax qualifications.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::ServiceError;
use crate::access::{Caller, Operation};
use crate::db::{
    DbError, DbSubsidiary, DbTaxQualification, NewSubsidiary, NewTaxQualification, RecordDb,
};

/// Longest accepted qualification status label.
pub const MAX_STATUS_LEN: usize = 20;

/// Amounts are stored with two decimals and at most 16 integer digits.
fn max_tax_amount() -> Decimal {
    Decimal::new(9_999_999_999_999_999, 0)
}

pub fn add_subsidiary(
    db: &RecordDb,
    caller: &Caller,
    subsidiary: &NewSubsidiary,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageTaxRecords)?;
    if subsidiary.legal_name.trim().is_empty() {
        return Err(ServiceError::invalid("legal_name", "is required"));
    }
    if subsidiary.tax_id.trim().is_empty() {
        return Err(ServiceError::invalid("tax_id", "is required"));
    }
    if !db.country_exists(subsidiary.country_id)? {
        return Err(ServiceError::invalid("country_id", "does not exist"));
    }

    let id = db.insert_subsidiary(subsidiary)?;
    log::info!(
        "{} added subsidiary {} ({})",
        caller.email,
        subsidiary.legal_name.trim(),
        subsidiary.tax_id.trim()
    );
    Ok(id)
}

pub fn list_subsidiaries(db: &RecordDb, caller: &Caller) -> Result<Vec<DbSubsidiary>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.list_subsidiaries()?)
}

fn validate_period_and_amount(
    period_start: NaiveDate,
    period_end: NaiveDate,
    tax_amount: Decimal,
    status: &str,
) -> Result<(), ServiceError> {
    if period_end < period_start {
        return Err(ServiceError::invalid("period_end", "must not be before period_start"));
    }
    if tax_amount.is_sign_negative() {
        return Err(ServiceError::invalid("tax_amount", "must not be negative"));
    }
    if tax_amount.trunc() > max_tax_amount() {
        return Err(ServiceError::invalid("tax_amount", "is too large"));
    }
    let status = status.trim();
    if status.is_empty() || status.chars().count() > MAX_STATUS_LEN {
        return Err(ServiceError::invalid(
            "status",
            format!("must be 1-{} characters", MAX_STATUS_LEN),
        ));
    }
    Ok(())
}

/// Record a qualification for one period of a subsidiary, with the caller
/// as its creator.
pub fn add_tax_qualification(
    db: &RecordDb,
    caller: &Caller,
    subsidiary_id: i64,
    period_start: NaiveDate,
    period_end: NaiveDate,
    tax_amount: Decimal,
    status: &str,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageTaxRecords)?;
    validate_period_and_amount(period_start, period_end, tax_amount, status)?;
    if db.get_subsidiary(subsidiary_id)?.is_none() {
        return Err(ServiceError::invalid("subsidiary_id", "does not exist"));
    }

    let id = db.insert_tax_qualification(&NewTaxQualification {
        subsidiary_id,
        period_start,
        period_end,
        tax_amount,
        status: status.trim().to_string(),
        created_by: caller.user_id,
    })?;
    log::info!(
        "{} recorded qualification {} for subsidiary {} from {}",
        caller.email,
        id,
        subsidiary_id,
        period_start
    );
    Ok(id)
}

/// Change a qualification's period end, amount and status, recording the
/// caller as its modifier.
pub fn update_tax_qualification(
    db: &RecordDb,
    caller: &Caller,
    id: i64,
    period_end: NaiveDate,
    tax_amount: Decimal,
    status: &str,
) -> Result<DbTaxQualification, ServiceError> {
    caller.require(Operation::ManageTaxRecords)?;
    let current = db.get_tax_qualification(id)?.ok_or(DbError::NotFound {
        entity: "tax qualification",
        id,
    })?;
    validate_period_and_amount(current.period_start, period_end, tax_amount, status)?;

    db.update_tax_qualification(id, period_end, tax_amount, status.trim(), caller.user_id)?;
    log::info!("{} updated qualification {}", caller.email, id);

    db.get_tax_qualification(id)?.ok_or_else(|| {
        DbError::NotFound {
            entity: "tax qualification",
            id,
        }
        .into()
    })
}

pub fn list_tax_qualifications(
    db: &RecordDb,
    caller: &Caller,
    subsidiary_id: i64,
) -> Result<Vec<DbTaxQualification>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.list_tax_qualifications(subsidiary_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessError, PermissionLevel};
    use crate::db::test_utils::{amount, date, seed_reference, test_db, Seed};
    use crate::services::test_support::caller_at;

    fn subsidiary(seed: &Seed) -> NewSubsidiary {
        NewSubsidiary {
            legal_name: "Minera Norte SpA".to_string(),
            tax_id: "76.123.456-7".to_string(),
            main_activity: "Mining services".to_string(),
            tax_regime: "General".to_string(),
            country_id: seed.country_id,
        }
    }

    #[test]
    fn test_qualification_records_creator_and_modifier() {
        let db = test_db();
        let seed = seed_reference(&db);
        let creator = caller_at(&db, &seed, "ana@example.com", PermissionLevel::Editor);
        let modifier = caller_at(&db, &seed, "beto@example.com", PermissionLevel::Editor);
        let sub = add_subsidiary(&db, &creator, &subsidiary(&seed)).unwrap();

        let id = add_tax_qualification(
            &db,
            &creator,
            sub,
            date(2025, 1, 1),
            date(2025, 1, 31),
            amount("1500000.456"),
            " Draft ",
        )
        .unwrap();
        let stored = db.get_tax_qualification(id).unwrap().unwrap();
        assert_eq!(stored.created_by, creator.user_id);
        assert_eq!(stored.modified_by, None);
        assert_eq!(stored.tax_amount, amount("1500000.46"));
        assert_eq!(stored.status, "Draft");

        let updated = update_tax_qualification(
            &db,
            &modifier,
            id,
            date(2025, 2, 28),
            amount("1600000"),
            "Filed",
        )
        .unwrap();
        assert_eq!(updated.modified_by, Some(modifier.user_id));
        assert_eq!(updated.created_by, creator.user_id);
        assert_eq!(updated.period_end, date(2025, 2, 28));
        assert_eq!(updated.status, "Filed");
    }

    #[test]
    fn test_period_and_amount_validation() {
        let db = test_db();
        let seed = seed_reference(&db);
        let editor = caller_at(&db, &seed, "ana@example.com", PermissionLevel::Editor);
        let sub = add_subsidiary(&db, &editor, &subsidiary(&seed)).unwrap();

        let backwards = add_tax_qualification(
            &db, &editor, sub, date(2025, 2, 1), date(2025, 1, 1), amount("1"), "Draft",
        );
        assert_eq!(backwards.unwrap_err().field(), Some("period_end"));

        let negative = add_tax_qualification(
            &db, &editor, sub, date(2025, 1, 1), date(2025, 1, 31), amount("-1"), "Draft",
        );
        assert_eq!(negative.unwrap_err().field(), Some("tax_amount"));

        let long_status = add_tax_qualification(
            &db, &editor, sub, date(2025, 1, 1), date(2025, 1, 31), amount("1"),
            "a status that is far too long",
        );
        assert_eq!(long_status.unwrap_err().field(), Some("status"));

        let missing = add_tax_qualification(
            &db, &editor, 999, date(2025, 1, 1), date(2025, 1, 31), amount("1"), "Draft",
        );
        assert_eq!(missing.unwrap_err().field(), Some("subsidiary_id"));
    }

    #[test]
    fn test_one_qualification_per_period_start() {
        let db = test_db();
        let seed = seed_reference(&db);
        let editor = caller_at(&db, &seed, "ana@example.com", PermissionLevel::Editor);
        let sub = add_subsidiary(&db, &editor, &subsidiary(&seed)).unwrap();

        add_tax_qualification(&db, &editor, sub, date(2025, 1, 1), date(2025, 1, 31), amount("1"), "Draft")
            .unwrap();
        let again = add_tax_qualification(
            &db, &editor, sub, date(2025, 1, 1), date(2025, 3, 31), amount("2"), "Draft",
        );
        assert!(again.unwrap_err().field().is_some());

        add_tax_qualification(&db, &editor, sub, date(2025, 2, 1), date(2025, 2, 28), amount("1"), "Draft")
            .unwrap();
        let listed = list_tax_qualifications(&db, &editor, sub).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].period_start, date(2025, 2, 1));
    }

    #[test]
    fn test_viewer_reads_but_cannot_write() {
        let db = test_db();
        let seed = seed_reference(&db);
        let viewer = caller_at(&db, &seed, "view@example.com", PermissionLevel::Viewer);

        let err = add_subsidiary(&db, &viewer, &subsidiary(&seed)).unwrap_err();
        assert!(matches!(err, ServiceError::Access(AccessError::Forbidden { .. })));
        assert!(list_subsidiaries(&db, &viewer).unwrap().is_empty());
    }

    #[test]
    fn test_subsidiary_requires_known_country() {
        let db = test_db();
        let seed = seed_reference(&db);
        let editor = caller_at(&db, &seed, "ana@example.com", PermissionLevel::Editor);
        let mut sub = subsidiary(&seed);
        sub.country_id = 42;
        assert_eq!(
            add_subsidiary(&db, &editor, &sub).unwrap_err().field(),
            Some("country_id")
        );
    }
}
