// Reference data service: roles, currencies, countries, exchange rates.

use std::ops::RangeInclusive;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::ServiceError;
use crate::access::{Caller, Operation};
use crate::db::{DbCountry, DbCurrency, DbExchangeRate, DbRole, RecordDb};

// =============================================================================
// Roles
// =============================================================================

pub fn add_role(
    db: &RecordDb,
    caller: &Caller,
    name: &str,
    description: &str,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageRoles)?;
    if name.trim().is_empty() {
        return Err(ServiceError::invalid("name", "is required"));
    }
    let id = db.insert_role(name, description)?;
    log::info!("{} added role '{}'", caller.email, name.trim());
    Ok(id)
}

pub fn list_roles(db: &RecordDb, caller: &Caller) -> Result<Vec<DbRole>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.list_roles()?)
}

// =============================================================================
// Currencies and countries
// =============================================================================

fn require_iso_code(field: &str, code: &str, len: RangeInclusive<usize>) -> Result<(), ServiceError> {
    let code = code.trim();
    if !len.contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        let expected = if len.start() == len.end() {
            len.start().to_string()
        } else {
            format!("{}-{}", len.start(), len.end())
        };
        return Err(ServiceError::invalid(field, format!("must be {} letters", expected)));
    }
    Ok(())
}

pub fn add_currency(
    db: &RecordDb,
    caller: &Caller,
    iso_code: &str,
    name: &str,
    symbol: Option<&str>,
    is_base: bool,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageReferenceData)?;
    require_iso_code("iso_code", iso_code, 3..=3)?;
    if name.trim().is_empty() {
        return Err(ServiceError::invalid("name", "is required"));
    }
    let id = db.insert_currency(iso_code, name, symbol, is_base)?;
    log::info!("{} added currency {}", caller.email, iso_code.trim().to_uppercase());
    Ok(id)
}

pub fn list_currencies(db: &RecordDb, caller: &Caller) -> Result<Vec<DbCurrency>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.list_currencies()?)
}

fn currency_by_code(db: &RecordDb, field: &str, code: &str) -> Result<DbCurrency, ServiceError> {
    db.get_currency_by_code(code)?
        .ok_or_else(|| ServiceError::invalid(field, format!("unknown currency {}", code.trim())))
}

/// Add a country whose local currency is `currency_code`.
pub fn add_country(
    db: &RecordDb,
    caller: &Caller,
    name: &str,
    iso_code: &str,
    currency_code: &str,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageReferenceData)?;
    require_iso_code("iso_code", iso_code, 2..=3)?;
    if name.trim().is_empty() {
        return Err(ServiceError::invalid("name", "is required"));
    }
    let currency = currency_by_code(db, "currency", currency_code)?;
    let id = db.insert_country(name, iso_code, currency.id)?;
    log::info!("{} added country {} ({})", caller.email, name.trim(), currency.iso_code);
    Ok(id)
}

pub fn list_countries(db: &RecordDb, caller: &Caller) -> Result<Vec<DbCountry>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    Ok(db.list_countries()?)
}

// =============================================================================
// Exchange rates
// =============================================================================

/// Record `1 origin = rate destination` on `rate_date`.
pub fn add_exchange_rate(
    db: &RecordDb,
    caller: &Caller,
    origin_code: &str,
    destination_code: &str,
    rate_date: NaiveDate,
    rate: Decimal,
) -> Result<i64, ServiceError> {
    caller.require(Operation::ManageReferenceData)?;
    if rate <= Decimal::ZERO {
        return Err(ServiceError::invalid("rate", "must be positive"));
    }
    let origin = currency_by_code(db, "origin", origin_code)?;
    let destination = currency_by_code(db, "destination", destination_code)?;
    if origin.id == destination.id {
        return Err(ServiceError::invalid("destination", "must differ from origin"));
    }

    let id = db.insert_exchange_rate(origin.id, destination.id, rate_date, rate)?;
    log::info!(
        "{} recorded {}/{} = {} on {}",
        caller.email,
        origin.iso_code,
        destination.iso_code,
        rate,
        rate_date
    );
    Ok(id)
}

/// The rate in effect on `on`: the latest one recorded on or before it.
pub fn exchange_rate_on(
    db: &RecordDb,
    caller: &Caller,
    origin_code: &str,
    destination_code: &str,
    on: NaiveDate,
) -> Result<Option<DbExchangeRate>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    let origin = currency_by_code(db, "origin", origin_code)?;
    let destination = currency_by_code(db, "destination", destination_code)?;
    Ok(db.find_exchange_rate(origin.id, destination.id, on)?)
}

/// Convert `amount` between currencies with the rate in effect on `on`.
/// Falls back to the inverse of the opposite pair. `None` when neither
/// direction has a rate yet.
pub fn convert_amount(
    db: &RecordDb,
    caller: &Caller,
    amount: Decimal,
    origin_code: &str,
    destination_code: &str,
    on: NaiveDate,
) -> Result<Option<Decimal>, ServiceError> {
    caller.require(Operation::ReadRecords)?;
    let origin = currency_by_code(db, "origin", origin_code)?;
    let destination = currency_by_code(db, "destination", destination_code)?;
    if origin.id == destination.id {
        return Ok(Some(amount));
    }

    let converted = if let Some(direct) = db.find_exchange_rate(origin.id, destination.id, on)? {
        amount.checked_mul(direct.rate)
    } else {
        match db.find_exchange_rate(destination.id, origin.id, on)? {
            Some(inverse) => amount.checked_div(inverse.rate),
            None => return Ok(None),
        }
    };
    converted
        .map(|value| Some(value.round_dp(2)))
        .ok_or_else(|| ServiceError::invalid("amount", "is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::PermissionLevel;
    use crate::db::test_utils::{amount, date, seed_reference, test_db};
    use crate::services::test_support::caller_at;

    #[test]
    fn test_reference_data_requires_admin() {
        let db = test_db();
        let seed = seed_reference(&db);
        let editor = caller_at(&db, &seed, "editor@example.com", PermissionLevel::Editor);

        assert!(add_currency(&db, &editor, "USD", "US dollar", Some("US$"), false).is_err());
        assert!(add_role(&db, &editor, "auditor", "").is_err());
        assert_eq!(list_currencies(&db, &editor).unwrap().len(), 1);
    }

    #[test]
    fn test_add_country_resolves_currency_code() {
        let db = test_db();
        let seed = seed_reference(&db);
        let admin = caller_at(&db, &seed, "root@example.com", PermissionLevel::Admin);

        let err = add_country(&db, &admin, "Argentina", "ar", "ars").unwrap_err();
        assert_eq!(err.field(), Some("currency"));

        let ars = add_currency(&db, &admin, "ars", "Peso argentino", Some("$"), false).unwrap();
        let country = add_country(&db, &admin, "Argentina", "ar", "ARS").unwrap();
        let stored = db.get_country(country).unwrap().unwrap();
        assert_eq!(stored.iso_code, "AR");
        assert_eq!(stored.currency_id, ars);

        let err = add_country(&db, &admin, "Chile", "CL", "CLP").unwrap_err();
        assert!(err.field().is_some());
    }

    #[test]
    fn test_iso_code_shape_is_checked() {
        let db = test_db();
        let seed = seed_reference(&db);
        let admin = caller_at(&db, &seed, "root@example.com", PermissionLevel::Admin);
        assert_eq!(
            add_currency(&db, &admin, "US", "US dollar", None, false).unwrap_err().field(),
            Some("iso_code")
        );
        assert_eq!(
            add_country(&db, &admin, "Peru", "P3", "CLP").unwrap_err().field(),
            Some("iso_code")
        );
    }

    #[test]
    fn test_rates_lookup_and_conversion() {
        let db = test_db();
        let seed = seed_reference(&db);
        let admin = caller_at(&db, &seed, "root@example.com", PermissionLevel::Admin);
        add_currency(&db, &admin, "USD", "US dollar", Some("US$"), false).unwrap();

        add_exchange_rate(&db, &admin, "USD", "CLP", date(2025, 3, 1), amount("950.5")).unwrap();
        add_exchange_rate(&db, &admin, "USD", "CLP", date(2025, 3, 5), amount("960")).unwrap();

        let rate = exchange_rate_on(&db, &admin, "usd", "clp", date(2025, 3, 4))
            .unwrap()
            .unwrap();
        assert_eq!(rate.rate, amount("950.5"));
        assert!(exchange_rate_on(&db, &admin, "USD", "CLP", date(2025, 2, 1))
            .unwrap()
            .is_none());

        let clp = convert_amount(&db, &admin, amount("10"), "USD", "CLP", date(2025, 3, 6)).unwrap();
        assert_eq!(clp, Some(amount("9600")));
        let usd = convert_amount(&db, &admin, amount("9600"), "CLP", "USD", date(2025, 3, 6)).unwrap();
        assert_eq!(usd, Some(amount("10")));
        let same = convert_amount(&db, &admin, amount("3"), "CLP", "CLP", date(2025, 3, 6)).unwrap();
        assert_eq!(same, Some(amount("3")));
    }

    #[test]
    fn test_conversion_overflow_is_a_field_error() {
        let db = test_db();
        let seed = seed_reference(&db);
        let admin = caller_at(&db, &seed, "root@example.com", PermissionLevel::Admin);
        add_currency(&db, &admin, "USD", "US dollar", None, false).unwrap();
        add_currency(&db, &admin, "EUR", "Euro", None, false).unwrap();
        add_exchange_rate(&db, &admin, "CLP", "USD", date(2025, 3, 1), amount("950")).unwrap();
        add_exchange_rate(&db, &admin, "USD", "EUR", date(2025, 3, 1), amount("0.000001")).unwrap();

        let direct = convert_amount(&db, &admin, Decimal::MAX, "CLP", "USD", date(2025, 3, 6));
        assert_eq!(direct.unwrap_err().field(), Some("amount"));
        let inverse = convert_amount(&db, &admin, Decimal::MAX, "EUR", "USD", date(2025, 3, 6));
        assert_eq!(inverse.unwrap_err().field(), Some("amount"));

        let small = convert_amount(&db, &admin, amount("2"), "CLP", "USD", date(2025, 3, 6)).unwrap();
        assert_eq!(small, Some(amount("1900")));
    }

    #[test]
    fn test_exchange_rate_validation() {
        let db = test_db();
        let seed = seed_reference(&db);
        let admin = caller_at(&db, &seed, "root@example.com", PermissionLevel::Admin);
        add_currency(&db, &admin, "USD", "US dollar", None, false).unwrap();

        let zero = add_exchange_rate(&db, &admin, "USD", "CLP", date(2025, 3, 1), Decimal::ZERO);
        assert_eq!(zero.unwrap_err().field(), Some("rate"));
        let same = add_exchange_rate(&db, &admin, "CLP", "CLP", date(2025, 3, 1), amount("1"));
        assert_eq!(same.unwrap_err().field(), Some("destination"));

        add_exchange_rate(&db, &admin, "USD", "CLP", date(2025, 3, 1), amount("950")).unwrap();
        let dup = add_exchange_rate(&db, &admin, "USD", "CLP", date(2025, 3, 1), amount("951"));
        assert!(dup.unwrap_err().field().is_some());
    }
}
