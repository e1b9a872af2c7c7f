//! Maps the bank's account and transaction records onto the local model.
//!
//! Mapping is tolerant: a missing or unreadable amount becomes zero, a missing
//! timestamp becomes today and an unknown account type becomes
//! [AccountType::Checking]. Only a missing ID fails the record, because the
//! ID is what reconciliation matches on.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use time::{Date, OffsetDateTime, format_description::well_known::Rfc3339};

use crate::{
    account::AccountType,
    bank_api::{AccountResource, MoneyObject, TransactionResource},
};

/// The name given to accounts the bank did not name.
pub const DEFAULT_ACCOUNT_NAME: &str = "Unknown Account";

/// The description given to transactions without one.
pub const DEFAULT_DESCRIPTION: &str = "Unknown transaction";

/// The currency assumed when the bank does not give one.
pub const DEFAULT_CURRENCY: &str = "AUD";

/// A bank record that could not be mapped.
#[derive(Debug, thiserror::Error, PartialEq, Clone)]
pub enum MappingError {
    /// The record has no `id`.
    #[error("the record has no ID")]
    MissingExternalId,

    /// The record is not a JSON object.
    #[error("the record is not a valid resource: {0}")]
    Malformed(String),
}

/// An account as reported by the bank.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedAccount {
    /// The bank's ID for the account.
    pub external_id: String,
    /// The display name.
    pub name: String,
    /// The local account type.
    pub account_type: AccountType,
    /// The current balance, rounded to cents.
    pub balance: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// A transaction as reported by the bank.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedTransaction {
    /// The bank's ID for the transaction.
    pub external_id: String,
    /// The merchant's raw text if there is any, otherwise the bank's description.
    pub description: String,
    /// The signed amount, rounded to cents.
    pub amount: Decimal,
    /// The day the transaction was created, in the timestamp's own offset.
    pub date: Date,
    /// The bank's ID for the account the transaction belongs to.
    pub account_external_id: Option<String>,
}

/// Map the bank's account type names onto [AccountType].
///
/// Unknown or missing types map to [AccountType::Checking].
pub fn map_account_type(upstream: Option<&str>) -> AccountType {
    let upstream = upstream.map(|name| name.trim().to_uppercase());

    match upstream.as_deref() {
        Some("SAVER") => AccountType::Savings,
        Some("TRANSACTIONAL") => AccountType::Checking,
        Some("HOME_LOAN") => AccountType::Loan,
        Some("CREDIT") | Some("CREDIT_CARD") => AccountType::Credit,
        Some("INVESTMENT") => AccountType::Investment,
        _ => AccountType::Checking,
    }
}

/// Read an amount of money, preferring the decimal `value` and falling back to
/// `valueInBaseUnits`. Returns `None` if neither can be read.
pub fn parse_amount(money: &MoneyObject) -> Option<Decimal> {
    let from_value = match &money.value {
        Some(Value::String(text)) => Decimal::from_str(text.trim()).ok(),
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string()).ok(),
        _ => None,
    };

    from_value
        .or_else(|| money.value_in_base_units.map(|cents| Decimal::new(cents, 2)))
        .map(|amount| amount.round_dp(2))
}

fn amount_or_zero(money: Option<&MoneyObject>, external_id: &str) -> Decimal {
    match money.and_then(parse_amount) {
        Some(amount) => amount,
        None => {
            tracing::warn!("record {external_id} has no readable amount, using zero");
            Decimal::ZERO
        }
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}

fn parse_resource<'a, T: Deserialize<'a>>(raw: &'a Value) -> Result<T, MappingError> {
    if !raw.is_object() {
        return Err(MappingError::Malformed(format!("expected an object, got {raw}")));
    }

    T::deserialize(raw).map_err(|error| MappingError::Malformed(error.to_string()))
}

/// Map a raw account record.
///
/// # Errors
/// Returns a [MappingError] if the record is not an object or has no ID.
pub fn map_account(raw: &Value) -> Result<MappedAccount, MappingError> {
    let resource: AccountResource = parse_resource(raw)?;

    let external_id = non_empty(resource.id.as_deref())
        .ok_or(MappingError::MissingExternalId)?
        .to_owned();
    let attributes = resource.attributes.unwrap_or_default();

    let name = non_empty(attributes.display_name.as_deref())
        .unwrap_or(DEFAULT_ACCOUNT_NAME)
        .to_owned();
    let currency = attributes
        .balance
        .as_ref()
        .and_then(|balance| non_empty(balance.currency_code.as_deref()))
        .unwrap_or(DEFAULT_CURRENCY)
        .to_owned();
    let balance = amount_or_zero(attributes.balance.as_ref(), &external_id);

    Ok(MappedAccount {
        account_type: map_account_type(attributes.account_type.as_deref()),
        external_id,
        name,
        balance,
        currency,
    })
}

/// Map a raw transaction record, dating it today if it has no readable timestamp.
///
/// # Errors
/// Returns a [MappingError] if the record is not an object or has no ID.
pub fn map_transaction(raw: &Value) -> Result<MappedTransaction, MappingError> {
    map_transaction_with_fallback_date(raw, OffsetDateTime::now_utc().date())
}

/// Map a raw transaction record, dating it `fallback_date` if it has no readable timestamp.
///
/// # Errors
/// Returns a [MappingError] if the record is not an object or has no ID.
pub fn map_transaction_with_fallback_date(
    raw: &Value,
    fallback_date: Date,
) -> Result<MappedTransaction, MappingError> {
    let resource: TransactionResource = parse_resource(raw)?;

    let external_id = non_empty(resource.id.as_deref())
        .ok_or(MappingError::MissingExternalId)?
        .to_owned();
    let attributes = resource.attributes.unwrap_or_default();

    let description = non_empty(attributes.raw_text.as_deref())
        .or_else(|| non_empty(attributes.description.as_deref()))
        .unwrap_or(DEFAULT_DESCRIPTION)
        .to_owned();

    let amount = amount_or_zero(attributes.amount.as_ref(), &external_id);

    let date = match attributes
        .created_at
        .as_deref()
        .map(|created_at| OffsetDateTime::parse(created_at, &Rfc3339))
    {
        Some(Ok(created_at)) => created_at.date(),
        Some(Err(error)) => {
            tracing::warn!(
                "transaction {external_id} has an unreadable timestamp ({error}), dating it {fallback_date}"
            );
            fallback_date
        }
        None => {
            tracing::warn!("transaction {external_id} has no timestamp, dating it {fallback_date}");
            fallback_date
        }
    };

    let account_external_id = resource
        .relationships
        .and_then(|relationships| relationships.account)
        .and_then(|account| account.id().map(str::to_owned));

    Ok(MappedTransaction {
        external_id,
        description,
        amount,
        date,
        account_external_id,
    })
}

#[cfg(test)]
mod account_mapping_tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::{
        account::AccountType,
        mapper::{MappedAccount, MappingError, map_account, map_account_type},
    };

    #[test]
    fn maps_complete_account() {
        let raw = json!({
            "type": "accounts",
            "id": "acc-1",
            "attributes": {
                "displayName": "Spending",
                "accountType": "TRANSACTIONAL",
                "ownershipType": "INDIVIDUAL",
                "balance": {"currencyCode": "AUD", "value": "1234.56", "valueInBaseUnits": 123456},
                "createdAt": "2024-01-01T00:00:00+11:00"
            }
        });

        assert_eq!(
            map_account(&raw),
            Ok(MappedAccount {
                external_id: "acc-1".to_owned(),
                name: "Spending".to_owned(),
                account_type: AccountType::Checking,
                balance: Decimal::new(123456, 2),
                currency: "AUD".to_owned(),
            })
        );
    }

    #[test]
    fn missing_fields_use_defaults() {
        let account = map_account(&json!({"id": "acc-1"})).unwrap();

        assert_eq!(account.name, "Unknown Account");
        assert_eq!(account.account_type, AccountType::Checking);
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.currency, "AUD");
    }

    #[test]
    fn missing_id_fails() {
        assert_eq!(
            map_account(&json!({"attributes": {"displayName": "Spending"}})),
            Err(MappingError::MissingExternalId)
        );
        assert_eq!(
            map_account(&json!({"id": ""})),
            Err(MappingError::MissingExternalId)
        );
    }

    #[test]
    fn non_object_fails() {
        assert!(matches!(
            map_account(&json!("acc-1")),
            Err(MappingError::Malformed(_))
        ));
    }

    #[test]
    fn account_type_lookup() {
        assert_eq!(map_account_type(Some("SAVER")), AccountType::Savings);
        assert_eq!(map_account_type(Some("saver")), AccountType::Savings);
        assert_eq!(map_account_type(Some("HOME_LOAN")), AccountType::Loan);
        assert_eq!(map_account_type(Some("CREDIT_CARD")), AccountType::Credit);
        assert_eq!(map_account_type(Some("INVESTMENT")), AccountType::Investment);
        assert_eq!(map_account_type(Some("SOMETHING_NEW")), AccountType::Checking);
        assert_eq!(map_account_type(None), AccountType::Checking);
    }
}

#[cfg(test)]
mod transaction_mapping_tests {
    use rust_decimal::Decimal;
    use serde_json::json;
    use time::macros::date;

    use crate::mapper::{
        MappedTransaction, MappingError, map_transaction_with_fallback_date,
    };

    const FALLBACK: time::Date = date!(2025 - 06 - 30);

    #[test]
    fn maps_complete_transaction() {
        let raw = json!({
            "type": "transactions",
            "id": "tx-1",
            "attributes": {
                "status": "SETTLED",
                "rawText": "WOOLWORTHS 1234 SYDNEY",
                "description": "Woolworths",
                "amount": {"currencyCode": "AUD", "value": "-42.50", "valueInBaseUnits": -4250},
                "createdAt": "2025-03-02T23:30:00+11:00"
            },
            "relationships": {"account": {"data": {"type": "accounts", "id": "acc-1"}}}
        });

        assert_eq!(
            map_transaction_with_fallback_date(&raw, FALLBACK),
            Ok(MappedTransaction {
                external_id: "tx-1".to_owned(),
                description: "WOOLWORTHS 1234 SYDNEY".to_owned(),
                amount: Decimal::new(-4250, 2),
                date: date!(2025 - 03 - 02),
                account_external_id: Some("acc-1".to_owned()),
            })
        );
    }

    #[test]
    fn empty_raw_text_falls_back_to_description() {
        let raw = json!({"id": "tx-1", "attributes": {"rawText": "  ", "description": "Coffee"}});

        let transaction = map_transaction_with_fallback_date(&raw, FALLBACK).unwrap();

        assert_eq!(transaction.description, "Coffee");
    }

    #[test]
    fn missing_description_uses_placeholder() {
        let transaction =
            map_transaction_with_fallback_date(&json!({"id": "tx-1"}), FALLBACK).unwrap();

        assert_eq!(transaction.description, "Unknown transaction");
        assert_eq!(transaction.account_external_id, None);
    }

    #[test]
    fn missing_timestamp_uses_fallback_date() {
        let raw = json!({"id": "tx-1", "attributes": {"createdAt": "yesterday"}});

        let transaction = map_transaction_with_fallback_date(&raw, FALLBACK).unwrap();

        assert_eq!(transaction.date, FALLBACK);
    }

    #[test]
    fn unreadable_amount_is_zero() {
        let raw = json!({"id": "tx-1", "attributes": {"amount": {"value": "lots"}}});

        let transaction = map_transaction_with_fallback_date(&raw, FALLBACK).unwrap();

        assert_eq!(transaction.amount, Decimal::ZERO);
    }

    #[test]
    fn amount_falls_back_to_base_units() {
        let raw = json!({"id": "tx-1", "attributes": {"amount": {"valueInBaseUnits": -1999}}});

        let transaction = map_transaction_with_fallback_date(&raw, FALLBACK).unwrap();

        assert_eq!(transaction.amount, Decimal::new(-1999, 2));
    }

    #[test]
    fn numeric_amounts_are_rounded_to_cents() {
        let raw = json!({"id": "tx-1", "attributes": {"amount": {"value": 12.345}}});

        let transaction = map_transaction_with_fallback_date(&raw, FALLBACK).unwrap();

        assert_eq!(transaction.amount, Decimal::new(1234, 2));
    }

    #[test]
    fn missing_id_fails() {
        let raw = json!({"attributes": {"description": "Coffee"}});

        assert_eq!(
            map_transaction_with_fallback_date(&raw, FALLBACK),
            Err(MappingError::MissingExternalId)
        );
    }
}
