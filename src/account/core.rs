use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, OptionalExtension, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::AccountId,
    db::{get_decimal, get_optional_decimal},
    user::UserID,
};

/// The kind of account money is held in or owed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    /// An everyday transactional account.
    Checking,
    /// A savings account.
    Savings,
    /// A credit card.
    Credit,
    /// A loan, e.g. a mortgage.
    Loan,
    /// An investment or brokerage account.
    Investment,
}

impl AccountType {
    /// The name used for the type in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::Credit => "credit",
            AccountType::Loan => "loan",
            AccountType::Investment => "investment",
        }
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(AccountType::Checking),
            "savings" => Ok(AccountType::Savings),
            "credit" => Ok(AccountType::Credit),
            "loan" => Ok(AccountType::Loan),
            "investment" => Ok(AccountType::Investment),
            _ => Err(()),
        }
    }
}

impl ToSql for AccountType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for AccountType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

/// Where an account came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountSource {
    /// Entered by the user.
    Manual,
    /// Created by synchronising with the bank.
    BankSync,
}

impl ToSql for AccountSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let text = match self {
            AccountSource::Manual => "manual",
            AccountSource::BankSync => "bank_sync",
        };

        Ok(text.into())
    }
}

impl FromSql for AccountSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "manual" => Ok(AccountSource::Manual),
            "bank_sync" => Ok(AccountSource::BankSync),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A bank account, credit card or loan owned by a user.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The id for the account.
    pub id: AccountId,
    /// The user that owns the account.
    pub user_id: UserID,
    /// The bank's ID for the account, `None` for manually entered accounts.
    pub external_id: Option<String>,
    /// The display name of the account.
    pub name: String,
    /// What kind of account this is.
    pub account_type: AccountType,
    /// Where the account came from.
    pub source: AccountSource,
    /// The balance.
    pub balance: Decimal,
    /// ISO 4217 currency code, e.g. "AUD".
    pub currency: String,
    /// The credit limit for credit accounts.
    pub credit_limit: Option<Decimal>,
    /// The annual percentage rate for credit and loan accounts.
    pub interest_rate: Option<Decimal>,
    /// When the next payment is due for credit and loan accounts.
    pub due_date: Option<Date>,
    /// The minimum repayment for credit and loan accounts.
    pub minimum_payment: Option<Decimal>,
    /// Inactive accounts are kept for history but no longer used.
    pub is_active: bool,
    /// When the row was created.
    pub created_at: OffsetDateTime,
    /// When the row was last changed.
    pub updated_at: OffsetDateTime,
    /// When the account was last synchronised with the bank.
    pub last_synced: Option<OffsetDateTime>,
}

/// The data needed to create an [Account].
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    /// The user that owns the account.
    pub user_id: UserID,
    /// The bank's ID for the account.
    pub external_id: Option<String>,
    /// The display name of the account.
    pub name: String,
    /// What kind of account this is.
    pub account_type: AccountType,
    /// Where the account came from.
    pub source: AccountSource,
    /// The opening balance.
    pub balance: Decimal,
    /// ISO 4217 currency code.
    pub currency: String,
}

const ACCOUNT_COLUMNS: &str = "id, user_id, external_id, name, account_type, source, balance, \
    currency, credit_limit, interest_rate, due_date, minimum_payment, is_active, created_at, \
    updated_at, last_synced";

/// Create the account table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            external_id TEXT UNIQUE,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL,
            source TEXT NOT NULL,
            balance TEXT NOT NULL,
            currency TEXT NOT NULL,
            credit_limit TEXT,
            interest_rate TEXT,
            due_date TEXT,
            minimum_payment TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_synced TEXT,
            FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    Ok(())
}

/// Map a database row to an [Account].
///
/// The row must contain the columns in the order they are defined in the table.
pub fn map_row_to_account(row: &Row) -> Result<Account, rusqlite::Error> {
    Ok(Account {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        external_id: row.get(2)?,
        name: row.get(3)?,
        account_type: row.get(4)?,
        source: row.get(5)?,
        balance: get_decimal(row, 6)?,
        currency: row.get(7)?,
        credit_limit: get_optional_decimal(row, 8)?,
        interest_rate: get_optional_decimal(row, 9)?,
        due_date: row.get(10)?,
        minimum_payment: get_optional_decimal(row, 11)?,
        is_active: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        last_synced: row.get(15)?,
    })
}

/// Insert a new account.
///
/// Accounts created from the bank have `last_synced` set to `now`.
///
/// # Errors
/// Returns [Error::DuplicateExternalId] if another account already has the
/// external ID, or [Error::SqlError] for other SQL errors.
pub fn insert_account(
    new_account: &NewAccount,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Account, Error> {
    let last_synced = match new_account.source {
        AccountSource::BankSync => Some(now),
        AccountSource::Manual => None,
    };

    connection
        .prepare(&format!(
            "INSERT INTO account (user_id, external_id, name, account_type, source, balance, currency, created_at, updated_at, last_synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
             RETURNING {ACCOUNT_COLUMNS}"
        ))?
        .query_row(
            (
                new_account.user_id.as_i64(),
                &new_account.external_id,
                &new_account.name,
                new_account.account_type,
                new_account.source,
                new_account.balance.to_string(),
                &new_account.currency,
                now,
                last_synced,
            ),
            map_row_to_account,
        )
        .map_err(Error::from)
}

/// Retrieve an account by its `id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no account with `id`.
pub fn get_account(id: AccountId, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = :id"))?
        .query_row(&[(":id", &id)], map_row_to_account)
        .map_err(Error::from)
}

/// Retrieve the account belonging to `user_id` with the bank's `external_id`.
pub fn get_account_by_external_id(
    user_id: UserID,
    external_id: &str,
    connection: &Connection,
) -> Result<Option<Account>, Error> {
    connection
        .prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE user_id = ?1 AND external_id = ?2"
        ))?
        .query_row((user_id.as_i64(), external_id), map_row_to_account)
        .optional()
        .map_err(Error::from)
}

/// Find which user owns the account with the bank's `external_id`.
pub fn find_account_owner(
    external_id: &str,
    connection: &Connection,
) -> Result<Option<UserID>, Error> {
    connection
        .query_row(
            "SELECT user_id FROM account WHERE external_id = ?1",
            (external_id,),
            |row| row.get(0).map(UserID::new),
        )
        .optional()
        .map_err(Error::from)
}

/// Retrieve all of a user's accounts ordered by name.
pub fn get_accounts_for_user(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<Account>, Error> {
    connection
        .prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE user_id = ?1 ORDER BY name ASC"
        ))?
        .query_map((user_id.as_i64(),), map_row_to_account)?
        .map(|maybe_account| maybe_account.map_err(Error::from))
        .collect()
}

/// The fields of an account that are owned by the bank.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncedAccountFields<'a> {
    /// The display name of the account.
    pub name: &'a str,
    /// What kind of account this is.
    pub account_type: AccountType,
    /// The balance reported by the bank.
    pub balance: Decimal,
    /// ISO 4217 currency code.
    pub currency: &'a str,
}

/// Overwrite the bank-owned fields of an account and mark it as synchronised at `now`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no account with `id`.
pub fn update_synced_account(
    id: AccountId,
    fields: &SyncedAccountFields,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Account, Error> {
    connection
        .prepare(&format!(
            "UPDATE account
             SET name = ?1, account_type = ?2, balance = ?3, currency = ?4, updated_at = ?5, last_synced = ?5
             WHERE id = ?6
             RETURNING {ACCOUNT_COLUMNS}"
        ))?
        .query_row(
            (
                fields.name,
                fields.account_type,
                fields.balance.to_string(),
                fields.currency,
                now,
                id,
            ),
            map_row_to_account,
        )
        .map_err(Error::from)
}

/// Add `delta` to the balance of the account with `id`.
///
/// A negative `delta` reduces the balance.
///
/// # Errors
/// Returns [Error::NotFound] if there is no account with `id`.
pub fn adjust_account_balance(
    id: AccountId,
    delta: Decimal,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Decimal, Error> {
    let balance = connection.query_row(
        "SELECT balance FROM account WHERE id = ?1",
        (id,),
        |row| get_decimal(row, 0),
    )?;

    let new_balance = balance + delta;

    connection.execute(
        "UPDATE account SET balance = ?1, updated_at = ?2 WHERE id = ?3",
        (new_balance.to_string(), now, id),
    )?;

    Ok(new_balance)
}
