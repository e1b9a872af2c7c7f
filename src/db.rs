//! Database initialisation and column helpers shared by the table modules.

use std::str::FromStr;

use rusqlite::{Connection, Row, TransactionBehavior, types::Type};
use rust_decimal::Decimal;

use crate::{
    Error,
    account::{create_account_table, create_balance_history_table},
    category::create_category_table,
    transaction::create_transaction_table,
    user::create_user_table,
    weekly_summary::create_weekly_summary_table,
};

/// Create all the tables for the domain models.
///
/// Foreign keys are enabled on `connection` and the tables are created inside
/// a single exclusive transaction, so either every table exists afterwards or
/// none of the changes were applied.
///
/// # Errors
/// Returns an [Error::SqlError] if any of the tables could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    connection.pragma_update(None, "foreign_keys", true)?;

    let transaction = rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_user_table(&transaction)?;
    create_account_table(&transaction)?;
    create_balance_history_table(&transaction)?;
    create_category_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_weekly_summary_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}

/// Run `operation` as one unit of work.
///
/// Outside a transaction this begins an immediate transaction, so concurrent
/// writers on other connections queue up behind it instead of racing.
/// Inside a transaction it uses a savepoint, so a failed unit only rolls back
/// its own writes and the enclosing transaction can carry on.
///
/// # Errors
/// Returns the error from `operation` after rolling back, or an
/// [Error::SqlError] if the transaction could not be started or committed.
pub fn atomically<T, F>(connection: &Connection, operation: F) -> Result<T, Error>
where
    F: FnOnce(&Connection) -> Result<T, Error>,
{
    if connection.is_autocommit() {
        let transaction =
            rusqlite::Transaction::new_unchecked(connection, TransactionBehavior::Immediate)?;
        // Dropping the transaction without committing rolls it back.
        let value = operation(&transaction)?;
        transaction.commit()?;

        return Ok(value);
    }

    connection.execute_batch("SAVEPOINT unit_of_work")?;

    match operation(connection) {
        Ok(value) => {
            connection.execute_batch("RELEASE unit_of_work")?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) =
                connection.execute_batch("ROLLBACK TO unit_of_work; RELEASE unit_of_work")
            {
                tracing::error!("could not roll back to savepoint: {rollback_error}");
            }

            Err(error)
        }
    }
}

/// Read a monetary amount stored as decimal text.
pub(crate) fn get_decimal(row: &Row, index: usize) -> Result<Decimal, rusqlite::Error> {
    let raw: String = row.get(index)?;

    parse_decimal_column(index, &raw)
}

/// Read a nullable monetary amount stored as decimal text.
pub(crate) fn get_optional_decimal(
    row: &Row,
    index: usize,
) -> Result<Option<Decimal>, rusqlite::Error> {
    let raw: Option<String> = row.get(index)?;

    raw.map(|raw| parse_decimal_column(index, &raw)).transpose()
}

fn parse_decimal_column(index: usize, raw: &str) -> Result<Decimal, rusqlite::Error> {
    Decimal::from_str(raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error)))
}
