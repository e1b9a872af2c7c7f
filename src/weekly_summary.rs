//! Weekly totals of a user's transactions.
//!
//! A summary is always rebuilt from every transaction in its week rather than
//! adjusted by deltas, so it ends up the same no matter what order the
//! transactions arrived in.

use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension, Row, types::Type};
use rust_decimal::Decimal;
use time::{Date, Duration, OffsetDateTime};

use crate::{
    Error,
    database_id::CategoryId,
    db::get_decimal,
    transaction::get_transactions_between,
    user::UserID,
};

/// The totals for one user over one Monday to Sunday week.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklySummary {
    /// The user the summary belongs to.
    pub user_id: UserID,
    /// The Monday the week starts on.
    pub week_start: Date,
    /// The sum of all transaction amounts.
    pub total_amount: Decimal,
    /// The sum of the negative amounts.
    pub total_expenses: Decimal,
    /// The sum of the positive amounts.
    pub total_income: Decimal,
    /// The sum of the amounts of transactions marked as extra.
    pub total_extras: Decimal,
    /// The sum of amounts per category, uncategorised transactions are left out.
    pub category_totals: BTreeMap<CategoryId, Decimal>,
    /// When the summary was last rebuilt.
    pub calculated_at: OffsetDateTime,
}

/// The Monday on or before `date`.
pub fn week_start(date: Date) -> Date {
    date - Duration::days(date.weekday().number_days_from_monday().into())
}

/// Create the weekly summary table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_weekly_summary_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS weekly_summary (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            week_start TEXT NOT NULL,
            total_amount TEXT NOT NULL,
            total_expenses TEXT NOT NULL,
            total_income TEXT NOT NULL,
            total_extras TEXT NOT NULL,
            category_totals TEXT NOT NULL,
            calculated_at TEXT NOT NULL,
            UNIQUE(user_id, week_start),
            FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    Ok(())
}

/// Rebuild the summary for the week starting on `week_start_date` from the
/// user's transactions in that week and store it.
///
/// `week_start_date` is moved back to its Monday if it is not one already.
///
/// # Errors
/// Returns an [Error::SqlError] if the transactions cannot be read or the summary cannot be saved.
pub fn recompute_week(
    user_id: UserID,
    week_start_date: Date,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<WeeklySummary, Error> {
    let week_start_date = week_start(week_start_date);
    let week_end = week_start_date + Duration::days(6);
    let transactions = get_transactions_between(user_id, week_start_date, week_end, connection)?;

    let mut summary = WeeklySummary {
        user_id,
        week_start: week_start_date,
        total_amount: Decimal::ZERO,
        total_expenses: Decimal::ZERO,
        total_income: Decimal::ZERO,
        total_extras: Decimal::ZERO,
        category_totals: BTreeMap::new(),
        calculated_at: now,
    };

    for transaction in &transactions {
        summary.total_amount += transaction.amount;

        if transaction.amount.is_sign_negative() {
            summary.total_expenses += transaction.amount;
        } else {
            summary.total_income += transaction.amount;
        }

        if transaction.is_extra {
            summary.total_extras += transaction.amount;
        }

        if let Some(category_id) = transaction.category_id {
            *summary
                .category_totals
                .entry(category_id)
                .or_insert(Decimal::ZERO) += transaction.amount;
        }
    }

    let category_totals = serde_json::to_string(&summary.category_totals)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    connection.execute(
        "INSERT INTO weekly_summary (user_id, week_start, total_amount, total_expenses, total_income, total_extras, category_totals, calculated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(user_id, week_start) DO UPDATE SET
            total_amount = excluded.total_amount,
            total_expenses = excluded.total_expenses,
            total_income = excluded.total_income,
            total_extras = excluded.total_extras,
            category_totals = excluded.category_totals,
            calculated_at = excluded.calculated_at",
        (
            user_id.as_i64(),
            summary.week_start,
            summary.total_amount.to_string(),
            summary.total_expenses.to_string(),
            summary.total_income.to_string(),
            summary.total_extras.to_string(),
            category_totals,
            now,
        ),
    )?;

    tracing::debug!(
        "recomputed weekly summary for user {user_id} week {}: {} transactions",
        summary.week_start,
        transactions.len()
    );

    Ok(summary)
}

/// Rebuild every weekly summary for the weeks that overlap `from` to `to` inclusive.
///
/// Returns the number of weeks rebuilt.
pub fn recompute_weeks_between(
    user_id: UserID,
    from: Date,
    to: Date,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<usize, Error> {
    let mut current = week_start(from);
    let mut count = 0;

    while current <= to {
        recompute_week(user_id, current, now, connection)?;
        count += 1;
        current += Duration::days(7);
    }

    Ok(count)
}

/// Get the stored summary for the week containing `date`.
pub fn get_weekly_summary(
    user_id: UserID,
    date: Date,
    connection: &Connection,
) -> Result<Option<WeeklySummary>, Error> {
    connection
        .prepare(
            "SELECT user_id, week_start, total_amount, total_expenses, total_income, total_extras, category_totals, calculated_at
             FROM weekly_summary
             WHERE user_id = ?1 AND week_start = ?2",
        )?
        .query_row((user_id.as_i64(), week_start(date)), map_row)
        .optional()
        .map_err(Error::from)
}

fn map_row(row: &Row) -> Result<WeeklySummary, rusqlite::Error> {
    let raw_category_totals: String = row.get(6)?;
    let category_totals = serde_json::from_str(&raw_category_totals).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(error))
    })?;

    Ok(WeeklySummary {
        user_id: UserID::new(row.get(0)?),
        week_start: row.get(1)?,
        total_amount: get_decimal(row, 2)?,
        total_expenses: get_decimal(row, 3)?,
        total_income: get_decimal(row, 4)?,
        total_extras: get_decimal(row, 5)?,
        category_totals,
        calculated_at: row.get(7)?,
    })
}
