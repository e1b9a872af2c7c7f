use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use time::{Date, OffsetDateTime};

use crate::{Error, database_id::AccountId, db::get_decimal};

/// The balance of an account at the end of a day.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceHistoryEntry {
    /// The account the balance belongs to.
    pub account_id: AccountId,
    /// The day the balance was recorded.
    pub date: Date,
    /// The balance on `date`.
    pub balance: Decimal,
    /// When the balance was last recorded.
    pub recorded_at: OffsetDateTime,
}

/// Create the account balance history table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_balance_history_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account_balance_history (
            id INTEGER PRIMARY KEY,
            account_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            balance TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE(account_id, date),
            FOREIGN KEY(account_id) REFERENCES account(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    Ok(())
}

fn map_row(row: &Row) -> Result<BalanceHistoryEntry, rusqlite::Error> {
    Ok(BalanceHistoryEntry {
        account_id: row.get(0)?,
        date: row.get(1)?,
        balance: get_decimal(row, 2)?,
        recorded_at: row.get(3)?,
    })
}

/// Record `balance` as the balance of `account_id` for the day of `now`.
///
/// Recording twice on the same day keeps the latest balance.
pub fn record_balance_history(
    account_id: AccountId,
    balance: Decimal,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO account_balance_history (account_id, date, balance, recorded_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(account_id, date) DO UPDATE SET
            balance = excluded.balance,
            recorded_at = excluded.recorded_at",
        (account_id, now.date(), balance.to_string(), now),
    )?;

    Ok(())
}

/// Get the recorded balances for `account_id` between `from` and `to` inclusive, oldest first.
pub fn get_balance_history(
    account_id: AccountId,
    from: Date,
    to: Date,
    connection: &Connection,
) -> Result<Vec<BalanceHistoryEntry>, Error> {
    connection
        .prepare(
            "SELECT account_id, date, balance, recorded_at
             FROM account_balance_history
             WHERE account_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date ASC",
        )?
        .query_map((account_id, from, to), map_row)?
        .map(|maybe_entry| maybe_entry.map_err(Error::from))
        .collect()
}

#[cfg(test)]
mod balance_history_tests {
    use rusqlite::Connection;
    use rust_decimal::Decimal;
    use time::macros::{date, datetime};

    use crate::{
        account::{
            Account, AccountSource, AccountType, NewAccount, get_balance_history, insert_account,
            record_balance_history,
        },
        db::initialize,
        user::create_user,
    };

    fn get_test_account() -> (Connection, Account) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let user = create_user("test@example.com", &conn).unwrap();
        let account = insert_account(
            &NewAccount {
                user_id: user.id,
                external_id: Some("acc-1".to_owned()),
                name: "Spending".to_owned(),
                account_type: AccountType::Checking,
                source: AccountSource::BankSync,
                balance: Decimal::ZERO,
                currency: "AUD".to_owned(),
            },
            datetime!(2025-03-01 09:00 UTC),
            &conn,
        )
        .unwrap();

        (conn, account)
    }

    #[test]
    fn same_day_keeps_latest_balance() {
        let (conn, account) = get_test_account();

        record_balance_history(
            account.id,
            Decimal::new(100, 0),
            datetime!(2025-03-01 09:00 UTC),
            &conn,
        )
        .unwrap();
        record_balance_history(
            account.id,
            Decimal::new(80, 0),
            datetime!(2025-03-01 17:00 UTC),
            &conn,
        )
        .unwrap();

        let history =
            get_balance_history(account.id, date!(2025 - 03 - 01), date!(2025 - 03 - 01), &conn)
                .unwrap();

        assert_eq!(history.len(), 1);
        assert_eq!(history[0].balance, Decimal::new(80, 0));
        assert_eq!(history[0].recorded_at, datetime!(2025-03-01 17:00 UTC));
    }

    #[test]
    fn history_is_filtered_and_ordered_by_date() {
        let (conn, account) = get_test_account();
        for (day, balance) in [(3, 30), (1, 10), (2, 20), (5, 50)] {
            let now = datetime!(2025-03-01 12:00 UTC)
                .replace_day(day)
                .unwrap();
            record_balance_history(account.id, Decimal::new(balance, 0), now, &conn).unwrap();
        }

        let history =
            get_balance_history(account.id, date!(2025 - 03 - 01), date!(2025 - 03 - 03), &conn)
                .unwrap();

        let balances: Vec<_> = history.iter().map(|entry| entry.balance).collect();
        assert_eq!(
            balances,
            vec![Decimal::new(10, 0), Decimal::new(20, 0), Decimal::new(30, 0)]
        );
    }
}
