//! Defines the core data models and database queries for transactions.

use rusqlite::{
    Connection, OptionalExtension, Row, ToSql,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::{AccountId, CategoryId, DatabaseId, TransactionId},
    db::get_decimal,
    user::UserID,
};

// ============================================================================
// MODELS
// ============================================================================

/// How a transaction was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionSource {
    /// Entered by the user.
    Manual,
    /// Imported from the bank.
    BankSync,
    /// Generated from a recurring expense.
    Recurring,
}

impl ToSql for TransactionSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let text = match self {
            TransactionSource::Manual => "manual",
            TransactionSource::BankSync => "bank_sync",
            TransactionSource::Recurring => "recurring",
        };

        Ok(text.into())
    }
}

impl FromSql for TransactionSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "manual" => Ok(TransactionSource::Manual),
            "bank_sync" => Ok(TransactionSource::BankSync),
            "recurring" => Ok(TransactionSource::Recurring),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// An expense or income, i.e. an event where money was either spent or earned.
///
/// To create a new `Transaction`, use [Transaction::build].
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The user that owns the transaction.
    pub user_id: UserID,
    /// The bank's ID for the transaction, `None` for manual entries.
    pub external_id: Option<String>,
    /// The amount of money spent (negative) or earned (positive).
    pub amount: Decimal,
    /// When the transaction happened.
    pub date: Date,
    /// A text description of what the transaction was for.
    pub description: String,
    /// Whether the transaction is an unplanned, one-off expense.
    pub is_extra: bool,
    /// How the transaction was created.
    pub source: TransactionSource,
    /// The ID of the category the transaction belongs to.
    pub category_id: Option<CategoryId>,
    /// The account the money moved in or out of.
    pub account_id: Option<AccountId>,
    /// The recurring expense template this transaction was generated from.
    ///
    /// The templates live outside this crate, so the ID is stored as given
    /// and has no foreign key.
    pub recurring_expense_id: Option<DatabaseId>,
    /// When the row was created.
    pub created_at: OffsetDateTime,
    /// When the row was last changed.
    pub updated_at: OffsetDateTime,
}

impl Transaction {
    /// Create a new transaction.
    ///
    /// Shortcut for [TransactionBuilder] for discoverability.
    pub fn build(user_id: UserID, amount: Decimal, date: Date, description: &str) -> TransactionBuilder {
        TransactionBuilder {
            user_id,
            amount,
            date,
            description: description.to_owned(),
            external_id: None,
            is_extra: false,
            source: TransactionSource::Manual,
            category_id: None,
            account_id: None,
            recurring_expense_id: None,
        }
    }
}

/// A builder for creating [Transaction] instances.
///
/// # Examples
///
/// ```ignore
/// let transaction = Transaction::build(user_id, dec!(-45.99), date!(2025-01-15), "Coffee")
///     .external_id(Some("tx-1".to_owned()))
///     .source(TransactionSource::BankSync)
///     .account_id(Some(account.id));
/// create_transaction(transaction, now, &connection)?;
/// ```
#[derive(Debug, PartialEq, Clone)]
pub struct TransactionBuilder {
    /// The user that owns the transaction.
    pub user_id: UserID,

    /// The monetary amount of the transaction.
    ///
    /// Positive values represent income/credits, negative values represent
    /// expenses/debits. Amounts are stored rounded to two decimal places.
    pub amount: Decimal,

    /// The date when the transaction occurred.
    pub date: Date,

    /// A human-readable description of the transaction.
    pub description: String,

    /// The bank's ID for the transaction.
    ///
    /// The database enforces uniqueness of this field per user, so inserting
    /// the same bank transaction twice fails with [Error::DuplicateExternalId].
    pub external_id: Option<String>,

    /// Whether the transaction is an unplanned, one-off expense.
    pub is_extra: bool,

    /// How the transaction was created.
    pub source: TransactionSource,

    /// The category of the transaction, e.g. "groceries", "transport".
    pub category_id: Option<CategoryId>,

    /// The account the money moved in or out of.
    pub account_id: Option<AccountId>,

    /// The recurring expense the transaction was generated from.
    pub recurring_expense_id: Option<DatabaseId>,
}

impl TransactionBuilder {
    /// Set the bank's ID for the transaction.
    pub fn external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    /// Mark the transaction as an extra expense.
    pub fn is_extra(mut self, is_extra: bool) -> Self {
        self.is_extra = is_extra;
        self
    }

    /// Set how the transaction was created.
    pub fn source(mut self, source: TransactionSource) -> Self {
        self.source = source;
        self
    }

    /// Set the category id for the transaction.
    pub fn category_id(mut self, category_id: Option<CategoryId>) -> Self {
        self.category_id = category_id;
        self
    }

    /// Set the account the transaction belongs to.
    pub fn account_id(mut self, account_id: Option<AccountId>) -> Self {
        self.account_id = account_id;
        self
    }

    /// Link the transaction to a recurring expense.
    pub fn recurring_expense_id(mut self, recurring_expense_id: Option<DatabaseId>) -> Self {
        self.recurring_expense_id = recurring_expense_id;
        self
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const TRANSACTION_COLUMNS: &str = "id, user_id, external_id, amount, date, description, is_extra, \
    source, category_id, account_id, recurring_expense_id, created_at, updated_at";

/// Create a new transaction in the database from a builder.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateExternalId] if the user already has a transaction with the external ID,
/// - or [Error::SqlError] if there is some other SQL error, e.g. an invalid category ID.
pub fn create_transaction(
    builder: TransactionBuilder,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "INSERT INTO \"transaction\" (user_id, external_id, amount, date, description, is_extra, source, category_id, account_id, recurring_expense_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            (
                builder.user_id.as_i64(),
                &builder.external_id,
                builder.amount.round_dp(2).to_string(),
                builder.date,
                &builder.description,
                builder.is_extra,
                builder.source,
                builder.category_id,
                builder.account_id,
                builder.recurring_expense_id,
                now,
            ),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                _,
            ) => Error::DuplicateExternalId,
            error => error.into(),
        })?;

    Ok(transaction)
}

/// Retrieve a transaction from the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid transaction,
/// - or [Error::SqlError] there is some other SQL error.
pub fn get_transaction(id: TransactionId, connection: &Connection) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE id = :id"
        ))?
        .query_row(&[(":id", &id)], map_transaction_row)?;

    Ok(transaction)
}

/// Retrieve the transaction belonging to `user_id` with the bank's `external_id`.
pub fn get_transaction_by_external_id(
    user_id: UserID,
    external_id: &str,
    connection: &Connection,
) -> Result<Option<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE user_id = ?1 AND external_id = ?2"
        ))?
        .query_row((user_id.as_i64(), external_id), map_transaction_row)
        .optional()
        .map_err(Error::from)
}

/// Find which user has a transaction with the bank's `external_id`.
pub fn find_transaction_owner(
    external_id: &str,
    connection: &Connection,
) -> Result<Option<UserID>, Error> {
    connection
        .query_row(
            "SELECT user_id FROM \"transaction\" WHERE external_id = ?1 ORDER BY id ASC LIMIT 1",
            (external_id,),
            |row| row.get(0).map(UserID::new),
        )
        .optional()
        .map_err(Error::from)
}

/// Get a user's transactions dated between `from` and `to` inclusive, ordered by date.
pub fn get_transactions_between(
    user_id: UserID,
    from: Date,
    to: Date,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date ASC, id ASC"
        ))?
        .query_map((user_id.as_i64(), from, to), map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Get all of a user's transactions that do not have a category.
pub fn get_uncategorized_transactions(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE user_id = ?1 AND category_id IS NULL
             ORDER BY date ASC, id ASC"
        ))?
        .query_map((user_id.as_i64(),), map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::from))
        .collect()
}

/// Write the mutable fields of `transaction` back to the database.
///
/// The amount, date, description, extra flag, category and account are
/// overwritten and `updated_at` is set to `now`.
///
/// # Errors
/// Returns [Error::UpdateMissingTransaction] if the transaction is not in the database.
pub fn save_transaction(
    transaction: &Transaction,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Transaction, Error> {
    connection
        .prepare(&format!(
            "UPDATE \"transaction\"
             SET amount = ?1, date = ?2, description = ?3, is_extra = ?4, category_id = ?5, account_id = ?6, updated_at = ?7
             WHERE id = ?8
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            (
                transaction.amount.round_dp(2).to_string(),
                transaction.date,
                &transaction.description,
                transaction.is_extra,
                transaction.category_id,
                transaction.account_id,
                now,
                transaction.id,
            ),
            map_transaction_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::UpdateMissingTransaction,
            error => error.into(),
        })
}

/// Delete the transaction row with `id`, returning the number of rows deleted.
pub fn delete_transaction_row(id: TransactionId, connection: &Connection) -> Result<usize, Error> {
    connection
        .execute("DELETE FROM \"transaction\" WHERE id = :id", &[(":id", &id)])
        .map_err(|error| error.into())
}

/// Get the total number of transactions in the database.
///
/// # Errors
/// This function will return a [Error::SqlError] there is some SQL error.
pub fn count_transactions(connection: &Connection) -> Result<u32, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| {
            row.get(0)
        })
        .map_err(|error| error.into())
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                external_id TEXT,
                amount TEXT NOT NULL,
                date TEXT NOT NULL,
                description TEXT NOT NULL,
                is_extra INTEGER NOT NULL DEFAULT 0,
                source TEXT NOT NULL,
                category_id INTEGER,
                account_id INTEGER,
                -- Opaque link to a recurring expense template kept elsewhere.
                recurring_expense_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, external_id),
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY(category_id) REFERENCES category(id) ON UPDATE CASCADE ON DELETE SET NULL,
                FOREIGN KEY(account_id) REFERENCES account(id) ON UPDATE CASCADE ON DELETE SET NULL
                )",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('transaction', 0)",
        (),
    )?;

    // Used by the weekly summary recompute.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_date ON \"transaction\"(user_id, date);",
        (),
    )?;

    Ok(())
}

/// Map a database row to a Transaction.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        external_id: row.get(2)?,
        amount: get_decimal(row, 3)?,
        date: row.get(4)?,
        description: row.get(5)?,
        is_extra: row.get(6)?,
        source: row.get(7)?,
        category_id: row.get(8)?,
        account_id: row.get(9)?,
        recurring_expense_id: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod database_tests {
    use rusqlite::Connection;
    use rust_decimal::Decimal;
    use time::macros::{date, datetime};

    use crate::{
        Error,
        db::initialize,
        transaction::{
            Transaction, TransactionSource, count_transactions, create_transaction,
            delete_transaction_row, get_transaction, get_transaction_by_external_id,
            get_transactions_between, get_uncategorized_transactions, save_transaction,
        },
        user::{User, create_user},
    };

    fn get_test_connection() -> (Connection, User) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        let user = create_user("test@example.com", &conn).unwrap();
        (conn, user)
    }

    #[test]
    fn create_succeeds() {
        let (conn, user) = get_test_connection();
        let amount = Decimal::new(1230, 2);

        let result = create_transaction(
            Transaction::build(user.id, amount, date!(2025 - 10 - 05), ""),
            datetime!(2025-10-05 12:00 UTC),
            &conn,
        );

        match result {
            Ok(transaction) => {
                assert_eq!(transaction.amount, amount);
                assert_eq!(transaction.source, TransactionSource::Manual);
                assert!(!transaction.is_extra);
            }
            Err(error) => panic!("Unexpected error: {error}"),
        }
    }

    #[test]
    fn generated_transactions_keep_their_template_link() {
        let (conn, user) = get_test_connection();

        let transaction = create_transaction(
            Transaction::build(user.id, Decimal::new(-1599, 2), date!(2025 - 10 - 05), "Netflix")
                .source(TransactionSource::Recurring)
                .recurring_expense_id(Some(42)),
            datetime!(2025-10-05 12:00 UTC),
            &conn,
        )
        .unwrap();

        let stored = get_transaction(transaction.id, &conn).unwrap();
        assert_eq!(stored.source, TransactionSource::Recurring);
        assert_eq!(stored.recurring_expense_id, Some(42));
    }

    #[test]
    fn amounts_are_rounded_to_cents() {
        let (conn, user) = get_test_connection();

        let transaction = create_transaction(
            Transaction::build(user.id, Decimal::new(-123456, 4), date!(2025 - 10 - 05), ""),
            datetime!(2025-10-05 12:00 UTC),
            &conn,
        )
        .unwrap();

        assert_eq!(transaction.amount, Decimal::new(-1235, 2));
    }

    #[test]
    fn create_fails_on_duplicate_external_id() {
        let (conn, user) = get_test_connection();
        let external_id = Some("tx-1".to_owned());
        let today = date!(2025 - 10 - 04);
        let now = datetime!(2025-10-04 12:00 UTC);
        create_transaction(
            Transaction::build(user.id, Decimal::ONE, today, "").external_id(external_id.clone()),
            now,
            &conn,
        )
        .expect("Could not create transaction");

        let duplicate_transaction = create_transaction(
            Transaction::build(user.id, Decimal::ONE, today, "").external_id(external_id),
            now,
            &conn,
        );

        assert_eq!(duplicate_transaction, Err(Error::DuplicateExternalId));
    }

    #[test]
    fn external_ids_are_unique_per_user() {
        let (conn, user) = get_test_connection();
        let other_user = create_user("other@example.com", &conn).unwrap();
        let external_id = Some("tx-1".to_owned());
        let today = date!(2025 - 10 - 04);
        let now = datetime!(2025-10-04 12:00 UTC);

        for user_id in [user.id, other_user.id] {
            create_transaction(
                Transaction::build(user_id, Decimal::ONE, today, "").external_id(external_id.clone()),
                now,
                &conn,
            )
            .unwrap();
        }

        assert_eq!(count_transactions(&conn), Ok(2));
        assert!(
            get_transaction_by_external_id(other_user.id, "tx-1", &conn)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn manual_transactions_without_external_ids_do_not_clash() {
        let (conn, user) = get_test_connection();
        let now = datetime!(2025-10-04 12:00 UTC);

        for _ in 0..3 {
            create_transaction(
                Transaction::build(user.id, Decimal::ONE, date!(2025 - 10 - 04), ""),
                now,
                &conn,
            )
            .unwrap();
        }

        assert_eq!(count_transactions(&conn), Ok(3));
    }

    #[test]
    fn create_fails_on_invalid_category_id() {
        let (conn, user) = get_test_connection();

        let result = create_transaction(
            Transaction::build(user.id, Decimal::ONE, date!(2025 - 10 - 04), "").category_id(Some(42)),
            datetime!(2025-10-04 12:00 UTC),
            &conn,
        );

        assert!(matches!(result, Err(Error::SqlError(_))));
    }

    #[test]
    fn save_overwrites_mutable_fields() {
        let (conn, user) = get_test_connection();
        let mut transaction = create_transaction(
            Transaction::build(user.id, Decimal::ONE, date!(2025 - 10 - 04), "before"),
            datetime!(2025-10-04 12:00 UTC),
            &conn,
        )
        .unwrap();
        let later = datetime!(2025-10-05 12:00 UTC);

        transaction.amount = Decimal::new(-550, 2);
        transaction.description = "after".to_owned();
        transaction.date = date!(2025 - 10 - 01);
        transaction.is_extra = true;
        let saved = save_transaction(&transaction, later, &conn).unwrap();

        assert_eq!(saved.updated_at, later);
        assert_eq!(saved.created_at, transaction.created_at);
        assert_eq!(get_transaction(transaction.id, &conn), Ok(saved.clone()));
        assert_eq!(saved.amount, Decimal::new(-550, 2));
        assert_eq!(saved.description, "after");
        assert!(saved.is_extra);
    }

    #[test]
    fn save_missing_transaction_fails() {
        let (conn, user) = get_test_connection();
        let mut transaction = create_transaction(
            Transaction::build(user.id, Decimal::ONE, date!(2025 - 10 - 04), ""),
            datetime!(2025-10-04 12:00 UTC),
            &conn,
        )
        .unwrap();
        delete_transaction_row(transaction.id, &conn).unwrap();
        transaction.amount = Decimal::TEN;

        let result = save_transaction(&transaction, datetime!(2025-10-05 12:00 UTC), &conn);

        assert_eq!(result, Err(Error::UpdateMissingTransaction));
    }

    #[test]
    fn get_between_is_inclusive() {
        let (conn, user) = get_test_connection();
        let now = datetime!(2025-10-10 12:00 UTC);
        for day in [date!(2025 - 10 - 05), date!(2025 - 10 - 06), date!(2025 - 10 - 12), date!(2025 - 10 - 13)] {
            create_transaction(Transaction::build(user.id, Decimal::ONE, day, ""), now, &conn).unwrap();
        }

        let got = get_transactions_between(user.id, date!(2025 - 10 - 06), date!(2025 - 10 - 12), &conn)
            .unwrap();

        let dates: Vec<_> = got.iter().map(|transaction| transaction.date).collect();
        assert_eq!(dates, vec![date!(2025 - 10 - 06), date!(2025 - 10 - 12)]);
    }

    #[test]
    fn get_uncategorized_skips_categorized() {
        let (conn, user) = get_test_connection();
        let now = datetime!(2025-10-10 12:00 UTC);
        conn.execute(
            "INSERT INTO category (user_id, name) VALUES (?1, 'groceries')",
            (user.id.as_i64(),),
        )
        .unwrap();
        let category_id = conn.last_insert_rowid();
        create_transaction(
            Transaction::build(user.id, Decimal::ONE, date!(2025 - 10 - 05), "a").category_id(Some(category_id)),
            now,
            &conn,
        )
        .unwrap();
        let uncategorized = create_transaction(
            Transaction::build(user.id, Decimal::ONE, date!(2025 - 10 - 05), "b"),
            now,
            &conn,
        )
        .unwrap();

        let got = get_uncategorized_transactions(user.id, &conn).unwrap();

        assert_eq!(got, vec![uncategorized]);
    }

    #[test]
    fn get_count() {
        let (conn, user) = get_test_connection();
        let today = date!(2025 - 10 - 05);
        let now = datetime!(2025-10-05 12:00 UTC);
        let want_count = 20;
        for i in 1..=want_count {
            create_transaction(Transaction::build(user.id, Decimal::from(i), today, ""), now, &conn)
                .expect("Could not create transaction");
        }

        let got_count = count_transactions(&conn).expect("Could not get count");

        assert_eq!(want_count, got_count);
    }
}
