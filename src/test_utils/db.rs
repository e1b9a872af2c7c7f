use rusqlite::Connection;
use rust_decimal::Decimal;
use time::macros::datetime;

use crate::{
    User,
    account::{Account, AccountSource, AccountType, NewAccount, insert_account},
    db::initialize,
    user::create_user,
};

/// An initialised in-memory database with one user.
#[track_caller]
pub(crate) fn get_test_connection() -> (Connection, User) {
    let conn = Connection::open_in_memory().expect("Could not open in-memory SQLite database");
    initialize(&conn).expect("Could not initialise database");
    let user = create_user("test@example.com", &conn).expect("Could not create test user");

    (conn, user)
}

/// Insert a bank account with the external ID `external_id`.
#[track_caller]
pub(crate) fn insert_test_account(
    user: &User,
    external_id: &str,
    balance: Decimal,
    conn: &Connection,
) -> Account {
    insert_account(
        &NewAccount {
            user_id: user.id,
            external_id: Some(external_id.to_owned()),
            name: "Spending".to_owned(),
            account_type: AccountType::Checking,
            source: AccountSource::BankSync,
            balance,
            currency: "AUD".to_owned(),
        },
        datetime!(2025-01-01 00:00 UTC),
        conn,
    )
    .expect("Could not insert test account")
}
