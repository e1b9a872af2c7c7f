#![allow(missing_docs)]

pub(crate) mod db;
pub(crate) mod fake_api;
pub(crate) mod records;
pub(crate) mod sleeper;

pub(crate) use db::{get_test_connection, insert_test_account};
pub(crate) use fake_api::{FakeBankApi, FakeProvider};
pub(crate) use records::{account_record, transaction_record, webhook_event};
pub(crate) use sleeper::RecordingSleeper;
