//! Transactions and the queries used to store and aggregate them.
//!
//! Synced, manual and recurring transactions share one table. Rows that came
//! from the bank carry the bank's ID in `external_id`, which is unique per user.

mod core;

pub use core::{
    Transaction, TransactionBuilder, TransactionSource, count_transactions, create_transaction,
    create_transaction_table, delete_transaction_row, find_transaction_owner, get_transaction,
    get_transaction_by_external_id, get_transactions_between, get_uncategorized_transactions,
    map_transaction_row, save_transaction,
};
