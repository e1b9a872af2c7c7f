//! Accounts synchronised from the bank and their balance history.

mod balance_history;
mod core;

pub use balance_history::{
    BalanceHistoryEntry, create_balance_history_table, get_balance_history,
    record_balance_history,
};
pub use core::{
    Account, AccountSource, AccountType, NewAccount, SyncedAccountFields, adjust_account_balance,
    create_account_table, find_account_owner, get_account, get_account_by_external_id,
    get_accounts_for_user, insert_account, map_row_to_account, update_synced_account,
};
