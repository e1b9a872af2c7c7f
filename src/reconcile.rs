//! The reconciliation engine.
//!
//! Every write to accounts and transactions goes through [ReconciliationEngine],
//! whether the record came from a sync run, a webhook or a local edit. Each
//! call is one unit of work: the record and its dependent aggregates (account
//! balance, balance history, weekly summaries) are written together or not at
//! all.

use std::collections::BTreeSet;

use rusqlite::Connection;
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    account::{
        Account, AccountSource, NewAccount, SyncedAccountFields, adjust_account_balance,
        get_account_by_external_id, insert_account, record_balance_history,
        update_synced_account,
    },
    categorize::{Categorizer, KeywordCategorizer},
    database_id::{AccountId, TransactionId},
    db::atomically,
    mapper::{MappedAccount, MappedTransaction},
    transaction::{
        Transaction, TransactionBuilder, TransactionSource, create_transaction,
        delete_transaction_row, get_transaction, get_transaction_by_external_id,
        get_uncategorized_transactions, save_transaction,
    },
    user::UserID,
    weekly_summary::{recompute_week, week_start},
};

/// Whether reconciling a record created a new row or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    /// No row had the record's external ID, so one was created.
    Created,
    /// A row with the record's external ID was updated.
    Updated,
}

/// The result of deleting a transaction by the bank's ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The transaction was deleted.
    Deleted,
    /// There was no such transaction, e.g. the deletion was already applied.
    AlreadyAbsent,
}

/// Creates, updates and deletes accounts and transactions while keeping
/// balances and weekly summaries consistent.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine<C = KeywordCategorizer> {
    categorizer: C,
}

impl ReconciliationEngine {
    /// Create an engine that categorises new transactions with the built-in keyword rules.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Categorizer> ReconciliationEngine<C> {
    /// Create an engine that categorises new transactions with `categorizer`.
    pub fn with_categorizer(categorizer: C) -> Self {
        Self { categorizer }
    }

    /// Create or update the user's account with the bank's ID and record
    /// today's balance.
    ///
    /// The bank-owned fields, including the balance, are overwritten with the
    /// bank's values.
    ///
    /// # Errors
    /// Returns an [Error::DuplicateExternalId] if another user already has an
    /// account with the same external ID, or an [Error::SqlError] if the
    /// database fails.
    pub fn reconcile_account(
        &self,
        user_id: UserID,
        mapped: &MappedAccount,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<(Account, Outcome), Error> {
        atomically(connection, |connection| {
            let (account, outcome) =
                match get_account_by_external_id(user_id, &mapped.external_id, connection)? {
                    Some(existing) => (
                        update_from_bank(existing.id, mapped, now, connection)?,
                        Outcome::Updated,
                    ),
                    None => self.create_account(user_id, mapped, now, connection)?,
                };

            record_balance_history(account.id, account.balance, now, connection)?;

            Ok((account, outcome))
        })
    }

    fn create_account(
        &self,
        user_id: UserID,
        mapped: &MappedAccount,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<(Account, Outcome), Error> {
        let new_account = NewAccount {
            user_id,
            external_id: Some(mapped.external_id.clone()),
            name: mapped.name.clone(),
            account_type: mapped.account_type,
            source: AccountSource::BankSync,
            balance: mapped.balance,
            currency: mapped.currency.clone(),
        };

        match insert_account(&new_account, now, connection) {
            Ok(account) => Ok((account, Outcome::Created)),
            Err(Error::DuplicateExternalId) => {
                tracing::debug!(
                    "account {} was created concurrently, updating it instead",
                    mapped.external_id
                );
                let existing = get_account_by_external_id(user_id, &mapped.external_id, connection)?
                    .ok_or(Error::DuplicateExternalId)?;

                Ok((
                    update_from_bank(existing.id, mapped, now, connection)?,
                    Outcome::Updated,
                ))
            }
            Err(error) => Err(error),
        }
    }

    /// Create or update the user's transaction with the bank's ID.
    ///
    /// New transactions are categorised. Updates overwrite the amount, date,
    /// description and account but keep an existing category. If the insert
    /// loses a race with another writer, the row that writer created is
    /// updated instead.
    ///
    /// # Errors
    /// Returns an [Error::SqlError] if the database fails, in which case
    /// nothing was written.
    pub fn reconcile_transaction(
        &self,
        user_id: UserID,
        mapped: &MappedTransaction,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<(Transaction, Outcome), Error> {
        atomically(connection, |connection| {
            let account_id =
                resolve_account(user_id, mapped.account_external_id.as_deref(), connection)?;

            if let Some(existing) =
                get_transaction_by_external_id(user_id, &mapped.external_id, connection)?
            {
                let updated = self.merge(existing, mapped, account_id, now, connection)?;
                return Ok((updated, Outcome::Updated));
            }

            let category_id = self
                .categorizer
                .suggest(user_id, &mapped.description, connection)?;
            let builder =
                Transaction::build(user_id, mapped.amount, mapped.date, &mapped.description)
                    .external_id(Some(mapped.external_id.clone()))
                    .source(TransactionSource::BankSync)
                    .category_id(category_id)
                    .account_id(account_id);

            match create_transaction(builder, now, connection) {
                Ok(created) => {
                    apply_created(&created, now, connection)?;
                    Ok((created, Outcome::Created))
                }
                Err(Error::DuplicateExternalId) => {
                    tracing::debug!(
                        "transaction {} was created concurrently, updating it instead",
                        mapped.external_id
                    );
                    let existing =
                        get_transaction_by_external_id(user_id, &mapped.external_id, connection)?
                            .ok_or(Error::DuplicateExternalId)?;
                    let updated = self.merge(existing, mapped, account_id, now, connection)?;

                    Ok((updated, Outcome::Updated))
                }
                Err(error) => Err(error),
            }
        })
    }

    fn merge(
        &self,
        existing: Transaction,
        mapped: &MappedTransaction,
        account_id: Option<AccountId>,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<Transaction, Error> {
        let mut changed = existing.clone();
        changed.amount = mapped.amount;
        changed.date = mapped.date;
        changed.description = mapped.description.clone();
        changed.account_id = account_id;

        if changed.category_id.is_none() {
            changed.category_id = self
                .categorizer
                .suggest(changed.user_id, &changed.description, connection)?;
        }

        apply_changes(&existing, &changed, now, connection)
    }

    /// Delete the user's transaction with the bank's ID, reversing its effect
    /// on the account balance and rebuilding its week.
    ///
    /// Deleting a transaction that does not exist is not an error.
    pub fn delete_transaction_by_external_id(
        &self,
        user_id: UserID,
        external_id: &str,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<DeleteOutcome, Error> {
        atomically(connection, |connection| {
            match get_transaction_by_external_id(user_id, external_id, connection)? {
                Some(transaction) => {
                    remove(&transaction, now, connection)?;
                    Ok(DeleteOutcome::Deleted)
                }
                None => {
                    tracing::debug!("transaction {external_id} is already deleted");
                    Ok(DeleteOutcome::AlreadyAbsent)
                }
            }
        })
    }

    /// Create a transaction entered by the user, categorising it if it has no category.
    pub fn add_transaction(
        &self,
        builder: TransactionBuilder,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<Transaction, Error> {
        atomically(connection, |connection| {
            let builder = match builder.category_id {
                Some(_) => builder,
                None => {
                    let category_id =
                        self.categorizer
                            .suggest(builder.user_id, &builder.description, connection)?;
                    builder.category_id(category_id)
                }
            };

            let created = create_transaction(builder, now, connection)?;
            apply_created(&created, now, connection)?;

            Ok(created)
        })
    }

    /// Save the user's changes to a transaction.
    ///
    /// The amount, date, description, extra flag, category and account are
    /// taken from `changed`. Moving the transaction to another account moves
    /// its amount between the balances, and moving it to another week rebuilds
    /// both weeks.
    ///
    /// # Errors
    /// Returns [Error::UpdateMissingTransaction] if there is no transaction with the ID of `changed`.
    pub fn update_transaction(
        &self,
        changed: &Transaction,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<Transaction, Error> {
        atomically(connection, |connection| {
            let existing = get_transaction(changed.id, connection).map_err(|error| match error {
                Error::NotFound => Error::UpdateMissingTransaction,
                error => error,
            })?;

            apply_changes(&existing, changed, now, connection)
        })
    }

    /// Delete a transaction by its ID.
    ///
    /// # Errors
    /// Returns [Error::DeleteMissingTransaction] if there is no transaction with `id`.
    pub fn delete_transaction(
        &self,
        id: TransactionId,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<(), Error> {
        atomically(connection, |connection| {
            let transaction = get_transaction(id, connection).map_err(|error| match error {
                Error::NotFound => Error::DeleteMissingTransaction,
                error => error,
            })?;

            remove(&transaction, now, connection)
        })
    }

    /// Run the categoriser over every uncategorised transaction of the user.
    ///
    /// Returns the number of transactions that were given a category.
    pub fn categorize_uncategorized(
        &self,
        user_id: UserID,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<usize, Error> {
        atomically(connection, |connection| {
            let mut weeks = BTreeSet::new();
            let mut count = 0;

            for mut transaction in get_uncategorized_transactions(user_id, connection)? {
                let Some(category_id) =
                    self.categorizer
                        .suggest(user_id, &transaction.description, connection)?
                else {
                    continue;
                };

                transaction.category_id = Some(category_id);
                save_transaction(&transaction, now, connection)?;
                weeks.insert(week_start(transaction.date));
                count += 1;
            }

            for week in weeks {
                recompute_week(user_id, week, now, connection)?;
            }

            tracing::info!("categorised {count} transactions for user {user_id}");

            Ok(count)
        })
    }
}

fn update_from_bank(
    account_id: AccountId,
    mapped: &MappedAccount,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Account, Error> {
    update_synced_account(
        account_id,
        &SyncedAccountFields {
            name: &mapped.name,
            account_type: mapped.account_type,
            balance: mapped.balance,
            currency: &mapped.currency,
        },
        now,
        connection,
    )
}

/// The local ID of the user's account with the bank's `external_id`.
///
/// Transactions for accounts that have not been synced yet are stored without an account.
fn resolve_account(
    user_id: UserID,
    external_id: Option<&str>,
    connection: &Connection,
) -> Result<Option<AccountId>, Error> {
    let Some(external_id) = external_id else {
        return Ok(None);
    };

    let account = get_account_by_external_id(user_id, external_id, connection)?;

    if account.is_none() {
        tracing::debug!("no local account for {external_id}, storing the transaction without one");
    }

    Ok(account.map(|account| account.id))
}

fn apply_created(
    transaction: &Transaction,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    if let Some(account_id) = transaction.account_id {
        adjust_account_balance(account_id, transaction.amount, now, connection)?;
    }

    recompute_week(transaction.user_id, transaction.date, now, connection)?;

    Ok(())
}

fn apply_changes(
    existing: &Transaction,
    changed: &Transaction,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let saved = save_transaction(changed, now, connection)?;

    if existing.account_id != saved.account_id || existing.amount != saved.amount {
        if let Some(account_id) = existing.account_id {
            adjust_account_balance(account_id, -existing.amount, now, connection)?;
        }

        if let Some(account_id) = saved.account_id {
            adjust_account_balance(account_id, saved.amount, now, connection)?;
        }
    }

    recompute_affected_weeks(saved.user_id, &[existing.date, saved.date], now, connection)?;

    Ok(saved)
}

fn remove(
    transaction: &Transaction,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    if let Some(account_id) = transaction.account_id {
        adjust_account_balance(account_id, -transaction.amount, now, connection)?;
    }

    if delete_transaction_row(transaction.id, connection)? == 0 {
        return Err(Error::DeleteMissingTransaction);
    }

    recompute_week(transaction.user_id, transaction.date, now, connection)?;

    Ok(())
}

fn recompute_affected_weeks(
    user_id: UserID,
    dates: &[Date],
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let weeks: BTreeSet<Date> = dates.iter().copied().map(week_start).collect();

    for week in weeks {
        recompute_week(user_id, week, now, connection)?;
    }

    Ok(())
}
