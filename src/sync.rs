//! Pulls accounts and transactions from the bank and reconciles them.
//!
//! Each page fetch is retried according to [SyncConfig::api_retry]. Every
//! page is written as one database transaction, with each record in its own
//! savepoint so a bad record does not take the rest of the page down with it.

use std::{
    fmt::Display,
    future::Future,
    sync::{Arc, Mutex},
};

use rusqlite::Connection;
use serde_json::Value;
use time::{Duration, OffsetDateTime};

use crate::{
    ApiError, Error,
    bank_api::{ApiProvider, BankApi, Page, TransactionFilter, UpBankProvider},
    config::SyncConfig,
    credentials::{TokenCipher, get_bank_token, set_bank_token},
    db::atomically,
    mapper::{map_account, map_transaction},
    reconcile::{Outcome, ReconciliationEngine},
    retry::{Sleeper, TokioSleeper, retry},
    user::UserID,
};

/// The number of records created, updated and skipped by a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    /// Records that were new.
    pub created: usize,
    /// Records that already existed locally.
    pub updated: usize,
    /// Records that could not be mapped or stored.
    pub failed: usize,
}

impl SyncCounts {
    /// The number of records that were stored.
    pub fn stored(&self) -> usize {
        self.created + self.updated
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
        }
    }
}

impl Display for SyncCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} failed",
            self.created, self.updated, self.failed
        )
    }
}

/// The result of a sync run, as shown to whoever triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether every step of the run completed.
    pub success: bool,
    /// A human readable summary.
    pub message: String,
    /// What happened to the accounts.
    pub accounts: SyncCounts,
    /// What happened to the transactions.
    pub transactions: SyncCounts,
}

impl SyncReport {
    /// The number of accounts and transactions that were stored.
    pub fn count(&self) -> usize {
        self.accounts.stored() + self.transactions.stored()
    }
}

/// Why a run stopped early.
enum Stop {
    Failed(Error),
    CeilingReached,
}

impl From<Error> for Stop {
    fn from(error: Error) -> Self {
        Stop::Failed(error)
    }
}

/// Drives account and transaction syncs for users who have connected their bank.
pub struct BankSync<P = UpBankProvider, S = TokioSleeper> {
    connection: Arc<Mutex<Connection>>,
    provider: P,
    cipher: Arc<dyn TokenCipher>,
    engine: ReconciliationEngine,
    config: SyncConfig,
    sleeper: S,
}

impl<P: ApiProvider> BankSync<P, TokioSleeper> {
    /// Create a sync engine that stores data through `connection` and talks to
    /// the bank through clients created by `provider`.
    pub fn new(
        connection: Arc<Mutex<Connection>>,
        provider: P,
        cipher: Arc<dyn TokenCipher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            connection,
            provider,
            cipher,
            engine: ReconciliationEngine::new(),
            config,
            sleeper: TokioSleeper,
        }
    }
}

impl<P: ApiProvider, S: Sleeper> BankSync<P, S> {
    /// Use `sleeper` to wait between retries.
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> BankSync<P, T> {
        BankSync {
            connection: self.connection,
            provider: self.provider,
            cipher: self.cipher,
            engine: self.engine,
            config: self.config,
            sleeper,
        }
    }

    /// The configuration the engine was created with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The engine used to write records.
    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub(crate) fn sleeper(&self) -> &S {
        &self.sleeper
    }

    /// Run `operation` with the database connection locked.
    ///
    /// # Errors
    /// Returns [Error::DatabaseLockError] if the lock is poisoned, otherwise the error from `operation`.
    pub fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        operation(&connection)
    }

    /// A client authenticated with the user's stored token.
    ///
    /// # Errors
    /// Returns [Error::MissingBankToken] if the user has not connected their bank.
    pub fn api_for_user(&self, user_id: UserID) -> Result<P::Api, Error> {
        let token = self
            .with_connection(|connection| get_bank_token(user_id, self.cipher.as_ref(), connection))?
            .ok_or(Error::MissingBankToken(user_id))?;

        Ok(self.provider.api_for_token(&token)?)
    }

    /// Call the bank, retrying according to [SyncConfig::api_retry].
    pub async fn call_api<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        retry(&self.config.api_retry, &self.sleeper, operation_name, operation)
            .await
            .map_err(Error::from)
    }

    /// Check `token` against the bank, store it encrypted and run a first account sync.
    ///
    /// # Errors
    /// Returns an error without storing the token if the bank rejects it or
    /// cannot be reached.
    pub async fn connect_bank(&self, user_id: UserID, token: &str) -> Result<SyncReport, Error> {
        let api = self.provider.api_for_token(token)?;

        self.call_api("ping", || api.ping()).await.inspect_err(|error| {
            tracing::warn!("could not connect user {user_id} to the bank: {error}");
        })?;

        self.with_connection(|connection| {
            set_bank_token(user_id, Some(token), self.cipher.as_ref(), connection)
        })?;
        tracing::info!("connected user {user_id} to the bank");

        Ok(self.sync_accounts(user_id).await)
    }

    /// Forget the user's bank token.
    pub fn disconnect_bank(&self, user_id: UserID) -> Result<(), Error> {
        self.with_connection(|connection| {
            set_bank_token(user_id, None, self.cipher.as_ref(), connection)
        })
    }

    /// Fetch every account from the bank and reconcile it.
    pub async fn sync_accounts(&self, user_id: UserID) -> SyncReport {
        let mut counts = SyncCounts::default();
        let result = self.try_sync_accounts(user_id, &mut counts).await;

        let (success, message) = match result {
            Ok(()) => (true, format!("Synced accounts: {counts}")),
            Err(error) => {
                tracing::error!("account sync for user {user_id} failed: {error}");
                (false, format!("Account sync failed after {counts}: {error}"))
            }
        };

        SyncReport {
            success,
            message,
            accounts: counts,
            transactions: SyncCounts::default(),
        }
    }

    async fn try_sync_accounts(&self, user_id: UserID, counts: &mut SyncCounts) -> Result<(), Error> {
        let api = self.api_for_user(user_id)?;
        let mut page = self
            .call_api("list accounts", || api.list_accounts(None))
            .await?;

        loop {
            let now = OffsetDateTime::now_utc();
            let stopped = self.apply_page(&page.records, counts, usize::MAX, |record, connection| {
                let mapped = map_account(record)?;
                let (_, outcome) = self
                    .engine
                    .reconcile_account(user_id, &mapped, now, connection)?;
                Ok(outcome)
            });

            match stopped {
                Ok(()) => {}
                Err(Stop::Failed(error)) => return Err(error),
                Err(Stop::CeilingReached) => break,
            }

            page = match page.next.take() {
                Some(next) => {
                    self.call_api("list accounts (next page)", || api.next_page(&next))
                        .await?
                }
                None => break,
            };
        }

        tracing::info!("synced accounts for user {user_id}: {counts}");

        Ok(())
    }

    /// Fetch the transactions created in the last `days_back` days and reconcile them.
    ///
    /// Pages are processed in the order the bank returns them. Once
    /// [SyncConfig::failure_ceiling] records have failed, no further pages are
    /// fetched; records already stored stay stored.
    pub async fn sync_transactions(&self, user_id: UserID, days_back: u32) -> SyncReport {
        let mut counts = SyncCounts::default();
        let result = self
            .try_sync_transactions(user_id, days_back, &mut counts)
            .await;

        let (success, message) = match result {
            Ok(()) => (true, format!("Synced transactions: {counts}")),
            Err(Stop::CeilingReached) => {
                tracing::error!(
                    "transaction sync for user {user_id} stopped after {} failures",
                    counts.failed
                );
                (
                    false,
                    format!(
                        "Transaction sync stopped after {} failed records: {counts}",
                        counts.failed
                    ),
                )
            }
            Err(Stop::Failed(error)) => {
                tracing::error!("transaction sync for user {user_id} failed: {error}");
                (false, format!("Transaction sync failed after {counts}: {error}"))
            }
        };

        SyncReport {
            success,
            message,
            accounts: SyncCounts::default(),
            transactions: counts,
        }
    }

    async fn try_sync_transactions(
        &self,
        user_id: UserID,
        days_back: u32,
        counts: &mut SyncCounts,
    ) -> Result<(), Stop> {
        let api = self.api_for_user(user_id)?;
        let filter = TransactionFilter {
            // A window reaching past the earliest representable date pulls everything.
            since: OffsetDateTime::now_utc().checked_sub(Duration::days(i64::from(days_back))),
            page_size: Some(self.config.page_size),
            ..Default::default()
        };

        let mut page: Page = self
            .call_api("list transactions", || api.list_transactions(&filter))
            .await?;
        let mut page_number = 1;

        loop {
            tracing::debug!(
                "processing page {page_number} of transactions ({} records)",
                page.records.len()
            );

            let now = OffsetDateTime::now_utc();
            self.apply_page(
                &page.records,
                counts,
                self.config.failure_ceiling,
                |record, connection| {
                    let mapped = map_transaction(record)?;
                    let (_, outcome) = self
                        .engine
                        .reconcile_transaction(user_id, &mapped, now, connection)?;
                    Ok(outcome)
                },
            )?;

            page = match page.next.take() {
                Some(next) => {
                    self.call_api("list transactions (next page)", || api.next_page(&next))
                        .await?
                }
                None => break,
            };
            page_number += 1;
        }

        tracing::info!("synced transactions for user {user_id}: {counts}");

        Ok(())
    }

    /// Sync accounts, then the transactions of the last `days_back` days.
    ///
    /// The report distinguishes a failed account sync from a run where the
    /// accounts were synced but the transactions were not.
    pub async fn sync_all(&self, user_id: UserID, days_back: u32) -> SyncReport {
        let accounts = self.sync_accounts(user_id).await;

        if !accounts.success {
            return accounts;
        }

        let transactions = self.sync_transactions(user_id, days_back).await;

        let message = if transactions.success {
            format!(
                "Synced {} accounts and {} transactions",
                accounts.accounts.stored(),
                transactions.transactions.stored()
            )
        } else {
            format!(
                "Synced {} accounts but transaction sync failed: {}",
                accounts.accounts.stored(),
                transactions.message
            )
        };

        SyncReport {
            success: transactions.success,
            message,
            accounts: accounts.accounts,
            transactions: transactions.transactions,
        }
    }

    /// Reconcile one page of records in a single database transaction.
    ///
    /// Failed records are logged and counted. Once `failure_ceiling` records
    /// have failed in the run, the records stored so far are committed and
    /// [Stop::CeilingReached] is returned.
    fn apply_page<F>(
        &self,
        records: &[Value],
        counts: &mut SyncCounts,
        failure_ceiling: usize,
        reconcile: F,
    ) -> Result<(), Stop>
    where
        F: Fn(&Value, &Connection) -> Result<Outcome, Error>,
    {
        let ceiling_reached = self.with_connection(|connection| {
            atomically(connection, |connection| {
                for record in records {
                    match reconcile(record, connection) {
                        Ok(outcome) => counts.record(outcome),
                        Err(error) => {
                            counts.failed += 1;
                            let id = record.get("id").unwrap_or(&Value::Null);
                            tracing::warn!("skipping record {id}: {error}");
                        }
                    }

                    if counts.failed >= failure_ceiling {
                        return Ok(true);
                    }
                }

                Ok(false)
            })
        })?;

        if ceiling_reached {
            Err(Stop::CeilingReached)
        } else {
            Ok(())
        }
    }
}
