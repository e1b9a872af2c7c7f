//! Implements a struct that holds the state of the webhook server.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::{
    Error,
    bank_api::{ApiProvider, UpBankProvider},
    config::SyncConfig,
    credentials::TokenCipher,
    db::initialize,
    retry::TokioSleeper,
    sync::BankSync,
};

/// The state of the webhook server.
pub struct AppState<P = UpBankProvider, S = TokioSleeper> {
    /// The sync engine that webhook events are applied through.
    pub sync: Arc<BankSync<P, S>>,
}

impl<P, S> Clone for AppState<P, S> {
    fn clone(&self) -> Self {
        Self {
            sync: Arc::clone(&self.sync),
        }
    }
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the
    /// domain models, and talks to the bank at the configured base URL.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        cipher: Arc<dyn TokenCipher>,
        config: SyncConfig,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let provider = UpBankProvider::new(&config.base_url, config.request_timeout);
        let connection = Arc::new(Mutex::new(db_connection));

        Ok(Self::from_sync(BankSync::new(
            connection, provider, cipher, config,
        )))
    }
}

impl<P: ApiProvider, S> AppState<P, S> {
    /// Wrap an existing sync engine.
    pub fn from_sync(sync: BankSync<P, S>) -> Self {
        Self {
            sync: Arc::new(sync),
        }
    }
}
