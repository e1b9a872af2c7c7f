//! Banksync keeps a local SQLite copy of a user's bank accounts and
//! transactions in step with the Up Bank API.
//!
//! Data arrives two ways: paginated pulls driven by [BankSync] and signed
//! webhook deliveries handled by the router from [build_router]. Both paths
//! feed the same [ReconciliationEngine], which upserts records by the bank's
//! ID and keeps account balances and weekly summaries up to date.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

pub mod account;
mod app_state;
pub mod bank_api;
pub mod categorize;
pub mod category;
pub mod config;
pub mod credentials;
pub mod database_id;
pub mod db;
mod logging;
pub mod mapper;
pub mod recurring;
pub mod reconcile;
pub mod retry;
mod routing;
pub mod sync;
#[cfg(test)]
mod test_utils;
pub mod transaction;
pub mod user;
pub mod webhook;
pub mod weekly_summary;

pub use app_state::AppState;
pub use bank_api::{ApiError, ApiProvider, BankApi, UpBankClient, UpBankProvider};
pub use config::SyncConfig;
pub use credentials::{AesGcmCipher, TokenCipher, get_bank_token, set_bank_token};
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, add_tracing_layer, logging_middleware, setup_logging};
pub use mapper::MappingError;
pub use reconcile::ReconciliationEngine;
pub use retry::{RetryPolicy, Sleeper, TokioSleeper, retry};
pub use routing::build_router;
pub use sync::{BankSync, SyncCounts, SyncReport};
pub use user::{User, UserID, create_user, get_user_by_email, get_user_by_id};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The broad class of an error, used to decide whether an operation is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The credentials were rejected.
    Auth,
    /// The upstream asked the client to slow down.
    RateLimited,
    /// The requested resource does not exist.
    NotFound,
    /// The upstream had an internal error.
    Server,
    /// The network connection failed.
    Connection,
    /// A request took too long.
    Timeout,
    /// A response could not be parsed.
    MalformedResponse,
    /// The upstream returned a status code that has no specific meaning.
    UnexpectedStatus,
    /// A record could not be mapped to the local model.
    Mapping,
    /// The local database failed.
    Persistence,
}

/// An error that can report its [ErrorKind].
pub trait Classified {
    /// The class of the error.
    fn kind(&self) -> ErrorKind;

    /// How long the upstream asked to wait before trying again, if it said.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// A row with the same bank ID already exists.
    ///
    /// This happens when two writers race to create the same bank record. The
    /// loser should update the existing row instead.
    #[error("a record with the same external ID already exists")]
    DuplicateExternalId,

    /// An empty string was used to create a category name.
    #[error("Category name cannot be empty")]
    EmptyCategoryName,

    /// Tried to update a transaction that does not exist
    #[error("tried to update a transaction that is not in the database")]
    UpdateMissingTransaction,

    /// Tried to delete a transaction that does not exist
    #[error("tried to delete a transaction that is not in the database")]
    DeleteMissingTransaction,

    /// The user has not connected a bank account.
    #[error("user {0} has not connected a bank account")]
    MissingBankToken(UserID),

    /// A bank token could not be encrypted or decrypted.
    #[error("could not read the stored bank token: {0}")]
    CredentialError(String),

    /// A request to the bank failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A bank record could not be mapped.
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// An error occurred while serializing a struct as JSON
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// The webhook body is not a valid event.
    #[error("invalid webhook payload: {0}")]
    InvalidWebhookPayload(String),

    /// No local account has the bank's account ID.
    #[error("no account with the external ID \"{0}\"")]
    UnknownAccount(String),

    /// The webhook signature is missing or does not match the body.
    #[error("the webhook signature is missing or invalid")]
    InvalidSignature,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("external_id") =>
            {
                Error::DuplicateExternalId
            }
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl Classified for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Api(error) => error.kind(),
            Error::Mapping(_) | Error::InvalidWebhookPayload(_) => ErrorKind::Mapping,
            Error::MissingBankToken(_) | Error::CredentialError(_) | Error::InvalidSignature => {
                ErrorKind::Auth
            }
            Error::UnknownAccount(_) => ErrorKind::NotFound,
            _ => ErrorKind::Persistence,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Api(error) => error.retry_after(),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match self {
            Error::InvalidSignature => StatusCode::UNAUTHORIZED,
            Error::InvalidWebhookPayload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("An unexpected error occurred: {}", self);
        }

        (
            status,
            Json(json!({"success": false, "message": self.to_string()})),
        )
            .into_response()
    }
}
