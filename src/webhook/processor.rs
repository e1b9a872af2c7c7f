use std::fmt::Display;

use time::OffsetDateTime;

use crate::{
    Error,
    account::find_account_owner,
    bank_api::{ApiProvider, BankApi, WebhookEvent},
    mapper::map_transaction,
    reconcile::{DeleteOutcome, Outcome},
    retry::{Sleeper, retry},
    sync::BankSync,
    transaction::find_transaction_owner,
    user::UserID,
};

/// Sent when the bank creates a transaction.
pub const TRANSACTION_CREATED: &str = "TRANSACTION_CREATED";
/// Sent when a held transaction settles.
pub const TRANSACTION_SETTLED: &str = "TRANSACTION_SETTLED";
/// Sent when the bank deletes a transaction.
pub const TRANSACTION_DELETED: &str = "TRANSACTION_DELETED";

/// What processing a webhook event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The transaction was fetched and reconciled.
    Reconciled(Outcome),
    /// The transaction was deleted, or had been already.
    Deleted(DeleteOutcome),
    /// The event type is not one this service acts on.
    Ignored(String),
}

impl Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOutcome::Reconciled(Outcome::Created) => write!(f, "Transaction created"),
            EventOutcome::Reconciled(Outcome::Updated) => write!(f, "Transaction updated"),
            EventOutcome::Deleted(DeleteOutcome::Deleted) => write!(f, "Transaction deleted"),
            EventOutcome::Deleted(DeleteOutcome::AlreadyAbsent) => {
                write!(f, "Transaction already deleted")
            }
            EventOutcome::Ignored(event_type) => {
                write!(f, "Ignoring unsupported event type {event_type}")
            }
        }
    }
}

/// Apply a webhook event to the local copy of the user's data.
///
/// Created and settled transactions are fetched from the bank and reconciled
/// like synced records, retrying according to [crate::SyncConfig::webhook_retry].
/// Deleted transactions are removed locally. When `user_hint` is `None` the
/// user is found through the account the event refers to.
///
/// # Errors
/// Returns [Error::InvalidWebhookPayload] if the event has no type or lacks the
/// IDs its type needs, [Error::UnknownAccount] if the referenced account is
/// not stored locally, or the error that ended the last attempt.
pub async fn process_event<P: ApiProvider, S: Sleeper>(
    sync: &BankSync<P, S>,
    event: &WebhookEvent,
    user_hint: Option<UserID>,
) -> Result<EventOutcome, Error> {
    let event_type = event
        .event_type()
        .ok_or_else(|| Error::InvalidWebhookPayload("the event has no type".to_owned()))?;

    match event_type {
        TRANSACTION_CREATED | TRANSACTION_SETTLED => {
            let transaction_id = required_transaction_id(event)?;
            let user_id = match user_hint {
                Some(user_id) => user_id,
                None => account_owner(sync, event)?.ok_or_else(|| {
                    Error::InvalidWebhookPayload("the event does not refer to an account".to_owned())
                })?,
            };

            let outcome = retry(
                &sync.config().webhook_retry,
                sync.sleeper(),
                "process webhook event",
                move || fetch_and_reconcile(sync, user_id, transaction_id),
            )
            .await?;

            tracing::info!("{event_type}: transaction {transaction_id} {outcome:?}");

            Ok(EventOutcome::Reconciled(outcome))
        }
        TRANSACTION_DELETED => {
            let transaction_id = required_transaction_id(event)?;
            let user_id = match user_hint {
                Some(user_id) => Some(user_id),
                None => match account_owner(sync, event)? {
                    Some(user_id) => Some(user_id),
                    None => sync.with_connection(|connection| {
                        find_transaction_owner(transaction_id, connection)
                    })?,
                },
            };

            let Some(user_id) = user_id else {
                tracing::debug!("transaction {transaction_id} is not stored, nothing to delete");
                return Ok(EventOutcome::Deleted(DeleteOutcome::AlreadyAbsent));
            };

            let outcome = sync.with_connection(|connection| {
                sync.engine().delete_transaction_by_external_id(
                    user_id,
                    transaction_id,
                    OffsetDateTime::now_utc(),
                    connection,
                )
            })?;

            tracing::info!("{event_type}: transaction {transaction_id} {outcome:?}");

            Ok(EventOutcome::Deleted(outcome))
        }
        other => {
            tracing::info!("ignoring webhook event of type {other}");
            Ok(EventOutcome::Ignored(other.to_owned()))
        }
    }
}

fn required_transaction_id(event: &WebhookEvent) -> Result<&str, Error> {
    event.transaction_id().ok_or_else(|| {
        Error::InvalidWebhookPayload("the event does not refer to a transaction".to_owned())
    })
}

/// The owner of the account the event refers to, `None` if it refers to no account.
fn account_owner<P: ApiProvider, S: Sleeper>(
    sync: &BankSync<P, S>,
    event: &WebhookEvent,
) -> Result<Option<UserID>, Error> {
    let Some(account_id) = event.account_id() else {
        return Ok(None);
    };

    sync.with_connection(|connection| find_account_owner(account_id, connection))?
        .map(Some)
        .ok_or_else(|| Error::UnknownAccount(account_id.to_owned()))
}

async fn fetch_and_reconcile<P: ApiProvider, S: Sleeper>(
    sync: &BankSync<P, S>,
    user_id: UserID,
    transaction_id: &str,
) -> Result<Outcome, Error> {
    let api = sync.api_for_user(user_id)?;
    let record = api.get_transaction(transaction_id).await?;
    let mapped = map_transaction(&record)?;

    let (_, outcome) = sync.with_connection(|connection| {
        sync.engine().reconcile_transaction(
            user_id,
            &mapped,
            OffsetDateTime::now_utc(),
            connection,
        )
    })?;

    Ok(outcome)
}
