//! The client for the bank's REST API.
//!
//! [BankApi] is the seam between the sync engine and the network: the real
//! implementation is [UpBankClient], tests use a scripted fake.

mod client;
mod error;
mod types;

use std::future::Future;

use serde_json::Value;
use time::OffsetDateTime;

pub use client::{UpBankClient, UpBankProvider};
pub use error::{ApiError, DEFAULT_RETRY_AFTER, parse_retry_after};
pub use types::{
    AccountAttributes, AccountResource, ListResponse, MoneyObject, Relationship,
    SingleResponse, TransactionAttributes, TransactionResource, WebhookEvent,
};

/// One page of a list endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// The raw records, to be mapped by [crate::mapper].
    pub records: Vec<Value>,
    /// The link to the next page, `None` on the last page.
    pub next: Option<String>,
}

/// Filters for listing transactions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Only list transactions of this account.
    pub account_id: Option<String>,
    /// Only list transactions created at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Only list transactions created before this time.
    pub until: Option<OffsetDateTime>,
    /// Only list transactions in this bank category.
    pub category: Option<String>,
    /// How many records to return per page.
    pub page_size: Option<u32>,
}

/// The operations the sync engine needs from the bank.
pub trait BankApi: Send + Sync {
    /// Check that the API is reachable and the token is valid.
    fn ping(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// List accounts, optionally only those of the bank's `account_type`.
    fn list_accounts(
        &self,
        account_type: Option<&str>,
    ) -> impl Future<Output = Result<Page, ApiError>> + Send;

    /// Fetch a single account by the bank's ID.
    fn get_account(&self, id: &str) -> impl Future<Output = Result<Value, ApiError>> + Send;

    /// Fetch the first page of transactions matching `filter`.
    fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> impl Future<Output = Result<Page, ApiError>> + Send;

    /// Follow a `next` link returned with a previous page.
    fn next_page(&self, next: &str) -> impl Future<Output = Result<Page, ApiError>> + Send;

    /// Fetch a single transaction by the bank's ID.
    fn get_transaction(&self, id: &str) -> impl Future<Output = Result<Value, ApiError>> + Send;
}

/// Creates an API client for a user's token.
pub trait ApiProvider: Send + Sync {
    /// The client type.
    type Api: BankApi;

    /// Create a client that authenticates with `token`.
    fn api_for_token(&self, token: &str) -> Result<Self::Api, ApiError>;
}
