use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use serde_json::Value;

use crate::bank_api::{ApiError, ApiProvider, BankApi, Page, TransactionFilter};

/// Which list call `next_page` continues.
#[derive(Debug, Default, Clone, Copy)]
enum Listing {
    Accounts,
    #[default]
    Transactions,
}

#[derive(Debug, Default)]
struct Script {
    listing: Listing,
    pings: VecDeque<Result<(), ApiError>>,
    account_pages: VecDeque<Result<Page, ApiError>>,
    transaction_pages: VecDeque<Result<Page, ApiError>>,
    transactions: HashMap<String, VecDeque<Result<Value, ApiError>>>,
    calls: Vec<String>,
    filters: Vec<TransactionFilter>,
}

/// A scripted bank API.
///
/// Each queue is consumed in order. Once a queue is empty, pings succeed,
/// list calls return an empty last page and single transactions are not found.
/// `next_page` takes from the queue of whichever list call came last.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBankApi {
    script: Arc<Mutex<Script>>,
}

impl FakeBankApi {
    pub(crate) fn push_ping(&self, result: Result<(), ApiError>) -> &Self {
        self.script.lock().unwrap().pings.push_back(result);
        self
    }

    pub(crate) fn push_account_page(&self, result: Result<Page, ApiError>) -> &Self {
        self.script.lock().unwrap().account_pages.push_back(result);
        self
    }

    pub(crate) fn push_transaction_page(&self, result: Result<Page, ApiError>) -> &Self {
        self.script.lock().unwrap().transaction_pages.push_back(result);
        self
    }

    pub(crate) fn push_transaction(&self, id: &str, result: Result<Value, ApiError>) -> &Self {
        self.script
            .lock()
            .unwrap()
            .transactions
            .entry(id.to_owned())
            .or_default()
            .push_back(result);
        self
    }

    /// The names of the methods called so far, with their main argument.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    /// The filters passed to `list_transactions`.
    pub(crate) fn filters(&self) -> Vec<TransactionFilter> {
        self.script.lock().unwrap().filters.clone()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, Script> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(call);
        script
    }
}

impl BankApi for FakeBankApi {
    async fn ping(&self) -> Result<(), ApiError> {
        self.record("ping".to_owned())
            .pings
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn list_accounts(&self, account_type: Option<&str>) -> Result<Page, ApiError> {
        let mut script = self.record(format!("list_accounts {account_type:?}"));
        script.listing = Listing::Accounts;
        script
            .account_pages
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }

    async fn get_account(&self, id: &str) -> Result<Value, ApiError> {
        self.record(format!("get_account {id}"));
        Err(ApiError::NotFound)
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Page, ApiError> {
        let mut script = self.record("list_transactions".to_owned());
        script.listing = Listing::Transactions;
        script.filters.push(filter.clone());
        script
            .transaction_pages
            .pop_front()
            .unwrap_or_else(|| Ok(Page::default()))
    }

    async fn next_page(&self, next: &str) -> Result<Page, ApiError> {
        let mut script = self.record(format!("next_page {next}"));
        let pages = match script.listing {
            Listing::Accounts => &mut script.account_pages,
            Listing::Transactions => &mut script.transaction_pages,
        };
        pages.pop_front().unwrap_or_else(|| Ok(Page::default()))
    }

    async fn get_transaction(&self, id: &str) -> Result<Value, ApiError> {
        self.record(format!("get_transaction {id}"))
            .transactions
            .get_mut(id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(ApiError::NotFound))
    }
}

/// Hands out clones of one [FakeBankApi] and remembers the tokens it was given.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProvider {
    pub(crate) api: FakeBankApi,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl FakeProvider {
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl ApiProvider for FakeProvider {
    type Api = FakeBankApi;

    fn api_for_token(&self, token: &str) -> Result<Self::Api, ApiError> {
        self.tokens.lock().unwrap().push(token.to_owned());
        Ok(self.api.clone())
    }
}
