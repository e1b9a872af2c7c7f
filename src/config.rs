//! Settings for talking to the bank and receiving webhooks.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// The production base URL of the Up Bank API.
pub const DEFAULT_BASE_URL: &str = "https://api.up.com.au/api/v1";

/// How long a single request to the bank may take.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How many records to ask for per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// How many records may fail in one sync run before it is abandoned.
pub const DEFAULT_FAILURE_CEILING: usize = 5;

/// The configuration of the sync engine and webhook receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// The base URL of the bank's API, without a trailing slash.
    pub base_url: String,
    /// The timeout for each HTTP request.
    pub request_timeout: Duration,
    /// The page size requested when listing transactions.
    pub page_size: u32,
    /// A transaction sync stops fetching pages once this many records have failed.
    pub failure_ceiling: usize,
    /// How requests to the bank are retried.
    pub api_retry: RetryPolicy,
    /// How processing a webhook event is retried.
    pub webhook_retry: RetryPolicy,
    /// The secret used to sign webhook deliveries. Without it signatures are not checked.
    pub webhook_secret: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            failure_ceiling: DEFAULT_FAILURE_CEILING,
            api_retry: RetryPolicy::api_default(),
            webhook_retry: RetryPolicy::webhook_default(),
            webhook_secret: None,
        }
    }
}

impl SyncConfig {
    /// Set the webhook secret, treating an empty secret as no secret.
    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.webhook_secret = secret.filter(|secret| !secret.is_empty());
        self
    }
}
