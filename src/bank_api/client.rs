use std::{fmt::Debug, time::Duration};

use reqwest::{
    Client,
    header::{ACCEPT, RETRY_AFTER},
};
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset, format_description::well_known::Rfc3339};

use super::{
    ApiError, ApiProvider, BankApi, Page, TransactionFilter,
    types::{ListResponse, SingleResponse},
};

/// A client for the Up Bank API that authenticates with a personal access token.
#[derive(Clone)]
pub struct UpBankClient {
    http_client: Client,
    base_url: String,
    token: String,
}

impl Debug for UpBankClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpBankClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl UpBankClient {
    /// Create a client for the API at `base_url`, e.g. "https://api.up.com.au/api/v1".
    ///
    /// Every request fails with [ApiError::Timeout] if it takes longer than `timeout`.
    ///
    /// # Errors
    /// Returns [ApiError::Connection] if the HTTP client could not be created.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http_client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    /// Turn a path or a pagination link into an absolute URL.
    ///
    /// Absolute URLs are used as-is, anything else is relative to the base URL.
    fn resolve(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_owned()
        } else if link.starts_with('/') {
            format!("{}{link}", self.base_url)
        } else {
            format!("{}/{link}", self.base_url)
        }
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>, ApiError> {
        tracing::debug!("GET {url}");

        let mut request = self
            .http_client
            .get(url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json");

        if !query.is_empty() {
            request = request.query(query);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok());

        if let Some(error) = ApiError::from_status(status, retry_after) {
            tracing::warn!("GET {url} failed: {error}");
            return Err(error);
        }

        let body = response.bytes().await?;

        Ok(body.to_vec())
    }

    async fn get_page(&self, url: &str, query: &[(&str, String)]) -> Result<Page, ApiError> {
        let body = self.get(url, query).await?;
        let response = ListResponse::parse(&body)?;

        Ok(Page {
            records: response.data,
            next: response.links.and_then(|links| links.next),
        })
    }

    async fn get_single(&self, url: &str) -> Result<Value, ApiError> {
        let body = self.get(url, &[]).await?;

        Ok(SingleResponse::parse(&body)?.data)
    }
}

fn format_timestamp(timestamp: OffsetDateTime) -> Option<String> {
    match timestamp.to_offset(UtcOffset::UTC).format(&Rfc3339) {
        Ok(formatted) => Some(formatted),
        Err(error) => {
            tracing::warn!("ignoring transaction filter timestamp {timestamp}: {error}");
            None
        }
    }
}

impl BankApi for UpBankClient {
    async fn ping(&self) -> Result<(), ApiError> {
        self.get(&self.resolve("/util/ping"), &[]).await?;

        Ok(())
    }

    async fn list_accounts(&self, account_type: Option<&str>) -> Result<Page, ApiError> {
        let mut query = Vec::new();

        if let Some(account_type) = account_type {
            query.push(("filter[accountType]", account_type.to_owned()));
        }

        self.get_page(&self.resolve("/accounts"), &query).await
    }

    async fn get_account(&self, id: &str) -> Result<Value, ApiError> {
        self.get_single(&self.resolve(&format!("/accounts/{id}")))
            .await
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Page, ApiError> {
        let path = match &filter.account_id {
            Some(account_id) => format!("/accounts/{account_id}/transactions"),
            None => "/transactions".to_owned(),
        };

        let mut query = Vec::new();

        if let Some(since) = filter.since.and_then(format_timestamp) {
            query.push(("filter[since]", since));
        }

        if let Some(until) = filter.until.and_then(format_timestamp) {
            query.push(("filter[until]", until));
        }

        if let Some(category) = &filter.category {
            query.push(("filter[category]", category.clone()));
        }

        if let Some(page_size) = filter.page_size {
            query.push(("page[size]", page_size.to_string()));
        }

        self.get_page(&self.resolve(&path), &query).await
    }

    async fn next_page(&self, next: &str) -> Result<Page, ApiError> {
        self.get_page(&self.resolve(next), &[]).await
    }

    async fn get_transaction(&self, id: &str) -> Result<Value, ApiError> {
        self.get_single(&self.resolve(&format!("/transactions/{id}")))
            .await
    }
}

/// Creates [UpBankClient]s that share a base URL and timeout.
#[derive(Debug, Clone)]
pub struct UpBankProvider {
    base_url: String,
    timeout: Duration,
}

impl UpBankProvider {
    /// Create a provider for the API at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_owned(),
            timeout,
        }
    }
}

impl ApiProvider for UpBankProvider {
    type Api = UpBankClient;

    fn api_for_token(&self, token: &str) -> Result<UpBankClient, ApiError> {
        UpBankClient::new(&self.base_url, token, self.timeout)
    }
}

#[cfg(test)]
mod client_tests {
    use std::{collections::HashMap, time::Duration};

    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::{HeaderMap, StatusCode, header::AUTHORIZATION},
        response::IntoResponse,
        routing::get,
    };
    use serde_json::{Value, json};
    use time::macros::datetime;

    use crate::bank_api::{
        ApiError, ApiProvider, BankApi, TransactionFilter, UpBankClient, UpBankProvider,
    };

    const TOKEN: &str = "up:yeah:secret-token";

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}")
    }

    fn get_client(base_url: &str) -> UpBankClient {
        UpBankClient::new(base_url, TOKEN, Duration::from_secs(5)).unwrap()
    }

    /// Echoes the authorization header and query string back as a one record page.
    async fn echo(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        Json(json!({
            "data": [{"authorization": authorization, "query": query}],
            "links": {"prev": null, "next": null}
        }))
    }

    #[tokio::test]
    async fn sends_bearer_token_and_account_type_filter() {
        let base_url = spawn_server(Router::new().route("/accounts", get(echo))).await;

        let page = get_client(&base_url)
            .list_accounts(Some("SAVER"))
            .await
            .unwrap();

        assert_eq!(page.next, None);
        assert_eq!(page.records[0]["authorization"], format!("Bearer {TOKEN}"));
        assert_eq!(page.records[0]["query"]["filter[accountType]"], "SAVER");
    }

    #[tokio::test]
    async fn transaction_filter_becomes_query_parameters() {
        let base_url = spawn_server(Router::new().route("/transactions", get(echo))).await;
        let filter = TransactionFilter {
            since: Some(datetime!(2025-01-01 00:00 +10)),
            page_size: Some(100),
            category: Some("groceries".to_owned()),
            ..Default::default()
        };

        let page = get_client(&base_url)
            .list_transactions(&filter)
            .await
            .unwrap();

        let query = &page.records[0]["query"];
        assert_eq!(query["filter[since]"], "2024-12-31T14:00:00Z");
        assert_eq!(query["page[size]"], "100");
        assert_eq!(query["filter[category]"], "groceries");
        assert_eq!(query.get("filter[until]"), None);
    }

    #[tokio::test]
    async fn account_filter_uses_account_transactions_endpoint() {
        let router = Router::new().route(
            "/accounts/{id}/transactions",
            get(|Path(id): Path<String>| async move {
                Json(json!({"data": [{"id": id}], "links": {}}))
            }),
        );
        let base_url = spawn_server(router).await;
        let filter = TransactionFilter {
            account_id: Some("acc-1".to_owned()),
            ..Default::default()
        };

        let page = get_client(&base_url)
            .list_transactions(&filter)
            .await
            .unwrap();

        assert_eq!(page.records, vec![json!({"id": "acc-1"})]);
    }

    #[tokio::test]
    async fn follows_relative_and_absolute_next_links() {
        let router = Router::new()
            .route(
                "/transactions",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    let page = query.get("page").cloned().unwrap_or_default();
                    let next = match page.as_str() {
                        "" => json!("/transactions?page=2"),
                        _ => Value::Null,
                    };
                    Json(json!({"data": [{"id": format!("page-{page}")}], "links": {"next": next}}))
                }),
            );
        let base_url = spawn_server(router).await;
        let client = get_client(&base_url);

        let first = client
            .list_transactions(&TransactionFilter::default())
            .await
            .unwrap();
        let relative = client
            .next_page(first.next.as_deref().unwrap())
            .await
            .unwrap();
        let absolute = client
            .next_page(&format!("{base_url}/transactions?page=2"))
            .await
            .unwrap();

        assert_eq!(first.next.as_deref(), Some("/transactions?page=2"));
        assert_eq!(relative.records, vec![json!({"id": "page-2"})]);
        assert_eq!(relative.next, None);
        assert_eq!(absolute.records, relative.records);
    }

    #[tokio::test]
    async fn fetches_single_records() {
        let router = Router::new()
            .route(
                "/transactions/{id}",
                get(|Path(id): Path<String>| async move {
                    Json(json!({"data": {"id": id, "type": "transactions"}}))
                }),
            )
            .route(
                "/accounts/{id}",
                get(|Path(id): Path<String>| async move {
                    Json(json!({"data": {"id": id, "type": "accounts"}}))
                }),
            );
        let base_url = spawn_server(router).await;
        let client = get_client(&base_url);

        let transaction = client.get_transaction("tx-1").await.unwrap();
        let account = client.get_account("acc-1").await.unwrap();

        assert_eq!(transaction["id"], "tx-1");
        assert_eq!(account["type"], "accounts");
    }

    #[tokio::test]
    async fn classifies_error_statuses() {
        let router = Router::new()
            .route("/util/ping", get(|| async { StatusCode::UNAUTHORIZED }))
            .route("/accounts", get(|| async { StatusCode::BAD_GATEWAY }))
            .route(
                "/transactions",
                get(|| async { (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "2")]).into_response() }),
            );
        let base_url = spawn_server(router).await;
        let client = get_client(&base_url);

        assert_eq!(client.ping().await, Err(ApiError::Auth(401)));
        assert_eq!(client.list_accounts(None).await, Err(ApiError::Server(502)));
        assert_eq!(
            client.list_transactions(&TransactionFilter::default()).await,
            Err(ApiError::RateLimited {
                retry_after: Duration::from_secs(2)
            })
        );
        assert_eq!(client.get_transaction("missing").await, Err(ApiError::NotFound));
    }

    #[tokio::test]
    async fn invalid_json_is_malformed_response() {
        let router = Router::new().route("/accounts", get(|| async { "<html>oops</html>" }));
        let base_url = spawn_server(router).await;

        let result = get_client(&base_url).list_accounts(None).await;

        assert!(matches!(result, Err(ApiError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let router = Router::new().route(
            "/util/ping",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                StatusCode::OK
            }),
        );
        let base_url = spawn_server(router).await;
        let client = UpBankClient::new(&base_url, TOKEN, Duration::from_millis(100)).unwrap();

        assert_eq!(client.ping().await, Err(ApiError::Timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let result = get_client(&format!("http://{address}")).ping().await;

        match result {
            Err(ApiError::Connection(message)) => assert!(!message.contains(TOKEN)),
            other => panic!("expected a connection error, got {other:?}"),
        }
    }

    #[test]
    fn debug_output_redacts_token() {
        let client = get_client("https://api.up.com.au/api/v1/");

        let debug = format!("{client:?}");

        assert!(!debug.contains(TOKEN));
        assert!(debug.contains("https://api.up.com.au/api/v1"));
    }

    #[test]
    fn provider_creates_clients_for_tokens() {
        let provider = UpBankProvider::new("https://api.up.com.au/api/v1", Duration::from_secs(30));

        assert!(provider.api_for_token(TOKEN).is_ok());
    }
}
