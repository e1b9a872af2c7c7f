//! The JSON:API shapes returned by the bank.
//!
//! Every optional field is parsed leniently: a missing field or a field of the
//! wrong type becomes `None` instead of failing the whole record.

use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::Value;

use super::ApiError;

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;

    Ok(serde_json::from_value(value).ok())
}

/// A page of records as returned by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListResponse {
    /// The raw records on the page.
    #[serde(default)]
    pub data: Vec<Value>,
    /// Pagination links.
    #[serde(default, deserialize_with = "lenient")]
    pub links: Option<Links>,
}

/// Pagination links of a list response.
#[derive(Debug, Default, Deserialize)]
pub struct Links {
    /// The link to the next page, absent on the last page.
    #[serde(default, deserialize_with = "lenient")]
    pub next: Option<String>,
}

/// A response holding one record.
#[derive(Debug, Deserialize)]
pub struct SingleResponse {
    /// The raw record.
    pub data: Value,
}

impl ListResponse {
    /// Parse a list response body.
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        serde_json::from_slice(body).map_err(|error| ApiError::MalformedResponse(error.to_string()))
    }
}

impl SingleResponse {
    /// Parse a single record response body.
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        serde_json::from_slice(body).map_err(|error| ApiError::MalformedResponse(error.to_string()))
    }
}

/// An amount of money as the bank represents it.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoneyObject {
    /// ISO 4217 currency code.
    #[serde(default, deserialize_with = "lenient")]
    pub currency_code: Option<String>,
    /// The amount as a decimal string, e.g. "-42.50". Some payloads use a number.
    #[serde(default)]
    pub value: Option<Value>,
    /// The amount in cents.
    #[serde(default, deserialize_with = "lenient")]
    pub value_in_base_units: Option<i64>,
}

/// A `{ "data": { "id": ... } }` relationship.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Relationship {
    /// The identifier of the related resource.
    #[serde(default, deserialize_with = "lenient")]
    pub data: Option<ResourceIdentifier>,
}

/// The identifier of a related resource.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ResourceIdentifier {
    /// The bank's ID for the resource.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
}

impl Relationship {
    /// The ID of the related resource, if present and not empty.
    pub fn id(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// An account record.
#[derive(Debug, Default, Deserialize)]
pub struct AccountResource {
    /// The bank's ID for the account.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// The account details.
    #[serde(default, deserialize_with = "lenient")]
    pub attributes: Option<AccountAttributes>,
}

/// The details of an account record.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAttributes {
    /// The name shown to the customer.
    #[serde(default, deserialize_with = "lenient")]
    pub display_name: Option<String>,
    /// The bank's account type, e.g. "SAVER" or "TRANSACTIONAL".
    #[serde(default, deserialize_with = "lenient")]
    pub account_type: Option<String>,
    /// The current balance.
    #[serde(default, deserialize_with = "lenient")]
    pub balance: Option<MoneyObject>,
}

/// A transaction record.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionResource {
    /// The bank's ID for the transaction.
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    /// The transaction details.
    #[serde(default, deserialize_with = "lenient")]
    pub attributes: Option<TransactionAttributes>,
    /// Links to the account and category.
    #[serde(default, deserialize_with = "lenient")]
    pub relationships: Option<TransactionRelationships>,
}

/// The details of a transaction record.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAttributes {
    /// The cleaned up description.
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    /// The description exactly as the merchant sent it.
    #[serde(default, deserialize_with = "lenient")]
    pub raw_text: Option<String>,
    /// The amount, negative for money leaving the account.
    #[serde(default, deserialize_with = "lenient")]
    pub amount: Option<MoneyObject>,
    /// RFC 3339 timestamp of when the transaction was created.
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    /// "HELD" or "SETTLED".
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
}

/// The related resources of a transaction.
#[derive(Debug, Default, Deserialize)]
pub struct TransactionRelationships {
    /// The account the transaction belongs to.
    #[serde(default, deserialize_with = "lenient")]
    pub account: Option<Relationship>,
}

/// A webhook event delivered by the bank.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookEvent {
    /// The event itself.
    #[serde(default, deserialize_with = "lenient")]
    pub data: Option<WebhookEventResource>,
}

/// The resource part of a webhook event.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookEventResource {
    /// The event type.
    #[serde(default, deserialize_with = "lenient")]
    pub attributes: Option<WebhookEventAttributes>,
    /// The transaction and account the event is about.
    #[serde(default, deserialize_with = "lenient")]
    pub relationships: Option<WebhookEventRelationships>,
}

/// The attributes of a webhook event.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventAttributes {
    /// e.g. "TRANSACTION_CREATED".
    #[serde(default, deserialize_with = "lenient")]
    pub event_type: Option<String>,
}

/// The resources a webhook event refers to.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookEventRelationships {
    /// The transaction the event is about.
    #[serde(default, deserialize_with = "lenient")]
    pub transaction: Option<Relationship>,
    /// The account of the transaction.
    #[serde(default, deserialize_with = "lenient")]
    pub account: Option<Relationship>,
}

impl WebhookEvent {
    /// The declared event type.
    pub fn event_type(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.attributes.as_ref())
            .and_then(|attributes| attributes.event_type.as_deref())
    }

    /// The bank's ID of the transaction the event is about.
    pub fn transaction_id(&self) -> Option<&str> {
        self.relationships()
            .and_then(|relationships| relationships.transaction.as_ref())
            .and_then(Relationship::id)
    }

    /// The bank's ID of the account the event is about.
    pub fn account_id(&self) -> Option<&str> {
        self.relationships()
            .and_then(|relationships| relationships.account.as_ref())
            .and_then(Relationship::id)
    }

    fn relationships(&self) -> Option<&WebhookEventRelationships> {
        self.data
            .as_ref()
            .and_then(|data| data.relationships.as_ref())
    }
}

#[cfg(test)]
mod types_tests {
    use serde_json::json;

    use super::{ListResponse, TransactionResource, WebhookEvent};

    #[test]
    fn list_response_without_links_is_last_page() {
        let page = ListResponse::parse(br#"{"data": [{"id": "a"}]}"#).unwrap();

        assert_eq!(page.data.len(), 1);
        assert!(page.links.and_then(|links| links.next).is_none());
    }

    #[test]
    fn null_next_link_is_last_page() {
        let page = ListResponse::parse(br#"{"data": [], "links": {"prev": null, "next": null}}"#)
            .unwrap();

        assert!(page.links.and_then(|links| links.next).is_none());
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(ListResponse::parse(b"<html>").is_err());
    }

    #[test]
    fn wrongly_typed_fields_become_none() {
        let resource: TransactionResource = serde_json::from_value(json!({
            "id": "tx-1",
            "attributes": {"description": 12, "createdAt": ["not", "a", "date"]},
            "relationships": "nope",
        }))
        .unwrap();

        let attributes = resource.attributes.unwrap();
        assert_eq!(resource.id.as_deref(), Some("tx-1"));
        assert_eq!(attributes.description, None);
        assert_eq!(attributes.created_at, None);
        assert!(resource.relationships.is_none());
    }

    #[test]
    fn webhook_event_accessors() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "data": {
                "attributes": {"eventType": "TRANSACTION_CREATED"},
                "relationships": {
                    "transaction": {"data": {"id": "tx-1"}},
                    "account": {"data": {"id": "acc-1"}}
                }
            }
        }))
        .unwrap();

        assert_eq!(event.event_type(), Some("TRANSACTION_CREATED"));
        assert_eq!(event.transaction_id(), Some("tx-1"));
        assert_eq!(event.account_id(), Some("acc-1"));
    }

    #[test]
    fn empty_webhook_event_has_no_fields() {
        let event: WebhookEvent = serde_json::from_value(json!({})).unwrap();

        assert_eq!(event.event_type(), None);
        assert_eq!(event.transaction_id(), None);
    }
}
