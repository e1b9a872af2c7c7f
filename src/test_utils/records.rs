use serde_json::{Value, json};

/// A transaction record shaped like the bank's API returns them.
pub(crate) fn transaction_record(
    id: &str,
    amount: &str,
    created_at: &str,
    account_id: Option<&str>,
) -> Value {
    let account = match account_id {
        Some(account_id) => json!({"data": {"type": "accounts", "id": account_id}}),
        None => json!({"data": null}),
    };

    json!({
        "type": "transactions",
        "id": id,
        "attributes": {
            "status": "SETTLED",
            "rawText": null,
            "description": format!("Purchase {id}"),
            "amount": {"currencyCode": "AUD", "value": amount},
            "createdAt": created_at
        },
        "relationships": {"account": account}
    })
}

/// An account record shaped like the bank's API returns them.
pub(crate) fn account_record(id: &str, name: &str, account_type: &str, balance: &str) -> Value {
    json!({
        "type": "accounts",
        "id": id,
        "attributes": {
            "displayName": name,
            "accountType": account_type,
            "ownershipType": "INDIVIDUAL",
            "balance": {"currencyCode": "AUD", "value": balance}
        }
    })
}

/// A webhook event about a transaction.
pub(crate) fn webhook_event(
    event_type: &str,
    transaction_id: Option<&str>,
    account_id: Option<&str>,
) -> Value {
    let relationship = |kind: &str, id: Option<&str>| match id {
        Some(id) => json!({"data": {"type": kind, "id": id}}),
        None => json!({"data": null}),
    };

    json!({
        "data": {
            "type": "webhook-events",
            "id": "event-1",
            "attributes": {
                "eventType": event_type,
                "createdAt": "2025-03-04T10:00:00+11:00"
            },
            "relationships": {
                "webhook": {"data": {"type": "webhooks", "id": "webhook-1"}},
                "transaction": relationship("transactions", transaction_id),
                "account": relationship("accounts", account_id)
            }
        }
    })
}
