use serde_json::{Value, json};

use super::BatchOperation;
use crate::models::{Operation, QueueItem};

/// Mailchimp addresses list members by the MD5 of the lowercased email.
pub fn subscriber_hash(email: &str) -> String {
    format!("{:x}", md5::compute(email.trim().to_lowercase().as_bytes()))
}

/// Build the batch sub-operation for one queue item.
pub fn build_operation(item: &QueueItem, operation: &Operation) -> BatchOperation {
    let path = format!(
        "/lists/{}/members/{}",
        item.audience_id,
        subscriber_hash(&item.target_key)
    );

    let (method, body) = match operation {
        Operation::Subscribe {
            merge_fields,
            tags,
            double_opt_in,
        } => {
            let status = if *double_opt_in { "pending" } else { "subscribed" };
            let mut body = json!({
                "email_address": item.target_key,
                "status_if_new": status,
            });
            if !merge_fields.is_empty() {
                body["merge_fields"] = Value::Object(merge_fields.clone());
            }
            if !tags.is_empty() {
                body["tags"] = json!(tags);
            }
            ("PUT", body)
        }
        Operation::Unsubscribe => ("PATCH", json!({ "status": "unsubscribed" })),
        Operation::Update { merge_fields } => {
            ("PATCH", json!({ "merge_fields": merge_fields }))
        }
    };

    BatchOperation {
        method: method.to_string(),
        path,
        operation_id: item.operation_id(),
        body: Some(body),
    }
}
