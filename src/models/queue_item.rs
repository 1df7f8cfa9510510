use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Completed,
        QueueStatus::Failed,
        QueueStatus::Retrying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Retrying => "retrying",
        }
    }

    /// Completed and failed rows never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Retrying)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "operation_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Subscribe,
    Unsubscribe,
    Update,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Subscribe => "subscribe",
            OperationType::Unsubscribe => "unsubscribe",
            OperationType::Update => "update",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The work a queue item asks the list provider to perform. Stored as the
/// item's payload; only the batch request builder looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Subscribe {
        #[serde(default)]
        merge_fields: Map<String, Value>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        double_opt_in: bool,
    },
    Unsubscribe,
    Update {
        #[serde(default)]
        merge_fields: Map<String, Value>,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationType {
        match self {
            Operation::Subscribe { .. } => OperationType::Subscribe,
            Operation::Unsubscribe => OperationType::Unsubscribe,
            Operation::Update { .. } => OperationType::Update,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub source_id: String,
    pub audience_id: String,
    pub operation_type: OperationType,
    pub target_key: String,
    pub payload: Value,
    pub status: QueueStatus,
    pub priority: i32,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub external_batch_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Correlation id sent with the batch sub-operation and echoed back in results.
    pub fn operation_id(&self) -> String {
        format!("{}_{}", self.operation_type, self.id)
    }

    pub fn operation(&self) -> Result<Operation, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// A row about to be inserted. The store assigns `id`, `status` and timestamps.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub batch_id: Uuid,
    pub source_id: String,
    pub audience_id: String,
    pub target_key: String,
    pub operation: Operation,
    pub priority: i32,
}

/// Partial update applied by `QueueStore::update_item`. `None` leaves a column as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpdate {
    pub status: Option<QueueStatus>,
    pub retry_count: Option<i32>,
    pub error_message: Option<String>,
    pub external_batch_ref: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub retrying: i64,
}

impl QueueStats {
    pub fn from_counts<I>(counts: I) -> Self
    where
        I: IntoIterator<Item = (QueueStatus, i64)>,
    {
        let mut stats = QueueStats::default();
        for (status, count) in counts {
            match status {
                QueueStatus::Pending => stats.pending += count,
                QueueStatus::Processing => stats.processing += count,
                QueueStatus::Completed => stats.completed += count,
                QueueStatus::Failed => stats.failed += count,
                QueueStatus::Retrying => stats.retrying += count,
            }
            stats.total += count;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_payload_carries_its_tag() {
        let op = Operation::Subscribe {
            merge_fields: Map::new(),
            tags: vec!["newsletter".into()],
            double_opt_in: true,
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["tags"], json!(["newsletter"]));
    }

    #[test]
    fn update_payload_defaults_missing_fields() {
        let op: Operation = serde_json::from_value(json!({ "type": "update" })).unwrap();
        assert_eq!(
            op,
            Operation::Update {
                merge_fields: Map::new()
            }
        );
        assert_eq!(op.kind(), OperationType::Update);
    }

    #[test]
    fn stats_total_sums_every_status() {
        let stats = QueueStats::from_counts([
            (QueueStatus::Pending, 3),
            (QueueStatus::Completed, 5),
            (QueueStatus::Failed, 1),
        ]);
        assert_eq!(stats.total, 9);
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.retrying, 0);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        let terminal: Vec<_> = QueueStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, [&QueueStatus::Completed, &QueueStatus::Failed]);
    }
}
