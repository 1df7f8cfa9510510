pub mod queue_item;

pub use queue_item::{
    ItemUpdate, NewQueueItem, Operation, OperationType, QueueItem, QueueStats, QueueStatus,
};
