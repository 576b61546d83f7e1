//! Durable work queue shared by all workers

pub mod task_queue;

pub use task_queue::{
    Enqueued, QueueConfig, QueueError, QueueResult, QueueStats, SharedTaskQueue, TaskFilter,
    TaskQueue,
};
