pub mod api;
pub mod entity;
pub mod message;
pub mod task;

pub use api::{ParseRequest, ParseResponse};
pub use message::{
    FetchTask, TaskAnnouncement, TaskAssignment, TaskGone, TaskResult, WireMessage,
};
pub use task::{cache_key, collapse_key, task_key, TaskStatus, PENDING_QUEUE_KEY};
