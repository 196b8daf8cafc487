pub mod storage;

pub use storage::{PendingTasksRequest, StorageBackend};
