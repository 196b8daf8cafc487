pub mod memory_storage;
pub mod observability;

pub use memory_storage::InMemoryStorage;
pub use observability::{record_child_exit, MetricsCollector};
