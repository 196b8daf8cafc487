pub mod scheduler;
pub mod worker_manager;

pub use scheduler::{rank_candidates, TaskScheduler};
pub use worker_manager::{
    Event, EventSubscriber, FnSubscriber, LogLine, SubscriptionHandle, TaskStatusChange, Topic,
    WorkerManager,
};
