pub mod server;
pub mod worker;

pub use server::{ServerConfig, TlsConfig};
pub use worker::{GpuPriorityLimits, HashcatConfig, Intervals, ServerConnection, WorkerConfig};
