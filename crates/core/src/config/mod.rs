pub mod loader;
pub mod models;

pub use loader::{load_config, ENV_PREFIX};
pub use models::{
    GpuPriorityLimits, HashcatConfig, Intervals, ServerConfig, ServerConnection, TlsConfig,
    WorkerConfig,
};
