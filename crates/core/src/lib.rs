pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use errors::{HashfleetError, HashfleetResult};
pub use logging::{init_logging, task_span, LogFormat};

/// 写入信标与二进制版本信息的版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
