//! hashfleet 服务端与 Worker 二进制共用的启动工具

pub mod common;
pub mod shutdown;

pub use shutdown::ShutdownManager;
