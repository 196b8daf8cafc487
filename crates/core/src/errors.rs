use thiserror::Error;

use crate::models::TaskStatus;

/// 编排系统错误类型定义
#[derive(Debug, Error)]
pub enum HashfleetError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("文件未找到: {id}")]
    FileNotFound { id: String },

    #[error("非法的任务状态转换: {from} -> {to}")]
    InvalidStatusTransition { from: TaskStatus, to: TaskStatus },

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("RPC调用失败: HTTP {status_code} - {message}")]
    Rpc { status_code: u16, message: String },

    #[error("检查点文件错误: {0}")]
    Checkpoint(String),

    #[error("引擎错误: {0}")]
    Engine(String),

    #[error("进程管理错误: {0}")]
    Process(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl HashfleetError {
    /// 是否属于调用方输入错误（对应 4xx）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            HashfleetError::TaskNotFound { .. }
                | HashfleetError::FileNotFound { .. }
                | HashfleetError::InvalidStatusTransition { .. }
                | HashfleetError::Validation(_)
        )
    }
}

/// 统一的Result类型
pub type HashfleetResult<T> = std::result::Result<T, HashfleetError>;
