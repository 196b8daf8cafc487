//! 可插拔的破解引擎
//!
//! 任务执行器为每个任务创建一个引擎实例。`start` 阻塞到本次运行结束，
//! `stop` 与 `status` 会在运行期间被并发调用，因此所有方法都只借用 `&self`。

pub mod hashcat;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hashfleet_core::config::HashcatConfig;
use hashfleet_core::models::{CrackedPasswordRequest, DeviceId, DeviceMap, TaskPayload, TaskStatus};
use hashfleet_core::{HashfleetError, HashfleetResult};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

pub use hashcat::{CommandEngine, HashcatPayload};

/// 引擎状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineStatus {
    /// 原样上报给服务端的引擎私有状态
    pub payload: serde_json::Value,
    pub recovered: u64,
    pub total: u64,
}

impl EngineStatus {
    /// 所有哈希都已破解
    pub fn all_cracked(&self) -> bool {
        self.total > 0 && self.recovered >= self.total
    }
}

/// 一次运行的结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    AllCracked,
    Exhausted,
    /// 被停止或中断
    Aborted,
    Failed(String),
}

impl EngineOutcome {
    pub fn final_status(&self) -> TaskStatus {
        match self {
            EngineOutcome::AllCracked => TaskStatus::Finished,
            EngineOutcome::Exhausted => TaskStatus::Exhausted,
            EngineOutcome::Aborted => TaskStatus::Stopped,
            EngineOutcome::Failed(_) => TaskStatus::Error,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            EngineOutcome::Failed(message) => Some(message.clone()),
            _ => None,
        }
    }
}

/// 创建引擎所需的全部输入
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub task: TaskPayload,
    pub devices: Vec<DeviceId>,
    /// 本机设备表，用于推导设备类型
    pub device_map: DeviceMap,
    pub task_file: PathBuf,
    pub engine_files: Vec<PathBuf>,
    /// 已按当前设备改写过的检查点
    pub checkpoint: Option<Vec<u8>>,
    pub cracked_tx: mpsc::UnboundedSender<CrackedPasswordRequest>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn initialize(&self) -> HashfleetResult<()>;

    /// 运行到结束
    async fn start(&self) -> HashfleetResult<EngineOutcome>;

    async fn stop(&self) -> HashfleetResult<()>;

    async fn status(&self) -> EngineStatus;

    async fn cleanup(&self) -> HashfleetResult<()>;

    /// 运行产生的检查点文件，不存在时为 `None`
    fn checkpoint_file(&self) -> Option<PathBuf>;
}

pub type EngineFactory =
    Box<dyn Fn(EngineContext) -> HashfleetResult<Arc<dyn Engine>> + Send + Sync>;

struct RegisteredEngine {
    version: String,
    factory: EngineFactory,
}

/// 引擎注册表：名称 → 工厂
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, RegisteredEngine>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置的 hashcat 命令行引擎
    pub fn with_hashcat(config: HashcatConfig) -> Self {
        let mut registry = Self::new();
        let version = hashcat::ENGINE_VERSION.to_string();
        registry.register(hashcat::ENGINE_NAME, version, move |ctx| {
            Ok(Arc::new(CommandEngine::new(config.clone(), ctx)?) as Arc<dyn Engine>)
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, version: impl Into<String>, factory: F)
    where
        F: Fn(EngineContext) -> HashfleetResult<Arc<dyn Engine>> + Send + Sync + 'static,
    {
        let name = name.into();
        info!("注册引擎: {}", name);
        self.engines.insert(
            name,
            RegisteredEngine {
                version: version.into(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn create(&self, name: &str, ctx: EngineContext) -> HashfleetResult<Arc<dyn Engine>> {
        let entry = self
            .engines
            .get(name)
            .ok_or_else(|| HashfleetError::Engine(format!("未知的引擎: {name}")))?;
        (entry.factory)(ctx)
    }

    /// 名称 → 版本，随信标上报
    pub fn versions(&self) -> HashMap<String, String> {
        self.engines
            .iter()
            .map(|(name, e)| (name.clone(), e.version.clone()))
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.engines.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_to_final_status() {
        assert_eq!(EngineOutcome::AllCracked.final_status(), TaskStatus::Finished);
        assert_eq!(EngineOutcome::Exhausted.final_status(), TaskStatus::Exhausted);
        assert_eq!(EngineOutcome::Aborted.final_status(), TaskStatus::Stopped);
        let failed = EngineOutcome::Failed("gpu fell off the bus".into());
        assert_eq!(failed.final_status(), TaskStatus::Error);
        assert_eq!(failed.error_message().as_deref(), Some("gpu fell off the bus"));
    }

    #[test]
    fn test_all_cracked_needs_known_total() {
        assert!(!EngineStatus::default().all_cracked());
        let status = EngineStatus {
            recovered: 3,
            total: 3,
            ..Default::default()
        };
        assert!(status.all_cracked());
    }

    #[test]
    fn test_registry_reports_versions() {
        let registry = EngineRegistry::with_hashcat(HashcatConfig::default());
        assert!(registry.contains("hashcat"));
        assert_eq!(
            registry.versions().get("hashcat").map(String::as_str),
            Some(hashcat::ENGINE_VERSION)
        );
    }
}
