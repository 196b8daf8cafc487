use std::sync::Arc;

use hashfleet_core::config::WorkerConfig;
use hashfleet_core::{HashfleetError, HashfleetResult};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{BeaconManager, ChildCommand, DeviceAllocator, ProcessSupervisor, ServerApi};
use crate::engines::EngineRegistry;

/// Worker 父进程：信标循环加子进程监督
pub struct WorkerLifecycle {
    hostname: String,
    supervisor: Arc<ProcessSupervisor>,
    beacon_manager: Arc<BeaconManager>,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    beacon_task: RwLock<Option<JoinHandle<()>>>,
}

impl WorkerLifecycle {
    pub fn new(
        config: &WorkerConfig,
        api: Arc<dyn ServerApi>,
        child_command: ChildCommand,
        engines: &EngineRegistry,
    ) -> Self {
        let hostname = config.resolve_hostname();
        let allocator = Arc::new(DeviceAllocator::new(
            config.device_map(),
            config.gpu_priority_limits.clone(),
            config.auto_cpu_assignment,
        ));
        let supervisor = Arc::new(ProcessSupervisor::new(
            allocator,
            child_command,
            config.engine_debug,
            config.debug_queue_capacity,
            config.intervals.termination_delay(),
        ));
        let beacon_manager = Arc::new(BeaconManager::new(
            hostname.clone(),
            api,
            Arc::clone(&supervisor),
            config.intervals.beacon(),
            engines.versions(),
        ));

        Self {
            hostname,
            supervisor,
            beacon_manager,
            shutdown_tx: Arc::new(RwLock::new(None)),
            beacon_task: RwLock::new(None),
        }
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub async fn start(&self) -> HashfleetResult<()> {
        let mut tx_guard = self.shutdown_tx.write().await;
        if tx_guard.is_some() {
            return Err(HashfleetError::Internal("Worker已在运行".to_string()));
        }

        info!("启动Worker: {}", self.hostname);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = Arc::clone(&self.beacon_manager).start(shutdown_rx);
        *tx_guard = Some(shutdown_tx);
        *self.beacon_task.write().await = Some(handle);

        info!("Worker {} 启动成功", self.hostname);
        Ok(())
    }

    /// 停止信标循环并等待所有子进程退出
    ///
    /// 子进程在宽限期内未全部退出时返回错误，调用方应立即结束进程。
    pub async fn stop(&self) -> HashfleetResult<()> {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            return Ok(());
        };

        info!("停止Worker: {}", self.hostname);
        let _ = tx.send(());
        if let Some(handle) = self.beacon_task.write().await.take() {
            if let Err(e) = handle.await {
                error!("信标循环异常结束: {}", e);
            }
        }

        self.supervisor.stop_all().await?;
        info!("Worker {} 已停止", self.hostname);
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown_tx.read().await.is_some()
    }
}
