use hashfleet_core::config::GpuPriorityLimits;
use hashfleet_core::models::{join_device_ids, DeviceId, DeviceKind, DeviceMap, Priority};
use hashfleet_core::{HashfleetError, HashfleetResult};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 本机设备的占用管理
///
/// 设备表是本机的权威视图，所有分配与释放都在同一把锁下完成。
pub struct DeviceAllocator {
    devices: Mutex<DeviceMap>,
    limits: GpuPriorityLimits,
    auto_cpu: bool,
}

impl DeviceAllocator {
    pub fn new(devices: DeviceMap, limits: GpuPriorityLimits, auto_cpu: bool) -> Self {
        Self {
            devices: Mutex::new(devices),
            limits,
            auto_cpu,
        }
    }

    /// 为任务分配设备并标记为忙碌
    ///
    /// 指定了设备时要求它们全部存在且空闲；否则按优先级上限挑选空闲 GPU，
    /// 没有空闲 GPU 且开启了 `auto_cpu_assignment` 时退回到 CPU。
    pub async fn allocate(
        &self,
        task_id: &str,
        priority: Priority,
        pinned: Option<&[DeviceId]>,
    ) -> HashfleetResult<Vec<DeviceId>> {
        let mut devices = self.devices.lock().await;

        let picked = match pinned.filter(|p| !p.is_empty()) {
            Some(ids) => {
                if !devices.all_free(ids) {
                    return Err(HashfleetError::Process(format!(
                        "任务 {} 指定的设备 {} 不存在或正被占用",
                        task_id,
                        join_device_ids(ids)
                    )));
                }
                ids.to_vec()
            }
            None => {
                let limit = self.limits.limit_for(priority);
                let gpus = devices.pick_free_devices(DeviceKind::Gpu, limit);
                if !gpus.is_empty() {
                    gpus
                } else if self.auto_cpu {
                    debug!("没有空闲GPU，任务 {} 退回到CPU", task_id);
                    devices.pick_free_devices(DeviceKind::Cpu, limit)
                } else {
                    Vec::new()
                }
            }
        };

        if picked.is_empty() {
            return Err(HashfleetError::Process(format!(
                "没有可分配给任务 {task_id} 的空闲设备"
            )));
        }

        devices.mark_busy(&picked);
        info!("任务 {} 占用设备 {}", task_id, join_device_ids(&picked));
        Ok(picked)
    }

    pub async fn release(&self, task_id: &str, ids: &[DeviceId]) {
        self.devices.lock().await.mark_free(ids);
        info!("任务 {} 释放设备 {}", task_id, join_device_ids(ids));
    }

    pub async fn has_free_devices(&self) -> bool {
        self.devices.lock().await.has_free_devices()
    }

    /// 未指定设备的任务能否在本机启动：有空闲 GPU，或开启自动分配时有空闲 CPU
    pub async fn can_accept_unpinned(&self) -> bool {
        let devices = self.devices.lock().await;
        !devices.pick_free_devices(DeviceKind::Gpu, 1).is_empty()
            || (self.auto_cpu && !devices.pick_free_devices(DeviceKind::Cpu, 1).is_empty())
    }

    pub async fn snapshot(&self) -> DeviceMap {
        self.devices.lock().await.clone()
    }
}
