pub mod device;
pub mod rpc;
pub mod task;

pub use device::{
    devices_overlap, join_device_ids, parse_device_ids, Device, DeviceId, DeviceKind, DeviceMap,
};
pub use rpc::*;
pub use task::{Priority, Task, TaskId, TaskStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 持久化的破解结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrackedHash {
    pub task_id: TaskId,
    pub hash: String,
    pub value: String,
    pub cracked_at: DateTime<Utc>,
}

impl From<CrackedPasswordRequest> for CrackedHash {
    fn from(req: CrackedPasswordRequest) -> Self {
        Self {
            task_id: req.task_id,
            hash: req.hash,
            value: req.value,
            cracked_at: req.cracked_at,
        }
    }
}
