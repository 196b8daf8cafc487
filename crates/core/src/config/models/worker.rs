use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{Device, DeviceMap, Priority};

/// Worker 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 覆盖系统主机名
    pub hostname: Option<String>,
    pub server: ServerConnection,
    pub intervals: Intervals,
    pub gpu_priority_limits: GpuPriorityLimits,
    /// 没有空闲 GPU 时是否退回到 CPU
    pub auto_cpu_assignment: bool,
    /// 捕获子进程输出
    pub engine_debug: bool,
    pub debug_queue_capacity: usize,
    pub save_task_file_path: PathBuf,
    pub save_engine_file_path: PathBuf,
    pub hashcat: HashcatConfig,
    pub devices: Vec<Device>,
    pub log_level: String,
    pub log_format: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            server: ServerConnection::default(),
            intervals: Intervals::default(),
            gpu_priority_limits: GpuPriorityLimits::default(),
            auto_cpu_assignment: false,
            engine_debug: false,
            debug_queue_capacity: 100,
            save_task_file_path: PathBuf::from("/var/lib/hashfleet/tasks"),
            save_engine_file_path: PathBuf::from("/var/lib/hashfleet/engine"),
            hashcat: HashcatConfig::default(),
            devices: Vec::new(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// 到服务端的连接参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConnection {
    /// `host:port`
    pub connect_to: String,
    /// TLS 校验时使用的服务端名称，与 `connect_to` 的主机名不同时设置
    pub server_name: Option<String>,
    /// 客户端证书与私钥（PEM），与 CA 一起启用双向 TLS
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub ca_certificate: Option<PathBuf>,
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self {
            connect_to: "127.0.0.1:4014".to_string(),
            server_name: None,
            certificate: None,
            private_key: None,
            ca_certificate: None,
        }
    }
}

impl ServerConnection {
    pub fn tls_enabled(&self) -> bool {
        self.certificate.is_some() || self.private_key.is_some() || self.ca_certificate.is_some()
    }
}

/// 各种周期（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub beacon: u64,
    pub job_status: u64,
    pub termination_delay: u64,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            beacon: 30,
            job_status: 5,
            termination_delay: 30,
        }
    }
}

impl Intervals {
    pub fn beacon(&self) -> Duration {
        Duration::from_secs(self.beacon)
    }

    pub fn job_status(&self) -> Duration {
        Duration::from_secs(self.job_status)
    }

    pub fn termination_delay(&self) -> Duration {
        Duration::from_secs(self.termination_delay)
    }
}

/// 每个优先级一次最多占用的 GPU 数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuPriorityLimits {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl Default for GpuPriorityLimits {
    fn default() -> Self {
        Self {
            high: 4,
            normal: 2,
            low: 1,
        }
    }
}

impl GpuPriorityLimits {
    pub fn limit_for(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashcatConfig {
    pub binary: PathBuf,
    /// 会话、检查点和输出文件目录
    pub session_path: PathBuf,
    pub potfile_path: PathBuf,
    pub shared_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for HashcatConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("hashcat"),
            session_path: PathBuf::from("/var/lib/hashfleet/sessions"),
            potfile_path: PathBuf::from("/var/lib/hashfleet/hashfleet.potfile"),
            shared_path: None,
            extra_args: Vec::new(),
        }
    }
}

impl WorkerConfig {
    /// 配置中的主机名，缺省时取系统主机名
    pub fn resolve_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown-host".to_string())
        })
    }

    pub fn device_map(&self) -> DeviceMap {
        self.devices.iter().cloned().collect()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.connect_to.is_empty() {
            return Err(anyhow::anyhow!("服务端地址不能为空"));
        }

        if self.intervals.beacon == 0 || self.intervals.job_status == 0 {
            return Err(anyhow::anyhow!("信标与状态上报间隔必须大于0"));
        }

        if self.debug_queue_capacity == 0 {
            return Err(anyhow::anyhow!("调试队列容量必须大于0"));
        }

        let tls = &self.server;
        if tls.tls_enabled()
            && (tls.certificate.is_none() || tls.private_key.is_none() || tls.ca_certificate.is_none())
        {
            return Err(anyhow::anyhow!(
                "启用TLS时必须同时配置 certificate、private_key 与 ca_certificate"
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id) {
                return Err(anyhow::anyhow!("设备编号重复: {}", device.id));
            }
        }

        Ok(())
    }
}
