use metrics::{counter, gauge, Counter, Gauge};

/// 编排系统指标
///
/// 服务端记录信标、任务分配和破解结果；Worker 记录子进程退出码。
pub struct MetricsCollector {
    beacons_total: Counter,
    tasks_assigned_total: Counter,
    cracked_total: Counter,
    connected_hosts: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            beacons_total: counter!("hashfleet_beacons_total"),
            tasks_assigned_total: counter!("hashfleet_tasks_assigned_total"),
            cracked_total: counter!("hashfleet_cracked_total"),
            connected_hosts: gauge!("hashfleet_connected_hosts"),
        }
    }

    pub fn record_beacon(&self, connected_hosts: usize) {
        self.beacons_total.increment(1);
        self.connected_hosts.set(connected_hosts as f64);
    }

    pub fn record_task_assigned(&self) {
        self.tasks_assigned_total.increment(1);
    }

    pub fn record_cracked(&self) {
        self.cracked_total.increment(1);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// 记录一次子进程退出
pub fn record_child_exit(code: Option<i32>) {
    let label = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
    counter!("hashfleet_child_exits_total", "code" => label).increment(1);
}
