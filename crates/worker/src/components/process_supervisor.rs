use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashfleet_core::models::{join_device_ids, DeviceId, TaskAssignment, TaskId, TaskProcess};
use hashfleet_core::{HashfleetError, HashfleetResult};
use hashfleet_infrastructure::record_child_exit;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use super::DeviceAllocator;

/// 子进程的启动方式
///
/// 默认是当前可执行文件加上 `--child`，最终命令行为
/// `<program> <base_args..> --task-id <id> --devices <1,2>`。
#[derive(Debug, Clone)]
pub struct ChildCommand {
    pub program: PathBuf,
    pub base_args: Vec<String>,
    /// 追加到命令行末尾的参数，例如 `--config <path>`
    pub extra_args: Vec<String>,
}

impl ChildCommand {
    pub fn current_exe() -> HashfleetResult<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            base_args: vec!["--child".to_string()],
            extra_args: Vec::new(),
        })
    }

    fn build(&self, task_id: &str, devices: &[DeviceId]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--task-id")
            .arg(task_id)
            .arg("--devices")
            .arg(join_device_ids(devices))
            .args(&self.extra_args)
            .stdin(Stdio::null());
        cmd
    }
}

#[derive(Debug, Clone)]
struct ProcessRecord {
    pid: u32,
    started_at: Instant,
    devices: Vec<DeviceId>,
}

/// 正在运行的子进程
pub struct TaskHandle {
    pub task_id: TaskId,
    pub pid: u32,
    pub devices: Vec<DeviceId>,
    exit_rx: oneshot::Receiver<Option<i32>>,
}

impl TaskHandle {
    /// 等待子进程结束并完成清理，返回退出码（被信号终止时为 `None`）
    pub async fn wait(self) -> Option<i32> {
        self.exit_rx.await.ok().flatten()
    }
}

/// 子进程监督者
///
/// 每个任务一个子进程。监控任务等待进程退出，启用调试输出时还有两个读取 stdout/stderr 的任务，
/// 三者全部结束后才释放设备并删除进程记录。
pub struct ProcessSupervisor {
    allocator: Arc<DeviceAllocator>,
    command: ChildCommand,
    engine_debug: bool,
    debug_queue_capacity: usize,
    termination_delay: Duration,
    processes: Arc<RwLock<HashMap<TaskId, ProcessRecord>>>,
}

impl ProcessSupervisor {
    pub fn new(
        allocator: Arc<DeviceAllocator>,
        command: ChildCommand,
        engine_debug: bool,
        debug_queue_capacity: usize,
        termination_delay: Duration,
    ) -> Self {
        Self {
            allocator,
            command,
            engine_debug,
            debug_queue_capacity,
            termination_delay,
            processes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn allocator(&self) -> &Arc<DeviceAllocator> {
        &self.allocator
    }

    /// 为任务分配设备并启动子进程
    pub async fn create_task(&self, assignment: &TaskAssignment) -> HashfleetResult<TaskHandle> {
        let task_id = assignment.task_id.clone();

        // 同一任务在本机只允许一个子进程，持有写锁直到记录插入
        let mut processes = self.processes.write().await;
        if processes.contains_key(&task_id) {
            return Err(HashfleetError::Process(format!("任务 {task_id} 已在本机运行")));
        }

        let devices = self
            .allocator
            .allocate(&task_id, assignment.priority, assignment.devices.as_deref())
            .await?;

        let mut cmd = self.command.build(&task_id, &devices);
        if self.engine_debug {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.allocator.release(&task_id, &devices).await;
                return Err(HashfleetError::Process(format!(
                    "启动任务 {task_id} 的子进程失败: {e}"
                )));
            }
        };

        let Some(pid) = child.id() else {
            self.allocator.release(&task_id, &devices).await;
            return Err(HashfleetError::Process(format!(
                "任务 {task_id} 的子进程启动后立即退出"
            )));
        };

        processes.insert(
            task_id.clone(),
            ProcessRecord {
                pid,
                started_at: Instant::now(),
                devices: devices.clone(),
            },
        );
        drop(processes);

        info!(
            "启动任务 {} 的子进程: pid={}, devices={}",
            task_id,
            pid,
            join_device_ids(&devices)
        );

        let debug_tx = if self.engine_debug {
            Some(spawn_debug_drain(task_id.clone(), self.debug_queue_capacity))
        } else {
            None
        };

        let (exit_tx, exit_rx) = oneshot::channel();
        let allocator = Arc::clone(&self.allocator);
        let processes = Arc::clone(&self.processes);
        let monitor_task_id = task_id.clone();
        let monitor_devices = devices.clone();

        tokio::spawn(async move {
            let status = wait_with_output(&mut child, debug_tx).await;
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("等待任务 {} 的子进程失败: {}", monitor_task_id, e);
                    None
                }
            };

            allocator.release(&monitor_task_id, &monitor_devices).await;
            processes.write().await.remove(&monitor_task_id);
            record_child_exit(code);

            match code {
                Some(0) => info!("任务 {} 的子进程正常退出", monitor_task_id),
                Some(c) => warn!("任务 {} 的子进程退出码: {}", monitor_task_id, c),
                None => warn!("任务 {} 的子进程被信号终止", monitor_task_id),
            }

            let _ = exit_tx.send(code);
        });

        Ok(TaskHandle {
            task_id,
            pid,
            devices,
            exit_rx,
        })
    }

    /// 向指定任务的子进程发送 SIGTERM，不强制杀死
    pub async fn stop_task(&self, task_id: &str) -> HashfleetResult<()> {
        let pid = {
            let processes = self.processes.read().await;
            processes.get(task_id).map(|r| r.pid)
        };

        match pid {
            Some(pid) => {
                info!("停止任务 {} (pid={})", task_id, pid);
                send_sigterm(pid)
            }
            None => {
                warn!("未找到要停止的任务: {}", task_id);
                Ok(())
            }
        }
    }

    /// 向所有子进程发送 SIGTERM 并等待它们退出
    ///
    /// 超过 `termination_delay` 仍有子进程未退出时返回错误，由调用方决定是否立即退出。
    pub async fn stop_all(&self) -> HashfleetResult<()> {
        let targets: Vec<(TaskId, u32)> = {
            let processes = self.processes.read().await;
            processes
                .iter()
                .map(|(id, r)| (id.clone(), r.pid))
                .collect()
        };

        if targets.is_empty() {
            return Ok(());
        }

        info!("通知 {} 个子进程退出", targets.len());
        for (task_id, pid) in &targets {
            if let Err(e) = send_sigterm(*pid) {
                warn!("通知任务 {} 退出失败: {}", task_id, e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.termination_delay;
        loop {
            let remaining = self.processes.read().await.len();
            if remaining == 0 {
                info!("所有子进程均已退出");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                let stuck = self.running_task_ids().await;
                return Err(HashfleetError::Process(format!(
                    "等待子进程退出超时，仍在运行: {}",
                    stuck.join(",")
                )));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn running_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.processes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self, task_id: &str) -> bool {
        self.processes.read().await.contains_key(task_id)
    }

    /// 信标中上报的进程信息，内存取自系统进程表
    pub async fn process_snapshot(&self) -> HashMap<TaskId, TaskProcess> {
        let records: Vec<(TaskId, ProcessRecord)> = {
            let processes = self.processes.read().await;
            processes
                .iter()
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect()
        };

        if records.is_empty() {
            return HashMap::new();
        }

        let pids: Vec<Pid> = records.iter().map(|(_, r)| Pid::from_u32(r.pid)).collect();
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);

        records
            .into_iter()
            .map(|(task_id, record)| {
                let memory_usage = system
                    .process(Pid::from_u32(record.pid))
                    .map(|p| p.memory())
                    .unwrap_or(0);
                (
                    task_id,
                    TaskProcess {
                        pid: record.pid,
                        memory_usage,
                        running_for_secs: record.started_at.elapsed().as_secs(),
                        using_devices: record.devices,
                    },
                )
            })
            .collect()
    }
}

fn send_sigterm(pid: u32) -> HashfleetResult<()> {
    let pid = i32::try_from(pid)
        .map_err(|_| HashfleetError::Process(format!("无效的进程号: {pid}")))?;
    // SAFETY: kill 只向指定进程发送信号
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(HashfleetError::Process(format!(
            "向进程 {} 发送SIGTERM失败: {}",
            pid,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// 有界的调试输出队列，满时丢弃新行，不阻塞子进程的输出
fn spawn_debug_drain(task_id: TaskId, capacity: usize) -> mpsc::Sender<String> {
    let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            debug!(task_id = %task_id, "{}", line);
        }
    });
    tx
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                // 队列满或已关闭时直接丢弃
                let _ = tx.try_send(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("读取子进程输出失败: {}", e);
                break;
            }
        }
    }
}

async fn wait_with_output(
    child: &mut Child,
    debug_tx: Option<mpsc::Sender<String>>,
) -> std::io::Result<ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = async {
        if let (Some(out), Some(tx)) = (stdout, debug_tx.clone()) {
            forward_lines(out, tx).await;
        }
    };
    let stderr_task = async {
        if let (Some(err), Some(tx)) = (stderr, debug_tx.clone()) {
            forward_lines(err, tx).await;
        }
    };

    let (_, _, status) = tokio::join!(stdout_task, stderr_task, child.wait());
    status
}
