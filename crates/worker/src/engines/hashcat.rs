use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hashfleet_core::config::HashcatConfig;
use hashfleet_core::models::{join_device_ids, CrackedPasswordRequest};
use hashfleet_core::{HashfleetError, HashfleetResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::{Engine, EngineContext, EngineOutcome, EngineStatus};

pub const ENGINE_NAME: &str = "hashcat";
pub const ENGINE_VERSION: &str = "6";

const STATUS_TIMER_SECS: u64 = 5;
const OUTFILE_POLL: Duration = Duration::from_millis(500);

/// 任务中 `engine_payload` 的 hashcat 部分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashcatPayload {
    /// `-m`
    pub hash_mode: u32,
    /// `-a`
    #[serde(default)]
    pub attack_mode: u32,
    /// 掩码攻击时放在最后的掩码
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Default)]
struct RunState {
    pid: Option<u32>,
    stop_requested: bool,
    status: EngineStatus,
}

#[derive(Default)]
struct OutfileCursor {
    offset: u64,
    partial: Vec<u8>,
}

/// 通过外部 hashcat 兼容程序执行任务
///
/// 会话、检查点与输出文件都放在 `session_path` 下，以任务编号命名。
/// 结果从 `--outfile` 增量读取，每行 `hash:plain`。
pub struct CommandEngine {
    config: HashcatConfig,
    ctx: EngineContext,
    payload: HashcatPayload,
    restore_path: PathBuf,
    outfile_path: PathBuf,
    state: Mutex<RunState>,
}

impl CommandEngine {
    pub fn new(config: HashcatConfig, ctx: EngineContext) -> HashfleetResult<Self> {
        let payload: HashcatPayload = serde_json::from_value(ctx.task.engine_payload.clone())
            .map_err(|e| HashfleetError::Validation(format!("hashcat任务参数无效: {e}")))?;
        let restore_path = config
            .session_path
            .join(format!("{}.restore", ctx.task.task_id));
        let outfile_path = config.session_path.join(format!("{}.out", ctx.task.task_id));

        Ok(Self {
            config,
            ctx,
            payload,
            restore_path,
            outfile_path,
            state: Mutex::new(RunState::default()),
        })
    }

    fn restoring(&self) -> bool {
        self.ctx.checkpoint.is_some()
    }

    /// 命令行参数；从检查点恢复时其余参数由检查点提供
    pub fn build_args(&self) -> Vec<String> {
        let session = self.ctx.task.task_id.clone();
        let restore = self.restore_path.to_string_lossy().into_owned();

        if self.restoring() {
            return vec![
                "--session".into(),
                session,
                "--restore".into(),
                format!("--restore-file-path={restore}"),
            ];
        }

        let mut args = vec![
            "--session".to_string(),
            session,
            format!("--restore-file-path={restore}"),
            format!("--outfile={}", self.outfile_path.to_string_lossy()),
            "--outfile-format=1,2".to_string(),
            format!("--potfile-path={}", self.config.potfile_path.to_string_lossy()),
            "--status".to_string(),
            "--status-json".to_string(),
            format!("--status-timer={STATUS_TIMER_SECS}"),
            format!("--opencl-devices={}", join_device_ids(&self.ctx.devices)),
        ];

        let mut types: Vec<u32> = Vec::new();
        for id in &self.ctx.devices {
            if let Some(t) = self.ctx.device_map.get(*id).and_then(|d| d.kind.opencl_type()) {
                if !types.contains(&t) {
                    types.push(t);
                }
            }
        }
        types.sort_unstable();
        if !types.is_empty() {
            let joined = types.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            args.push(format!("--opencl-device-types={joined}"));
        }

        args.push(format!("--hash-type={}", self.payload.hash_mode));
        args.push(format!("--attack-mode={}", self.payload.attack_mode));
        args.extend(self.config.extra_args.iter().cloned());
        args.extend(self.payload.extra_args.iter().cloned());
        args.push(self.ctx.task_file.to_string_lossy().into_owned());
        args.extend(
            self.ctx
                .engine_files
                .iter()
                .map(|p| p.to_string_lossy().into_owned()),
        );
        if let Some(mask) = &self.payload.mask {
            args.push(mask.clone());
        }
        args
    }

    async fn update_status(&self, line: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            debug!("hashcat: {}", line);
            return;
        };

        let recovered = value
            .get("recovered_hashes")
            .and_then(|v| v.as_array())
            .filter(|a| a.len() == 2)
            .and_then(|a| Some((a[0].as_u64()?, a[1].as_u64()?)));

        let mut state = self.state.lock().await;
        if let Some((done, total)) = recovered {
            state.status.recovered = done;
            state.status.total = total;
        }
        state.status.payload = value;
    }

    /// 读取输出文件中新增的完整行并上报
    async fn drain_outfile(&self, cursor: &mut OutfileCursor) -> HashfleetResult<()> {
        let mut file = match tokio::fs::File::open(&self.outfile_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        file.seek(std::io::SeekFrom::Start(cursor.offset)).await?;
        let mut buf = Vec::new();
        let read = file.read_to_end(&mut buf).await?;
        cursor.offset += read as u64;
        cursor.partial.extend_from_slice(&buf);

        while let Some(newline) = cursor.partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = cursor.partial.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(cracked) = parse_outfile_line(&self.ctx.task.task_id, line) {
                if self.ctx.cracked_tx.send(cracked).is_err() {
                    warn!("破解结果通道已关闭，丢弃结果");
                }
            }
        }
        Ok(())
    }

    fn outcome_for(code: Option<i32>) -> EngineOutcome {
        match code {
            Some(0) => EngineOutcome::AllCracked,
            Some(1) => EngineOutcome::Exhausted,
            Some(2..=4) | None => EngineOutcome::Aborted,
            Some(c) => EngineOutcome::Failed(format!("hashcat 异常退出，退出码 {c}")),
        }
    }
}

/// 解析 `hash:plain`，哈希本身不含冒号
fn parse_outfile_line(task_id: &str, line: &str) -> Option<CrackedPasswordRequest> {
    let (hash, value) = line.split_once(':')?;
    if hash.is_empty() {
        return None;
    }
    Some(CrackedPasswordRequest {
        task_id: task_id.to_string(),
        hash: hash.to_string(),
        value: value.to_string(),
        cracked_at: Utc::now(),
    })
}

async fn count_lines(path: &Path) -> HashfleetResult<u64> {
    let content = tokio::fs::read(path).await?;
    Ok(content
        .split(|b| *b == b'\n')
        .filter(|l| !l.iter().all(u8::is_ascii_whitespace))
        .count() as u64)
}

#[async_trait]
impl Engine for CommandEngine {
    async fn initialize(&self) -> HashfleetResult<()> {
        tokio::fs::create_dir_all(&self.config.session_path).await?;
        if let Some(checkpoint) = &self.ctx.checkpoint {
            tokio::fs::write(&self.restore_path, checkpoint).await?;
            info!(
                "任务 {} 从检查点恢复: {}",
                self.ctx.task.task_id,
                self.restore_path.display()
            );
        }

        let total = count_lines(&self.ctx.task_file).await?;
        let mut state = self.state.lock().await;
        state.status.total = total;
        state.status.payload = serde_json::json!({ "status": "initialized" });
        Ok(())
    }

    async fn start(&self) -> HashfleetResult<EngineOutcome> {
        let working_dir = self
            .config
            .shared_path
            .clone()
            .unwrap_or_else(|| self.config.session_path.clone());

        let mut child = Command::new(&self.config.binary)
            .args(self.build_args())
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                HashfleetError::Engine(format!(
                    "启动 {} 失败: {e}",
                    self.config.binary.display()
                ))
            })?;

        {
            let mut state = self.state.lock().await;
            state.pid = child.id();
            if state.stop_requested {
                // 启动前已收到停止请求
                if let Some(pid) = state.pid {
                    send_signal(pid, libc::SIGINT);
                }
            }
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    self.update_status(&line).await;
                }
            }
        };
        let stderr_task = async {
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("hashcat: {}", line);
                }
            }
        };

        let mut cursor = OutfileCursor::default();
        let watch_task = async {
            let wait = child.wait();
            tokio::pin!(wait);
            let mut ticker = interval(OUTFILE_POLL);
            loop {
                tokio::select! {
                    status = &mut wait => break status,
                    _ = ticker.tick() => {
                        if let Err(e) = self.drain_outfile(&mut cursor).await {
                            warn!("读取输出文件失败: {}", e);
                        }
                    }
                }
            }
        };

        let (_, _, exit) = tokio::join!(stdout_task, stderr_task, watch_task);
        self.drain_outfile(&mut cursor).await?;

        let exit = exit.map_err(|e| HashfleetError::Engine(format!("等待hashcat结束失败: {e}")))?;
        self.state.lock().await.pid = None;

        let outcome = Self::outcome_for(exit.code());
        info!(
            "任务 {} 的 hashcat 结束: code={:?}, outcome={:?}",
            self.ctx.task.task_id,
            exit.code(),
            outcome
        );
        Ok(outcome)
    }

    async fn stop(&self) -> HashfleetResult<()> {
        let mut state = self.state.lock().await;
        state.stop_requested = true;
        if let Some(pid) = state.pid {
            info!("中断任务 {} 的 hashcat (pid={})", self.ctx.task.task_id, pid);
            send_signal(pid, libc::SIGINT);
        }
        Ok(())
    }

    async fn status(&self) -> EngineStatus {
        self.state.lock().await.status.clone()
    }

    async fn cleanup(&self) -> HashfleetResult<()> {
        match tokio::fs::remove_file(&self.outfile_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn checkpoint_file(&self) -> Option<PathBuf> {
        self.restore_path.exists().then(|| self.restore_path.clone())
    }
}

fn send_signal(pid: u32, signal: libc::c_int) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill 只向指定进程发送信号
    if unsafe { libc::kill(pid, signal) } != 0 {
        warn!(
            "向进程 {} 发送信号 {} 失败: {}",
            pid,
            signal,
            std::io::Error::last_os_error()
        );
    }
}
