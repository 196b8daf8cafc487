use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::StreamExt;
use hashfleet_core::models::{FileKind, GetFileRequest};
use hashfleet_core::{HashfleetError, HashfleetResult};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::components::ServerApi;

const LOCK_SUFFIX: &str = "lck";
const LOCK_ATTEMPTS: u32 = 60;
const LOCK_BASE_DELAY: Duration = Duration::from_millis(100);
const LOCK_MAX_DELAY: Duration = Duration::from_secs(2);
/// 超过该时长的锁文件视为崩溃进程遗留
const STALE_LOCK_AGE: Duration = Duration::from_secs(600);

/// 基于 `create_new` 的文件锁，释放时删除锁文件
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn lock_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".");
        name.push(LOCK_SUFFIX);
        PathBuf::from(name)
    }

    pub fn try_acquire(target: &Path) -> HashfleetResult<Option<Self>> {
        let path = Self::lock_path(target);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Some(Self { path })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(&path) {
                    warn!("删除过期的锁文件: {}", path.display());
                    let _ = std::fs::remove_file(&path);
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 锁被占用时按指数退避加随机抖动重试
    pub async fn acquire(target: &Path) -> HashfleetResult<Self> {
        let mut delay = LOCK_BASE_DELAY;
        for attempt in 1..=LOCK_ATTEMPTS {
            if let Some(lock) = Self::try_acquire(target)? {
                return Ok(lock);
            }
            let jitter = Duration::from_millis(rand::rng().random_range(0..50));
            debug!(
                "文件 {} 正被占用，第 {} 次重试",
                target.display(),
                attempt
            );
            tokio::time::sleep(delay + jitter).await;
            delay = (delay * 2).min(LOCK_MAX_DELAY);
        }
        Err(HashfleetError::Storage(format!(
            "获取文件锁超时: {}",
            target.display()
        )))
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("删除锁文件 {} 失败: {}", self.path.display(), e);
        }
    }
}

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// 分块计算文件的 SHA-256，不把整个文件读入内存
pub async fn sha256_file(path: &Path) -> HashfleetResult<String> {
    let mut reader = BufReader::new(tokio::fs::File::open(path).await?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 任务输入文件的本地缓存
///
/// 文件按编号保存在目标目录下。本地内容的 SHA-256 与服务端一致时不再下载。
pub struct FileCache {
    api: Arc<dyn ServerApi>,
}

impl FileCache {
    pub fn new(api: Arc<dyn ServerApi>) -> Self {
        Self { api }
    }

    pub async fn fetch(&self, file_id: &str, kind: FileKind, dir: &Path) -> HashfleetResult<PathBuf> {
        if file_id.is_empty() || file_id.contains(['/', '\\']) || file_id.starts_with('.') {
            return Err(HashfleetError::Validation(format!("无效的文件编号: {file_id:?}")));
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(file_id);
        let _lock = FileLock::acquire(&path).await?;

        let remote = self
            .api
            .get_file(&GetFileRequest {
                file_id: file_id.to_string(),
                kind,
            })
            .await?;

        if tokio::fs::try_exists(&path).await? {
            let local = sha256_file(&path).await?;
            if local.eq_ignore_ascii_case(&remote.hash) {
                debug!("文件 {} 已是最新，跳过下载", file_id);
                return Ok(path);
            }
            info!("文件 {} 内容已变化，重新下载", file_id);
        }

        let mut partial = path.as_os_str().to_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut hasher = Sha256::new();
        let mut stream = remote.stream;
        let mut out = tokio::fs::File::create(&partial).await?;
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            out.write_all(&chunk).await?;
            written += chunk.len();
        }
        out.flush().await?;
        drop(out);

        let digest = hex::encode(hasher.finalize());
        if !digest.eq_ignore_ascii_case(&remote.hash) {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(HashfleetError::Network(format!(
                "文件 {} 校验失败: 期望 {}，实际 {}",
                file_id, remote.hash, digest
            )));
        }

        tokio::fs::rename(&partial, &path).await?;
        info!("下载文件 {} 完成，{} 字节", file_id, written);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("wordlist.txt");

        let lock = FileLock::try_acquire(&target).unwrap().unwrap();
        assert!(FileLock::lock_path(&target).ends_with("wordlist.txt.lck"));
        assert!(FileLock::try_acquire(&target).unwrap().is_none());

        drop(lock);
        assert!(!FileLock::lock_path(&target).exists());
        assert!(FileLock::try_acquire(&target).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_holder() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("hashes");
        let held = FileLock::try_acquire(&target).unwrap().unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            drop(held);
        });

        let lock = tokio::time::timeout(Duration::from_secs(5), FileLock::acquire(&target))
            .await
            .unwrap()
            .unwrap();
        releaser.await.unwrap();
        drop(lock);
    }

    #[tokio::test]
    async fn test_sha256_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_sha256_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wordlist");
        let content: Vec<u8> = (0..HASH_CHUNK_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            hex::encode(Sha256::digest(&content))
        );
    }
}
