#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use hashfleet_core::models::{
    BeaconRequest, BeaconResponse, ChangeTaskStatusRequest, CrackedPasswordRequest,
    GetFileRequest, TaskPayload, TaskStatus, TaskStatusRequest,
};
use hashfleet_core::{HashfleetError, HashfleetResult};
use hashfleet_worker::components::{RemoteFile, ServerApi};
use sha2::{Digest, Sha256};

/// 内存中的服务端，记录 Worker 发出的所有调用
#[derive(Default)]
pub struct FakeServer {
    pub tasks: Mutex<HashMap<String, TaskPayload>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub checkpoints: Mutex<HashMap<String, Vec<u8>>>,
    pub beacon_responses: Mutex<VecDeque<BeaconResponse>>,
    pub fail_beacons: Mutex<bool>,

    pub beacons: Mutex<Vec<BeaconRequest>>,
    pub status_changes: Mutex<Vec<ChangeTaskStatusRequest>>,
    pub engine_statuses: Mutex<Vec<TaskStatusRequest>>,
    pub cracked: Mutex<Vec<CrackedPasswordRequest>>,
    pub saved_checkpoints: Mutex<Vec<(String, Vec<u8>)>>,
    /// 实际传输的文件内容次数
    pub file_transfers: Arc<AtomicUsize>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_task(&self, payload: TaskPayload) {
        self.tasks
            .lock()
            .unwrap()
            .insert(payload.task_id.clone(), payload);
    }

    pub fn add_file(&self, file_id: &str, content: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(file_id.to_string(), content.to_vec());
    }

    pub fn queue_beacon_response(&self, response: BeaconResponse) {
        self.beacon_responses.lock().unwrap().push_back(response);
    }

    pub fn reported_statuses(&self) -> Vec<TaskStatus> {
        self.status_changes
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.new_status)
            .collect()
    }

    pub fn last_status_change(&self) -> Option<ChangeTaskStatusRequest> {
        self.status_changes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ServerApi for FakeServer {
    async fn beacon(&self, request: &BeaconRequest) -> HashfleetResult<BeaconResponse> {
        self.beacons.lock().unwrap().push(request.clone());
        if *self.fail_beacons.lock().unwrap() {
            return Err(HashfleetError::Network("connection refused".into()));
        }
        let next = self.beacon_responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| BeaconResponse {
            server_time: Utc::now(),
            payload: Vec::new(),
        }))
    }

    async fn change_task_status(&self, request: &ChangeTaskStatusRequest) -> HashfleetResult<()> {
        self.status_changes.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> HashfleetResult<TaskPayload> {
        self.tasks
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or_else(|| HashfleetError::TaskNotFound { id: task_id.into() })
    }

    async fn get_file(&self, request: &GetFileRequest) -> HashfleetResult<RemoteFile> {
        let content = self
            .files
            .lock()
            .unwrap()
            .get(&request.file_id)
            .cloned()
            .ok_or_else(|| HashfleetError::FileNotFound {
                id: request.file_id.clone(),
            })?;
        let hash = hex::encode(Sha256::digest(&content));
        let transfers = Arc::clone(&self.file_transfers);
        let stream = stream::once(async move {
            transfers.fetch_add(1, Ordering::SeqCst);
            Ok(content)
        })
        .boxed();
        Ok(RemoteFile { hash, stream })
    }

    async fn saved_cracked_password(
        &self,
        request: &CrackedPasswordRequest,
    ) -> HashfleetResult<()> {
        self.cracked.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn send_task_status(&self, request: &TaskStatusRequest) -> HashfleetResult<()> {
        self.engine_statuses.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn save_checkpoint(&self, task_id: &str, data: Vec<u8>) -> HashfleetResult<()> {
        self.saved_checkpoints
            .lock()
            .unwrap()
            .push((task_id.to_string(), data));
        Ok(())
    }

    async fn get_checkpoint(&self, task_id: &str) -> HashfleetResult<Option<Vec<u8>>> {
        Ok(self.checkpoints.lock().unwrap().get(task_id).cloned())
    }
}
