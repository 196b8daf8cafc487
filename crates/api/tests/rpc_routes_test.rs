use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use hashfleet_api::{create_app, AppState};
use hashfleet_core::models::{
    BeaconRequest, BeaconResponse, ConnectedHost, Device, DeviceKind, FileKind, PayloadItem,
    Priority, RpcErrorBody, Task, TaskPayload, TaskStatus, FILE_HASH_HEADER,
};
use hashfleet_core::traits::StorageBackend;
use hashfleet_dispatcher::{Event, FnSubscriber, Topic};
use hashfleet_infrastructure::InMemoryStorage;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tower::ServiceExt;

struct TestApp {
    storage: InMemoryStorage,
    state: AppState,
    app: Router,
}

fn test_app() -> TestApp {
    let storage = InMemoryStorage::new();
    let state = AppState::new(Arc::new(storage.clone()));
    let app = create_app(state.clone());
    TestApp {
        storage,
        state,
        app,
    }
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn beacon_body(hostname: &str, request_new_task: bool) -> Value {
    let beacon = BeaconRequest {
        worker_version: "1.0.0".into(),
        hostname: hostname.into(),
        request_new_task,
        devices: [Device {
            id: 1,
            name: "gpu0".into(),
            kind: DeviceKind::Gpu,
            is_busy: false,
        }]
        .into_iter()
        .collect(),
        ..BeaconRequest::default()
    };
    serde_json::to_value(beacon).unwrap()
}

async fn running_task(storage: &InMemoryStorage, id: &str) {
    storage.put_task(Task::new(id, "wordlist", Priority::Normal)).await;
    storage.dequeue_task(id, "cracker-01").await.unwrap();
    storage
        .change_task_status(id, TaskStatus::Running, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_beacon_assigns_queued_task_once() {
    let t = test_app();
    t.storage
        .put_task(Task::new("t1", "wordlist", Priority::High))
        .await;

    let response = t
        .app
        .clone()
        .oneshot(post_json("/rpc/v1/beacon", beacon_body("cracker-01", true)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: BeaconResponse = read_json(response).await;
    assert_eq!(body.payload.len(), 1);
    assert!(matches!(&body.payload[0], PayloadItem::NewTask(a) if a.task_id == "t1"));
    assert_eq!(
        t.storage.get_task("t1").await.unwrap().status,
        TaskStatus::Dequeued
    );

    // 第二台主机拿不到同一个任务
    let response = t
        .app
        .clone()
        .oneshot(post_json("/rpc/v1/beacon", beacon_body("cracker-02", true)))
        .await
        .unwrap();
    let body: BeaconResponse = read_json(response).await;
    assert!(body.payload.is_empty());
}

#[tokio::test]
async fn test_beacon_without_request_flag_gets_no_task() {
    let t = test_app();
    t.storage
        .put_task(Task::new("t1", "wordlist", Priority::High))
        .await;

    let response = t
        .app
        .oneshot(post_json("/rpc/v1/beacon", beacon_body("cracker-01", false)))
        .await
        .unwrap();
    let body: BeaconResponse = read_json(response).await;
    assert!(body.payload.is_empty());
    assert_eq!(
        t.storage.get_task("t1").await.unwrap().status,
        TaskStatus::Queued
    );
}

#[tokio::test]
async fn test_beacon_registers_host() {
    let t = test_app();
    t.app
        .clone()
        .oneshot(post_json("/rpc/v1/beacon", beacon_body("cracker-01", false)))
        .await
        .unwrap();

    let response = t.app.oneshot(get("/rpc/v1/workers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let hosts: Vec<ConnectedHost> = read_json(response).await;
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].hostname, "cracker-01");
    assert_eq!(hosts[0].beacon.devices.len(), 1);
}

#[tokio::test]
async fn test_malformed_beacon_returns_error_body() {
    let t = test_app();
    let response = t
        .app
        .oneshot(post_json("/rpc/v1/beacon", json!({"hostname": 42})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: RpcErrorBody = read_json(response).await;
    assert_eq!(body.status_code, 400);
    assert!(!body.message.is_empty());
}

#[tokio::test]
async fn test_status_change_persists_and_publishes() {
    let t = test_app();
    running_task(&t.storage, "t1").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    t.state
        .worker_manager
        .subscribe(
            Topic::TaskStatus,
            FnSubscriber(move |event: Event| {
                let tx = tx.clone();
                async move {
                    tx.send(event).ok();
                    anyhow::Ok(())
                }
            }),
        )
        .await;

    let response = t
        .app
        .oneshot(post_json(
            "/rpc/v1/task/status_change",
            json!({"task_id": "t1", "new_status": "Error", "error": "GPU温度过高"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .is_empty());

    let task = t.storage.get_task("t1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.error.as_deref(), Some("GPU温度过高"));

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, Event::TaskStatus(c) if c.status == TaskStatus::Error));
}

#[tokio::test]
async fn test_illegal_status_change_is_rejected() {
    let t = test_app();
    t.storage
        .put_task(Task::new("t1", "wordlist", Priority::Normal))
        .await;

    let response = t
        .app
        .oneshot(post_json(
            "/rpc/v1/task/status_change",
            json!({"task_id": "t1", "new_status": "Finished", "error": null}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: RpcErrorBody = read_json(response).await;
    assert_eq!(body.status_code, 400);
    assert_eq!(
        t.storage.get_task("t1").await.unwrap().status,
        TaskStatus::Queued
    );
}

#[tokio::test]
async fn test_unknown_task_payload_is_not_found() {
    let t = test_app();
    let response = t
        .app
        .oneshot(post_json("/rpc/v1/task/payload", json!({"task_id": "ghost"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: RpcErrorBody = read_json(response).await;
    assert_eq!(body.status_code, 404);
    assert!(body.message.contains("ghost"));
}

#[tokio::test]
async fn test_task_payload_is_returned() {
    let t = test_app();
    let mut task = Task::new("t1", "office dump", Priority::Low);
    task.file_id = "hashes".into();
    task.engine_file_ids = vec!["rockyou".into()];
    task.engine_payload = json!({"hash_mode": 1000, "attack_mode": 0});
    task.task_duration = 3600;
    t.storage.put_task(task).await;

    let response = t
        .app
        .oneshot(post_json("/rpc/v1/task/payload", json!({"task_id": "t1"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let payload: TaskPayload = read_json(response).await;
    assert_eq!(payload.task_name, "office dump");
    assert_eq!(payload.engine, "hashcat");
    assert_eq!(payload.engine_file_ids, vec!["rockyou"]);
    assert_eq!(payload.task_duration, 3600);
}

#[tokio::test]
async fn test_cracked_password_is_stored_once() {
    let t = test_app();
    running_task(&t.storage, "t1").await;

    let body = json!({
        "task_id": "t1",
        "hash": "5f4dcc3b5aa765d61d8327deb882cf99",
        "value": "password",
        "cracked_at": Utc::now(),
    });
    for _ in 0..2 {
        let response = t
            .app
            .clone()
            .oneshot(post_json("/rpc/v1/task/cracked", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let cracked = t.storage.cracked_hashes("t1").await;
    assert_eq!(cracked.len(), 1);
    assert_eq!(cracked[0].value, "password");
}

#[tokio::test]
async fn test_final_task_status_publishes_final_event() {
    let t = test_app();
    let (tx, mut rx) = mpsc::unbounded_channel();
    for topic in [Topic::EngineStatus, Topic::FinalStatus] {
        let tx = tx.clone();
        t.state
            .worker_manager
            .subscribe(
                topic,
                FnSubscriber(move |event: Event| {
                    let tx = tx.clone();
                    async move {
                        tx.send(event.topic()).ok();
                        anyhow::Ok(())
                    }
                }),
            )
            .await;
    }

    let response = t
        .app
        .oneshot(post_json(
            "/rpc/v1/task/status",
            json!({"task_id": "t1", "engine": "hashcat", "payload": {"progress": [10, 10]}, "final": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut topics = Vec::new();
    for _ in 0..2 {
        let topic = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        topics.push(topic);
    }
    assert!(topics.contains(&Topic::EngineStatus));
    assert!(topics.contains(&Topic::FinalStatus));
}

#[tokio::test]
async fn test_checkpoint_absent_then_round_trip() {
    let t = test_app();
    running_task(&t.storage, "t1").await;

    let response = t
        .app
        .clone()
        .oneshot(get("/rpc/v1/task/checkpoint/t1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let blob: Vec<u8> = (0..=255u8).cycle().take(600).collect();
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rpc/v1/task/checkpoint/t1")
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(blob.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t
        .app
        .oneshot(get("/rpc/v1/task/checkpoint/t1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.to_vec(), blob);
}

#[tokio::test]
async fn test_checkpoint_for_unknown_task_is_not_found() {
    let t = test_app();
    let response = t
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rpc/v1/task/checkpoint/ghost")
                .body(Body::from(vec![1, 2, 3]))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_is_served_with_content_hash() {
    let t = test_app();
    let content = b"password\n123456\nletmein\n".to_vec();
    t.storage
        .put_file("rockyou", FileKind::Engine, content.clone())
        .await;

    let response = t
        .app
        .clone()
        .oneshot(post_json(
            "/rpc/v1/file",
            json!({"file_id": "rockyou", "kind": "engine"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let hash = response
        .headers()
        .get(FILE_HASH_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(hash, hex::encode(Sha256::digest(&content)));
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.to_vec(), content);

    // 同名但类型不同的文件不存在
    let response = t
        .app
        .oneshot(post_json(
            "/rpc/v1/file",
            json!({"file_id": "rockyou", "kind": "task"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_responses_are_gzip_compressed_when_requested() {
    let t = test_app();
    t.storage
        .put_file("big", FileKind::Task, vec![b'a'; 64 * 1024])
        .await;

    let mut request = post_json("/rpc/v1/file", json!({"file_id": "big", "kind": "task"}));
    request
        .headers_mut()
        .insert(header::ACCEPT_ENCODING, "gzip".parse().unwrap());

    let response = t.app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
}
