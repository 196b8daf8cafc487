mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::FakeServer;
use hashfleet_core::config::GpuPriorityLimits;
use hashfleet_core::models::{
    BeaconResponse, Device, DeviceKind, PayloadItem, Priority, StatusCommand, TaskAssignment,
    TaskStatus,
};
use hashfleet_core::VERSION;
use hashfleet_worker::{BeaconManager, ChildCommand, DeviceAllocator, ProcessSupervisor};
use tokio::sync::broadcast;

fn supervisor(script: &str, devices: Vec<Device>) -> Arc<ProcessSupervisor> {
    let allocator = Arc::new(DeviceAllocator::new(
        devices.into_iter().collect(),
        GpuPriorityLimits::default(),
        false,
    ));
    Arc::new(ProcessSupervisor::new(
        allocator,
        ChildCommand {
            program: PathBuf::from("/bin/sh"),
            base_args: vec!["-c".into(), script.into(), "hashfleet-child".into()],
            extra_args: Vec::new(),
        },
        false,
        100,
        Duration::from_secs(5),
    ))
}

fn gpu(id: u32) -> Device {
    Device {
        id,
        name: format!("gpu{id}"),
        kind: DeviceKind::Gpu,
        is_busy: false,
    }
}

fn manager(server: &Arc<FakeServer>, supervisor: &Arc<ProcessSupervisor>) -> BeaconManager {
    let engines = HashMap::from([("hashcat".to_string(), "6".to_string())]);
    BeaconManager::new(
        "cracker-01".into(),
        server.clone(),
        Arc::clone(supervisor),
        Duration::from_millis(50),
        engines,
    )
}

fn cpu(id: u32) -> Device {
    Device {
        id,
        name: format!("cpu{id}"),
        kind: DeviceKind::Cpu,
        is_busy: false,
    }
}

fn new_task(task_id: &str, devices: Option<Vec<u32>>) -> PayloadItem {
    PayloadItem::NewTask(TaskAssignment {
        task_id: task_id.into(),
        priority: Priority::Normal,
        devices,
    })
}

async fn wait_until_idle(supervisor: &ProcessSupervisor) {
    for _ in 0..100 {
        if supervisor.running_task_ids().await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("child processes did not exit");
}

#[tokio::test]
async fn test_beacon_reports_host_state() {
    let server = FakeServer::new();
    let supervisor = supervisor("exit 0", vec![gpu(1), gpu(2)]);
    let manager = manager(&server, &supervisor);

    assert_eq!(manager.beacon_once().await.unwrap(), 0);

    let beacon = server.beacons.lock().unwrap()[0].clone();
    assert_eq!(beacon.hostname, "cracker-01");
    assert_eq!(beacon.worker_version, VERSION);
    assert!(beacon.request_new_task);
    assert_eq!(beacon.devices.len(), 2);
    assert!(beacon.processes.is_empty());
    assert_eq!(beacon.engines.get("hashcat").map(String::as_str), Some("6"));
}

#[tokio::test]
async fn test_payload_items_processed_in_order_and_unknown_ignored() {
    let server = FakeServer::new();
    let supervisor = supervisor("sleep 30", vec![gpu(1), gpu(2), gpu(3)]);
    let manager = manager(&server, &supervisor);

    server.queue_beacon_response(BeaconResponse {
        server_time: Utc::now(),
        payload: vec![
            new_task("t1", Some(vec![1])),
            PayloadItem::Unknown,
            new_task("t2", Some(vec![2])),
        ],
    });
    assert_eq!(manager.beacon_once().await.unwrap(), 2);
    assert_eq!(supervisor.running_task_ids().await, vec!["t1", "t2"]);

    // 再次信标时上报正在运行的进程与剩余的空闲设备
    manager.beacon_once().await.unwrap();
    let beacon = server.beacons.lock().unwrap()[1].clone();
    assert!(beacon.request_new_task);
    assert_eq!(beacon.devices.busy_devices(), vec![1, 2]);
    assert_eq!(beacon.processes["t2"].using_devices, vec![2]);

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_idle_cpu_without_auto_assignment_does_not_request_work() {
    let server = FakeServer::new();
    let supervisor = supervisor("sleep 30", vec![cpu(1), gpu(2)]);
    let manager = manager(&server, &supervisor);

    assert!(manager.build_beacon().await.request_new_task);

    server.queue_beacon_response(BeaconResponse {
        server_time: Utc::now(),
        payload: vec![new_task("t1", None)],
    });
    manager.beacon_once().await.unwrap();
    assert_eq!(supervisor.running_task_ids().await, vec!["t1"]);

    // GPU 已被占用，只剩无法自动分配的 CPU
    manager.beacon_once().await.unwrap();
    let beacon = server.beacons.lock().unwrap()[1].clone();
    assert!(!beacon.request_new_task);
    assert_eq!(beacon.devices.busy_devices(), vec![2]);
    assert!(server.status_changes.lock().unwrap().is_empty());

    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn test_stop_command_terminates_child() {
    let server = FakeServer::new();
    let supervisor = supervisor("sleep 30", vec![gpu(1)]);
    let manager = manager(&server, &supervisor);

    server.queue_beacon_response(BeaconResponse {
        server_time: Utc::now(),
        payload: vec![new_task("t1", None)],
    });
    manager.beacon_once().await.unwrap();
    assert!(supervisor.is_running("t1").await);

    server.queue_beacon_response(BeaconResponse {
        server_time: Utc::now(),
        payload: vec![PayloadItem::ChangeTaskStatus(StatusCommand {
            task_id: "t1".into(),
            new_status: TaskStatus::Stopping,
        })],
    });
    manager.beacon_once().await.unwrap();

    wait_until_idle(&supervisor).await;
    assert!(supervisor.allocator().has_free_devices().await);
}

#[tokio::test]
async fn test_allocation_failure_reports_error() {
    let server = FakeServer::new();
    let supervisor = supervisor("exit 0", Vec::new());
    let manager = manager(&server, &supervisor);

    server.queue_beacon_response(BeaconResponse {
        server_time: Utc::now(),
        payload: vec![new_task("t1", None)],
    });
    manager.beacon_once().await.unwrap();

    let report = server.last_status_change().unwrap();
    assert_eq!(report.task_id, "t1");
    assert_eq!(report.new_status, TaskStatus::Error);
    assert!(report.error.unwrap().contains("cracker-01"));
    assert!(!supervisor.is_running("t1").await);
}

#[tokio::test]
async fn test_beacon_loop_survives_failures_and_stops_on_shutdown() {
    let server = FakeServer::new();
    *server.fail_beacons.lock().unwrap() = true;
    let supervisor = supervisor("exit 0", vec![gpu(1)]);
    let manager = Arc::new(manager(&server, &supervisor));

    let (tx, rx) = broadcast::channel(1);
    let handle = manager.start(rx);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.beacons.lock().unwrap().len() >= 3);

    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
