//! 服务端 Worker 管理
//!
//! 两项职责：
//! - 主机登记表：hostname → 最近一次信标及签到时间，供调度器与只读状态接口读取
//! - 按主题的发布/订阅总线，把任务状态、破解结果等事件扇出给其他服务端组件
//!
//! 每个订阅拥有独立的无界队列和投递任务，因此发布不会等待订阅者，
//! 同一订阅者按发布顺序收到同一主题的事件；订阅者返回错误或 panic 只影响自身。

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use hashfleet_core::models::{
    BeaconRequest, ConnectedHost, CrackedPasswordRequest, TaskId, TaskStatus, TaskStatusRequest,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 事件主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    EngineStatus,
    TaskStatus,
    CrackedPassword,
    FinalStatus,
    Log,
}

/// 任务状态变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusChange {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub error: Option<String>,
}

/// 任务日志行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub task_id: TaskId,
    pub hostname: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    EngineStatus(TaskStatusRequest),
    TaskStatus(TaskStatusChange),
    CrackedPassword(CrackedPasswordRequest),
    FinalStatus(TaskStatusRequest),
    Log(LogLine),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::EngineStatus(_) => Topic::EngineStatus,
            Event::TaskStatus(_) => Topic::TaskStatus,
            Event::CrackedPassword(_) => Topic::CrackedPassword,
            Event::FinalStatus(_) => Topic::FinalStatus,
            Event::Log(_) => Topic::Log,
        }
    }
}

/// 事件订阅者
#[async_trait]
pub trait EventSubscriber: Send + Sync + 'static {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// 把异步闭包包装为订阅者
pub struct FnSubscriber<F>(pub F);

#[async_trait]
impl<F, Fut> EventSubscriber for FnSubscriber<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: Topic,
    id: Uuid,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[derive(Clone)]
struct Subscription {
    id: Uuid,
    tx: mpsc::UnboundedSender<Event>,
}

/// Worker 管理器
#[derive(Default)]
pub struct WorkerManager {
    hosts: RwLock<HashMap<String, ConnectedHost>>,
    subscribers: RwLock<HashMap<Topic, Vec<Subscription>>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次信标，返回当前登记的主机数
    pub async fn record_beacon(&self, beacon: &BeaconRequest) -> usize {
        let mut hosts = self.hosts.write().await;
        hosts.insert(
            beacon.hostname.clone(),
            ConnectedHost {
                hostname: beacon.hostname.clone(),
                last_checkin: Utc::now(),
                beacon: beacon.clone(),
            },
        );
        hosts.len()
    }

    pub async fn get_host(&self, hostname: &str) -> Option<ConnectedHost> {
        self.hosts.read().await.get(hostname).cloned()
    }

    /// 所有登记过的主机，按主机名排序
    pub async fn connected_hosts(&self) -> Vec<ConnectedHost> {
        let hosts = self.hosts.read().await;
        let mut list: Vec<ConnectedHost> = hosts.values().cloned().collect();
        list.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        list
    }

    /// 订阅一个主题
    ///
    /// 必须在 tokio 运行时中调用，每个订阅会启动一个投递任务。
    pub async fn subscribe<S: EventSubscriber>(
        &self,
        topic: Topic,
        subscriber: S,
    ) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let subscriber = Arc::new(subscriber);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let outcome = AssertUnwindSafe(subscriber.handle(event))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("订阅者 {} 处理 {:?} 事件失败: {}", id, topic, e),
                    Err(_) => error!("订阅者 {} 处理 {:?} 事件时发生panic", id, topic),
                }
            }
            debug!("订阅 {} 的投递任务结束", id);
        });

        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(topic)
            .or_default()
            .push(Subscription { id, tx });

        SubscriptionHandle { topic, id }
    }

    /// 取消订阅，句柄不存在时返回 false
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let Some(list) = subscribers.get_mut(&handle.topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != handle.id);
        before != list.len()
    }

    /// 把事件投递给该主题的所有订阅者，不等待处理结果
    pub async fn publish(&self, event: Event) {
        let topic = event.topic();
        let snapshot: Vec<Subscription> = {
            let subscribers = self.subscribers.read().await;
            subscribers.get(&topic).cloned().unwrap_or_default()
        };

        for subscription in snapshot {
            if subscription.tx.send(event.clone()).is_err() {
                debug!("订阅 {} 的投递任务已结束，丢弃事件", subscription.id);
            }
        }
    }

    pub async fn broadcast_engine_status(&self, status: TaskStatusRequest) {
        self.publish(Event::EngineStatus(status)).await;
    }

    pub async fn broadcast_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<String>,
    ) {
        self.publish(Event::TaskStatus(TaskStatusChange {
            task_id,
            status,
            error,
        }))
        .await;
    }

    pub async fn broadcast_cracked_password(&self, cracked: CrackedPasswordRequest) {
        self.publish(Event::CrackedPassword(cracked)).await;
    }

    pub async fn broadcast_final_status(&self, status: TaskStatusRequest) {
        self.publish(Event::FinalStatus(status)).await;
    }

    pub async fn broadcast_log(&self, task_id: TaskId, hostname: String, line: String) {
        self.publish(Event::Log(LogLine {
            task_id,
            hostname,
            line,
        }))
        .await;
    }
}
