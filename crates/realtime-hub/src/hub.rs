//! Hub 事件循环
//!
//! 注册、注销、广播和停止分别走独立的通道，由同一个任务按优先级处理。
//! 循环是注册表唯一的修改者，投递时只做非阻塞发送，不会等待任何客户端。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tasktrack_shared::config::{HubConfig, SlowConsumerPolicy};
use tasktrack_shared::observability::metrics;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Client, ConnectionId};
use crate::error::HubError;
use crate::event::BroadcastEvent;

/// 推送 Hub 事件循环
pub struct Hub {
    register_rx: mpsc::UnboundedReceiver<Client>,
    unregister_rx: mpsc::UnboundedReceiver<(String, ConnectionId)>,
    broadcast_rx: mpsc::Receiver<BroadcastEvent>,
    shutdown_rx: mpsc::Receiver<oneshot::Sender<()>>,
    clients: HashMap<String, Client>,
    slow_consumer_policy: SlowConsumerPolicy,
    online: Arc<AtomicUsize>,
}

/// Hub 句柄，可克隆并注入到各处使用
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::UnboundedSender<Client>,
    unregister_tx: mpsc::UnboundedSender<(String, ConnectionId)>,
    broadcast_tx: mpsc::Sender<BroadcastEvent>,
    shutdown_tx: mpsc::Sender<oneshot::Sender<()>>,
    online: Arc<AtomicUsize>,
    mailbox_dropped: Arc<AtomicU64>,
    client_buffer: usize,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let online = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown_rx,
            clients: HashMap::new(),
            slow_consumer_policy: config.slow_consumer_policy,
            online: online.clone(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            shutdown_tx,
            online,
            mailbox_dropped: Arc::new(AtomicU64::new(0)),
            client_buffer: config.client_buffer.max(1),
        };
        (hub, handle)
    }

    /// 创建并在后台运行 Hub
    pub fn spawn(config: &HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// 运行事件循环，直到收到停止消息或所有句柄都被丢弃
    pub async fn run(mut self) {
        info!(policy = ?self.slow_consumer_policy, "推送 Hub 已启动");

        loop {
            tokio::select! {
                biased;
                Some(client) = self.register_rx.recv() => self.register(client),
                Some((user_id, connection_id)) = self.unregister_rx.recv() => {
                    self.unregister(&user_id, connection_id);
                }
                Some(event) = self.broadcast_rx.recv() => self.deliver(event),
                ack = self.shutdown_rx.recv() => {
                    // 先关闭入口，确认返回后句柄即可观察到停止状态
                    self.register_rx.close();
                    self.broadcast_rx.close();
                    self.close_all();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }

        info!("推送 Hub 已停止");
    }

    fn register(&mut self, client: Client) {
        let user_id = client.user_id().to_string();
        let connection_id = client.id();
        // 覆盖旧条目即丢弃其发送端，旧连接的写任务随之结束
        if let Some(previous) = self.clients.insert(user_id.clone(), client) {
            info!(
                user_id = %user_id,
                previous_connection = %previous.id(),
                connection_id = %connection_id,
                "同一用户重复连接，旧连接被替换"
            );
        } else {
            debug!(user_id = %user_id, connection_id = %connection_id, "客户端已注册");
        }
        self.update_online();
    }

    fn unregister(&mut self, user_id: &str, connection_id: ConnectionId) {
        let owned = self
            .clients
            .get(user_id)
            .is_some_and(|client| client.id() == connection_id);

        if owned {
            self.clients.remove(user_id);
            debug!(user_id = %user_id, connection_id = %connection_id, "客户端已注销");
            self.update_online();
        } else {
            debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "注销请求已过期，忽略"
            );
        }
    }

    fn deliver(&mut self, event: BroadcastEvent) {
        let BroadcastEvent {
            routing_key,
            payload,
        } = event;

        let Some(client) = self.clients.get(&routing_key) else {
            debug!(routing_key = %routing_key, "目标用户不在线，广播丢弃");
            metrics::record_hub_broadcast("no_subscriber");
            return;
        };

        match client.outbound.try_send(payload) {
            Ok(()) => metrics::record_hub_broadcast("delivered"),
            Err(mpsc::error::TrySendError::Full(_)) => match self.slow_consumer_policy {
                SlowConsumerPolicy::DropMessage => {
                    warn!(user_id = %routing_key, "客户端出站缓冲已满，消息丢弃");
                    metrics::record_hub_broadcast("slow_consumer");
                }
                SlowConsumerPolicy::Disconnect => {
                    warn!(user_id = %routing_key, "客户端出站缓冲已满，断开连接");
                    metrics::record_hub_broadcast("disconnected");
                    self.clients.remove(&routing_key);
                    self.update_online();
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(user_id = %routing_key, "客户端写任务已退出，移除注册");
                metrics::record_hub_broadcast("closed");
                self.clients.remove(&routing_key);
                self.update_online();
            }
        }
    }

    fn close_all(&mut self) {
        let count = self.clients.len();
        self.clients.clear();
        self.update_online();
        info!(clients = count, "已关闭所有客户端连接");
    }

    fn update_online(&self) {
        let count = self.clients.len();
        self.online.store(count, Ordering::Relaxed);
        metrics::set_hub_online(count);
    }
}

impl HubHandle {
    /// 注册客户端，同一用户已有连接时覆盖
    pub fn register(&self, client: Client) -> Result<(), HubError> {
        self.register_tx.send(client).map_err(|_| HubError::Stopped)
    }

    /// 注销指定连接；连接已被替换或已注销时为空操作
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> Result<(), HubError> {
        self.unregister_tx
            .send((user_id.to_string(), connection_id))
            .map_err(|_| HubError::Stopped)
    }

    /// 投递广播，从不阻塞调用方；信箱已满时丢弃并计数
    pub fn broadcast(&self, event: BroadcastEvent) -> Result<(), HubError> {
        self.broadcast_tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) => {
                self.mailbox_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_hub_broadcast("mailbox_full");
                warn!(routing_key = %event.routing_key, "推送 Hub 信箱已满，广播丢弃");
                HubError::MailboxFull
            }
            mpsc::error::TrySendError::Closed(_) => HubError::Stopped,
        })
    }

    /// 停止 Hub 并关闭所有客户端，等待事件循环确认
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.shutdown_tx.send(ack_tx).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// 当前在线客户端数
    pub fn online(&self) -> usize {
        self.online.load(Ordering::Relaxed)
    }

    /// 因信箱已满被丢弃的广播数
    pub fn dropped_broadcasts(&self) -> u64 {
        self.mailbox_dropped.load(Ordering::Relaxed)
    }

    /// 每个客户端的出站缓冲条数
    pub fn client_buffer(&self) -> usize {
        self.client_buffer
    }

    /// 事件循环是否仍在运行
    pub fn is_running(&self) -> bool {
        !self.broadcast_tx.is_closed()
    }
}
