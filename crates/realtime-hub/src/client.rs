use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 连接标识，区分同一用户的前后两条连接
pub type ConnectionId = Uuid;

/// 一个在线推送订阅者
///
/// 注册表中的条目持有 `outbound` 唯一的发送端；条目被移除即关闭通道，
/// 写任务随之结束。
#[derive(Debug)]
pub struct Client {
    user_id: String,
    id: ConnectionId,
    pub(crate) outbound: mpsc::Sender<Bytes>,
}

impl Client {
    /// 创建客户端及其出站通道的接收端（交给写任务）
    pub fn new(user_id: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let client = Self {
            user_id: user_id.into(),
            id: Uuid::now_v7(),
            outbound,
        };
        (client, receiver)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}
