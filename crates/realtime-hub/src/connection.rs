//! 单条推送连接的读写
//!
//! 写任务把出站通道中的消息写到传输层，通道关闭后关闭传输层；
//! 读任务持续读取入站帧直到关闭或出错，然后向 Hub 注销。

use std::fmt::Display;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{Client, ConnectionId};
use crate::error::HubError;
use crate::hub::HubHandle;

/// 为已认证用户服务一条连接，直到连接结束
///
/// 身份由上游校验，这里不做任何鉴权。
pub async fn serve_connection<S, R, E>(
    hub: HubHandle,
    user_id: String,
    mut sink: S,
    stream: R,
) -> Result<(), HubError>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send,
{
    let (client, outbound) = Client::new(user_id.clone(), hub.client_buffer());
    let connection_id = client.id();

    if let Err(e) = hub.register(client) {
        let _ = sink.close().await;
        return Err(e);
    }
    info!(user_id = %user_id, connection_id = %connection_id, "推送连接已建立");

    let writer = tokio::spawn(write_loop(sink, outbound, connection_id));

    read_loop(stream, &user_id, connection_id).await;
    // Hub 已停止时注册表也已释放，写任务同样会结束
    let _ = hub.unregister(&user_id, connection_id);

    if let Err(e) = writer.await {
        warn!(connection_id = %connection_id, error = %e, "推送写任务异常退出");
    }

    info!(user_id = %user_id, connection_id = %connection_id, "推送连接已断开");
    Ok(())
}

async fn read_loop<R, E>(mut stream: R, user_id: &str, connection_id: ConnectionId)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => {
                debug!(user_id = %user_id, connection_id = %connection_id, "客户端主动关闭");
                break;
            }
            // 推送通道只下行，入站数据帧忽略
            Ok(_) => {}
            Err(e) => {
                debug!(user_id = %user_id, connection_id = %connection_id, error = %e, "读取失败");
                break;
            }
        }
    }
}

async fn write_loop<S>(mut sink: S, mut outbound: mpsc::Receiver<Bytes>, connection_id: ConnectionId)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = sink.send(to_frame(payload)).await {
            debug!(connection_id = %connection_id, error = %e, "写入失败，停止推送");
            // 丢弃接收端，Hub 下次投递时会移除该连接
            return;
        }
    }

    let _ = sink.close().await;
}

/// UTF-8 负载按文本帧发送，其余按二进制帧
fn to_frame(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}
