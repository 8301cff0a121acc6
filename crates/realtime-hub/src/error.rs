use thiserror::Error;

/// Hub 错误类型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("推送 Hub 已停止")]
    Stopped,

    #[error("推送 Hub 信箱已满，广播被丢弃")]
    MailboxFull,
}
