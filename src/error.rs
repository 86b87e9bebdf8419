use thiserror::Error;

/// 会话层需要调用方区分的错误种类
///
/// 传输IO错误按原样向上传递，不在此枚举中
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// 对端在应答前关闭了连接
    #[error("connection closed by peer before ack")]
    Closed,
    /// 等待Ack超时
    #[error("wait ack timeout, id={0}")]
    AckTimeout(u16),
}
