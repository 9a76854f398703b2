//! 错误类型定义
//!
//! 错误在最靠近成因的边界处恢复：历史拉取失败不影响已展示的
//! 实时消息，只有发送时的实时写入失败需要暴露给最终用户

use thiserror::Error;

/// 聊天核心错误
#[derive(Debug, Error)]
pub enum ChatError {
    /// 实时存储读写失败
    #[error("实时存储连接失败: {0}")]
    StoreConnectivity(String),

    /// 历史接口返回非 2xx
    #[error("历史消息拉取失败，HTTP 状态码: {status}")]
    HistoryFetch { status: u16 },

    /// 发送时实时写入失败（对方将收不到这条消息，必须暴露给调用方）
    #[error("实时消息写入失败: {0}")]
    SendRealtime(String),

    /// 成功写入实时存储后 REST 镜像失败（记录日志后吞掉，
    /// 不影响 send 的返回值）
    #[error("REST 镜像写入失败: {0}")]
    SendMirror(String),

    /// HTTP 传输层错误
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),
}
