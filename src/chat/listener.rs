//! 会话消息监听器回调接口

use async_trait::async_trait;

/// 会话消息监听器回调接口
///
/// 合并视图每次实际变化时回调一次，负载为消息列表的 JSON 字符串
#[async_trait]
pub trait ChatListener: Send + Sync {
    /// 合并视图变化（至少新增了一条消息）
    async fn on_messages_changed(&self, messages_json: String);

    /// 历史消息拉取失败（可恢复：已展示的实时消息不受影响，
    /// 由 UI 展示"加载更早消息失败"并允许重试）
    async fn on_history_load_failed(&self, reason: String);
}

/// 空实现（默认监听器）
pub struct EmptyChatListener;

#[async_trait]
impl ChatListener for EmptyChatListener {
    async fn on_messages_changed(&self, _messages_json: String) {}
    async fn on_history_load_failed(&self, _reason: String) {}
}
