pub mod chat;

// 重新导出常用类型和函数，方便外部使用
pub use chat::{
    auth::login_async,
    sender::MessageSender,
    sync::{ConversationSyncer, ConversationSyncerConfig},
    types::ChatMessage,
};
