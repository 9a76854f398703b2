pub mod auth;
pub mod error;
pub mod history;
pub mod listener;
pub mod sender;
pub mod store;
pub mod sync;
pub mod types;

// 重新导出消息同步相关类型和函数
pub use error::ChatError;
pub use listener::{ChatListener, EmptyChatListener};
pub use store::{MemoryMessageStore, MessageStore, RtdbConfig, RtdbMessageStore, StoreSubscription};
pub use sync::{ConversationSyncer, ConversationSyncerConfig};
pub use types::{conversation_key, ChatMessage};
