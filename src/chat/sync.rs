//! 会话消息同步器
//!
//! 把实时快照流与一次性历史拉取合并为单一的去重、按时间升序的
//! 消息列表。合并满足交换律：两个数据源谁先到达，两者都到齐之后
//! 的最终结果一致，因此不需要跨事件的顺序保证

use crate::chat::history::HistoryApi;
use crate::chat::listener::{ChatListener, EmptyChatListener};
use crate::chat::store::{MessageStore, SnapshotObserver, StoreSubscription};
use crate::chat::types::{compare_timestamp, conversation_key, ChatMessage, MessageKey, RealtimeRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// 同步器配置
#[derive(Clone, Debug)]
pub struct ConversationSyncerConfig {
    /// 当前登录用户 ID
    pub user_id: i64,
    /// 会话对端用户 ID
    pub peer_id: i64,
    /// 历史消息 REST 基础地址
    pub api_base_url: String,
    /// 认证 token（Bearer）
    pub token: String,
}

/// 合并步骤：并集 + 按 (timestamp, senderId, body) 去重 + 时间升序排序
///
/// 没有新增消息时返回 None（跳过冗余的渲染更新）。对同一输入重复
/// 应用结果不变（幂等）。时间相同时按发送者、正文决出全序，保证
/// 两个来源不论先后到达都得到同一个列表
pub fn merge_by_union(
    current: &[ChatMessage],
    incoming: Vec<ChatMessage>,
) -> Option<Vec<ChatMessage>> {
    let mut seen: HashSet<MessageKey> = current.iter().map(ChatMessage::dedup_key).collect();
    let mut merged: Vec<ChatMessage> = current.to_vec();
    let mut added = 0usize;
    for msg in incoming {
        if seen.insert(msg.dedup_key()) {
            merged.push(msg);
            added += 1;
        }
    }
    if added == 0 {
        return None;
    }
    merged.sort_by(|a, b| {
        compare_timestamp(&a.timestamp, &b.timestamp)
            .then_with(|| a.sender_id.cmp(&b.sender_id))
            .then_with(|| a.body.cmp(&b.body))
    });
    Some(merged)
}

/// 合并视图的内部状态
///
/// 只会从同步器自身的回调里被修改（单写者），锁不跨 await 持有
struct SyncState {
    /// 挂载标志：卸载后到达的快照与历史结果一律丢弃
    active: AtomicBool,
    messages: Mutex<Vec<ChatMessage>>,
}

/// 把转换后的消息并入合并视图并触发回调的下游
///
/// 实时快照与历史拉取共用同一条路径，这是交换律成立的前提
struct SyncSink {
    state: Arc<SyncState>,
    listener: Arc<dyn ChatListener>,
}

impl SyncSink {
    async fn apply(&self, incoming: Vec<ChatMessage>) {
        if !self.state.active.load(Ordering::SeqCst) {
            debug!("[MsgSync] 同步器已卸载，丢弃本次更新");
            return;
        }
        let changed = {
            let mut guard = self.state.messages.lock().unwrap();
            match merge_by_union(&guard, incoming) {
                Some(merged) => {
                    *guard = merged.clone();
                    Some(merged)
                }
                None => None,
            }
        };
        match changed {
            Some(merged) => {
                debug!("[MsgSync] 合并视图更新，当前消息数: {}", merged.len());
                let json = serde_json::to_string(&merged).unwrap_or_else(|_| "[]".to_string());
                self.listener.on_messages_changed(json).await;
            }
            None => {
                debug!("[MsgSync] 无新增消息，跳过渲染更新");
            }
        }
    }
}

#[async_trait]
impl SnapshotObserver for SyncSink {
    async fn on_snapshot(&self, records: Vec<RealtimeRecord>) {
        let incoming: Vec<ChatMessage> = records.into_iter().map(ChatMessage::from).collect();
        self.apply(incoming).await;
    }
}

/// 会话消息同步器
pub struct ConversationSyncer {
    config: ConversationSyncerConfig,
    store: Arc<dyn MessageStore>,
    history_api: HistoryApi,
    listener: Arc<dyn ChatListener>,
    state: Arc<SyncState>,
    subscription: Mutex<Option<StoreSubscription>>,
}

impl ConversationSyncer {
    /// 创建同步器（使用默认空监听器）
    pub fn new(config: ConversationSyncerConfig, store: Arc<dyn MessageStore>) -> Result<Self> {
        Self::with_listener(config, store, Arc::new(EmptyChatListener))
    }

    /// 创建同步器（带自定义监听器）
    pub fn with_listener(
        config: ConversationSyncerConfig,
        store: Arc<dyn MessageStore>,
        listener: Arc<dyn ChatListener>,
    ) -> Result<Self> {
        info!(
            "[MsgSync] 创建会话同步器，用户ID: {}, 对端用户ID: {}",
            config.user_id, config.peer_id
        );

        // 带 Bearer 认证头的 HTTP 客户端（token 通过 default_headers 自动添加）
        let http_client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.token))
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        let history_api = HistoryApi::new(http_client, config.api_base_url.clone());

        Ok(Self {
            store,
            history_api,
            listener,
            state: Arc::new(SyncState {
                active: AtomicBool::new(false),
                messages: Mutex::new(Vec::new()),
            }),
            subscription: Mutex::new(None),
            config,
        })
    }

    /// 会话的规范 key
    pub fn conversation_key(&self) -> String {
        conversation_key(self.config.user_id, self.config.peer_id)
    }

    /// 挂载：并发地订阅实时快照流并发起一次历史拉取
    ///
    /// 每次挂载都从空列表重建合并视图；每次挂载只做一次历史拉取，
    /// 不持有任何服务端游标
    pub async fn start(&self) {
        let key = self.conversation_key();
        info!("[MsgSync] 🔄 挂载会话同步器，会话 key: {}", key);

        self.state.active.store(true, Ordering::SeqCst);
        self.state.messages.lock().unwrap().clear();

        // 历史拉取放到独立任务里，与订阅并发进行
        let history_api = self.history_api.clone();
        let peer_id = self.config.peer_id;
        let history_sink = SyncSink {
            state: Arc::clone(&self.state),
            listener: Arc::clone(&self.listener),
        };
        tokio::spawn(async move {
            match history_api.fetch_history(peer_id).await {
                Ok(rows) => {
                    let incoming: Vec<ChatMessage> =
                        rows.into_iter().map(ChatMessage::from).collect();
                    history_sink.apply(incoming).await;
                }
                Err(e) => {
                    // 历史拉取失败不影响实时视图，交给 UI 展示可重试状态
                    warn!("[MsgSync] ⚠️ 历史消息拉取失败: {}", e);
                    if history_sink.state.active.load(Ordering::SeqCst) {
                        history_sink
                            .listener
                            .on_history_load_failed(e.to_string())
                            .await;
                    }
                }
            }
        });

        let observer = Arc::new(SyncSink {
            state: Arc::clone(&self.state),
            listener: Arc::clone(&self.listener),
        });
        match self.store.subscribe(&key, observer).await {
            Ok(subscription) => {
                *self.subscription.lock().unwrap() = Some(subscription);
            }
            Err(e) => {
                // 订阅失败静默降级：历史消息仍可展示，不打断挂载
                warn!("[MsgSync] ⚠️ 实时快照订阅失败: {}", e);
            }
        }
    }

    /// 卸载：退订实时快照流（恰好一次），晚到的回调一律丢弃
    ///
    /// 进行中的历史拉取不在网络层取消，由挂载标志负责丢弃其结果
    pub fn stop(&self) {
        info!(
            "[MsgSync] 卸载会话同步器，会话 key: {}",
            self.conversation_key()
        );
        self.state.active.store(false, Ordering::SeqCst);
        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.unsubscribe();
        }
    }

    /// 当前合并视图的快照
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.messages.lock().unwrap().clone()
    }
}
