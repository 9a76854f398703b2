//! 实时消息存储适配层
//!
//! 把键值实时树翻译成单个会话的类型化消息记录。订阅回调每次收到
//! 的都是该会话的完整快照（不是增量），与托管实时库的 value 事件
//! 语义一致

use crate::chat::error::ChatError;
use crate::chat::types::RealtimeRecord;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

/// 快照观察者：订阅后每次树变化都会收到会话的完整快照
#[async_trait]
pub trait SnapshotObserver: Send + Sync {
    async fn on_snapshot(&self, records: Vec<RealtimeRecord>);
}

/// 订阅句柄
///
/// `unsubscribe` 幂等，重复调用安全；调用后停止所有后续回调
pub struct StoreSubscription {
    cancelled: AtomicBool,
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl StoreSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// 停止所有后续观察者回调；再次调用无副作用
    pub fn unsubscribe(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 实时消息存储接口
///
/// 实现必须保证：订阅后立刻回调一次当前状态；`write` 只追加，
/// 不覆盖、不重排已有记录，也不产生核心依赖的外部可见 ID
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 订阅某个会话的快照流
    ///
    /// 订阅建立后的连接中断只记录日志、静默停止推送，不会打断
    /// 订阅方（上层必须容忍一个不再发声的订阅）
    async fn subscribe(
        &self,
        conversation_key: &str,
        observer: Arc<dyn SnapshotObserver>,
    ) -> Result<StoreSubscription, ChatError>;

    /// 一次性读取会话当前的全部记录
    ///
    /// 会话从未有过消息时返回空列表而不是错误
    async fn read_once(&self, conversation_key: &str) -> Result<Vec<RealtimeRecord>, ChatError>;

    /// 追加一条记录
    async fn write(&self, conversation_key: &str, record: &RealtimeRecord) -> Result<(), ChatError>;
}

/// 实时存储配置
#[derive(Clone, Debug)]
pub struct RtdbConfig {
    /// REST 根地址，例如 `http://localhost:9000`
    pub base_url: String,
    /// WebSocket 快照推送地址，例如 `ws://localhost:9000/.ws`
    pub ws_url: String,
}

/// WebSocket 订阅请求帧
#[derive(Serialize)]
struct SubscribeFrame<'a> {
    action: &'static str,
    path: &'a str,
}

/// WebSocket 快照推送帧
///
/// 服务端在订阅建立后先推一次当前快照，之后每次树变更再推完整快照
#[derive(Deserialize)]
struct SnapshotFrame {
    path: String,
    /// 推送 ID -> 记录；会话为空时为 null
    #[serde(default)]
    data: Option<HashMap<String, RealtimeRecord>>,
}

/// 托管实时树的 HTTP + WebSocket 客户端
///
/// REST 侧按 `GET/POST {base}/chats/{key}.json` 读写，树节点是
/// 推送 ID 到记录的映射；WebSocket 侧按路径订阅完整快照流
pub struct RtdbMessageStore {
    config: RtdbConfig,
    client: reqwest::Client,
}

impl RtdbMessageStore {
    pub fn new(config: RtdbConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn node_url(&self, conversation_key: &str) -> String {
        format!("{}/chats/{}.json", self.config.base_url, conversation_key)
    }

    /// 把树节点（推送 ID -> 记录）摊平成记录列表
    ///
    /// 按推送 ID 排序，保证同一快照两次摊平得到相同顺序
    fn flatten(data: Option<HashMap<String, RealtimeRecord>>) -> Vec<RealtimeRecord> {
        match data {
            Some(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries.into_iter().map(|(_, record)| record).collect()
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl MessageStore for RtdbMessageStore {
    async fn subscribe(
        &self,
        conversation_key: &str,
        observer: Arc<dyn SnapshotObserver>,
    ) -> Result<StoreSubscription, ChatError> {
        let path = format!("chats/{}", conversation_key);
        info!("[Store] 🔗 建立快照订阅，路径: {}", path);

        let (ws_stream, _) = connect_async(self.config.ws_url.as_str())
            .await
            .map_err(|e| ChatError::StoreConnectivity(format!("WebSocket 连接失败: {}", e)))?;
        let (mut writer, mut reader) = ws_stream.split();

        // 发送订阅帧，服务端随后立刻推送当前快照
        let frame = serde_json::to_string(&SubscribeFrame {
            action: "subscribe",
            path: &path,
        })
        .map_err(|e| ChatError::StoreConnectivity(format!("构造订阅帧失败: {}", e)))?;
        writer
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| ChatError::StoreConnectivity(format!("发送订阅帧失败: {}", e)))?;

        let watched = path.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<SnapshotFrame>(&text)
                    {
                        Ok(snap) if snap.path == watched => {
                            let records = RtdbMessageStore::flatten(snap.data);
                            debug!(
                                "[Store] 收到快照，路径: {}, 记录数: {}",
                                watched,
                                records.len()
                            );
                            observer.on_snapshot(records).await;
                        }
                        Ok(snap) => {
                            debug!("[Store] 忽略其他路径的快照: {}", snap.path);
                        }
                        Err(e) => {
                            warn!("[Store] 快照帧解析失败: {}", e);
                        }
                    },
                    Ok(WsMessage::Ping(payload)) => {
                        // 服务端心跳，答复 Pong 维持连接
                        if writer.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("[Store] 快照流被服务端关闭，路径: {}", watched);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // 连接中断只记录日志，静默停止推送，由上层容忍
                        warn!("[Store] 快照流中断: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(StoreSubscription::new(move || handle.abort()))
    }

    async fn read_once(&self, conversation_key: &str) -> Result<Vec<RealtimeRecord>, ChatError> {
        let url = self.node_url(conversation_key);
        debug!("[Store] 一次性读取实时树: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChatError::StoreConnectivity(format!("读取实时树失败: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::StoreConnectivity(format!(
                "读取实时树失败，HTTP 状态: {}",
                status
            )));
        }
        let data: Option<HashMap<String, RealtimeRecord>> = response
            .json()
            .await
            .map_err(|e| ChatError::StoreConnectivity(format!("解析实时树失败: {}", e)))?;
        Ok(Self::flatten(data))
    }

    async fn write(&self, conversation_key: &str, record: &RealtimeRecord) -> Result<(), ChatError> {
        let url = self.node_url(conversation_key);
        debug!("[Store] 追加记录到实时树: {}", url);
        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| ChatError::StoreConnectivity(format!("写入实时树失败: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::StoreConnectivity(format!(
                "写入实时树失败，HTTP 状态: {}",
                status
            )));
        }
        Ok(())
    }
}

/// 进程内实时树（测试与演示用），与托管实现保持相同的快照语义
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: Arc<Mutex<MemoryInner>>,
    next_observer_id: AtomicU64,
    /// 写入失败开关，测试发送失败路径用
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<String, Vec<RealtimeRecord>>,
    observers: HashMap<String, Vec<(u64, Arc<dyn SnapshotObserver>)>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续 `write` 全部失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 当前记录总数（断言用）
    pub fn record_count(&self, conversation_key: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .records
            .get(conversation_key)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn subscribe(
        &self,
        conversation_key: &str,
        observer: Arc<dyn SnapshotObserver>,
    ) -> Result<StoreSubscription, ChatError> {
        let id = self.next_observer_id.fetch_add(1, Ordering::SeqCst);
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .observers
                .entry(conversation_key.to_string())
                .or_default()
                .push((id, Arc::clone(&observer)));
            inner
                .records
                .get(conversation_key)
                .cloned()
                .unwrap_or_default()
        };

        // 订阅建立后立刻推送一次当前快照
        observer.on_snapshot(snapshot).await;

        let inner = Arc::clone(&self.inner);
        let key = conversation_key.to_string();
        Ok(StoreSubscription::new(move || {
            let mut guard = inner.lock().unwrap();
            if let Some(list) = guard.observers.get_mut(&key) {
                list.retain(|(observer_id, _)| *observer_id != id);
            }
        }))
    }

    async fn read_once(&self, conversation_key: &str) -> Result<Vec<RealtimeRecord>, ChatError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .records
            .get(conversation_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn write(&self, conversation_key: &str, record: &RealtimeRecord) -> Result<(), ChatError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChatError::StoreConnectivity(
                "写入实时树失败: 连接不可用".to_string(),
            ));
        }
        let (snapshot, observers) = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .records
                .entry(conversation_key.to_string())
                .or_default()
                .push(record.clone());
            let snapshot = inner
                .records
                .get(conversation_key)
                .cloned()
                .unwrap_or_default();
            let observers = inner
                .observers
                .get(conversation_key)
                .cloned()
                .unwrap_or_default();
            (snapshot, observers)
        };

        // 锁外通知，观察者回调里可能再次访问存储
        for (_, observer) in observers {
            observer.on_snapshot(snapshot.clone()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 记录收到的每次快照，供断言
    struct RecordingObserver {
        snapshots: Mutex<Vec<Vec<RealtimeRecord>>>,
    }

    impl RecordingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                snapshots: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.snapshots.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SnapshotObserver for RecordingObserver {
        async fn on_snapshot(&self, records: Vec<RealtimeRecord>) {
            self.snapshots.lock().unwrap().push(records);
        }
    }

    fn record(body: &str, time: &str) -> RealtimeRecord {
        RealtimeRecord {
            message: body.to_string(),
            sender_id: 5,
            receiver_id: 9,
            time: time.to_string(),
        }
    }

    #[tokio::test]
    async fn subscribe_emits_current_snapshot_immediately() {
        let store = MemoryMessageStore::new();
        store
            .write("5_9", &record("hi", "2024-01-01T10:00:00Z"))
            .await
            .unwrap();

        let observer = RecordingObserver::new();
        let _sub = store.subscribe("5_9", observer.clone()).await.unwrap();

        let snapshots = observer.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].len(), 1);
        assert_eq!(snapshots[0][0].message, "hi");
    }

    #[tokio::test]
    async fn write_pushes_full_snapshot_to_observers() {
        let store = MemoryMessageStore::new();
        let observer = RecordingObserver::new();
        let _sub = store.subscribe("5_9", observer.clone()).await.unwrap();

        store
            .write("5_9", &record("a", "2024-01-01T10:00:00Z"))
            .await
            .unwrap();
        store
            .write("5_9", &record("b", "2024-01-01T10:00:01Z"))
            .await
            .unwrap();

        let snapshots = observer.snapshots.lock().unwrap();
        // 初始空快照 + 两次写入
        assert_eq!(snapshots.len(), 3);
        assert!(snapshots[0].is_empty());
        assert_eq!(snapshots[1].len(), 1);
        // 每次都是完整快照，不是增量
        assert_eq!(snapshots[2].len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_callbacks_and_is_idempotent() {
        let store = MemoryMessageStore::new();
        let observer = RecordingObserver::new();
        let sub = store.subscribe("5_9", observer.clone()).await.unwrap();
        assert_eq!(observer.count(), 1);

        sub.unsubscribe();
        // 重复调用安全
        sub.unsubscribe();
        assert!(sub.is_cancelled());

        store
            .write("5_9", &record("a", "2024-01-01T10:00:00Z"))
            .await
            .unwrap();
        // 退订后不再收到任何快照
        assert_eq!(observer.count(), 1);
    }

    #[tokio::test]
    async fn read_once_on_missing_conversation_is_empty_not_error() {
        let store = MemoryMessageStore::new();
        let records = store.read_once("1_2").await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn failed_write_surfaces_connectivity_error() {
        let store = MemoryMessageStore::new();
        store.set_fail_writes(true);
        let err = store
            .write("5_9", &record("a", "2024-01-01T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::StoreConnectivity(_)));
        assert_eq!(store.record_count("5_9"), 0);
    }

    #[test]
    fn flatten_orders_by_push_id_and_handles_null() {
        assert!(RtdbMessageStore::flatten(None).is_empty());

        let mut map = HashMap::new();
        map.insert("-b".to_string(), record("second", "2024-01-01T10:00:01Z"));
        map.insert("-a".to_string(), record("first", "2024-01-01T10:00:00Z"));
        let flat = RtdbMessageStore::flatten(Some(map));
        assert_eq!(flat[0].message, "first");
        assert_eq!(flat[1].message, "second");
    }
}
