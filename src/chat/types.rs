//! 聊天核心数据模型
//!
//! 定义合并视图使用的统一消息结构，以及两类数据源的原始记录结构

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 统一消息结构（合并视图渲染用）
///
/// 实时源与历史源的记录都先转换成该结构再参与合并
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// 发送者用户 ID
    pub sender_id: i64,
    /// 接收者用户 ID
    pub receiver_id: i64,
    /// 消息正文
    pub body: String,
    /// ISO-8601 时间戳（秒级精度），排序主键
    pub timestamp: String,
    /// 历史源的持久化行 ID（实时源记录没有该字段）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
}

/// 消息判等标识：(timestamp, senderId, body)
pub type MessageKey = (String, i64, String);

impl ChatMessage {
    /// 合并去重用的复合标识
    ///
    /// 两个数据源之间没有共享的全局 ID，只能用该三元组近似判等。
    /// 同一秒内同一人发送完全相同的文本会被折叠成一条（已知取舍，
    /// 时间戳精度只有秒级）
    pub fn dedup_key(&self) -> MessageKey {
        (self.timestamp.clone(), self.sender_id, self.body.clone())
    }
}

/// 比较两个时间戳的先后（升序排序用）
///
/// 优先按 RFC3339 解析后比较，任一侧解析失败时退化为字节序比较
pub fn compare_timestamp(a: &str, b: &str) -> Ordering {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        (Ok(ta), Ok(tb)) => ta.cmp(&tb),
        _ => a.cmp(b),
    }
}

/// 计算会话的规范 key：`min_max`
///
/// 双方各自独立计算也会得到同一个 key，保证两端读写同一个存储位置
pub fn conversation_key(a: i64, b: i64) -> String {
    format!("{}_{}", a.min(b), a.max(b))
}

/// 生成当前时间的秒级 RFC3339 时间戳
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// 实时存储中的原始消息记录（每条消息一个独立记录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeRecord {
    pub message: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    /// ISO-8601 时间戳
    pub time: String,
}

impl From<RealtimeRecord> for ChatMessage {
    fn from(record: RealtimeRecord) -> Self {
        Self {
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            body: record.message,
            timestamp: record.time,
            source_id: None,
        }
    }
}

/// 历史接口返回的消息行（服务端按时间倒序返回）
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRow {
    pub id: i64,
    pub message: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    /// ISO-8601 时间戳
    pub created_at: String,
}

impl From<HistoryRow> for ChatMessage {
    fn from(row: HistoryRow) -> Self {
        Self {
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            body: row.message,
            timestamp: row.created_at,
            source_id: Some(row.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_key_is_symmetric() {
        // 双方独立计算必须得到同一个 key
        assert_eq!(conversation_key(5, 9), conversation_key(9, 5));
        assert_eq!(conversation_key(5, 9), "5_9");
        assert_eq!(conversation_key(42, 42), "42_42");
    }

    #[test]
    fn compare_timestamp_parses_rfc3339() {
        assert_eq!(
            compare_timestamp("2024-01-01T10:00:00Z", "2024-01-01T10:00:01Z"),
            Ordering::Less
        );
        // 不同时区偏移但同一时刻
        assert_eq!(
            compare_timestamp("2024-01-01T10:00:00Z", "2024-01-01T12:00:00+02:00"),
            Ordering::Equal
        );
    }

    #[test]
    fn compare_timestamp_falls_back_to_bytewise() {
        // 解析失败时退化为字节序比较
        assert_eq!(compare_timestamp("abc", "abd"), Ordering::Less);
        assert_eq!(compare_timestamp("2024-01-01T10:00:00Z", "乱码"), Ordering::Less);
    }

    #[test]
    fn history_row_maps_to_message() {
        let row = HistoryRow {
            id: 1,
            message: "hi".to_string(),
            sender_id: 5,
            receiver_id: 9,
            created_at: "2024-01-01T10:00:00Z".to_string(),
        };
        let msg = ChatMessage::from(row);
        assert_eq!(msg.sender_id, 5);
        assert_eq!(msg.body, "hi");
        assert_eq!(msg.timestamp, "2024-01-01T10:00:00Z");
        assert_eq!(msg.source_id, Some(1));
    }

    #[test]
    fn realtime_record_maps_without_source_id() {
        let record = RealtimeRecord {
            message: "hello".to_string(),
            sender_id: 9,
            receiver_id: 5,
            time: "2024-01-01T10:00:05Z".to_string(),
        };
        let msg = ChatMessage::from(record);
        assert_eq!(msg.source_id, None);
        assert_eq!(msg.timestamp, "2024-01-01T10:00:05Z");
    }

    #[test]
    fn message_serializes_camel_case() {
        let msg = ChatMessage {
            sender_id: 5,
            receiver_id: 9,
            body: "hi".to_string(),
            timestamp: "2024-01-01T10:00:00Z".to_string(),
            source_id: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"senderId\":5"));
        // source_id 为 None 时不序列化
        assert!(!json.contains("sourceId"));
    }
}
