//! 消息发送器
//!
//! 先写实时存储（两端的同步器都从这里收到消息），再尽力把消息
//! 镜像到 REST 后端作为持久化副本。实时存储是"对方能否看到这条
//! 消息"的事实来源，`send` 的返回值只反映实时写入的结果

use crate::chat::error::ChatError;
use crate::chat::store::MessageStore;
use crate::chat::types::{conversation_key, now_timestamp, RealtimeRecord};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// 消息发送器
pub struct MessageSender {
    store: Arc<dyn MessageStore>,
    client: reqwest::Client,
    api_base_url: String,
    sender_id: i64,
}

impl MessageSender {
    /// 创建发送器
    ///
    /// REST 镜像使用带 Bearer 认证头的 HTTP 客户端
    pub fn new(
        store: Arc<dyn MessageStore>,
        api_base_url: String,
        token: &str,
        sender_id: i64,
    ) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                        .context("无效的 token")?,
                );
                headers
            })
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            store,
            client,
            api_base_url,
            sender_id,
        })
    }

    /// 发送一条消息，返回实时写入是否成功
    ///
    /// 返回 false 时调用方负责向用户报错并保留输入框内容以便重试；
    /// 本层不做重试、不排队、不做离线缓冲。REST 镜像失败只记录
    /// 日志，不改变返回值
    pub async fn send(&self, body: &str, receiver_id: i64) -> bool {
        let key = conversation_key(self.sender_id, receiver_id);
        let record = RealtimeRecord {
            message: body.to_string(),
            sender_id: self.sender_id,
            receiver_id,
            time: now_timestamp(),
        };

        if let Err(e) = self.store.write(&key, &record).await {
            error!("[Sender] ❌ 实时消息写入失败，会话 key: {}: {}", key, e);
            return false;
        }
        debug!("[Sender] 实时消息写入成功，会话 key: {}", key);

        if let Err(e) = self.mirror_to_rest(body, receiver_id).await {
            warn!("[Sender] ⚠️ REST 镜像写入失败（已忽略）: {}", e);
        }
        true
    }

    /// 把消息镜像到 REST 后端（multipart 表单）
    ///
    /// 响应内容对核心没有意义，只关心成功与否
    async fn mirror_to_rest(&self, body: &str, receiver_id: i64) -> Result<(), ChatError> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/messages", self.api_base_url);
        debug!("[Sender]   镜像请求URL: {}, 操作ID: {}", url, operation_id);

        let form = reqwest::multipart::Form::new()
            .text("message", body.to_string())
            .text("receiver_id", receiver_id.to_string());

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("operationID", &operation_id)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChatError::SendMirror(format!("请求失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::SendMirror(format!(
                "HTTP 状态 {}: {}",
                status, text
            )));
        }
        Ok(())
    }
}
