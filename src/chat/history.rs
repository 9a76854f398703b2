//! 历史消息 HTTP API 客户端
//!
//! 从 REST 后端拉取会话的持久化历史消息，用于回填早于实时存储
//! 保留期、或实时通路上线之前发送的消息

use crate::chat::error::ChatError;
use crate::chat::types::HistoryRow;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 历史消息 API 客户端
///
/// `client` 应该已经在外部配置好 Bearer 认证头
#[derive(Clone)]
pub struct HistoryApi {
    client: reqwest::Client,
    api_base_url: String,
}

impl HistoryApi {
    pub fn new(client: reqwest::Client, api_base_url: String) -> Self {
        Self {
            client,
            api_base_url,
        }
    }

    /// 拉取与某个用户会话的历史消息
    ///
    /// 服务端按时间倒序返回，顺序不可信，由合并步骤统一重排。
    /// 非 2xx 映射为 `HistoryFetch` 错误；不做内部重试，由调用方决定
    pub async fn fetch_history(&self, peer_id: i64) -> Result<Vec<HistoryRow>, ChatError> {
        let operation_id = Uuid::new_v4().to_string();
        let url = format!("{}/get-messages/{}", self.api_base_url, peer_id);

        info!("[HistoryAPI] 📡 拉取历史消息，对端用户: {}", peer_id);
        debug!("[HistoryAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("operationID", &operation_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(
                "[HistoryAPI] 历史消息请求失败，HTTP状态: {}, 响应: {}",
                status, text
            );
            return Err(ChatError::HistoryFetch {
                status: status.as_u16(),
            });
        }

        let rows: Vec<HistoryRow> = response.json().await?;
        info!("[HistoryAPI] ✅ 历史消息拉取完成，条数: {}", rows.len());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// 起一个只响应一次的 HTTP 服务，返回给定状态行与 body
    async fn spawn_one_shot_http(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn fetch_history_parses_rows() {
        let base = spawn_one_shot_http(
            "200 OK",
            r#"[{"id":1,"message":"hi","sender_id":5,"receiver_id":9,"created_at":"2024-01-01T10:00:00Z"}]"#,
        )
        .await;
        let api = HistoryApi::new(reqwest::Client::new(), base);
        let rows = api.fetch_history(9).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].sender_id, 5);
        assert_eq!(rows[0].message, "hi");
    }

    #[tokio::test]
    async fn fetch_history_maps_non_2xx_to_typed_error() {
        let base = spawn_one_shot_http("500 Internal Server Error", "{}").await;
        let api = HistoryApi::new(reqwest::Client::new(), base);
        match api.fetch_history(9).await {
            Err(ChatError::HistoryFetch { status }) => assert_eq!(status, 500),
            other => panic!("预期 HistoryFetch 错误，实际: {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetch_history_empty_conversation_is_empty_list() {
        let base = spawn_one_shot_http("200 OK", "[]").await;
        let api = HistoryApi::new(reqwest::Client::new(), base);
        let rows = api.fetch_history(9).await.unwrap();
        assert!(rows.is_empty());
    }
}
