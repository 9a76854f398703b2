//! 登录认证
//!
//! 聊天之前先通过市场后端登录换取 Bearer token

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug, Deserialize)]
pub struct LoginUser {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// "customer" 或 "provider"
    #[serde(default)]
    pub role: String,
}

pub async fn login_async(
    api_base_url: &str,
    email: String,
    password: String,
) -> Result<LoginResponse, String> {
    use uuid::Uuid;

    let client = reqwest::Client::new();
    let operation_id = Uuid::new_v4().to_string();

    let login_req = LoginRequest { email, password };

    let url = format!("{}/login", api_base_url);

    info!("🔐 正在登录...");
    debug!("   URL: {}", url);
    debug!("   邮箱: {}", login_req.email);
    debug!("   OperationID: {}", operation_id);

    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .header("operationID", &operation_id)
        .json(&login_req)
        .send()
        .await
        .map_err(|e| format!("请求失败: {}", e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| format!("读取响应失败: {}", e))?;

    if !status.is_success() {
        return Err(format!("HTTP 错误 {}: {}", status, text));
    }

    debug!("✅ 登录响应: {}", text);

    let login_resp: LoginResponse = serde_json::from_str(&text)
        .map_err(|e| format!("解析响应失败: {}，原始响应: {}", e, text))?;

    Ok(login_resp)
}
