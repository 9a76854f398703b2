//! 沙龙聊天 CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示会话同步功能
//! 启动时指定账号与对端用户，自动登录并挂载同步器，展示合并后的消息流

use anyhow::Result;
use clap::Parser;
use salon_chat_sdk_rust::chat::listener::ChatListener;
use salon_chat_sdk_rust::chat::sender::MessageSender;
use salon_chat_sdk_rust::chat::store::{RtdbConfig, RtdbMessageStore};
use salon_chat_sdk_rust::chat::sync::{ConversationSyncer, ConversationSyncerConfig};
use salon_chat_sdk_rust::login_async;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// 沙龙聊天 CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "salon-chat-cli")]
#[command(about = "沙龙聊天 CLI 客户端 - 用于测试和展示会话同步功能", long_about = None)]
struct Args {
    /// 市场后端 REST 基础地址
    #[arg(long, default_value = "http://localhost:8000/api")]
    api_url: String,

    /// 实时存储 REST 根地址
    #[arg(long, default_value = "http://localhost:9000")]
    store_url: String,

    /// 实时存储 WebSocket 快照推送地址
    #[arg(long, default_value = "ws://localhost:9000/.ws")]
    store_ws_url: String,

    /// 登录邮箱（与 --token/--user-id 二选一）
    #[arg(short, long)]
    email: Option<String>,

    /// 登录密码
    #[arg(short, long)]
    password: Option<String>,

    /// 已有的 Bearer token（跳过登录）
    #[arg(long)]
    token: Option<String>,

    /// 当前用户 ID（与 --token 配合使用）
    #[arg(long)]
    user_id: Option<i64>,

    /// 会话对端用户 ID
    #[arg(long)]
    peer: i64,

    /// 挂载后发送一条消息（可选）
    #[arg(long)]
    send: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,salon_chat_sdk_rust=debug）
    #[arg(long, default_value = "info,salon_chat_sdk_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("无法创建日志文件 debug.log");

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log");
}

/// 会话监听器（输出合并视图的每次变化）
struct CliChatListener;

#[async_trait::async_trait]
impl ChatListener for CliChatListener {
    async fn on_messages_changed(&self, messages_json: String) {
        info!("[CLI/Chat] 📨 合并视图更新: {}", messages_json);
    }

    async fn on_history_load_failed(&self, reason: String) {
        error!("[CLI/Chat] ⚠️ 历史消息加载失败（可重试）: {}", reason);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 沙龙聊天 CLI 客户端（测试模式）");
    info!("[CLI] 💬 对端用户ID: {}", args.peer);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    // 获取 token：命令行直接给的优先，否则登录换取
    let (user_id, token) = match (&args.token, args.user_id) {
        (Some(token), Some(user_id)) => (user_id, token.clone()),
        _ => {
            let email = args
                .email
                .clone()
                .ok_or_else(|| anyhow::anyhow!("缺少 --email（或改用 --token + --user-id）"))?;
            let password = args
                .password
                .clone()
                .ok_or_else(|| anyhow::anyhow!("缺少 --password"))?;

            info!("[CLI] 🔐 正在登录...");
            let login_resp = login_async(&args.api_url, email, password)
                .await
                .map_err(|e| anyhow::anyhow!("登录失败: {}", e))?;
            info!(
                "[CLI] ✅ 登录成功！用户ID: {}, 角色: {}",
                login_resp.user.id, login_resp.user.role
            );
            (login_resp.user.id, login_resp.token)
        }
    };

    // 创建实时存储客户端与会话同步器
    let store = Arc::new(RtdbMessageStore::new(RtdbConfig {
        base_url: args.store_url.clone(),
        ws_url: args.store_ws_url.clone(),
    }));

    let config = ConversationSyncerConfig {
        user_id,
        peer_id: args.peer,
        api_base_url: args.api_url.clone(),
        token: token.clone(),
    };
    let syncer = ConversationSyncer::with_listener(config, store.clone(), Arc::new(CliChatListener))?;

    info!("[CLI] 🔗 正在挂载会话同步器...");
    syncer.start().await;
    info!("[CLI] ✅ 挂载完成，会话 key: {}", syncer.conversation_key());

    // 可选：发送一条消息
    if let Some(body) = &args.send {
        let sender = MessageSender::new(store.clone(), args.api_url.clone(), &token, user_id)?;
        if sender.send(body, args.peer).await {
            info!("[CLI] 📤 消息发送成功: {}", body);
        } else {
            error!("[CLI] ❌ 消息发送失败，请重试: {}", body);
        }
    }

    info!("[CLI] 📥 开始监听消息...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
        syncer.stop();
        info!("[CLI] 👋 程序退出");
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        // 持续运行直到被中断
        loop {
            sleep(Duration::from_secs(3600)).await;
        }
    }

    Ok(())
}
