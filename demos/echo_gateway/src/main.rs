//! Echo Gateway Example
//!
//! Serves a console "platform" account over OneBot v11 and v12. Every line
//! typed on stdin becomes a private message from `console_user`; every
//! message a bot sends is printed back.
//!
//! Point any OneBot implementation-side client at the gateway:
//!
//! ```text
//! HTTP        http://127.0.0.1:5700/console/10000/onebot/v11/send_private_msg
//! forward WS  ws://127.0.0.1:5700/console/10000/onebot/v12
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-gateway -- --port 5700
//! cargo run --package echo-gateway -- --config onegate.toml --print-config
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use onegate::prelude::*;
use onegate::core::MessageScene;
use onegate::runtime::config::{ConfigLoader, load_config_from_file, render_config};

const USER_ID: &str = "console_user";

#[derive(Parser, Debug)]
#[command(name = "echo-gateway", about = "Console-backed OneBot gateway")]
struct Args {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Account id of the console account.
    #[arg(long, default_value = "10000")]
    account: String,

    /// Listener port, overriding the configuration.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

// ============================================================================
// Console Connector
// ============================================================================

/// A platform that lives in the terminal.
struct ConsoleConnector {
    self_id: String,
    next_id: AtomicU64,
    history: Mutex<Vec<MessageInfo>>,
}

impl ConsoleConnector {
    fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            next_id: AtomicU64::new(1),
            history: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, scene: MessageScene, sender: &str, message: Message) -> MessageInfo {
        let info = MessageInfo {
            message_id: format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            time: now(),
            scene,
            sender: Sender::new(sender),
            group_id: None,
            message,
        };
        self.history.lock().push(info.clone());
        info
    }

    /// Turns a typed line into a message event.
    fn incoming(&self, line: &str) -> CommonEvent {
        let info = self.record(MessageScene::Private, USER_ID, Message::from(line));
        CommonEvent::message(
            "console",
            &self.self_id,
            MessageEvent::private(
                info.message_id,
                Sender::new(USER_ID).nickname("Console"),
                info.message,
            ),
        )
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[async_trait]
impl Connector for ConsoleConnector {
    fn platform(&self) -> &str {
        "console"
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send_message(
        &self,
        target: MessageTarget,
        message: Message,
    ) -> ConnectorResult<MessageReceipt> {
        if !matches!(&target, MessageTarget::Private { user_id } if user_id == USER_ID) {
            return Err(ConnectorError::Rejected(format!(
                "the console only reaches {USER_ID}"
            )));
        }
        println!("<< {message}");
        let info = self.record(target.scene(), &self.self_id, message);
        Ok(MessageReceipt {
            message_id: info.message_id,
            time: Some(info.time),
        })
    }

    async fn delete_message(&self, message_id: &str) -> ConnectorResult<()> {
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|m| m.message_id != message_id);
        if history.len() == before {
            return Err(ConnectorError::NotFound {
                kind: "message",
                id: message_id.to_string(),
            });
        }
        println!("-- message {message_id} deleted");
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> ConnectorResult<MessageInfo> {
        self.history
            .lock()
            .iter()
            .find(|m| m.message_id == message_id)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound {
                kind: "message",
                id: message_id.to_string(),
            })
    }

    async fn get_self_info(&self) -> ConnectorResult<UserInfo> {
        Ok(UserInfo {
            user_id: self.self_id.clone(),
            nickname: "Echo Gateway".into(),
            ..UserInfo::default()
        })
    }

    async fn get_user(&self, user_id: &str) -> ConnectorResult<UserInfo> {
        if user_id != USER_ID {
            return Err(ConnectorError::NotFound {
                kind: "user",
                id: user_id.to_string(),
            });
        }
        Ok(UserInfo {
            user_id: USER_ID.into(),
            nickname: "Console".into(),
            ..UserInfo::default()
        })
    }

    async fn list_friends(&self) -> ConnectorResult<Vec<UserInfo>> {
        Ok(vec![self.get_user(USER_ID).await?])
    }
}

// ============================================================================
// Main
// ============================================================================

fn load(args: &Args) -> Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ConfigLoader::new().with_current_dir().load()?,
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if config.general.is_empty() {
        config.general.insert("onebot.v11".into(), json!({}));
        config.general.insert("onebot.v12".into(), json!({}));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load(&args)?;

    if args.print_config {
        print!("{}", render_config(&config, "toml")?);
        return Ok(());
    }

    let gateway = Gateway::builder()
        .config(config)
        .registry(default_registry())
        .build()?;

    let connector = Arc::new(ConsoleConnector::new(&args.account));
    let account = gateway.add_account(connector.clone()).await?;
    gateway.start_all().await?;

    for instance in account.instances() {
        info!(protocol = %instance.key(), path = %instance.path(), "Serving");
    }
    println!("Type a message and press enter. Ctrl+C or EOF to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match gateway.dispatch(connector.incoming(line)).await {
                    Ok(0) => warn!("No transport received the message"),
                    Ok(count) => info!(transports = count, "Message delivered"),
                    Err(e) => warn!(error = %e, "Dispatch failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    gateway.stop_all().await?;
    Ok(())
}
