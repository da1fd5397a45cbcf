//! Built-in session behaviors and the mapping from configuration to
//! mounted services.

use async_trait::async_trait;
use tracing::warn;

use wshub_core::config::AppConfig;
use wshub_core::error::AppError;
use wshub_realtime::{CloseArgs, Message, ServiceManager, SessionBehavior, SessionContext};

/// Sends every message back to its sender.
#[derive(Debug, Default)]
pub struct Echo;

#[async_trait]
impl SessionBehavior for Echo {
    async fn on_message(&mut self, ctx: &SessionContext, message: Message) {
        if let Err(e) = ctx.send(message).await {
            warn!(session_id = %ctx.id(), error = %e, "Echo failed");
        }
    }
}

/// Relays every text message to all sessions of the service, tagged with
/// the sender's id.
#[derive(Debug, Default)]
pub struct Chat;

impl Chat {
    async fn announce(ctx: &SessionContext, text: String) {
        if let Err(e) = ctx.sessions().broadcast_message(Message::Text(text)).await {
            warn!(session_id = %ctx.id(), error = %e, "Chat broadcast failed");
        }
    }
}

#[async_trait]
impl SessionBehavior for Chat {
    async fn on_open(&mut self, ctx: &SessionContext) {
        Self::announce(ctx, format!("{} joined", ctx.id())).await;
    }

    async fn on_message(&mut self, ctx: &SessionContext, message: Message) {
        match message {
            Message::Text(text) => Self::announce(ctx, format!("{}: {text}", ctx.id())).await,
            Message::Binary(_) => warn!(session_id = %ctx.id(), "Chat ignores binary messages"),
        }
    }

    async fn on_close(&mut self, ctx: &SessionContext, _close: &CloseArgs) {
        Self::announce(ctx, format!("{} left", ctx.id())).await;
    }
}

/// Build a service manager with every service named in `config`.
pub fn build_services(config: &AppConfig) -> Result<ServiceManager, AppError> {
    let manager = ServiceManager::new(config.sessions.clone());
    for mount in &config.server.services {
        match mount.behavior.as_str() {
            "echo" => manager.add_service(&mount.path, || Echo)?,
            "chat" => manager.add_service(&mount.path, || Chat)?,
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown behavior '{other}' for service '{}'",
                    mount.path
                )));
            }
        };
    }
    Ok(manager)
}
