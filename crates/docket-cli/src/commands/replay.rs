//! `docket replay`: drives a full session over the loopback transport.
//!
//! Script format, one JSON object per line (blank lines and `#` comments skipped):
//!
//! ```text
//! {"event": "new_emails", "payload": {"count": 1, "emails": [...], "timestamp": "..."}}
//! {"action": "mark_read", "email_id": "12"}
//! {"disconnect": true}
//! {"reconnect": true}
//! {"sleep_ms": 500}
//! ```

use anyhow::{Context, Result};
use docket_application::{NotificationSession, NotificationSessionManager};
use docket_core::config::NotificationConfig;
use docket_core::event::RawEvent;
use docket_core::toast::Toast;
use docket_core::unread::UnreadCounts;
use docket_infrastructure::{HttpChatApi, LoopbackServer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Pause after each step so the session's reader can drain.
const STEP_SETTLE: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptAction {
    MarkRead,
    MarkUnread,
    Delete,
    Archive,
    JoinRoom,
    LeaveRoom,
    RequestCount,
    MarkConversationRead,
    DismissAll,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    Action {
        action: ScriptAction,
        #[serde(default)]
        email_id: Option<String>,
        #[serde(default)]
        room: Option<String>,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Disconnect {
        disconnect: bool,
    },
    Reconnect {
        reconnect: bool,
    },
    Sleep {
        sleep_ms: u64,
    },
}

/// State of the session after the script ran.
#[derive(Debug, Serialize)]
pub struct ReplaySummary {
    pub user_id: String,
    pub connected: bool,
    pub unread: UnreadCounts,
    pub toasts: Vec<Toast>,
    pub failed_actions: usize,
}

pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>> {
    content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            serde_json::from_str(line).with_context(|| format!("script line {number}: {line}"))
        })
        .collect()
}

pub async fn run(
    config: &NotificationConfig,
    script: &Path,
    user: &str,
    chat_api: Option<&str>,
) -> Result<()> {
    let content = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read {}", script.display()))?;
    let steps = parse_script(&content)?;

    let summary = replay(config, &steps, user, chat_api).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub async fn replay(
    config: &NotificationConfig,
    steps: &[ScriptStep],
    user: &str,
    chat_api: Option<&str>,
) -> Result<ReplaySummary> {
    let server = LoopbackServer::new();
    let mut manager = NotificationSessionManager::new(config.clone(), Arc::new(server.connector()));
    if let Some(base_url) = chat_api {
        manager = manager.with_chat_source(Arc::new(HttpChatApi::new(base_url)));
    }

    let session = manager.open(user).await?;
    info!("[Replay] {} step(s) for {}", steps.len(), user);

    let mut failed_actions = 0;
    for step in steps {
        if let Err(e) = apply(&server, &session, step).await {
            warn!("[Replay] {}", e);
            failed_actions += 1;
        }
        tokio::time::sleep(STEP_SETTLE).await;
    }

    let summary = ReplaySummary {
        user_id: session.user_id().to_string(),
        connected: session.health().poll_now(),
        unread: session.context().unread().snapshot(),
        toasts: session.visible_toasts(),
        failed_actions,
    };
    manager.close().await;
    Ok(summary)
}

async fn apply(
    server: &LoopbackServer,
    session: &NotificationSession,
    step: &ScriptStep,
) -> docket_core::Result<()> {
    match step {
        ScriptStep::Event { event, payload } => {
            server.push(session.user_id(), RawEvent::new(event.clone(), payload.clone()));
        }
        ScriptStep::Disconnect { disconnect: true } => {
            server.drop_connections();
        }
        ScriptStep::Reconnect { reconnect: true } => {
            session.force_reconnect().await;
        }
        ScriptStep::Disconnect { .. } | ScriptStep::Reconnect { .. } => {}
        ScriptStep::Sleep { sleep_ms } => {
            tokio::time::sleep(Duration::from_millis(*sleep_ms)).await;
        }
        ScriptStep::Action {
            action,
            email_id,
            room,
            conversation_id,
        } => {
            let email = email_id.as_deref().unwrap_or_default();
            let room = room.as_deref().unwrap_or_default();
            match action {
                ScriptAction::MarkRead => session.mark_email_read(email).await?,
                ScriptAction::MarkUnread => session.mark_email_unread(email).await?,
                ScriptAction::Delete => session.delete_email(email).await?,
                ScriptAction::Archive => session.archive_email(email).await?,
                ScriptAction::JoinRoom => session.join_room(room).await?,
                ScriptAction::LeaveRoom => session.leave_room(room).await?,
                ScriptAction::RequestCount => session.request_email_count().await?,
                ScriptAction::MarkConversationRead => {
                    let conversation = conversation_id.as_deref().unwrap_or_default();
                    session.mark_conversation_read(conversation).await?
                }
                ScriptAction::DismissAll => {
                    session.dismiss_all_toasts();
                }
            }
        }
    }
    Ok(())
}
