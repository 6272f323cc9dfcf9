//! `docket listen`: opens a live session against the configured server and
//! prints one JSON line per observable change until Ctrl-C.

use anyhow::Result;
use docket_application::NotificationSessionManager;
use docket_core::config::NotificationConfig;
use docket_core::notification::CorrelationKey;
use docket_core::toast::{DismissReason, Toast, ToastEvent};
use docket_core::unread::UnreadCounts;
use docket_infrastructure::{HttpChatApi, SocketIoConnector};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListenLine {
    Connectivity {
        connected: bool,
    },
    Unread {
        counts: UnreadCounts,
    },
    ToastShown {
        toast: Toast,
    },
    ToastDismissed {
        key: CorrelationKey,
        id: u64,
        reason: DismissReason,
    },
    ToastsCleared {
        count: usize,
    },
}

impl From<ToastEvent> for ListenLine {
    fn from(event: ToastEvent) -> Self {
        match event {
            ToastEvent::Shown(toast) => ListenLine::ToastShown { toast },
            ToastEvent::Dismissed { key, id, reason } => {
                ListenLine::ToastDismissed { key, id, reason }
            }
            ToastEvent::Cleared { count } => ListenLine::ToastsCleared { count },
        }
    }
}

fn emit(line: &ListenLine) -> Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

pub async fn run(config: &NotificationConfig, user: &str, chat_api: Option<&str>) -> Result<()> {
    let chat = match chat_api {
        Some(base_url) => HttpChatApi::new(base_url),
        None => HttpChatApi::from_endpoint(&config.endpoint),
    };
    let manager = NotificationSessionManager::new(config.clone(), Arc::new(SocketIoConnector::new()))
        .with_chat_source(Arc::new(chat));

    let session = manager.open(user).await?;
    info!("[Listen] Session open for {} at {}", user, config.endpoint.url());

    let mut connectivity = session.subscribe_connectivity();
    let mut unread = session.subscribe_unread();
    let mut toasts = session.subscribe_toasts();

    emit(&ListenLine::Connectivity {
        connected: *connectivity.borrow_and_update(),
    })?;
    emit(&ListenLine::Unread {
        counts: unread.borrow_and_update().clone(),
    })?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("[Listen] Interrupted");
                break;
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *connectivity.borrow_and_update();
                emit(&ListenLine::Connectivity { connected })?;
            }
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                let counts = unread.borrow_and_update().clone();
                emit(&ListenLine::Unread { counts })?;
            }
            event = toasts.recv() => match event {
                Ok(event) => emit(&ListenLine::from(event))?,
                Err(RecvError::Lagged(missed)) => warn!("[Listen] Skipped {} toast event(s)", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.close().await;
    Ok(())
}
