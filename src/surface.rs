//! Content surface
//!
//! Builds the main window around the content webview, injects the
//! content-side half of the bridge, and moves the session forward as the
//! surface comes up.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tauri::ipc::CapabilityBuilder;
use tauri::webview::PageLoadEvent;
use tauri::{App, AppHandle, Manager, WebviewUrl, WebviewWindowBuilder};
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};
use tokio::sync::oneshot;

use crate::config::HostConfig;
use crate::models::CommandSpec;
use crate::services::{Confirmer, HostSession, SessionState};

/// Defines `window.backend` inside the content context.
const INIT_SCRIPT: &str = include_str!("../assets/init.js");

pub const MAIN_WINDOW: &str = "main";

/// Create the window and webview. Leaves the session in `SurfaceCreated`.
pub fn create(
    app: &mut App,
    config: &HostConfig,
    session: &Arc<HostSession>,
) -> anyhow::Result<()> {
    let url = config.content_url()?;
    let session_for_load = session.clone();

    // IPC from a remote page needs an explicit grant for that page's URL.
    app.add_capability(
        CapabilityBuilder::new("content")
            .remote(format!("{}/*", url.origin().ascii_serialization()))
            .window(MAIN_WINDOW)
            .permission("core:app:default"),
    )
    .context("failed to grant IPC access to the content url")?;

    let content = WebviewUrl::External(url.clone());
    let mut builder = WebviewWindowBuilder::new(app, MAIN_WINDOW, content)
        .title("Graphite")
        .inner_size(1280.0, 720.0)
        .initialization_script(INIT_SCRIPT)
        .devtools(config.debug)
        .on_page_load(move |_webview, payload| {
            if matches!(payload.event(), PageLoadEvent::Started) {
                let page = session_for_load.page_started();
                log::debug!("[Surface] Page load {} started: {}", page, payload.url());
                return;
            }
            // First load brings the session up; later loads are navigation
            // inside the content and leave it as it is.
            if session_for_load.state() == SessionState::BridgeAttached {
                let started = session_for_load
                    .content_loaded()
                    .and_then(|()| session_for_load.start());
                if let Err(e) = started {
                    log::error!("[Surface] {}", e);
                }
            }
            log::info!("[Surface] Loaded {}", payload.url());
        });

    if config.fullscreen {
        builder = builder.fullscreen(true).decorations(false);
    }

    builder
        .build()
        .with_context(|| format!("failed to create surface for {}", url))?;
    session.surface_created()?;

    log::info!("[Surface] Created window `{}` for {}", MAIN_WINDOW, url);
    Ok(())
}

/// Asks the user through a native dialog before a command runs.
pub struct DialogConfirmer {
    app: AppHandle,
}

impl DialogConfirmer {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

#[async_trait]
impl Confirmer for DialogConfirmer {
    async fn confirm(&self, origin: &str, spec: &CommandSpec) -> bool {
        let (tx, rx) = oneshot::channel();

        self.app
            .dialog()
            .message(format!("{} wants to run:\n\n{}", origin, spec.display()))
            .title("Run command?")
            .kind(MessageDialogKind::Warning)
            .buttons(MessageDialogButtons::OkCancelCustom(
                "Run".to_string(),
                "Deny".to_string(),
            ))
            .show(move |approved| {
                let _ = tx.send(approved);
            });

        // Dialog closed without an answer counts as a refusal
        rx.await.unwrap_or(false)
    }
}
