//! Bridge command
//! The single IPC handler behind `window.backend`
//! Called from the injected script via: invoke("bridge_call", { request })

use std::sync::Arc;

use tauri::{State, Webview};

use crate::models::{BridgeRequest, BridgeResponse};
use crate::services::policy::origin_of;
use crate::services::HostSession;

/// Run one bridge request for the calling webview.
///
/// Always resolves: failures are carried as `"Error: ..."` text in the
/// response, never as a rejected invoke.
#[tauri::command]
pub async fn bridge_call(
    webview: Webview,
    session: State<'_, Arc<HostSession>>,
    request: BridgeRequest,
) -> Result<BridgeResponse, String> {
    let origin = match webview.url() {
        Ok(url) => origin_of(url.as_str()).unwrap_or_else(|| url.to_string()),
        Err(e) => {
            log::warn!("[Bridge] could not read webview url: {}", e);
            "null".to_string()
        }
    };

    Ok(session.dispatch(&origin, request).await)
}
