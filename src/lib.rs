//! Graphite host
//! Desktop shell that embeds the Graphite web surface and exposes one host
//! capability to it, `backend.executeCommand`, through a typed message bridge.
//!
//! Module structure:
//! - services: executor, policy, bridge transport, session lifecycle, inspector
//! - models: wire types shared with the content context
//! - config / error: startup configuration and the host error type
//! - commands, surface: Tauri wiring (`desktop` feature)

pub mod config;
pub mod error;
pub mod models;
pub mod services;

#[cfg(feature = "desktop")]
mod commands;
#[cfg(feature = "desktop")]
mod surface;

pub use config::HostConfig;
pub use error::HostError;

#[cfg(feature = "desktop")]
pub use desktop::run;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Arc;

    use anyhow::Context;
    use tauri::RunEvent;

    use crate::commands;
    use crate::config::HostConfig;
    use crate::services::{Bridge, CommandExecutor, HostSession, Inspector};
    use crate::surface::{self, DialogConfirmer};

    /// Bring the host up and drive the event loop. Returns the loop's exit code.
    pub fn run(config: HostConfig) -> anyhow::Result<i32> {
        // Inspection port comes up before any surface exists
        let inspector = tauri::async_runtime::block_on(Inspector::launch(&config))
            .with_context(|| format!("failed to open inspection port {}", config.inspect_port))?;

        let policy = config.load_policy()?;
        let executor = CommandExecutor::for_home(config.command_timeout())?;

        let session = Arc::new(HostSession::new(config.content_url()?.as_str()));
        let session_for_setup = session.clone();
        let session_for_shutdown = session.clone();

        let level = if config.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };

        let app = tauri::Builder::default()
            .plugin(tauri_plugin_log::Builder::default().level(level).build())
            .plugin(tauri_plugin_dialog::init())
            .manage(session)
            .setup(move |app| {
                let session = session_for_setup;
                log::info!(
                    "Bridge policy {:?}, commands run in {}",
                    policy.mode(),
                    executor.working_dir().display()
                );
                surface::create(app, &config, &session)?;

                let confirmer = Arc::new(DialogConfirmer::new(app.handle().clone()));
                let bridge = tauri::async_runtime::block_on(async move {
                    Bridge::spawn(executor, policy, confirmer)
                });
                session.attach_bridge(bridge)?;

                if let Some(inspector) = inspector {
                    tauri::async_runtime::spawn(inspector.serve(session.clone()));
                }
                Ok(())
            })
            .invoke_handler(tauri::generate_handler![commands::bridge::bridge_call])
            .build(tauri::generate_context!())
            .context("error while building tauri application")?;

        let exit_code = app.run_return(move |_app_handle, event| {
            if let RunEvent::Exit = event {
                log::info!("App shutting down - tearing down bridge session");
                if let Err(e) = session_for_shutdown.tear_down() {
                    log::debug!("{}", e);
                }
            }
        });

        Ok(exit_code)
    }
}
