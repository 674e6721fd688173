//! Startup configuration
//!
//! Parsed once in `main` and passed by value into the session. Nothing here
//! changes after launch.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use url::Url;

use crate::error::HostError;
use crate::services::inspector::DEFAULT_INSPECT_PORT;
use crate::services::policy::{origin_of, CommandPolicy, PolicyMode};

/// Content the surface loads at startup.
pub const DEFAULT_CONTENT_URL: &str = "http://localhost:5173";

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Parser)]
#[command(name = "graphite-host", version, about = "Graphite desktop host")]
pub struct HostConfig {
    /// Open the remote-inspection port and enable WebView devtools
    #[arg(long)]
    pub debug: bool,

    /// Port for remote inspection (only used with --debug)
    #[arg(long, env = "GRAPHITE_INSPECT_PORT", default_value_t = DEFAULT_INSPECT_PORT)]
    pub inspect_port: u16,

    /// Content location loaded into the surface
    #[arg(long, env = "GRAPHITE_URL", default_value = DEFAULT_CONTENT_URL)]
    pub url: String,

    /// TOML file with the command policy
    #[arg(long, env = "GRAPHITE_POLICY")]
    pub policy: Option<PathBuf>,

    /// Seconds a bridged command may run; 0 waits forever
    #[arg(long, default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout: u64,

    /// Borderless fullscreen window
    #[arg(long)]
    pub fullscreen: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            debug: false,
            inspect_port: DEFAULT_INSPECT_PORT,
            url: DEFAULT_CONTENT_URL.to_string(),
            policy: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT_SECS,
            fullscreen: false,
            verbose: false,
        }
    }
}

impl HostConfig {
    /// Loopback address for the inspector, `None` without `--debug`.
    pub fn inspector_addr(&self) -> Option<SocketAddr> {
        self.debug
            .then(|| SocketAddr::from((Ipv4Addr::LOCALHOST, self.inspect_port)))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout > 0).then(|| Duration::from_secs(self.command_timeout))
    }

    pub fn content_url(&self) -> Result<Url, HostError> {
        Url::parse(&self.url)
            .map_err(|e| HostError::Config(format!("invalid url `{}`: {}", self.url, e)))
    }

    /// Policy from `--policy`, or the default (confirm every command) when
    /// no file is given. Origins default to the content location's.
    pub fn load_policy(&self) -> Result<CommandPolicy, HostError> {
        let file = match &self.policy {
            Some(path) => PolicyFile::load(path)?,
            None => PolicyFile::default(),
        };
        file.into_policy(&self.content_url()?)
    }
}

/// On-disk policy.
///
/// ```toml
/// mode = "allow-list"
/// allowed_programs = ["ls", "git"]
/// allowed_origins = ["http://localhost:5173"]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyFile {
    pub mode: PolicyMode,
    pub allowed_programs: Vec<String>,
    pub allowed_origins: Vec<String>,
}

impl PolicyFile {
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text).map_err(|e| match e {
            HostError::Config(msg) => HostError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self, HostError> {
        toml::from_str(text).map_err(|e| HostError::Config(e.to_string()))
    }

    /// Without `allowed_origins` the content location's origin is the only
    /// one allowed. A content location without a host has no such origin, so
    /// the origins must then be listed.
    pub fn into_policy(self, content_url: &Url) -> Result<CommandPolicy, HostError> {
        let origins = if self.allowed_origins.is_empty() {
            let origin = origin_of(content_url.as_str()).ok_or_else(|| {
                HostError::Config(format!(
                    "`{}` has no origin to allow; list allowed_origins in a policy file",
                    content_url
                ))
            })?;
            vec![origin]
        } else {
            self.allowed_origins
        };

        Ok(CommandPolicy::new(self.mode)
            .with_allowed_programs(self.allowed_programs)
            .with_allowed_origins(origins))
    }
}
