//! Command policy
//!
//! Gate in front of the executor. Every bridge call is checked against the
//! caller's origin and the configured mode before anything is spawned.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::models::CommandSpec;

/// Characters that let a shell line do more than run one program.
const SHELL_CONTROL: &[char] = &[
    ';', '&', '|', '$', '`', '<', '>', '(', ')', '{', '}', '\n', '\r',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    /// Everything from an allowed origin runs.
    Unrestricted,
    /// Only listed programs run; anything else is refused.
    AllowList,
    /// Every command waits for the user to approve it.
    #[default]
    Confirm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Confirm,
    Deny(String),
}

#[derive(Debug, Clone)]
pub struct CommandPolicy {
    mode: PolicyMode,
    allowed_programs: HashSet<String>,
    /// Serialized origins; empty means any origin.
    allowed_origins: Vec<String>,
}

impl CommandPolicy {
    pub fn new(mode: PolicyMode) -> Self {
        Self {
            mode,
            allowed_programs: HashSet::new(),
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_allowed_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_programs = programs.into_iter().map(Into::into).collect();
        self
    }

    /// Entries that do not parse as URLs are kept verbatim.
    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_origins = origins
            .into_iter()
            .map(|origin| {
                let origin = origin.as_ref();
                origin_of(origin).unwrap_or_else(|| origin.to_string())
            })
            .collect();
        self
    }

    pub fn mode(&self) -> PolicyMode {
        self.mode
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    pub fn evaluate(&self, origin: &str, spec: &CommandSpec) -> Verdict {
        if !self.origin_allowed(origin) {
            return Verdict::Deny(format!("origin `{}` is not allowed", origin));
        }

        match self.mode {
            PolicyMode::Unrestricted => Verdict::Allow,
            PolicyMode::Confirm => Verdict::Confirm,
            PolicyMode::AllowList => match program_of(spec) {
                Ok(program) if self.allowed_programs.contains(program) => Verdict::Allow,
                Ok(program) => Verdict::Deny(format!("`{}` is not on the allow list", program)),
                Err(reason) => Verdict::Deny(reason),
            },
        }
    }

    fn origin_allowed(&self, origin: &str) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        let origin = origin_of(origin).unwrap_or_else(|| origin.to_string());
        self.allowed_origins.iter().any(|allowed| *allowed == origin)
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(PolicyMode::default())
    }
}

/// `scheme://host[:port]` of a URL, `None` if it does not parse or has no
/// host. Custom schemes (`tauri://localhost`) are kept as written instead of
/// collapsing to the opaque `null` origin.
pub fn origin_of(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let origin = url.origin();
    if origin.is_tuple() {
        return Some(origin.ascii_serialization());
    }

    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// The program a spec would start, refusing shell lines that chain or
/// redirect.
fn program_of(spec: &CommandSpec) -> Result<&str, String> {
    match spec {
        CommandSpec::Exec { program, .. } => Ok(program.as_str()),
        CommandSpec::Shell { line } => {
            if let Some(c) = line.chars().find(|c| SHELL_CONTROL.contains(c)) {
                return Err(format!(
                    "shell control character `{}` is not allowed",
                    c.escape_default()
                ));
            }
            line.split_whitespace()
                .next()
                .ok_or_else(|| "empty command".to_string())
        }
    }
}

/// Interactive approval for `Verdict::Confirm`.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, origin: &str, spec: &CommandSpec) -> bool;
}

/// Used when nobody is there to ask.
pub struct DenyAll;

#[async_trait]
impl Confirmer for DenyAll {
    async fn confirm(&self, _origin: &str, _spec: &CommandSpec) -> bool {
        false
    }
}
