//! Models module
//! Wire types exchanged with the content context over the bridge.
//! Everything here is serialized as JSON through Tauri IPC.

use serde::{Deserialize, Serialize};

/// Sentinel returned when a command printed nothing but whitespace.
pub const NO_OUTPUT: &str = "(No output)";

/// Identifier minted by the content-side script for each call.
pub type CallId = String;

/// What the host is asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// A full command line handed to the platform shell.
    Shell { line: String },
    /// A program run directly with an argument vector, no shell involved.
    Exec { program: String, args: Vec<String> },
}

impl CommandSpec {
    pub fn shell(line: impl Into<String>) -> Self {
        CommandSpec::Shell { line: line.into() }
    }

    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Human-readable rendering, used for logs and confirmation prompts.
    pub fn display(&self) -> String {
        match self {
            CommandSpec::Shell { line } => line.clone(),
            CommandSpec::Exec { program, args } if args.is_empty() => program.clone(),
            CommandSpec::Exec { program, args } => format!("{} {}", program, args.join(" ")),
        }
    }
}

/// Request sent by the content context.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeRequest {
    /// `backend.executeCommand(command)`
    ExecuteCommand { call_id: CallId, command: String },
    /// `backend.run(program, args)`
    Run {
        call_id: CallId,
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// `backend.cancel(target)`
    Cancel { call_id: CallId, target: CallId },
}

impl BridgeRequest {
    pub fn call_id(&self) -> &str {
        match self {
            BridgeRequest::ExecuteCommand { call_id, .. }
            | BridgeRequest::Run { call_id, .. }
            | BridgeRequest::Cancel { call_id, .. } => call_id,
        }
    }
}

/// Response delivered back for every request, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeResponse {
    pub call_id: CallId,
    pub output: String,
}

impl BridgeResponse {
    pub fn new(call_id: impl Into<CallId>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}
