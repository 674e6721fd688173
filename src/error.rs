//! Host errors
//! Everything that can go wrong between a bridge call arriving and its result
//! being produced. None of these cross the bridge as errors: `render` turns
//! them into the `"Error: ..."` text the content context receives.

use std::time::Duration;

use crate::services::session::SessionState;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read command output: {0}")]
    Io(#[from] std::io::Error),

    #[error("home directory could not be determined")]
    HomeUnavailable,

    #[error("command timed out after {0:?}")]
    TimedOut(Duration),

    #[error("command cancelled")]
    Cancelled,

    #[error("command not permitted: {0}")]
    Denied(String),

    #[error("invalid session transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("session is not accepting calls ({0})")]
    NotAccepting(SessionState),

    #[error("bridge already attached to this session")]
    AlreadyAttached,

    #[error("bridge is closed")]
    BridgeClosed,

    #[error("call `{0}` is already in flight")]
    DuplicateCall(String),

    #[error("no pending call `{0}`")]
    UnknownCall(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HostError {
    /// Text form handed back across the bridge.
    pub fn render(&self) -> String {
        format!("Error: {}", self)
    }
}
