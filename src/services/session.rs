//! Host session
//!
//! One per content surface. Tracks the surface lifecycle and owns the single
//! bridge attached to it:
//!
//! `Uninitialized -> SurfaceCreated -> BridgeAttached -> ContentLoaded -> Running -> TornDown`
//!
//! Transitions only ever move one step forward; teardown is reachable from
//! any state but only once. There is no reconnect or rebind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::HostError;
use crate::models::{BridgeRequest, BridgeResponse};
use crate::services::bridge::{Bridge, Caller};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Uninitialized,
    SurfaceCreated,
    BridgeAttached,
    ContentLoaded,
    Running,
    TornDown,
}

impl SessionState {
    fn next(self) -> Option<SessionState> {
        match self {
            SessionState::Uninitialized => Some(SessionState::SurfaceCreated),
            SessionState::SurfaceCreated => Some(SessionState::BridgeAttached),
            SessionState::BridgeAttached => Some(SessionState::ContentLoaded),
            SessionState::ContentLoaded => Some(SessionState::Running),
            SessionState::Running => Some(SessionState::TornDown),
            SessionState::TornDown => None,
        }
    }

    /// Bridge calls are served once the bridge exists and until teardown.
    pub fn accepts_calls(self) -> bool {
        matches!(
            self,
            SessionState::BridgeAttached | SessionState::ContentLoaded | SessionState::Running
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::SurfaceCreated => "surface-created",
            SessionState::BridgeAttached => "bridge-attached",
            SessionState::ContentLoaded => "content-loaded",
            SessionState::Running => "running",
            SessionState::TornDown => "torn-down",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view served by the inspector.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: u64,
    pub state: SessionState,
    pub content_url: String,
    pub bridge: &'static str,
    pub pending_calls: usize,
    pub completed_calls: u64,
}

pub struct HostSession {
    id: u64,
    content_url: String,
    state: Mutex<SessionState>,
    bridge: OnceLock<Bridge>,
    /// Content navigations started so far. Call ids are scoped by this.
    page_loads: AtomicU64,
}

impl HostSession {
    /// Name the content context reaches the bridge under.
    pub const CAPABILITY: &'static str = "backend";

    pub fn new(content_url: impl Into<String>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            content_url: content_url.into(),
            state: Mutex::new(SessionState::Uninitialized),
            bridge: OnceLock::new(),
            page_loads: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn content_url(&self) -> &str {
        &self.content_url
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn surface_created(&self) -> Result<(), HostError> {
        self.advance(SessionState::SurfaceCreated)
    }

    /// Attach the session's one and only bridge.
    pub fn attach_bridge(&self, bridge: Bridge) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if *state != SessionState::SurfaceCreated {
            return Err(HostError::InvalidTransition {
                from: *state,
                to: SessionState::BridgeAttached,
            });
        }
        self.bridge
            .set(bridge)
            .map_err(|_| HostError::AlreadyAttached)?;

        log::info!(
            "[Session {}] {} -> {} ({})",
            self.id,
            *state,
            SessionState::BridgeAttached,
            Self::CAPABILITY
        );
        *state = SessionState::BridgeAttached;
        Ok(())
    }

    pub fn content_loaded(&self) -> Result<(), HostError> {
        self.advance(SessionState::ContentLoaded)
    }

    pub fn start(&self) -> Result<(), HostError> {
        self.advance(SessionState::Running)
    }

    /// A new document is replacing the content. Calls issued from here on
    /// belong to the returned page load.
    pub fn page_started(&self) -> u64 {
        self.page_loads.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn page_loads(&self) -> u64 {
        self.page_loads.load(Ordering::SeqCst)
    }

    /// Tear the session down and cancel whatever the bridge still has queued.
    pub fn tear_down(&self) -> Result<(), HostError> {
        {
            let mut state = self.state.lock();
            if *state == SessionState::TornDown {
                return Err(HostError::InvalidTransition {
                    from: SessionState::TornDown,
                    to: SessionState::TornDown,
                });
            }
            log::info!("[Session {}] {} -> {}", self.id, *state, SessionState::TornDown);
            *state = SessionState::TornDown;
        }

        if let Some(bridge) = self.bridge.get() {
            bridge.shutdown();
        }
        Ok(())
    }

    /// Route one request to the bridge. Always produces a response.
    pub async fn dispatch(&self, origin: &str, request: BridgeRequest) -> BridgeResponse {
        let state = self.state();
        match self.bridge.get() {
            Some(bridge) if state.accepts_calls() => {
                let caller = Caller::new(origin, self.page_loads());
                bridge.call(&caller, request).await
            }
            _ => BridgeResponse::new(
                request.call_id(),
                HostError::NotAccepting(state).render(),
            ),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let bridge = self.bridge.get();
        SessionSnapshot {
            id: self.id,
            state: self.state(),
            content_url: self.content_url.clone(),
            bridge: Self::CAPABILITY,
            pending_calls: bridge.map_or(0, Bridge::pending),
            completed_calls: bridge.map_or(0, Bridge::completed),
        }
    }

    fn advance(&self, to: SessionState) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.next() != Some(to) {
            return Err(HostError::InvalidTransition { from: *state, to });
        }
        log::info!("[Session {}] {} -> {}", self.id, *state, to);
        *state = to;
        Ok(())
    }
}
