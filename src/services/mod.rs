//! Services module
//! The bridge core: command execution, policy, transport, session lifecycle
//! and the remote-inspection endpoint. None of it depends on Tauri.

pub mod bridge;
pub mod executor;
pub mod inspector;
pub mod policy;
pub mod session;

pub use bridge::Bridge;
pub use executor::CommandExecutor;
pub use inspector::Inspector;
pub use policy::{CommandPolicy, Confirmer, PolicyMode};
pub use session::{HostSession, SessionState};
