//! Commands module
//! Tauri IPC handlers, the boundary between the content surface and the host

pub mod bridge;
