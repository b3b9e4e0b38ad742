//! Session management for per-document feature state.

pub mod manager;

pub use manager::{SessionEntry, SessionManager};
