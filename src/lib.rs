#![forbid(unsafe_code)]

//! Session orchestration for local development hosts.
//!
//! An application host connects over a control channel and announces the
//! sessions it wants running (projects, executables, containers). The
//! orchestrator records them, launches and supervises one process per
//! session, and streams lifecycle and output events back to listeners.

pub mod channel;
pub mod config;
pub mod errors;
pub mod events;
pub mod http;
pub mod launcher;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::{HostSpec, Orchestrator};
