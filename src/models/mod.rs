//! Domain model module declarations.

pub mod event;
pub mod host;
pub mod session;
