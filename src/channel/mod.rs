//! Host control channel.
//!
//! One TCP connection per host, newline-delimited JSON in both directions.
//! The host authenticates with `hello`, then streams session notifications;
//! the orchestrator replies to each in order. Losing the connection ends the
//! host's lifetime.

pub mod codec;
pub mod protocol;
pub mod server;

use std::future::Future;
use std::pin::Pin;

use crate::events::EventSubscription;
use crate::models::host::HostId;
use crate::models::session::SessionDescriptor;
use crate::orchestrator::registry::AddOutcome;
use crate::Result;

/// Boxed future returned by [`HostCommands`] methods.
pub type CommandFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Operations a host may invoke, shared by the control channel and the
/// session HTTP surface.
pub trait HostCommands: Send + Sync {
    /// Host these commands act on.
    fn host(&self) -> &HostId;

    /// Shared secret the host must present.
    fn token(&self) -> &str;

    /// Announce (or re-announce) a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for an invalid descriptor and
    /// `AppError::NotFound` once the host is gone.
    fn announce(&self, descriptor: SessionDescriptor) -> CommandFuture<'_, AddOutcome>;

    /// Replace the descriptor of an existing session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is unknown.
    fn update(&self, id: String, descriptor: SessionDescriptor) -> CommandFuture<'_, ()>;

    /// Delete a session, stopping its process. Resolves to `false` when the
    /// id was unknown.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` once the host is gone.
    fn delete(&self, id: String) -> CommandFuture<'_, bool>;

    /// Attach a new event subscriber.
    fn subscribe(&self) -> EventSubscription;

    /// The control connection completed its handshake.
    fn connected(&self);

    /// The control connection is gone; the host lifetime ends.
    fn disconnected(&self, reason: &str);
}
