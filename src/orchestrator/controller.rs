//! [`HostCommands`] backed by the orchestrator, one per host.

use crate::channel::{CommandFuture, HostCommands};
use crate::events::EventSubscription;
use crate::models::host::HostId;
use crate::models::session::SessionDescriptor;

use super::registry::AddOutcome;
use super::Orchestrator;

/// Routes control channel and HTTP requests for one host into the
/// orchestrator.
#[derive(Clone)]
pub struct HostController {
    orchestrator: Orchestrator,
    host: HostId,
    token: String,
}

impl HostController {
    /// Bind a controller to `host`.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, host: HostId, token: String) -> Self {
        Self {
            orchestrator,
            host,
            token,
        }
    }
}

impl HostCommands for HostController {
    fn host(&self) -> &HostId {
        &self.host
    }

    fn token(&self) -> &str {
        &self.token
    }

    fn announce(&self, descriptor: SessionDescriptor) -> CommandFuture<'_, AddOutcome> {
        Box::pin(self.orchestrator.announce_session(&self.host, descriptor))
    }

    fn update(&self, id: String, descriptor: SessionDescriptor) -> CommandFuture<'_, ()> {
        Box::pin(async move {
            self.orchestrator
                .update_session(&self.host, &id, descriptor)
                .await
                .map(|_| ())
        })
    }

    fn delete(&self, id: String) -> CommandFuture<'_, bool> {
        Box::pin(async move { self.orchestrator.delete_session(&self.host, &id).await })
    }

    fn subscribe(&self) -> EventSubscription {
        self.orchestrator.subscribe()
    }

    fn connected(&self) {
        self.orchestrator.set_connected(&self.host, true);
    }

    fn disconnected(&self, reason: &str) {
        tracing::info!(host = %self.host, reason, "control connection lost, tearing host down");
        let orchestrator = self.orchestrator.clone();
        let host = self.host.clone();
        // The channel task is torn down by this removal, so it cannot await it.
        tokio::spawn(async move {
            orchestrator.remove_host(&host).await;
        });
    }
}
