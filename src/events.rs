//! Event fan-out.
//!
//! [`EventBus`] is a multi-consumer broadcast of [`SessionEvent`]s. Every
//! subscriber gets an independent cursor starting at subscribe time and a
//! bounded queue; a subscriber that falls behind loses its oldest events
//! while producers and other subscribers carry on unaffected.
//!
//! [`EventSink`] is the producer side bound to one host. It drops events for
//! sessions that are no longer in the registry instead of queueing them.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use crate::models::event::{EventKind, SessionEvent};
use crate::models::host::HostId;
use crate::orchestrator::registry::SessionRegistry;

/// Broadcast hub shared by every producer and subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<SessionEvent>>,
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Never blocks; returns how many subscribers were
    /// attached at the time.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }

    /// Attach a new subscriber. It sees only events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }
}

/// One subscriber's cursor into the bus.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<Arc<SessionEvent>>,
    dropped: u64,
}

impl EventSubscription {
    /// Wait for the next event. Lag is absorbed by skipping to the oldest
    /// retained event; returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<SessionEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    debug!(skipped, "event subscriber lagged, oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Arc<SessionEvent>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.dropped += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Total events this subscriber lost to backpressure.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Host-scoped producer that only emits for sessions still registered.
#[derive(Debug, Clone)]
pub struct EventSink {
    host: HostId,
    bus: EventBus,
    registry: SessionRegistry,
}

impl EventSink {
    /// Bind a sink to `host`.
    #[must_use]
    pub fn new(host: HostId, bus: EventBus, registry: SessionRegistry) -> Self {
        Self {
            host,
            bus,
            registry,
        }
    }

    /// Host this sink emits for.
    #[must_use]
    pub fn host(&self) -> &HostId {
        &self.host
    }

    /// Emit an event for `session_id`; returns `false` when the session is
    /// gone and the event was dropped.
    pub fn emit(&self, session_id: &str, kind: EventKind) -> bool {
        if !self.registry.contains(&self.host, session_id) {
            debug!(
                host = %self.host,
                session_id,
                event = kind.type_name(),
                "dropping event for unregistered session"
            );
            return false;
        }
        self.bus
            .publish(SessionEvent::new(self.host.clone(), session_id, kind));
        true
    }
}
