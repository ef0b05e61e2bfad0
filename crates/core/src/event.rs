//! Domain event system — decoupled communication between pipeline stages.
//!
//! Events are published when something interesting happens in the session.
//! Persistence and diagnostics subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::ErrorKind;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The document store accepted a new document
    DocumentCommitted {
        /// The full committed text (already validated)
        text: String,
        kernel_changed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A fresh kernel instance became current
    KernelReloaded {
        generation: u64,
        bindings: usize,
        timestamp: DateTime<Utc>,
    },

    /// A kernel failed to load; the previous instance stays in service
    ReloadFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage rejected a proposal; nothing was committed
    ProposalRejected {
        kind: ErrorKind,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A collaborator request was dispatched
    GatewayRequested {
        ticket: u64,
        timestamp: DateTime<Utc>,
    },

    /// A collaborator reply came back
    GatewayCompleted {
        ticket: u64,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A reply arrived after its invocation was cancelled
    ReplyDiscarded {
        ticket: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
