//! Event bus for decoupled communication

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::ObjectId;

/// Content-lifecycle events
#[derive(Debug, Clone)]
pub enum Event {
    /// A content record was created or its visibility changed
    ContentAdded {
        content_id: Uuid,
        storage_id: ObjectId,
        user_id: Uuid,
        update: bool,
    },

    /// A static pointer was bound to a new value
    PointerBound {
        static_id: String,
        dynamic_id: ObjectId,
    },
}

/// Event bus for broadcasting events
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: Event) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
