use std::sync::Arc;

use crate::errors::DesiduaError;
use crate::room::RoomSnapshot;
use crate::session::SessionState;

/// Events emitted by the core to native UI listeners.
#[derive(Debug, Clone)]
pub enum CallEvent {
    SessionStateChanged(SessionState),
    RoomChanged(RoomSnapshot),
    Notice(CallNotice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    TokenUnavailable,
    Connection,
    Device,
}

/// Non-fatal, dismissible message for the call screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNotice {
    pub id: String,
    pub kind: NoticeKind,
    pub message: String,
}

impl CallNotice {
    pub fn new(kind: NoticeKind, error: &DesiduaError) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            message: error.user_message(),
        }
    }
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn CallEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Listeners run on a copy of the list, so they may register more.
    pub fn emit(&self, event: CallEvent) {
        let listeners = self.listeners.read().unwrap().clone();
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }
}
