//! Engine event types and handler bookkeeping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Events an engine reports to registered handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StreamInitialized,
    TrackAdded,
    Playing,
    Paused,
    /// Playhead moved; `duration` is `None` until the engine knows it
    TimeUpdated { current_time: f64, duration: Option<f64> },
    Error { message: String },
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::StreamInitialized => EngineEventKind::StreamInitialized,
            EngineEvent::TrackAdded => EngineEventKind::TrackAdded,
            EngineEvent::Playing => EngineEventKind::Playing,
            EngineEvent::Paused => EngineEventKind::Paused,
            EngineEvent::TimeUpdated { .. } => EngineEventKind::TimeUpdated,
            EngineEvent::Error { .. } => EngineEventKind::Error,
        }
    }
}

/// Event names handlers register for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "camelCase")]
pub enum EngineEventKind {
    StreamInitialized,
    TrackAdded,
    Playing,
    Paused,
    TimeUpdated,
    Error,
}

/// Cancellation token returned by handler registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionToken(pub u64);

pub type EventHandler = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Handler table for engine implementations
///
/// `emit` snapshots the matching handlers before invoking them, so a handler
/// may register or cancel subscriptions without deadlocking.
#[derive(Default)]
pub struct HandlerRegistry {
    next_token: AtomicU64,
    handlers: parking_lot::Mutex<BTreeMap<SubscriptionToken, (EngineEventKind, EventHandler)>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EngineEventKind, handler: EventHandler) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().insert(token, (kind, handler));
        trace!("Registered {} handler as {:?}", kind, token);
        token
    }

    /// Returns false when the token was unknown or already cancelled
    pub fn cancel(&self, token: SubscriptionToken) -> bool {
        self.handlers.lock().remove(&token).is_some()
    }

    pub fn emit(&self, event: EngineEvent) {
        let kind = event.kind();
        let matching: Vec<EventHandler> = self
            .handlers
            .lock()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in matching {
            handler(event.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_only_matching_handlers() {
        let registry = HandlerRegistry::new();
        let playing = Arc::new(AtomicUsize::new(0));
        let paused = Arc::new(AtomicUsize::new(0));

        let p = playing.clone();
        registry.register(
            EngineEventKind::Playing,
            Arc::new(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let p = paused.clone();
        registry.register(
            EngineEventKind::Paused,
            Arc::new(move |_| {
                p.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.emit(EngineEvent::Playing);
        registry.emit(EngineEvent::Playing);

        assert_eq!(playing.load(Ordering::SeqCst), 2);
        assert_eq!(paused.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_handler_is_not_called() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let token = registry.register(
            EngineEventKind::Error,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(registry.cancel(token));
        assert!(!registry.cancel(token));
        registry.emit(EngineEvent::Error {
            message: "decode".into(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handler_may_cancel_itself() {
        let registry = Arc::new(HandlerRegistry::new());
        let slot: Arc<parking_lot::Mutex<Option<SubscriptionToken>>> = Arc::new(parking_lot::Mutex::new(None));

        let reg = registry.clone();
        let s = slot.clone();
        let token = registry.register(
            EngineEventKind::StreamInitialized,
            Arc::new(move |_| {
                if let Some(token) = *s.lock() {
                    reg.cancel(token);
                }
            }),
        );
        *slot.lock() = Some(token);

        registry.emit(EngineEvent::StreamInitialized);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EngineEventKind::StreamInitialized.to_string(), "streamInitialized");
        assert_eq!(EngineEventKind::Error.to_string(), "error");
    }
}
