//! In-process publish/subscribe with a single subscriber slot.
//!
//! The engine composition root is the only legitimate subscriber;
//! `subscribe` rejects a second registration rather than generalizing
//! to multi-consumer fan-out (see design notes: "do not generalize to
//! multi-consumer unless explicitly needed").
//!
//! `emit` is synchronous with respect to the subscriber: it awaits the
//! handler's future to completion before returning, so a caller that
//! learns the result of `emit` knows every non-deferred side effect of
//! that event has already been attempted. A bare `mpsc` channel cannot
//! provide this guarantee (the receiving task would run independently
//! of the sender), so the bus instead holds a callback slot.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relayhive_schema::Event;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("a subscriber is already registered on this bus")]
    AlreadySubscribed,
}

type HandlerFuture<R> = Pin<Box<dyn Future<Output = R> + Send>>;
type Handler<R> = Arc<dyn Fn(Event) -> HandlerFuture<R> + Send + Sync>;

/// Single-subscriber in-process event bus, generic over the
/// subscriber's return type so this crate has no dependency on the
/// engine's result types.
pub struct EventBus<R> {
    handler: RwLock<Option<Handler<R>>>,
}

impl<R> Default for EventBus<R> {
    fn default() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }
}

impl<R: Send + 'static> EventBus<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the single handler for this bus. Returns
    /// `BusError::AlreadySubscribed` if a handler is already present.
    pub async fn subscribe<F, Fut>(&self, handler: F) -> Result<(), BusError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let mut slot = self.handler.write().await;
        if slot.is_some() {
            return Err(BusError::AlreadySubscribed);
        }
        *slot = Some(Arc::new(move |event| Box::pin(handler(event))));
        Ok(())
    }

    /// Publish an event. Returns `None` if no subscriber is registered
    /// (callers should treat this as "nothing happened", matching the
    /// source's empty-list-on-no-subscriber behavior).
    pub async fn emit(&self, event: Event) -> Option<R> {
        let slot = self.handler.read().await;
        match slot.as_ref() {
            Some(handler) => Some(handler(event).await),
            None => None,
        }
    }

    pub async fn has_subscriber(&self) -> bool {
        self.handler.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn emit_without_subscriber_returns_none() {
        let bus: EventBus<usize> = EventBus::new();
        let event = Event::new("test.noop", "unit-test");
        assert_eq!(bus.emit(event).await, None);
    }

    #[tokio::test]
    async fn emit_waits_for_handler_completion() {
        let bus: EventBus<usize> = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        bus.subscribe(move |_event| {
            let calls = calls_clone.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                calls.fetch_add(1, Ordering::SeqCst);
                calls.load(Ordering::SeqCst)
            }
        })
        .await
        .unwrap();

        let result = bus.emit(Event::new("test.noop", "unit-test")).await;
        assert_eq!(result, Some(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_subscribe_is_rejected() {
        let bus: EventBus<()> = EventBus::new();
        bus.subscribe(|_event| async {}).await.unwrap();
        let err = bus.subscribe(|_event| async {}).await.unwrap_err();
        assert!(matches!(err, BusError::AlreadySubscribed));
    }
}
