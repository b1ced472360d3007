//! # Topic Bus
//!
//! Process-local map of single-use topics to one-shot listeners.
//!
//! A topic is opened once, receives at most one payload and is then gone.
//! A payload published before anyone listens is latched and handed to the
//! first listener. Publishing to a topic that was never opened, or that has
//! already delivered, is a no-op.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

type Listener<P> = Box<dyn FnOnce(P) + Send>;

enum Slot<P> {
    Open,
    Latched(P),
    Listening(Listener<P>),
}

/// What happened to a published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A listener consumed the payload.
    Delivered,
    /// No listener yet; the payload waits for the first one.
    Latched,
    /// The topic is unknown, closed, or already holds a payload.
    Dropped,
}

/// Errors from topic registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("Topic already open: {0}")]
    AlreadyOpen(String),

    #[error("Topic already has a listener: {0}")]
    AlreadyListening(String),
}

/// One-shot topic registry.
pub struct TopicBus<P> {
    slots: Mutex<HashMap<String, Slot<P>>>,
}

impl<P> Default for TopicBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> TopicBus<P> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<P>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a topic so it can latch and deliver one payload.
    pub fn open(&self, topic: &str) -> Result<(), TopicError> {
        let mut slots = self.slots();
        if slots.contains_key(topic) {
            return Err(TopicError::AlreadyOpen(topic.to_string()));
        }
        slots.insert(topic.to_string(), Slot::Open);
        Ok(())
    }

    /// Register the one-shot listener of an open topic.
    ///
    /// Returns `Ok(false)` when the topic is not open. A latched payload is
    /// delivered to the listener before this returns.
    pub fn listen<F>(&self, topic: &str, listener: F) -> Result<bool, TopicError>
    where
        F: FnOnce(P) + Send + 'static,
    {
        let latched = {
            let mut slots = self.slots();
            match slots.remove(topic) {
                None => return Ok(false),
                Some(Slot::Open) => {
                    slots.insert(topic.to_string(), Slot::Listening(Box::new(listener)));
                    return Ok(true);
                }
                Some(Slot::Listening(existing)) => {
                    slots.insert(topic.to_string(), Slot::Listening(existing));
                    return Err(TopicError::AlreadyListening(topic.to_string()));
                }
                Some(Slot::Latched(payload)) => payload,
            }
        };

        debug!(topic = topic, "Delivering latched payload");
        listener(latched);
        Ok(true)
    }

    /// Publish the single payload of a topic.
    pub fn publish(&self, topic: &str, payload: P) -> Delivery {
        let listener = {
            let mut slots = self.slots();
            match slots.remove(topic) {
                None => return Delivery::Dropped,
                Some(Slot::Open) => {
                    slots.insert(topic.to_string(), Slot::Latched(payload));
                    return Delivery::Latched;
                }
                Some(Slot::Latched(first)) => {
                    slots.insert(topic.to_string(), Slot::Latched(first));
                    return Delivery::Dropped;
                }
                Some(Slot::Listening(listener)) => listener,
            }
        };

        // The slot is already gone, so a re-entrant publish cannot reach this listener.
        listener(payload);
        Delivery::Delivered
    }

    /// Forget a topic together with any latched payload or listener.
    pub fn close(&self, topic: &str) -> bool {
        self.slots().remove(topic).is_some()
    }

    /// Number of topics still open.
    pub fn open_topics(&self) -> usize {
        self.slots().len()
    }
}
