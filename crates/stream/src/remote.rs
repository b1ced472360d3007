//! Remote keyed event store.
//!
//! A tree of namespaces, each holding string values under child keys.
//! Subscribers of a namespace receive one [`ChildEvent`] per change; the
//! children present at subscription time are delivered first as `Added`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{StreamError, StreamResult};

/// Change notification for one child of a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    Added { key: String, value: String },
    Changed { key: String, value: String },
    /// `value` is the last value held before removal
    Removed { key: String, value: String },
    /// Transport failure; the subscription stays open
    Error(String),
}

/// Receiving end of a namespace subscription.
pub type ChildEvents = mpsc::UnboundedReceiver<ChildEvent>;

#[async_trait]
pub trait RemoteEventStore: Send + Sync {
    /// Subscribe to child events of `namespace`.
    async fn subscribe(&self, namespace: &str) -> StreamResult<ChildEvents>;

    /// Write `value` under `namespace/key`, creating or overwriting it.
    async fn set_value(&self, namespace: &str, key: &str, value: &str) -> StreamResult<()>;

    /// Delete `namespace/key`. Deleting an absent child succeeds.
    async fn remove_value(&self, namespace: &str, key: &str) -> StreamResult<()>;

    async fn get_value(&self, namespace: &str, key: &str) -> StreamResult<Option<String>>;
}

#[derive(Default)]
struct Tree {
    children: HashMap<String, BTreeMap<String, String>>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<ChildEvent>>>,
    offline: bool,
}

impl Tree {
    fn check_online(&self) -> StreamResult<()> {
        if self.offline {
            return Err(StreamError::Transport("remote store unreachable".to_string()));
        }
        Ok(())
    }

    fn notify(&mut self, namespace: &str, event: ChildEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(namespace) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// Process-local remote store with fault injection.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    tree: Mutex<Tree>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every operation fail with a transport error until set back.
    pub fn set_offline(&self, offline: bool) {
        self.tree().offline = offline;
    }

    /// Deliver a transport error to the subscribers of `namespace`.
    pub fn inject_error(&self, namespace: &str, message: &str) {
        self.tree()
            .notify(namespace, ChildEvent::Error(message.to_string()));
    }

    /// Snapshot of the children of `namespace`.
    pub fn children(&self, namespace: &str) -> BTreeMap<String, String> {
        self.tree()
            .children
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, namespace: &str) -> usize {
        self.tree()
            .subscribers
            .get(namespace)
            .map_or(0, |subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
    }
}

#[async_trait]
impl RemoteEventStore for InMemoryRemoteStore {
    async fn subscribe(&self, namespace: &str) -> StreamResult<ChildEvents> {
        let mut tree = self.tree();
        tree.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(children) = tree.children.get(namespace) {
            for (key, value) in children {
                let _ = tx.send(ChildEvent::Added {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        tree.subscribers
            .entry(namespace.to_string())
            .or_default()
            .push(tx);

        debug!(namespace = namespace, "Remote subscription opened");
        Ok(rx)
    }

    async fn set_value(&self, namespace: &str, key: &str, value: &str) -> StreamResult<()> {
        let mut tree = self.tree();
        tree.check_online()?;

        let previous = tree
            .children
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());

        let (key, value) = (key.to_string(), value.to_string());
        let event = match previous {
            Some(_) => ChildEvent::Changed { key, value },
            None => ChildEvent::Added { key, value },
        };
        tree.notify(namespace, event);
        Ok(())
    }

    async fn remove_value(&self, namespace: &str, key: &str) -> StreamResult<()> {
        let mut tree = self.tree();
        tree.check_online()?;

        let removed = tree
            .children
            .get_mut(namespace)
            .and_then(|children| children.remove(key));
        if let Some(value) = removed {
            tree.notify(
                namespace,
                ChildEvent::Removed {
                    key: key.to_string(),
                    value,
                },
            );
        }
        Ok(())
    }

    async fn get_value(&self, namespace: &str, key: &str) -> StreamResult<Option<String>> {
        let tree = self.tree();
        tree.check_online()?;
        Ok(tree
            .children
            .get(namespace)
            .and_then(|children| children.get(key))
            .cloned())
    }
}
