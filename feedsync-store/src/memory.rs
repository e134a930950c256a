//! An in-process content store with push notifications.
//!
//! Besides backing tests, it can simulate the failure modes a remote store
//! exhibits: dropped connections and re-delivered deltas.

use crate::{
    client::{ContentStore, Result, StoreError, StoreEvent, StoreSubscription},
    document::{Change, Document, Fields},
    query::{CollectionPath, QueryDescriptor},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    collections: HashMap<CollectionPath, BTreeMap<String, Document>>,
    listeners: Vec<Listener>,
    next_id: u64,
    connected: bool,
}

#[derive(Debug)]
struct Listener {
    collection: CollectionPath,
    sender: UnboundedSender<StoreEvent>,
}

impl Default for MemoryInner {
    fn default() -> Self {
        Self {
            collections: HashMap::new(),
            listeners: Vec::new(),
            next_id: 1,
            connected: true,
        }
    }
}

impl MemoryInner {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn documents(&self, query: &QueryDescriptor) -> Vec<Document> {
        let mut documents: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|collection| collection.values().cloned().collect())
            .unwrap_or_default();
        query.sort(&mut documents);
        documents
    }

    fn notify(&mut self, collection: &CollectionPath, change: &Change) {
        self.listeners.retain(|listener| {
            listener.collection != *collection
                || listener
                    .sender
                    .send(StoreEvent::Changes(vec![change.clone()]))
                    .is_ok()
        });
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open subscriptions on `collection`.
    #[must_use]
    pub fn subscriber_count(&self, collection: &CollectionPath) -> usize {
        let mut inner = self.inner.lock();
        inner.listeners.retain(|listener| !listener.sender.is_closed());
        inner
            .listeners
            .iter()
            .filter(|listener| listener.collection == *collection)
            .count()
    }

    #[must_use]
    pub fn document_count(&self, collection: &CollectionPath) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Drops the connection: every subscriber is told once, and all requests
    /// fail until [`MemoryStore::reconnect`] is called.
    pub fn disconnect(&self, reason: &str) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        for listener in inner.listeners.drain(..) {
            let _ = listener.sender.send(StoreEvent::Disconnected {
                reason: reason.to_owned(),
            });
        }
        debug!(reason, "Memory store disconnected");
    }

    pub fn reconnect(&self) {
        self.inner.lock().connected = true;
    }

    /// Pushes `change` to the subscribers of `collection` again without
    /// touching the stored documents, like an at-least-once redelivery.
    pub fn redeliver(&self, collection: &CollectionPath, change: &Change) {
        self.inner.lock().notify(collection, change);
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn subscribe(&self, query: &QueryDescriptor) -> Result<StoreSubscription> {
        let mut inner = self.inner.lock();
        inner.ensure_connected()?;

        let (sender, events) = mpsc::unbounded_channel();
        let initial = inner.documents(query);
        inner.listeners.push(Listener {
            collection: query.collection.clone(),
            sender,
        });

        Ok(StoreSubscription { initial, events })
    }

    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Document>> {
        let inner = self.inner.lock();
        inner.ensure_connected()?;

        Ok(inner.documents(query))
    }

    async fn create(
        &self,
        collection: &CollectionPath,
        id: Option<&str>,
        fields: Fields,
    ) -> Result<String> {
        let mut inner = self.inner.lock();
        inner.ensure_connected()?;

        let id = match id {
            Some(id) => id.to_owned(),
            None => {
                let id = format!("doc{:06}", inner.next_id);
                inner.next_id += 1;
                id
            }
        };

        let documents = inner.collections.entry(collection.clone()).or_default();
        if documents.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.clone(),
                id,
            });
        }
        let document = Document::new(id.clone(), fields);
        documents.insert(id.clone(), document.clone());
        inner.notify(collection, &Change::added(document));

        Ok(id)
    }

    async fn update(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_connected()?;

        let document = inner
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.clone(),
                id: id.to_owned(),
            })?;
        document.fields.extend(fields);
        let document = document.clone();
        inner.notify(collection, &Change::modified(document));

        Ok(())
    }

    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_connected()?;

        let removed = inner
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.remove(id));
        if let Some(document) = removed {
            inner.notify(collection, &Change::removed(document));
        }

        Ok(())
    }

    async fn set(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_connected()?;

        let document = Document::new(id, fields);
        let previous = inner
            .collections
            .entry(collection.clone())
            .or_default()
            .insert(id.to_owned(), document.clone());
        let change = if previous.is_some() {
            Change::modified(document)
        } else {
            Change::added(document)
        };
        inner.notify(collection, &change);

        Ok(())
    }
}
