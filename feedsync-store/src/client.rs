use crate::{
    document::{Change, Document, Fields},
    query::{CollectionPath, QueryDescriptor},
};
use async_trait::async_trait;
use feedsync_common::model::ModelValidationError;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("The content store is unreachable")]
    Unavailable,
    #[error("Document {id} does not exist in {collection}")]
    NotFound { collection: CollectionPath, id: String },
    #[error("Document {id} already exists in {collection}")]
    AlreadyExists { collection: CollectionPath, id: String },
    #[error("A document could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("An object in the content store was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
}

/// Events pushed by the store after the initial result of a subscription.
#[derive(Clone, PartialEq, Debug)]
pub enum StoreEvent {
    Changes(Vec<Change>),
    Disconnected { reason: String },
}

/// A live query. Dropping the event receiver ends the subscription.
#[derive(Debug)]
pub struct StoreSubscription {
    pub initial: Vec<Document>,
    pub events: UnboundedReceiver<StoreEvent>,
}

/// A document store that answers queries and pushes deltas to subscribers.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn subscribe(&self, query: &QueryDescriptor) -> Result<StoreSubscription>;

    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Document>>;

    /// Creates a document, assigning an id when none is given.
    async fn create(
        &self,
        collection: &CollectionPath,
        id: Option<&str>,
        fields: Fields,
    ) -> Result<String>;

    /// Merges `fields` into an existing document.
    async fn update(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<()>;

    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<()>;

    /// Writes a document under `id`, replacing whatever was there.
    async fn set(&self, collection: &CollectionPath, id: &str, fields: Fields) -> Result<()>;
}
