//! On-demand comment loading for the selected post.

use crate::{
    error::{EngineError, Result},
    feed::POSTS_COLLECTION,
};
use async_trait::async_trait;
use feedsync_common::model::{Id, comment::Comment, post::PostMarker};
use feedsync_store::{
    client::{self, ContentStore},
    http::ContentApiClient,
    query::{CollectionPath, QueryDescriptor},
    record::comment_from_document,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub const COMMENTS_COLLECTION: &str = "comments";

/// Anything that can list the comments of a post, in its own order.
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn comments(&self, post_id: &Id<PostMarker>) -> client::Result<Vec<Comment>>;
}

#[async_trait]
impl CommentSource for ContentApiClient {
    async fn comments(&self, post_id: &Id<PostMarker>) -> client::Result<Vec<Comment>> {
        self.fetch_comments(post_id).await
    }
}

/// Reads comments from the `comments` collection nested under each post.
pub struct StoreComments {
    store: Arc<dyn ContentStore>,
}

impl StoreComments {
    #[must_use]
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CommentSource for StoreComments {
    async fn comments(&self, post_id: &Id<PostMarker>) -> client::Result<Vec<Comment>> {
        let collection =
            CollectionPath::new(POSTS_COLLECTION).child(post_id.as_str(), COMMENTS_COLLECTION);
        let documents = self
            .store
            .fetch(&QueryDescriptor::collection(collection))
            .await?;

        Ok(documents
            .iter()
            .filter_map(|document| match comment_from_document(post_id, document) {
                Ok(comment) => Some(comment),
                Err(err) => {
                    warn!(id = %document.id, error = %err, "Skipping undecodable comment");
                    None
                }
            })
            .collect())
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CommentSet {
    pub post_id: Id<PostMarker>,
    pub comments: Vec<Comment>,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum LoadOutcome {
    Displayed(Arc<CommentSet>),
    /// A newer load was started before this one finished; its result was
    /// dropped.
    Superseded,
}

#[derive(Default)]
struct LoaderState {
    generation: u64,
    displayed: Option<Arc<CommentSet>>,
}

/// Loads the comments of one post at a time.
///
/// Only the most recent request may change what is displayed. Results are
/// never reused across selections.
pub struct CommentLoader {
    source: Arc<dyn CommentSource>,
    state: Mutex<LoaderState>,
}

impl CommentLoader {
    #[must_use]
    pub fn new(source: Arc<dyn CommentSource>) -> Self {
        Self {
            source,
            state: Mutex::new(LoaderState::default()),
        }
    }

    pub async fn load_comments(&self, post_id: &Id<PostMarker>) -> Result<LoadOutcome> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.generation
        };

        let result = self.source.comments(post_id).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(post = %post_id, "Dropping superseded comment load");
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok(comments) => {
                let set = Arc::new(CommentSet {
                    post_id: post_id.clone(),
                    comments,
                });
                state.displayed = Some(set.clone());
                Ok(LoadOutcome::Displayed(set))
            }
            Err(err) => {
                warn!(post = %post_id, error = %err, "Loading comments failed");
                // A reload may keep showing the old set, a new selection may not.
                if state
                    .displayed
                    .as_ref()
                    .is_some_and(|set| set.post_id != *post_id)
                {
                    state.displayed = None;
                }
                Err(EngineError::FetchFailed(err))
            }
        }
    }

    #[must_use]
    pub fn displayed(&self) -> Option<Arc<CommentSet>> {
        self.state.lock().displayed.clone()
    }

    /// Hides the displayed comments and discards any load in flight.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.displayed = None;
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        comments::{CommentLoader, CommentSource, LoadOutcome, StoreComments},
        error::EngineError,
        test_util::fields,
    };
    use async_trait::async_trait;
    use feedsync_common::model::{Id, comment::Comment, post::PostMarker};
    use feedsync_store::{
        client::{self, ContentStore, StoreError},
        memory::MemoryStore,
        query::CollectionPath,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::{collections::HashMap, sync::Arc};
    use tokio::sync::Notify;

    /// Answers each post only after its gate was opened.
    #[derive(Default)]
    struct GatedSource {
        gates: Mutex<HashMap<String, Arc<Notify>>>,
        failing: Mutex<Vec<String>>,
    }

    impl GatedSource {
        fn gate(&self, post_id: &str) -> Arc<Notify> {
            self.gates
                .lock()
                .entry(post_id.to_owned())
                .or_default()
                .clone()
        }
    }

    #[async_trait]
    impl CommentSource for GatedSource {
        async fn comments(&self, post_id: &Id<PostMarker>) -> client::Result<Vec<Comment>> {
            self.gate(post_id.as_str()).notified().await;
            if self.failing.lock().contains(&post_id.to_string()) {
                return Err(StoreError::Unavailable);
            }

            Ok(vec![Comment {
                id: Id::new_unchecked(format!("c-{post_id}")),
                post_id: post_id.clone(),
                name: "name".to_owned(),
                email: "someone@example.com".to_owned(),
                body: format!("comment on {post_id}"),
            }])
        }
    }

    #[tokio::test]
    async fn later_selection_wins_over_slower_earlier_one() {
        let source = Arc::new(GatedSource::default());
        let loader = Arc::new(CommentLoader::new(source.clone()));

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_comments(&Id::new_unchecked("a")).await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_comments(&Id::new_unchecked("b")).await }
        });
        tokio::task::yield_now().await;

        source.gate("b").notify_one();
        let second = second.await.unwrap().unwrap();
        source.gate("a").notify_one();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first, LoadOutcome::Superseded);
        assert!(matches!(second, LoadOutcome::Displayed(_)));
        assert_eq!(loader.displayed().unwrap().post_id.as_str(), "b");
    }

    #[tokio::test]
    async fn failures_never_show_another_posts_comments() {
        let source = Arc::new(GatedSource::default());
        source.failing.lock().push("b".to_owned());
        let loader = CommentLoader::new(source.clone());

        source.gate("a").notify_one();
        loader.load_comments(&Id::new_unchecked("a")).await.unwrap();

        source.gate("a").notify_one();
        source.failing.lock().push("a".to_owned());
        let reload = loader.load_comments(&Id::new_unchecked("a")).await;
        assert!(matches!(reload, Err(EngineError::FetchFailed(_))));
        assert_eq!(loader.displayed().unwrap().post_id.as_str(), "a");

        source.gate("b").notify_one();
        let other = loader.load_comments(&Id::new_unchecked("b")).await;
        assert!(matches!(other, Err(EngineError::FetchFailed(_))));
        assert!(loader.displayed().is_none());
    }

    #[tokio::test]
    async fn clearing_discards_loads_in_flight() {
        let source = Arc::new(GatedSource::default());
        let loader = Arc::new(CommentLoader::new(source.clone()));

        let load = tokio::spawn({
            let loader = loader.clone();
            async move { loader.load_comments(&Id::new_unchecked("a")).await }
        });
        tokio::task::yield_now().await;
        loader.clear();
        source.gate("a").notify_one();

        assert_eq!(load.await.unwrap().unwrap(), LoadOutcome::Superseded);
        assert!(loader.displayed().is_none());
    }

    #[tokio::test]
    async fn store_comments_keep_store_order() {
        let store = Arc::new(MemoryStore::new());
        let collection = CollectionPath::new("posts").child("p1", "comments");
        for (id, body) in [("c1", "first"), ("c2", "second")] {
            store
                .create(
                    &collection,
                    Some(id),
                    fields(json!({"name": "n", "email": "e@example.com", "body": body})),
                )
                .await
                .unwrap();
        }
        let loader = CommentLoader::new(Arc::new(StoreComments::new(store)));

        let outcome = loader.load_comments(&Id::new_unchecked("p1")).await.unwrap();
        let LoadOutcome::Displayed(set) = outcome else {
            panic!("expected comments");
        };

        let bodies: Vec<_> = set
            .comments
            .iter()
            .map(|comment| comment.body.as_str())
            .collect();
        assert_eq!(bodies, ["first", "second"]);
        assert_eq!(set.comments[0].post_id.as_str(), "p1");
    }
}
