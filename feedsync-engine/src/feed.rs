//! The access-scoped post feed.

use crate::{
    error::{EngineError, Result},
    session::IdentityProvider,
    subscription::{Consumer, SubscriptionEvent, SubscriptionManager},
};
use feedsync_common::model::{
    Id,
    post::{Post, PostMarker},
    session::Identity,
    user::Authored,
};
use feedsync_store::{
    client::ContentStore,
    document::{Document, Fields},
    query::{CollectionPath, Direction, QueryDescriptor},
    record::post_from_document,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const POSTS_COLLECTION: &str = "posts";

/// Whether `identity` may see `post`.
#[must_use]
pub fn visible<P: Authored>(post: &P, identity: &Identity) -> bool {
    identity.is_admin || post.is_authored_by(&identity.id)
}

/// The posts `identity` may see, newest first. Posts with the same creation
/// time are ordered by id.
pub fn project(posts: &[Post], identity: Option<&Identity>) -> Result<Vec<Post>> {
    let identity = identity.ok_or(EngineError::InvalidIdentity)?;

    let mut projected: Vec<Post> = posts
        .iter()
        .filter(|post| visible(*post, identity))
        .cloned()
        .collect();
    projected.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

    Ok(projected)
}

/// Like [`project`], but keeps the source order.
#[must_use]
pub fn filter_visible<P: Authored + Clone>(posts: &[P], identity: &Identity) -> Vec<P> {
    posts
        .iter()
        .filter(|post| visible(*post, identity))
        .cloned()
        .collect()
}

#[must_use]
pub fn posts_query() -> QueryDescriptor {
    QueryDescriptor::collection(CollectionPath::new(POSTS_COLLECTION))
        .order_by("timestamp", Direction::Descending)
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct FeedSnapshot {
    pub posts: Vec<Post>,
    pub identity: Option<Identity>,
    /// Set after the connection was lost; `posts` is the last known result.
    pub stale: bool,
}

#[derive(Default)]
struct FeedState {
    raw: Vec<Post>,
    identity: Option<Identity>,
    stale: bool,
}

struct FeedShared {
    state: Mutex<FeedState>,
    snapshots: watch::Sender<Arc<FeedSnapshot>>,
    closed: CancellationToken,
}

/// A live feed for whoever is signed in.
///
/// Rebuilt from scratch whenever the post set or the identity changes.
pub struct FeedView {
    store: Arc<dyn ContentStore>,
    identities: watch::Receiver<Option<Identity>>,
    shared: Arc<FeedShared>,
    consumer: Consumer,
}

impl FeedShared {
    fn publish(&self, state: &FeedState) {
        let posts = project(&state.raw, state.identity.as_ref()).unwrap_or_default();
        let snapshot = FeedSnapshot {
            posts,
            identity: state.identity.clone(),
            stale: state.stale,
        };
        self.snapshots.send_if_modified(|current| {
            if **current == snapshot {
                false
            } else {
                *current = Arc::new(snapshot);
                true
            }
        });
    }

    fn on_event(&self, event: SubscriptionEvent) {
        let mut state = self.state.lock();
        match event {
            SubscriptionEvent::Snapshot(snapshot) => {
                state.raw = decode_posts(&snapshot.documents);
                state.stale = false;
            }
            SubscriptionEvent::ConnectionLost(_) => state.stale = true,
        }
        self.publish(&state);
    }

    fn set_identity(&self, identity: Option<Identity>) {
        let mut state = self.state.lock();
        if self.closed.is_cancelled() {
            return;
        }
        state.identity = identity;
        self.publish(&state);
    }
}

fn decode_posts(documents: &[Document]) -> Vec<Post> {
    documents
        .iter()
        .filter_map(|document| match post_from_document(document) {
            Ok(post) => Some(post),
            Err(err) => {
                warn!(id = %document.id, error = %err, "Skipping undecodable post");
                None
            }
        })
        .collect()
}

impl FeedView {
    pub async fn open(
        subscriptions: &SubscriptionManager,
        store: Arc<dyn ContentStore>,
        identity: &IdentityProvider,
    ) -> Result<Self> {
        let mut identities = identity.watch();
        let shared = Arc::new(FeedShared {
            state: Mutex::new(FeedState {
                identity: identities.borrow_and_update().clone(),
                ..FeedState::default()
            }),
            snapshots: watch::Sender::new(Arc::default()),
            closed: CancellationToken::new(),
        });

        let consumer = subscriptions.consumer();
        let listener = shared.clone();
        consumer
            .subscribe(posts_query(), move |event| listener.on_event(event))
            .await?;

        tokio::spawn(follow_identity(shared.clone(), identities.clone()));

        Ok(Self {
            store,
            identities,
            shared,
            consumer,
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<FeedSnapshot> {
        self.shared.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<FeedSnapshot>> {
        self.shared.snapshots.subscribe()
    }

    /// Deletes a post of the signed in user.
    ///
    /// Ownership is checked against the live post set before anything is sent
    /// to the store. Administrators can see other users' posts but not delete
    /// them.
    pub async fn delete_post(&self, post_id: &Id<PostMarker>) -> Result<()> {
        self.check_owner(post_id)?;

        self.store
            .delete(&CollectionPath::new(POSTS_COLLECTION), post_id.as_str())
            .await
            .map_err(EngineError::write)?;
        debug!(post = %post_id, "Deleted post");

        Ok(())
    }

    /// Attaches the url of an uploaded image to one of the user's posts.
    pub async fn attach_image(&self, post_id: &Id<PostMarker>, image_url: &str) -> Result<()> {
        self.check_owner(post_id)?;

        let mut fields = Fields::new();
        fields.insert("image".to_owned(), Value::String(image_url.to_owned()));
        self.store
            .update(&CollectionPath::new(POSTS_COLLECTION), post_id.as_str(), fields)
            .await
            .map_err(EngineError::write)
    }

    fn check_owner(&self, post_id: &Id<PostMarker>) -> Result<()> {
        let identity = self
            .identities
            .borrow()
            .clone()
            .ok_or(EngineError::Unauthenticated)?;

        let state = self.shared.state.lock();
        let post = state
            .raw
            .iter()
            .find(|post| post.id == *post_id)
            .ok_or_else(|| EngineError::PostNotFound(post_id.clone()))?;
        if !post.is_authored_by(&identity.id) {
            return Err(EngineError::Forbidden(format!(
                "post {post_id} belongs to another user"
            )));
        }

        Ok(())
    }

    /// Stops following the store and the identity. The last snapshot stays
    /// readable.
    pub fn close(&self) {
        {
            let _state = self.shared.state.lock();
            self.shared.closed.cancel();
        }
        self.consumer.close();
    }
}

impl Drop for FeedView {
    fn drop(&mut self) {
        self.shared.closed.cancel();
    }
}

async fn follow_identity(
    shared: Arc<FeedShared>,
    mut identities: watch::Receiver<Option<Identity>>,
) {
    loop {
        tokio::select! {
            biased;
            () = shared.closed.cancelled() => return,
            changed = identities.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let identity = identities.borrow_and_update().clone();
        shared.set_identity(identity);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::RetryPolicy,
        error::EngineError,
        feed::{FeedView, POSTS_COLLECTION, project},
        session::IdentityProvider,
        subscription::SubscriptionManager,
        test_util::{eventually, fields, init_tracing},
    };
    use feedsync_common::{
        model::{Id, post::Post, session::Identity},
        util::PositiveDuration,
    };
    use feedsync_store::{client::ContentStore, memory::MemoryStore, query::CollectionPath};
    use serde_json::json;
    use std::sync::Arc;
    use time::macros::utc_datetime;

    fn post(id: &str, author: &str, created_at: time::UtcDateTime) -> Post {
        Post {
            id: Id::new_unchecked(id),
            author_id: Id::new_unchecked(author),
            author_display_name: format!("User {author}"),
            author_avatar_url: None,
            author_tag: None,
            text: format!("Post {id}"),
            image_url: None,
            created_at,
        }
    }

    fn user(id: &str) -> Identity {
        Identity::new(Id::new_unchecked(id), false, format!("User {id}"))
    }

    fn admin(id: &str) -> Identity {
        Identity::new(Id::new_unchecked(id), true, format!("Admin {id}"))
    }

    fn ids(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|post| post.id.as_str()).collect()
    }

    #[test]
    fn users_only_see_their_own_posts() {
        let posts = [
            post("p1", "2", utc_datetime!(2024-05-01 10:00)),
            post("p2", "3", utc_datetime!(2024-05-02 10:00)),
        ];

        let projected = project(&posts, Some(&user("2"))).unwrap();

        assert_eq!(ids(&projected), ["p1"]);
    }

    #[test]
    fn admins_see_everything_newest_first() {
        let posts = [
            post("p1", "2", utc_datetime!(2024-05-01 10:00)),
            post("p2", "3", utc_datetime!(2024-05-02 10:00)),
            post("p0", "4", utc_datetime!(2024-05-01 10:00)),
        ];

        let projected = project(&posts, Some(&admin("2"))).unwrap();

        assert_eq!(ids(&projected), ["p2", "p0", "p1"]);
    }

    #[test]
    fn projection_needs_an_identity() {
        let posts = [post("p1", "2", utc_datetime!(2024-05-01 10:00))];

        assert!(matches!(
            project(&posts, None),
            Err(EngineError::InvalidIdentity)
        ));
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let posts = CollectionPath::new(POSTS_COLLECTION);
        for (id, author, timestamp) in [("p1", "2", 1_000), ("p2", "3", 2_000)] {
            store
                .create(
                    &posts,
                    Some(id),
                    fields(json!({
                        "id": author,
                        "username": format!("User {author}"),
                        "text": format!("Post {id}"),
                        "timestamp": timestamp,
                    })),
                )
                .await
                .unwrap();
        }
        store
    }

    async fn open_feed(store: &Arc<MemoryStore>, identity: &IdentityProvider) -> FeedView {
        let subscriptions = SubscriptionManager::new(store.clone(), RetryPolicy::default());
        FeedView::open(&subscriptions, store.clone(), identity)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn promotion_to_admin_reveals_hidden_posts() {
        init_tracing();
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(user("2")));
        let feed = open_feed(&store, &identity).await;

        assert_eq!(ids(&feed.snapshot().posts), ["p1"]);

        identity.set_identity(Some(admin("2")));
        eventually(|| feed.snapshot().posts.len() == 2).await;
        assert_eq!(ids(&feed.snapshot().posts), ["p2", "p1"]);

        identity.sign_out();
        eventually(|| feed.snapshot().identity.is_none()).await;
        assert!(feed.snapshot().posts.is_empty());
    }

    #[tokio::test]
    async fn new_and_updated_posts_show_up() {
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(user("2")));
        let feed = open_feed(&store, &identity).await;
        let posts = CollectionPath::new(POSTS_COLLECTION);

        store
            .create(
                &posts,
                Some("p3"),
                fields(json!({"id": "2", "username": "User 2", "timestamp": 3_000})),
            )
            .await
            .unwrap();
        store
            .create(
                &posts,
                Some("p4"),
                fields(json!({"id": "3", "username": "User 3", "timestamp": 4_000})),
            )
            .await
            .unwrap();
        eventually(|| feed.snapshot().posts.len() == 2).await;
        assert_eq!(ids(&feed.snapshot().posts), ["p3", "p1"]);

        feed.attach_image(&Id::new_unchecked("p1"), "https://img/p1.png")
            .await
            .unwrap();
        eventually(|| feed.snapshot().posts[1].image_url.is_some()).await;
        assert_eq!(
            feed.snapshot().posts[1].image_url.as_deref(),
            Some("https://img/p1.png")
        );
    }

    #[tokio::test]
    async fn posts_without_timestamp_are_skipped() {
        let store = seeded_store().await;
        store
            .create(
                &CollectionPath::new(POSTS_COLLECTION),
                Some("pending"),
                fields(json!({"id": "2", "username": "User 2"})),
            )
            .await
            .unwrap();
        let identity = IdentityProvider::new();
        identity.set_identity(Some(admin("1")));

        let feed = open_feed(&store, &identity).await;

        assert_eq!(ids(&feed.snapshot().posts), ["p2", "p1"]);
    }

    #[tokio::test]
    async fn only_authors_delete_posts() {
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(admin("2")));
        let feed = open_feed(&store, &identity).await;
        let posts = CollectionPath::new(POSTS_COLLECTION);

        let result = feed.delete_post(&Id::new_unchecked("p2")).await;
        assert!(matches!(result, Err(EngineError::Forbidden(_))));
        assert_eq!(store.document_count(&posts), 2);

        let result = feed.delete_post(&Id::new_unchecked("p9")).await;
        assert!(matches!(result, Err(EngineError::PostNotFound(_))));

        feed.delete_post(&Id::new_unchecked("p1")).await.unwrap();
        eventually(|| feed.snapshot().posts.len() == 1).await;
        assert_eq!(store.document_count(&posts), 1);

        identity.sign_out();
        let result = feed.delete_post(&Id::new_unchecked("p2")).await;
        assert!(matches!(result, Err(EngineError::Unauthenticated)));
    }

    #[tokio::test]
    async fn lost_connection_keeps_stale_posts() {
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(user("2")));
        let feed = open_feed(&store, &identity).await;

        store.disconnect("network down");

        eventually(|| feed.snapshot().stale).await;
        assert_eq!(ids(&feed.snapshot().posts), ["p1"]);

        let result = feed.delete_post(&Id::new_unchecked("p1")).await;
        assert!(matches!(result, Err(EngineError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn closing_stops_updates() {
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(admin("1")));
        let feed = open_feed(&store, &identity).await;
        let posts = CollectionPath::new(POSTS_COLLECTION);

        feed.close();
        eventually(|| store.subscriber_count(&posts) == 0).await;
        store
            .create(
                &posts,
                Some("p3"),
                fields(json!({"id": "1", "username": "Admin 1", "timestamp": 3_000})),
            )
            .await
            .unwrap();
        identity.sign_out();
        tokio::task::yield_now().await;

        assert_eq!(feed.snapshot().posts.len(), 2);
    }

    #[tokio::test]
    async fn identity_changes_racing_close_are_ignored() {
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(user("2")));
        let feed = open_feed(&store, &identity).await;

        feed.close();
        feed.shared.set_identity(Some(admin("2")));

        let snapshot = feed.snapshot();
        assert_eq!(snapshot.identity, Some(user("2")));
        assert_eq!(ids(&snapshot.posts), ["p1"]);
    }

    #[tokio::test]
    async fn feeds_opened_during_an_outage_are_stale() {
        let store = seeded_store().await;
        let identity = IdentityProvider::new();
        identity.set_identity(Some(user("2")));
        let policy = RetryPolicy {
            retry: true,
            backoff: PositiveDuration::from_millis(60_000).unwrap(),
        };
        let subscriptions = SubscriptionManager::new(store.clone(), policy);
        let first = FeedView::open(&subscriptions, store.clone(), &identity)
            .await
            .unwrap();

        store.disconnect("network down");
        eventually(|| first.snapshot().stale).await;

        let second = FeedView::open(&subscriptions, store.clone(), &identity)
            .await
            .unwrap();

        let snapshot = second.snapshot();
        assert!(snapshot.stale);
        assert_eq!(ids(&snapshot.posts), ["p1"]);
    }
}
