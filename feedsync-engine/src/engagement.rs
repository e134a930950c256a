//! Likes of a single post, as seen by the signed in user.

use crate::{
    error::{EngineError, Result},
    feed::POSTS_COLLECTION,
    session::IdentityProvider,
    subscription::{Consumer, SubscriptionEvent, SubscriptionManager},
};
use feedsync_common::model::{
    Id,
    like::{Like, LikeKey},
    post::PostMarker,
    session::Identity,
};
use feedsync_store::{
    client::ContentStore,
    query::{CollectionPath, QueryDescriptor},
    record::{like_fields, like_from_document},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

pub const LIKES_COLLECTION: &str = "likes";

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum LikeState {
    NotLiked,
    Liked,
}

impl LikeState {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::NotLiked => Self::Liked,
            Self::Liked => Self::NotLiked,
        }
    }
}

/// Derives the state of `key` from a like set.
#[must_use]
pub fn like_state(likes: &[Like], key: &LikeKey) -> LikeState {
    if likes.iter().any(|like| like.key == *key) {
        LikeState::Liked
    } else {
        LikeState::NotLiked
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct LikeSet {
    pub likes: Vec<Like>,
    /// Set after the connection was lost; `likes` is the last known result.
    pub stale: bool,
}

impl LikeSet {
    #[must_use]
    pub fn count(&self) -> usize {
        self.likes.len()
    }
}

#[must_use]
pub fn likes_collection(post_id: &Id<PostMarker>) -> CollectionPath {
    CollectionPath::new(POSTS_COLLECTION).child(post_id.as_str(), LIKES_COLLECTION)
}

/// The live like set of one post.
pub struct EngagementView {
    post_id: Id<PostMarker>,
    store: Arc<dyn ContentStore>,
    identities: watch::Receiver<Option<Identity>>,
    likes: Arc<watch::Sender<Arc<LikeSet>>>,
    consumer: Consumer,
    toggling: Mutex<()>,
    ack_timeout: Duration,
}

impl EngagementView {
    pub async fn open(
        subscriptions: &SubscriptionManager,
        store: Arc<dyn ContentStore>,
        identity: &IdentityProvider,
        post_id: Id<PostMarker>,
        ack_timeout: Duration,
    ) -> Result<Self> {
        let likes = Arc::new(watch::Sender::new(Arc::<LikeSet>::default()));
        let consumer = subscriptions.consumer();

        let sender = likes.clone();
        let listened_post = post_id.clone();
        consumer
            .subscribe(
                QueryDescriptor::collection(likes_collection(&post_id)),
                move |event| on_event(&sender, &listened_post, event),
            )
            .await?;

        Ok(Self {
            post_id,
            store,
            identities: identity.watch(),
            likes,
            consumer,
            toggling: Mutex::new(()),
            ack_timeout,
        })
    }

    #[must_use]
    pub fn post_id(&self) -> &Id<PostMarker> {
        &self.post_id
    }

    #[must_use]
    pub fn likes(&self) -> Arc<LikeSet> {
        self.likes.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<LikeSet>> {
        self.likes.subscribe()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.likes.borrow().count()
    }

    /// The signed in user's state, `None` when nobody is signed in.
    #[must_use]
    pub fn state(&self) -> Option<LikeState> {
        let identity = self.identities.borrow().clone()?;
        let key = LikeKey::new(self.post_id.clone(), identity.id);
        Some(like_state(&self.likes.borrow().likes, &key))
    }

    #[must_use]
    pub fn liked_by_me(&self) -> bool {
        self.state() == Some(LikeState::Liked)
    }

    /// Likes the post, or takes the like back.
    ///
    /// The like is always keyed by the signed in user. Returns the new state
    /// once the live set reflects it, or after the ack timeout elapsed.
    pub async fn toggle(&self) -> Result<LikeState> {
        let _toggling = self.toggling.lock().await;

        let identity = self
            .identities
            .borrow()
            .clone()
            .ok_or(EngineError::Unauthenticated)?;
        let key = LikeKey::new(self.post_id.clone(), identity.id.clone());
        let target = like_state(&self.likes.borrow().likes, &key).toggled();

        let collection = likes_collection(&self.post_id);
        let written = match target {
            LikeState::Liked => {
                self.store
                    .set(
                        &collection,
                        identity.id.as_str(),
                        like_fields(&identity.display_name),
                    )
                    .await
            }
            LikeState::NotLiked => self.store.delete(&collection, identity.id.as_str()).await,
        };
        written.map_err(EngineError::write)?;
        debug!(post = %self.post_id, user = %identity.id, state = ?target, "Toggled like");

        let mut likes = self.likes.subscribe();
        let acknowledged = matches!(
            tokio::time::timeout(
                self.ack_timeout,
                likes.wait_for(|set| like_state(&set.likes, &key) == target),
            )
            .await,
            Ok(Ok(_))
        );
        if !acknowledged {
            warn!(post = %self.post_id, state = ?target, "Like was not reflected in time");
        }

        Ok(target)
    }

    pub fn close(&self) {
        self.consumer.close();
    }
}

fn on_event(
    likes: &watch::Sender<Arc<LikeSet>>,
    post_id: &Id<PostMarker>,
    event: SubscriptionEvent,
) {
    likes.send_modify(|set| {
        let mut next = set.as_ref().clone();
        match event {
            SubscriptionEvent::Snapshot(snapshot) => {
                next.likes = snapshot
                    .documents
                    .iter()
                    .filter_map(|document| match like_from_document(post_id, document) {
                        Ok(like) => Some(like),
                        Err(err) => {
                            warn!(id = %document.id, error = %err, "Skipping undecodable like");
                            None
                        }
                    })
                    .collect();
                next.stale = false;
            }
            SubscriptionEvent::ConnectionLost(_) => next.stale = true,
        }
        *set = Arc::new(next);
    });
}
