//! Browsing posts and comments of the HTTP content source.

use crate::{
    comments::{CommentLoader, LoadOutcome},
    error::{EngineError, Result},
    feed::{filter_visible, visible},
    session::IdentityProvider,
};
use feedsync_common::model::{
    Id,
    post::{PostMarker, RemotePost},
    session::Identity,
};
use feedsync_store::http::ContentApiClient;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Totals shown on the admin dashboard.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct DashboardStats {
    pub users: usize,
    pub posts: usize,
    pub comments: usize,
}

#[derive(Default)]
struct BrowserState {
    posts: Vec<RemotePost>,
    selected: Option<RemotePost>,
}

pub struct PostBrowser {
    client: Arc<ContentApiClient>,
    identities: watch::Receiver<Option<Identity>>,
    comments: CommentLoader,
    state: Mutex<BrowserState>,
}

impl PostBrowser {
    #[must_use]
    pub fn new(client: Arc<ContentApiClient>, identity: &IdentityProvider) -> Self {
        Self {
            comments: CommentLoader::new(client.clone()),
            client,
            identities: identity.watch(),
            state: Mutex::new(BrowserState::default()),
        }
    }

    /// Fetches the posts the signed in user may see, in source order.
    ///
    /// Nobody signed in means nothing to show.
    pub async fn load_posts(&self) -> Result<Vec<RemotePost>> {
        let Some(identity) = self.identity() else {
            *self.state.lock() = BrowserState::default();
            return Ok(Vec::new());
        };

        let posts = self
            .client
            .fetch_posts()
            .await
            .map_err(EngineError::FetchFailed)?;
        let posts = filter_visible(&posts, &identity);
        debug!(user = %identity.id, count = posts.len(), "Loaded posts");

        self.state.lock().posts.clone_from(&posts);
        Ok(posts)
    }

    #[must_use]
    pub fn posts(&self) -> Vec<RemotePost> {
        self.state.lock().posts.clone()
    }

    /// Selects one of the loaded posts and loads its comments.
    pub async fn select_post(&self, post_id: &Id<PostMarker>) -> Result<LoadOutcome> {
        let identity = self.identity().ok_or(EngineError::Unauthenticated)?;

        {
            let mut state = self.state.lock();
            let post = state
                .posts
                .iter()
                .find(|post| post.id == *post_id)
                .cloned()
                .ok_or_else(|| EngineError::PostNotFound(post_id.clone()))?;
            if !visible(&post, &identity) {
                return Err(EngineError::Forbidden(format!(
                    "post {post_id} belongs to another user"
                )));
            }
            state.selected = Some(post);
        }

        self.comments.load_comments(post_id).await
    }

    #[must_use]
    pub fn selected(&self) -> Option<RemotePost> {
        self.state.lock().selected.clone()
    }

    #[must_use]
    pub fn comments(&self) -> &CommentLoader {
        &self.comments
    }

    /// Returns to the post list.
    pub fn back(&self) {
        self.state.lock().selected = None;
        self.comments.clear();
    }

    /// Counts users, posts and comments. Administrators only.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let identity = self.identity().ok_or(EngineError::Unauthenticated)?;
        if !identity.is_admin {
            return Err(EngineError::Forbidden(
                "the dashboard is only available to administrators".to_owned(),
            ));
        }

        let (users, posts, comments) = tokio::try_join!(
            self.client.fetch_users(),
            self.client.fetch_posts(),
            self.client.fetch_all_comments(),
        )
        .map_err(EngineError::FetchFailed)?;

        Ok(DashboardStats {
            users: users.len(),
            posts: posts.len(),
            comments: comments.len(),
        })
    }

    fn identity(&self) -> Option<Identity> {
        self.identities.borrow().clone()
    }
}
