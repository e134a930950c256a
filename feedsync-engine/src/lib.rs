//! Live, access-scoped views over a shared social feed store.

use crate::{
    browser::PostBrowser,
    comments::{CommentLoader, CommentSource, StoreComments},
    config::{ConfigError, EngineConfig},
    engagement::EngagementView,
    error::Result,
    feed::FeedView,
    session::IdentityProvider,
    subscription::SubscriptionManager,
};
use feedsync_common::model::{Id, post::PostMarker};
use feedsync_store::{client::ContentStore, http::ContentApiClient};
use std::sync::Arc;

pub mod browser;
pub mod comments;
pub mod config;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod session;
pub mod subscription;

#[cfg(test)]
mod test_util;

/// Wires the store, the subscription manager and the identity provider
/// together and hands out views.
pub struct FeedEngine {
    store: Arc<dyn ContentStore>,
    subscriptions: SubscriptionManager,
    identity: IdentityProvider,
    config: EngineConfig,
}

impl FeedEngine {
    pub fn new(store: Arc<dyn ContentStore>, config: EngineConfig) -> Result<Self, ConfigError> {
        let subscriptions = SubscriptionManager::new(store.clone(), config.retry_policy()?);

        Ok(Self {
            store,
            subscriptions,
            identity: IdentityProvider::new(),
            config,
        })
    }

    #[must_use]
    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn open_feed(&self) -> Result<FeedView> {
        FeedView::open(&self.subscriptions, self.store.clone(), &self.identity).await
    }

    pub async fn open_engagement(&self, post_id: Id<PostMarker>) -> Result<EngagementView> {
        EngagementView::open(
            &self.subscriptions,
            self.store.clone(),
            &self.identity,
            post_id,
            self.config.write_ack_timeout(),
        )
        .await
    }

    /// A loader reading comments from the store.
    #[must_use]
    pub fn comment_loader(&self) -> CommentLoader {
        let source: Arc<dyn CommentSource> = Arc::new(StoreComments::new(self.store.clone()));
        CommentLoader::new(source)
    }

    /// A browser over the configured HTTP content source.
    pub fn post_browser(&self) -> Result<PostBrowser, feedsync_store::client::StoreError> {
        let client = ContentApiClient::new(
            self.config.content_api_url.clone(),
            self.config.content_api_timeout(),
        )?;

        Ok(PostBrowser::new(Arc::new(client), &self.identity))
    }
}
