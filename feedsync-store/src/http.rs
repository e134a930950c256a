use crate::client::{Result, StoreError};
use feedsync_common::model::{
    Id,
    comment::Comment,
    post::{PostMarker, RemotePost},
    user::User,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONTENT_API_URL: &str = "https://jsonplaceholder.typicode.com";

/// Read-only client for the REST content source serving posts, comments and
/// users as plain JSON arrays.
#[derive(Clone, Debug)]
pub struct ContentApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ContentApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();

        Ok(Self { http, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_posts(&self) -> Result<Vec<RemotePost>> {
        self.get_json("/posts").await
    }

    pub async fn fetch_comments(&self, post_id: &Id<PostMarker>) -> Result<Vec<Comment>> {
        self.get_json(&format!("/posts/{post_id}/comments")).await
    }

    pub async fn fetch_all_comments(&self) -> Result<Vec<Comment>> {
        self.get_json("/comments").await
    }

    pub async fn fetch_users(&self) -> Result<Vec<User>> {
        self.get_json("/users").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "Fetching from content api");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Content api replied with error status");
            return Err(StoreError::Status {
                url,
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}
