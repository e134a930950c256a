use crate::model::{
    Id,
    user::{Authored, UserMarker},
};
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

/// A post as cached from the live content store.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author_id: Id<UserMarker>,
    pub author_display_name: String,
    pub author_avatar_url: Option<String>,
    pub author_tag: Option<String>,
    pub text: String,
    pub image_url: Option<String>,
    pub created_at: UtcDateTime,
}

/// A post as served by the HTTP content source.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePost {
    pub user_id: Id<UserMarker>,
    pub id: Id<PostMarker>,
    pub title: String,
    pub body: String,
}

impl Authored for Post {
    fn author_id(&self) -> &Id<UserMarker> {
        &self.author_id
    }
}

impl Authored for RemotePost {
    fn author_id(&self) -> &Id<UserMarker> {
        &self.user_id
    }
}
