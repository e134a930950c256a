use crate::model::{Id, post::PostMarker, user::UserMarker};

/// The key of a like. A user holds at most one like per post.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct LikeKey {
    pub post_id: Id<PostMarker>,
    pub user_id: Id<UserMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Like {
    pub key: LikeKey,
    pub username: String,
}

impl LikeKey {
    #[must_use]
    pub fn new(post_id: Id<PostMarker>, user_id: Id<UserMarker>) -> Self {
        Self { post_id, user_id }
    }
}
