use crate::{
    client::Result,
    document::{Document, Fields},
};
use feedsync_common::model::{
    Id, ModelValidationError,
    comment::Comment,
    like::{Like, LikeKey},
    post::{Post, PostMarker},
    timestamp_from_millis,
    user::UserMarker,
};
use serde::Deserialize;
use serde_json::Value;

/// A post document. `id` holds the author's user id, the document id is the
/// post id.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    id: Id<UserMarker>,
    username: String,
    #[serde(default)]
    user_img: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// A like document, stored under the liking user's id.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct LikeRecord {
    #[serde(default)]
    username: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct CommentRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    body: String,
}

pub fn post_from_document(document: &Document) -> Result<Post> {
    let record: PostRecord = document.decode()?;
    let created_at = record
        .timestamp
        .ok_or(ModelValidationError::MissingTimestamp)
        .and_then(|millis| timestamp_from_millis(millis).map_err(ModelValidationError::from))?;

    Ok(Post {
        id: Id::new(document.id.clone()).map_err(ModelValidationError::from)?,
        author_id: record.id,
        author_display_name: record.username,
        author_avatar_url: record.user_img,
        author_tag: record.tag,
        text: record.text,
        image_url: record.image,
        created_at,
    })
}

pub fn like_from_document(post_id: &Id<PostMarker>, document: &Document) -> Result<Like> {
    let record: LikeRecord = document.decode()?;

    Ok(Like {
        key: LikeKey::new(
            post_id.clone(),
            Id::new(document.id.clone()).map_err(ModelValidationError::from)?,
        ),
        username: record.username,
    })
}

pub fn comment_from_document(post_id: &Id<PostMarker>, document: &Document) -> Result<Comment> {
    let record: CommentRecord = document.decode()?;

    Ok(Comment {
        id: Id::new(document.id.clone()).map_err(ModelValidationError::from)?,
        post_id: post_id.clone(),
        name: record.name,
        email: record.email,
        body: record.body,
    })
}

/// The fields of the like document a user writes under their own id.
#[must_use]
pub fn like_fields(username: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("username".to_owned(), Value::String(username.to_owned()));
    fields
}
