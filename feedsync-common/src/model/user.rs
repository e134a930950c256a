use crate::model::Id;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

/// A user as listed by the HTTP content source.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

/// Anything attributed to a single author, for visibility checks.
pub trait Authored {
    fn author_id(&self) -> &Id<UserMarker>;

    fn is_authored_by(&self, user_id: &Id<UserMarker>) -> bool {
        self.author_id() == user_id
    }
}
