use crate::model::{Id, user::UserMarker};
use serde::{Deserialize, Serialize};

/// The identity the engine acts on behalf of.
///
/// An identity is an immutable snapshot of a session. A session change
/// replaces it wholesale.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Identity {
    pub id: Id<UserMarker>,
    pub is_admin: bool,
    pub display_name: String,
}

/// The session record handed over by the identity provider.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct Session {
    pub user: SessionUser,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Id<UserMarker>,
    #[serde(default)]
    pub is_admin: bool,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn new(id: Id<UserMarker>, is_admin: bool, display_name: impl Into<String>) -> Self {
        Self {
            id,
            is_admin,
            display_name: display_name.into(),
        }
    }
}

impl From<&Session> for Identity {
    fn from(value: &Session) -> Self {
        Self {
            id: value.user.id.clone(),
            is_admin: value.user.is_admin,
            display_name: value.user.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        session::{Identity, Session},
    };

    #[test]
    fn identity_from_session_record() {
        let session: Session = serde_json::from_str(
            r#"{"user":{"id":"admin-1","isAdmin":true,"name":"Admin User","avatarUrl":null}}"#,
        )
        .unwrap();

        assert_eq!(
            Identity::from(&session),
            Identity::new(Id::new_unchecked("admin-1"), true, "Admin User")
        );
    }

    #[test]
    fn missing_admin_flag_means_ordinary_user() {
        let session: Session =
            serde_json::from_str(r#"{"user":{"id":2,"name":"Ervin Howell"}}"#).unwrap();
        let identity = Identity::from(&session);

        assert!(!identity.is_admin);
        assert_eq!(identity.id, Id::from(2));
    }
}
