use feedsync_common::model::session::{Identity, Session};
use tokio::sync::watch;
use tracing::debug;

/// Publishes the current identity to every live view.
///
/// `None` means nobody is signed in. Views render nothing in that state
/// instead of failing.
#[derive(Debug)]
pub struct IdentityProvider {
    sender: watch::Sender<Option<Identity>>,
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Replaces the identity with the one described by `session`.
    ///
    /// Returns whether the identity changed. Refreshing a session with an
    /// identical record does not wake up the views.
    pub fn set_session(&self, session: Option<&Session>) -> bool {
        self.set_identity(session.map(Identity::from))
    }

    pub fn set_identity(&self, identity: Option<Identity>) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == identity {
                false
            } else {
                *current = identity;
                true
            }
        });
        if changed {
            debug!(
                user = ?self.sender.borrow().as_ref().map(|identity| identity.id.to_string()),
                "Identity changed"
            );
        }
        changed
    }

    pub fn sign_out(&self) -> bool {
        self.set_identity(None)
    }

    #[must_use]
    pub fn current(&self) -> Option<Identity> {
        self.sender.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.sender.subscribe()
    }
}
