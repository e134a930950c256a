use feedsync_common::model::{Id, post::PostMarker};
use feedsync_store::client::StoreError;
use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Failures surfaced to the view layer.
///
/// Store and transport errors never leave the engine on their own, they are
/// wrapped into one of these kinds at the component boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("The connection to the content store was lost: {0}")]
    ConnectionLost(String),
    #[error("There is no signed in user")]
    Unauthenticated,
    #[error("Not permitted: {0}")]
    Forbidden(String),
    #[error("Fetching content failed: {0}")]
    FetchFailed(#[source] StoreError),
    #[error("Writing to the content store failed: {0}")]
    WriteFailed(#[source] StoreError),
    #[error("A feed was projected without an identity")]
    InvalidIdentity,
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
}

impl EngineError {
    pub(crate) fn write(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable => Self::ConnectionLost(error.to_string()),
            error => Self::WriteFailed(error),
        }
    }

    /// Whether retrying the same action later may succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::FetchFailed(_) | Self::WriteFailed(_)
        )
    }
}
