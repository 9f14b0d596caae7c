use catalog_utils::ValidationError;

/// Why a call to the remote store failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Everything a store operation can report back to the UI.
///
/// Identity and validation errors are raised before any state is touched. `Remote` is only
/// returned after the optimistic change has been rolled back.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no signed-in viewer")]
    Unauthenticated,

    #[error("a change to this entity is already in flight")]
    AlreadyInFlight,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("viewer already reviewed this entity")]
    DuplicateReview,

    #[error("review not found")]
    NotFound,

    #[error("remote store error: {0}")]
    Remote(#[source] GatewayError),

    #[error("session expired")]
    SessionExpired,
}
