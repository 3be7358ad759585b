use thiserror::Error;

/// Error taxonomy for one room session.
///
/// `InvalidInput` is always raised before any network call; everything the
/// backing store can fail with maps onto `NotFound`, `Conflict` or `Network`.
/// No variant is fatal to the process; all failures are scoped to the
/// session they occurred in.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("session is closed")]
    Closed,
}
