//! Error types for the reservation core.
use thiserror::Error;

/// Failure modes of the reservation manager.
///
/// `ArgumentInvalid` is raised synchronously at the call site, since it
/// represents a caller bug (a request that could never succeed). The other
/// two variants travel exclusively through a [`crate::ReservationFuture`];
/// they are never returned directly from `create`/`create_permanent`. A
/// second `shutdown()` call is not an error; it returns the same
/// reservation-done future as the first.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// A requested permit count exceeds the configured maximum for its
    /// class, or a convenience-overload call supplied neither a routing nor
    /// a request configuration.
    #[error("argument invalid: {0}")]
    ArgumentInvalid(String),

    /// The manager is shutting down or has already shut down.
    #[error("shutting down")]
    ShuttingDown,

    /// A waiter task was cancelled while acquiring a semaphore permit.
    #[error("interrupted while acquiring permits")]
    Interrupted,
}

/// Crate-local result alias, mirroring the reference codebase's `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;
