//! Error types for parley sessions.

use std::path::PathBuf;

/// Alias for `Result<T, parley::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The session was torn down; nothing more can be sent.
    #[error("session closed")]
    SessionClosed,

    /// A request in the same direction is still waiting for an answer.
    #[error("a request is already waiting for an answer")]
    RequestPending,

    /// Only one live session may exist at a time.
    #[error("a live session is already active")]
    LiveBusy,

    /// A `/copy` source that is missing or not a regular file.
    #[error("{}: not a regular file", .0.display())]
    NotAFile(PathBuf),

    /// A bridge address the peer advertised could not be parsed.
    #[error("invalid bridge address {0:?}")]
    BadAddress(String),

    /// An I/O error from the transport, the filesystem, or a child process.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
