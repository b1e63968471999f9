//! Typed errors surfaced by the profiler subsystem.
//!
//! Listener-side failures never cross the channel as values: they are
//! text-serialized into the shared buffer and re-raised on the client as
//! [`Error::Remote`]. Plugin failures are only typed when they escape
//! `start_session`; everywhere else they are logged and swallowed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// `start_session` could not resolve the requested backend plugin.
    #[error("profiler plugin {0} is not found")]
    PluginNotFound(String),

    /// The liveness probe was granted the exclusive attachment lock, which
    /// means nobody is holding it: the target attachment is gone.
    #[error("cannot start remote profile session - attachment {0} is not active")]
    AttachmentNotActive(u64),

    #[error("invalid flush interval: {0}")]
    InvalidFlushInterval(i64),

    /// A remote request authenticated as a different user without the bypass.
    #[error("missing privilege PROFILE_ANY_ATTACHMENT")]
    InsufficientPrivilege,

    #[error("profiler shared channel: {0}")]
    IpcInit(String),

    #[error("profiler protocol error: {0}")]
    Protocol(String),

    /// Error text relayed back over the channel from the target attachment.
    #[error("{0}")]
    Remote(String),

    #[error("cannot start profiler worker thread: {0}")]
    Thread(std::io::Error),

    /// The attachment or its database is going away under us.
    #[error("attachment is shutting down")]
    AttachmentShutdown,

    /// A cursor was fetched without being opened first.
    #[error("cursor is not open")]
    CursorNotOpen,

    /// A singular stream produced more than one row.
    #[error("multiple rows in singleton select")]
    SingularSelect,

    /// The access path cannot carry a write lock (e.g. a full outer join).
    #[error("record locking is not supported by this access path")]
    RecordLockNotSupported,

    /// Plugin-raised error escaping `start_session`.
    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}
