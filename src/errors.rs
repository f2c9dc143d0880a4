//! Watch Orchestration Error Hierarchy
//!
//! Defines error types for the watch-channel core, categorized by the
//! failure taxonomy: listen-surface errors are returned to the caller,
//! transport errors drive the resubscription policy, and protocol errors
//! force a stream-session restart.

use config::ConfigError;

use crate::model::SnapshotVersion;
use crate::model::TargetId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading/validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listen-surface failures, surfaced to the caller
    #[error(transparent)]
    Listen(#[from] ListenError),

    /// Connection-level failures, handled inside the controller
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Watch protocol invariant violations, fatal to the stream session
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    /// A listen was requested for a target id that is still registered
    #[error("target {0} is already registered")]
    AlreadyRegistered(TargetId),

    /// The controller task has terminated and no longer accepts commands
    #[error("remote store has shut down")]
    StoreShutDown,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A request could not be written to the open stream
    #[error("failed to send {request_type} over the watch stream: {reason}")]
    RequestSendFailed {
        request_type: &'static str,
        reason: String,
    },

    /// The controller's signal mailbox is gone
    #[error("stream signal channel closed: {0}")]
    SignalSendFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Snapshot markers must be strictly increasing within a client session
    #[error("snapshot version {received:?} is not after last raised {last_raised:?}")]
    NonMonotonicSnapshot {
        received: SnapshotVersion,
        last_raised: SnapshotVersion,
    },

    /// A target rejection arrived without explicit target ids or a cause
    #[error("target error change carries no explicit target ids or cause")]
    MalformedTargetError,
}
