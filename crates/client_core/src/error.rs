use std::time::Duration;

use shared::domain::{ActionId, ChallengeId};
use thiserror::Error;

/// Errors surfaced to callers of the client. Transport-level disconnects are
/// recovered internally by reconnection and never appear here; handler and
/// unknown-command failures are logged and isolated rather than propagated.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("outbound send failed: {0}")]
    SendFailed(String),

    #[error("mutation superseded by a newer mutation on the same resource")]
    MutationConflict,

    #[error("mutation request failed: {0}")]
    MutationFailed(String),

    #[error("mutation request timed out after {0:?}")]
    MutationTimeout(Duration),

    #[error("undo requested for action {0} which is no longer undoable")]
    UndoRequestOnTerminalAction(ActionId),

    #[error("no pending challenge matches id {0}")]
    UnknownChallenge(ChallengeId),
}
