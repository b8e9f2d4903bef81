//! Keeps two clients' match state machines in step through the shared document

pub mod engine;
pub mod handle;

pub use engine::SyncEngine;
pub use handle::MatchHandle;

use tokio::sync::oneshot;

use crate::game::{InvalidMoveError, MatchOutcome, SelectedMove};

/// Errors surfaced to the UI through [`MatchHandle`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid move: {0}")]
    InvalidMove(#[from] InvalidMoveError),

    #[error("Match is finished")]
    MatchFinished,

    /// The selection is still committed locally; `retry_submit` pushes it again
    #[error("Moves for round {round} could not be written: {message}")]
    SyncFailure { round: u32, message: String },

    #[error("Opponent left the match")]
    OpponentLeft,

    #[error("No selection waiting to be written")]
    NothingToRetry,

    #[error("Sync engine stopped")]
    EngineStopped,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// Requests from a handle to its engine task
pub(crate) enum Command {
    Submit {
        selection: SelectedMove,
        reply: Reply<SelectedMove>,
    },
    Retry {
        reply: Reply<SelectedMove>,
    },
    Terminate {
        outcome: MatchOutcome,
        reply: oneshot::Sender<()>,
    },
}
