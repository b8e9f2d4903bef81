//! Handle used by the UI layer to talk to a running match

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::AbortHandle;

use crate::game::{MatchEvent, MatchOutcome, MatchPhase, MatchSnapshot, PlayerId, SelectedMove};
use crate::store::MatchKey;

use super::{Command, SyncError};

/// Handle to a running match. Dropping it stops the engine.
#[derive(Debug)]
pub struct MatchHandle {
    key: MatchKey,
    player: PlayerId,
    is_owner: bool,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<MatchSnapshot>,
    events: broadcast::Sender<MatchEvent>,
    task: Option<AbortHandle>,
}

impl MatchHandle {
    pub(crate) fn new(
        key: MatchKey,
        player: PlayerId,
        is_owner: bool,
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<MatchSnapshot>,
        events: broadcast::Sender<MatchEvent>,
    ) -> Self {
        Self {
            key,
            player,
            is_owner,
            commands,
            state,
            events,
            task: None,
        }
    }

    pub(crate) fn attach(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    pub fn key(&self) -> &MatchKey {
        &self.key
    }

    /// Local player
    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    /// True if the local player created the match
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Commit the local selection for the current round and write it to the
    /// store. Resolves once the write succeeded or finally failed.
    pub async fn submit_move(&self, selection: SelectedMove) -> Result<SelectedMove, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { selection, reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Push the committed selection again after a `SyncFailure`
    pub async fn retry_submit(&self) -> Result<SelectedMove, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Retry { reply }).await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Latest published snapshot
    pub fn current_state(&self) -> MatchSnapshot {
        self.state.borrow().clone()
    }

    /// Round results, match end and write failures
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    /// Snapshot updates; the receiver sees the latest state
    pub fn watch_state(&self) -> watch::Receiver<MatchSnapshot> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().is_finished()
    }

    pub fn outcome(&self) -> Option<MatchOutcome> {
        match self.state.borrow().phase {
            MatchPhase::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Wait for the match to end. `None` if the engine stopped first.
    pub async fn finished(&self) -> Option<MatchOutcome> {
        let mut state = self.state.clone();
        loop {
            let phase = state.borrow_and_update().phase;
            if let MatchPhase::Terminal(outcome) = phase {
                return Some(outcome);
            }
            if state.changed().await.is_err() {
                return self.outcome();
            }
        }
    }

    /// Stop the engine, ending the match locally with `outcome`
    pub async fn cancel(&self, outcome: MatchOutcome) {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Terminate { outcome, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> SyncError {
        match self.outcome() {
            Some(MatchOutcome::OpponentLeft) => SyncError::OpponentLeft,
            Some(_) => SyncError::MatchFinished,
            None => SyncError::EngineStopped,
        }
    }
}

impl Drop for MatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
