//! Synchronization engine task
//!
//! One task per match owns the [`MatchStateMachine`]. It pushes local
//! selections to the store, follows the document feed, and resolves a round
//! only once the remote document settles it, so both clients resolve from
//! identical inputs. A round is settled by an entry from each player, or by a
//! forfeit one player wrote into its own entry after the opponent's window
//! ran out.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::game::{
    AbortReason, MatchError, MatchEvent, MatchOutcome, MatchSnapshot, MatchStateMachine, PlayerId,
    SelectedMove, Selection,
};
use crate::store::{DocumentStore, MatchDocument, MatchKey, MatchStatus, MoveEntry, StoreError};
use crate::util::time::RoundClock;

use super::handle::MatchHandle;
use super::{Command, Reply, SyncError};

struct PushOutcome {
    id: u64,
    round: u32,
    entry: MoveEntry,
    result: Result<(), StoreError>,
}

/// The engine for one match (owned by its task)
pub struct SyncEngine<S: DocumentStore> {
    store: Arc<S>,
    config: SyncConfig,
    sm: MatchStateMachine,
    key: MatchKey,
    local: PlayerId,
    opponent: PlayerId,
    is_owner: bool,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<MatchSnapshot>,
    pushes: JoinSet<PushOutcome>,
    next_push: u64,
    replies: HashMap<u64, Reply<SelectedMove>>,
    clock: RoundClock,
    /// Last document seen on the feed
    last_seen: Option<MatchDocument>,
    /// Start of the current run of failed reads
    failing_since: Option<Instant>,
    /// Round we declared the opponent out of, once the claim is written or in flight
    claimed: Option<u32>,
}

impl<S: DocumentStore> SyncEngine<S> {
    /// Create an engine for a started or fresh match
    pub fn new(
        store: Arc<S>,
        mut sm: MatchStateMachine,
        config: SyncConfig,
        is_owner: bool,
    ) -> (Self, MatchHandle) {
        sm.start();

        let (command_tx, commands) = mpsc::channel(32);
        let (state, state_rx) = watch::channel(sm.snapshot());
        let key = sm.key().clone();
        let local = sm.player().id().clone();
        let opponent = sm.opponent().id().clone();

        let handle = MatchHandle::new(
            key.clone(),
            local.clone(),
            is_owner,
            command_tx,
            state_rx,
            sm.events(),
        );

        let clock = RoundClock::start(Instant::now(), config.round_timeout, config.opponent_grace);

        let engine = Self {
            store,
            config,
            sm,
            key,
            local,
            opponent,
            is_owner,
            commands,
            state,
            pushes: JoinSet::new(),
            next_push: 0,
            replies: HashMap::new(),
            clock,
            last_seen: None,
            failing_since: None,
            claimed: None,
        };

        (engine, handle)
    }

    /// Spawn the engine on the runtime and return its handle
    pub fn spawn(store: Arc<S>, sm: MatchStateMachine, config: SyncConfig, is_owner: bool) -> MatchHandle {
        let (engine, mut handle) = Self::new(store, sm, config, is_owner);
        let task = tokio::spawn(engine.run());
        handle.attach(task.abort_handle());
        handle
    }

    /// Run until the match is terminal or every handle is gone
    pub async fn run(mut self) {
        info!(
            match_key = %self.key,
            player_id = %self.local,
            opponent_id = %self.opponent,
            round = self.sm.current_round(),
            "Sync engine started"
        );

        let mut feed = self.store.watch(&self.key);
        let mut reconnect_at: Option<Instant> = None;

        while !self.sm.is_terminal() {
            let awaiting_local = self.sm.player().pending().is_none();
            let may_claim = self.local_confirmed() && self.claimed != Some(self.sm.current_round());
            let local_deadline = self.clock.local;
            let opponent_deadline = self.clock.opponent;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!(match_key = %self.key, "All handles dropped");
                        break;
                    }
                },

                item = feed.next(), if reconnect_at.is_none() => match item {
                    Some(Ok(doc)) => self.on_document(doc),
                    Some(Err(e)) => self.on_read_error(e),
                    None => {
                        warn!(match_key = %self.key, "Document feed ended, reopening");
                        reconnect_at = Some(Instant::now() + self.config.poll_interval);
                    }
                },

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    feed = self.store.watch(&self.key);
                    reconnect_at = None;
                }

                Some(done) = self.pushes.join_next(), if !self.pushes.is_empty() => {
                    self.on_push_done(done);
                }

                _ = sleep_until(local_deadline), if awaiting_local => {
                    self.on_local_timeout();
                }

                _ = sleep_until(opponent_deadline), if may_claim => {
                    self.on_opponent_timeout();
                }
            }

            self.publish();
        }

        self.publish();

        if let Some(outcome) = self.sm.outcome() {
            info!(match_key = %self.key, ?outcome, "Sync engine stopped");
            if self.is_owner && outcome.is_decided() {
                if let Err(e) = self.store.set_status(&self.key, MatchStatus::Finished).await {
                    warn!(match_key = %self.key, error = %e, "Failed to mark match finished");
                }
            }
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.sm.snapshot());
    }

    /// Our entry for the current round is visible remotely
    fn local_confirmed(&self) -> bool {
        let round = self.sm.current_round();
        self.last_seen
            .as_ref()
            .is_some_and(|doc| doc.entry(&self.local, round).is_some())
    }

    /// Our entry for `round`, carrying the forfeit claim if we made one
    fn entry_for(&self, round: u32, selection: SelectedMove) -> MoveEntry {
        let entry = MoveEntry::from(selection);
        if self.claimed == Some(round) {
            entry.forfeiting(self.opponent.clone())
        } else {
            entry
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { selection, reply } => match self.sm.submit_move(selection) {
                Ok(selection) => {
                    let round = self.sm.current_round();
                    let id = self.push(round, MoveEntry::from(selection));
                    self.replies.insert(id, reply);
                }
                Err(e) => {
                    let _ = reply.send(Err(self.refusal(e)));
                }
            },

            Command::Retry { reply } => {
                if self.sm.is_terminal() {
                    let _ = reply.send(Err(self.refusal(MatchError::MatchFinished)));
                    return;
                }
                match self.sm.player().pending() {
                    Some(selection) => {
                        let round = self.sm.current_round();
                        info!(match_key = %self.key, round, "Retrying selection write");
                        let id = self.push(round, self.entry_for(round, selection));
                        self.replies.insert(id, reply);
                    }
                    None => {
                        let _ = reply.send(Err(SyncError::NothingToRetry));
                    }
                }
            }

            Command::Terminate { outcome, reply } => {
                self.sm.finish(outcome);
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn refusal(&self, error: MatchError) -> SyncError {
        match error {
            MatchError::InvalidMove(e) => SyncError::InvalidMove(e),
            _ if self.sm.outcome() == Some(MatchOutcome::OpponentLeft) => SyncError::OpponentLeft,
            _ => SyncError::MatchFinished,
        }
    }

    /// Write our entry in the background, retrying transient failures
    fn push(&mut self, round: u32, entry: MoveEntry) -> u64 {
        let id = self.next_push;
        self.next_push += 1;

        let store = self.store.clone();
        let key = self.key.clone();
        let player = self.local.clone();
        let policy = self.config.write_retry;

        self.pushes.spawn(async move {
            let result = policy
                .run("put_merged_field", || {
                    store.put_merged_field(&key, &player, round, &entry)
                })
                .await;
            PushOutcome {
                id,
                round,
                entry,
                result,
            }
        });

        id
    }

    fn on_push_done(&mut self, done: Result<PushOutcome, JoinError>) {
        let PushOutcome {
            id,
            round,
            entry,
            result,
        } = match done {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(match_key = %self.key, error = %e, "Selection write task failed");
                return;
            }
        };

        let reply = self.replies.remove(&id);
        let current = round == self.sm.current_round() && !self.sm.is_terminal();

        match result {
            Ok(()) => {
                debug!(
                    match_key = %self.key,
                    round,
                    forfeit_claim = entry.forfeited.is_some(),
                    "Selection written"
                );
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(entry.raw().known()));
                }
            }
            Err(e) if reply.is_none() && entry.forfeited.is_some() => {
                // the deadline branch claims again on the next pass
                warn!(match_key = %self.key, round, error = %e, "Forfeit claim write failed");
                if current {
                    self.claimed = None;
                }
            }
            Err(e) => {
                let message = e.to_string();
                error!(match_key = %self.key, round, error = %message, "Selection write failed");

                if current {
                    let _ = self.sm.events().send(MatchEvent::SyncFailure {
                        round,
                        message: message.clone(),
                    });
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Err(SyncError::SyncFailure { round, message }));
                }
            }
        }
    }

    fn on_read_error(&mut self, e: StoreError) {
        let now = Instant::now();
        let since = *self.failing_since.get_or_insert(now);
        let failing_for = now.duration_since(since);

        warn!(
            match_key = %self.key,
            error = %e,
            failing_ms = failing_for.as_millis() as u64,
            "Document read failed"
        );

        if failing_for >= self.config.read_failure_timeout {
            error!(match_key = %self.key, "Store unreachable, aborting match");
            self.sm
                .finish(MatchOutcome::Aborted(AbortReason::StoreUnreachable));
        }
    }

    fn on_document(&mut self, doc: Option<MatchDocument>) {
        self.failing_since = None;

        let Some(doc) = doc else {
            info!(match_key = %self.key, "Match document deleted");
            self.sm.finish(MatchOutcome::OpponentLeft);
            return;
        };

        if doc.status == MatchStatus::Abandoned || doc.player(&self.opponent).is_none() {
            info!(match_key = %self.key, status = ?doc.status, "Opponent left");
            self.sm.finish(MatchOutcome::OpponentLeft);
            return;
        }

        // Later rounds wait until the rounds before them are resolved here
        loop {
            if self.sm.is_terminal() {
                break;
            }
            let round = self.sm.current_round();

            match doc.round_inputs(&self.local, &self.opponent, round) {
                Some((mine, theirs)) => {
                    if mine.is_forfeit() || theirs.is_forfeit() {
                        info!(
                            match_key = %self.key,
                            round,
                            player_forfeit = mine.is_forfeit(),
                            opponent_forfeit = theirs.is_forfeit(),
                            "Round closed by a forfeit"
                        );
                    }
                    if !self.resolve(round, mine, theirs) {
                        break;
                    }
                }
                None => {
                    if let Some(mine) = doc.selection(&self.local, round) {
                        if self.sm.player().pending().is_none() {
                            info!(match_key = %self.key, round, "Adopting selection found in the store");
                            self.sm.adopt_pending(mine);
                        }
                    }
                    break;
                }
            }
        }

        self.last_seen = Some(doc);
    }

    fn on_local_timeout(&mut self) {
        let round = self.sm.current_round();
        match self.sm.submit_move(SelectedMove::default()) {
            Ok(selection) => {
                info!(match_key = %self.key, round, "Round window closed without a move");
                self.push(round, MoveEntry::from(selection));
            }
            Err(e) => debug!(match_key = %self.key, round, error = %e, "Skipped empty selection"),
        }
    }

    /// Declare the opponent out of the current round by rewriting our own
    /// entry with a forfeit claim. The round resolves once the claim is
    /// visible on the feed, on both clients alike.
    fn on_opponent_timeout(&mut self) {
        let round = self.sm.current_round();
        let Some(doc) = self.last_seen.as_ref() else {
            return;
        };
        let Some(mine) = doc.entry(&self.local, round) else {
            return;
        };
        if doc.entry(&self.opponent, round).is_some() {
            return;
        }

        warn!(
            match_key = %self.key,
            round,
            opponent_id = %self.opponent,
            "Opponent missed the round window, claiming the round"
        );
        let claim = mine.clone().forfeiting(self.opponent.clone());
        self.claimed = Some(round);
        self.push(round, claim);
    }

    /// Returns true if the round was applied
    fn resolve(&mut self, round: u32, mine: Selection, theirs: Selection) -> bool {
        match self.sm.resolve_round(round, mine, theirs) {
            Ok(_) => {
                self.clock = RoundClock::start(
                    Instant::now(),
                    self.config.round_timeout,
                    self.config.opponent_grace,
                );
                true
            }
            Err(e) => {
                error!(match_key = %self.key, round, error = %e, "Round resolution failed");
                false
            }
        }
    }
}
