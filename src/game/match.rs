//! Match state machine - each client's own view of the fight
//!
//! Every mutation goes through [`MatchStateMachine::submit_move`],
//! [`MatchStateMachine::resolve_round`] or [`MatchStateMachine::finish`]. A round
//! is computed in full before any field is written, so a failed resolution
//! leaves no partial state behind.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::store::MatchKey;

use super::catalog::{available_from, CatalogError, CharacterType, MoveCatalog};
use super::resolver::{fire_after, resolve, FighterState, FireState, RoundMove, RoundOutcome, SideOutcome};
use super::snapshot::MatchSnapshot;
use super::{MatchRules, PlayerId, SelectedMove, Selection};

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    /// Both players known, no round played yet
    Created,
    /// Collecting selections for round n
    AwaitingMoves(u32),
    /// Round n is being applied
    Resolving(u32),
    /// Match over; nothing changes from here
    Terminal(MatchOutcome),
}

impl MatchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

/// Final result, from the local player's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    PlayerWon,
    OpponentWon,
    Draw,
    OpponentLeft,
    Aborted(AbortReason),
}

impl MatchOutcome {
    /// Ended by the fight itself rather than by someone leaving
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::PlayerWon | Self::OpponentWon | Self::Draw)
    }

    /// Decide a finished fight by remaining health
    pub fn from_health(player: u32, opponent: u32) -> Self {
        match player.cmp(&opponent) {
            std::cmp::Ordering::Greater => Self::PlayerWon,
            std::cmp::Ordering::Less => Self::OpponentWon,
            std::cmp::Ordering::Equal => Self::Draw,
        }
    }
}

/// Why a match was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Local player left the match
    PlayerExited,
    /// Store reads kept failing past the configured threshold
    StoreUnreachable,
    /// Round chain broken or a round resolved twice
    InvariantViolation,
}

/// Local validation failures. These never reach the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidMoveError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("{id} is cooling down until round {available_from}")]
    OnCooldown {
        id: &'static str,
        available_from: u32,
    },

    #[error("Match is not accepting moves ({0:?})")]
    NotAwaitingMoves(MatchPhase),

    #[error("Moves for round {0} were already submitted")]
    AlreadySubmitted(u32),
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("Invalid move: {0}")]
    InvalidMove(#[from] InvalidMoveError),

    #[error("Match is finished")]
    MatchFinished,

    #[error("Resolution invariant violated: {0}")]
    ResolutionInvariantViolation(String),
}

/// A resolved round. Immutable once appended to the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub index: u32,
    pub player: Selection,
    pub opponent: Selection,
    pub outcome: RoundOutcome,
}

/// One entry of a player's own round history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerRound {
    pub selection: Selection,
    pub outcome: SideOutcome,
}

/// A fighter in the match
#[derive(Debug, Clone)]
pub struct Player {
    id: PlayerId,
    character: CharacterType,
    health: u32,
    boost: u32,
    history: Vec<PlayerRound>,
    pending: Option<SelectedMove>,
}

impl Player {
    pub fn new(id: PlayerId, character: CharacterType) -> Self {
        Self {
            id,
            character,
            health: 0,
            boost: 0,
            history: Vec::new(),
            pending: None,
        }
    }

    /// Starting boost charge, e.g. the owner's opening boost
    pub fn with_boost(mut self, boost: u32) -> Self {
        self.boost = boost;
        self
    }

    pub fn id(&self) -> &PlayerId {
        &self.id
    }

    pub fn character(&self) -> CharacterType {
        self.character
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn boost(&self) -> u32 {
        self.boost
    }

    pub fn history(&self) -> &[PlayerRound] {
        &self.history
    }

    pub fn pending(&self) -> Option<SelectedMove> {
        self.pending
    }

    /// Fire carried into the current round
    pub fn fire(&self) -> Option<FireState> {
        fire_after(self.history.iter().map(|r| &r.outcome))
    }

    fn fighter_state(&self) -> FighterState {
        FighterState {
            id: self.id.clone(),
            health: self.health,
            boost: self.boost,
            fire: self.fire(),
        }
    }

    /// Check a selection against the catalog and this player's cooldowns
    pub fn validate(&self, selection: &SelectedMove, round: u32) -> Result<RoundMove, InvalidMoveError> {
        let mut moves = RoundMove::default();

        if let Some(position) = selection.attack_position {
            let attack = MoveCatalog::attack(position, self.character)?;
            let ready = self.ready_at(|m| m.attack_position == Some(position), attack.cooldown);
            if ready > round {
                return Err(InvalidMoveError::OnCooldown {
                    id: attack.id,
                    available_from: ready,
                });
            }
            moves.attack = Some(attack);
        }

        if let Some(position) = selection.defense_position {
            let defense = MoveCatalog::defense(position, self.character)?;
            let ready = self.ready_at(|m| m.defense_position == Some(position), defense.cooldown);
            if ready > round {
                return Err(InvalidMoveError::OnCooldown {
                    id: defense.id,
                    available_from: ready,
                });
            }
            moves.defense = Some(defense);
        }

        Ok(moves)
    }

    /// Validate each half separately, dropping whatever fails.
    ///
    /// Both clients hold the same history, so both drop the same parts.
    fn sanitize(&self, selection: Selection, round: u32) -> (Selection, RoundMove) {
        let (attack, defense) = match selection {
            Selection::Forfeit => return (Selection::Forfeit, RoundMove::FORFEIT),
            Selection::Committed(m) => (Ok(m.attack_position), Ok(m.defense_position)),
            Selection::Remote(raw) => (raw.attack(), raw.defense()),
        };

        let attack = attack
            .map_err(InvalidMoveError::from)
            .and_then(|p| self.validate(&SelectedMove::new(p, None), round))
            .map(|m| m.attack)
            .unwrap_or_else(|e| {
                warn!(player_id = %self.id, round, error = %e, "Dropping invalid attack");
                None
            });
        let defense = defense
            .map_err(InvalidMoveError::from)
            .and_then(|p| self.validate(&SelectedMove::new(None, p), round))
            .map(|m| m.defense)
            .unwrap_or_else(|e| {
                warn!(player_id = %self.id, round, error = %e, "Dropping invalid defense");
                None
            });

        let kept = SelectedMove::new(
            attack.map(|a| a.position),
            defense.map(|d| d.position),
        );
        (Selection::Committed(kept), RoundMove { attack, defense })
    }

    /// First round in which a move matching `used` is free again
    fn ready_at(&self, used: impl Fn(&SelectedMove) -> bool, cooldown: u32) -> u32 {
        self.history
            .iter()
            .enumerate()
            .filter(|(_, r)| used(&r.selection.moves()))
            .map(|(i, _)| available_from(i as u32, cooldown))
            .max()
            .unwrap_or(0)
    }

    fn apply(&mut self, selection: Selection, outcome: SideOutcome) {
        self.health = outcome.health_after;
        self.boost = outcome.boost_after;
        self.history.push(PlayerRound { selection, outcome });
        self.pending = None;
    }
}

/// Notifications for the UI layer
#[derive(Debug, Clone)]
pub enum MatchEvent {
    RoundResolved {
        round: Round,
        snapshot: MatchSnapshot,
    },
    Finished {
        outcome: MatchOutcome,
    },
    /// A write kept failing; the selection is kept and can be pushed again
    SyncFailure {
        round: u32,
        message: String,
    },
}

/// Per-client match state (owned by the sync engine task)
pub struct MatchStateMachine {
    key: MatchKey,
    phase: MatchPhase,
    player: Player,
    opponent: Player,
    rounds: Vec<Round>,
    rules: MatchRules,
    events: broadcast::Sender<MatchEvent>,
}

impl MatchStateMachine {
    pub fn new(key: MatchKey, mut player: Player, mut opponent: Player, rules: MatchRules) -> Self {
        let (events, _) = broadcast::channel(64);

        for p in [&mut player, &mut opponent] {
            p.health = rules.max_health;
            p.boost = rules.clamp_boost(p.boost as i64);
        }

        Self {
            key,
            phase: MatchPhase::Created,
            player,
            opponent,
            rounds: Vec::new(),
            rules,
            events,
        }
    }

    /// Open round 0
    pub fn start(&mut self) {
        if self.phase == MatchPhase::Created {
            self.phase = MatchPhase::AwaitingMoves(0);
            info!(match_key = %self.key, "Match started");
        }
    }

    pub fn key(&self) -> &MatchKey {
        &self.key
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn opponent(&self) -> &Player {
        &self.opponent
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// Index of the round being played (equals the number of resolved rounds)
    pub fn current_round(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn outcome(&self) -> Option<MatchOutcome> {
        match self.phase {
            MatchPhase::Terminal(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Subscribe to round results and match end (the UI's round-resolved hook)
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Sender<MatchEvent> {
        self.events.clone()
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot::capture(self)
    }

    /// Record the local player's selection for the current round
    pub fn submit_move(&mut self, selection: SelectedMove) -> Result<SelectedMove, MatchError> {
        let round = match self.phase {
            MatchPhase::Terminal(_) => return Err(MatchError::MatchFinished),
            MatchPhase::AwaitingMoves(n) => n,
            phase => return Err(InvalidMoveError::NotAwaitingMoves(phase).into()),
        };

        if self.player.pending.is_some() {
            return Err(InvalidMoveError::AlreadySubmitted(round).into());
        }

        self.player.validate(&selection, round)?;
        self.player.pending = Some(selection);

        debug!(
            match_key = %self.key,
            round,
            attack = ?selection.attack_position,
            defense = ?selection.defense_position,
            "Move submitted"
        );
        Ok(selection)
    }

    /// Take a selection already present remotely (rejoin after a restart)
    pub fn adopt_pending(&mut self, selection: SelectedMove) {
        if self.player.pending.is_none() && !self.is_terminal() {
            self.player.pending = Some(selection);
        }
    }

    /// Apply round `index` from both sides' selections.
    ///
    /// `index` must be the current round; anything else means the chain would
    /// break or a round would be applied twice, and the match is aborted.
    pub fn resolve_round(
        &mut self,
        index: u32,
        player: Selection,
        opponent: Selection,
    ) -> Result<&Round, MatchError> {
        match self.phase {
            MatchPhase::Terminal(_) => return Err(MatchError::MatchFinished),
            MatchPhase::AwaitingMoves(n) if n == index => {}
            phase => {
                let detail = format!(
                    "round {} offered while {:?} with {} rounds resolved",
                    index,
                    phase,
                    self.rounds.len()
                );
                error!(match_key = %self.key, %detail, "Aborting match");
                self.finish(MatchOutcome::Aborted(AbortReason::InvariantViolation));
                return Err(MatchError::ResolutionInvariantViolation(detail));
            }
        }

        self.phase = MatchPhase::Resolving(index);

        let (player_sel, player_move) = self.player.sanitize(player, index);
        let (opponent_sel, opponent_move) = self.opponent.sanitize(opponent, index);

        let outcome = resolve(
            index,
            &player_move,
            &opponent_move,
            &self.player.fighter_state(),
            &self.opponent.fighter_state(),
            &self.rules,
        );

        self.player.apply(player_sel, outcome.player);
        self.opponent.apply(opponent_sel, outcome.opponent);
        self.rounds.push(Round {
            index,
            player: player_sel,
            opponent: opponent_sel,
            outcome,
        });

        info!(
            match_key = %self.key,
            round = index,
            player_health = self.player.health,
            opponent_health = self.opponent.health,
            player_strike = ?outcome.player.strike,
            opponent_strike = ?outcome.opponent.strike,
            "Round resolved"
        );

        let finished = self.player.health == 0
            || self.opponent.health == 0
            || self
                .rules
                .max_rounds
                .is_some_and(|max| self.rounds.len() as u32 >= max);

        if finished {
            let outcome = MatchOutcome::from_health(self.player.health, self.opponent.health);
            self.phase = MatchPhase::Terminal(outcome);
        } else {
            self.phase = MatchPhase::AwaitingMoves(index + 1);
        }

        let round = self.rounds[self.rounds.len() - 1].clone();
        let _ = self.events.send(MatchEvent::RoundResolved {
            round,
            snapshot: self.snapshot(),
        });

        if let MatchPhase::Terminal(outcome) = self.phase {
            info!(match_key = %self.key, ?outcome, "Match ended");
            let _ = self.events.send(MatchEvent::Finished { outcome });
        }

        Ok(&self.rounds[self.rounds.len() - 1])
    }

    /// Force the match to end. Returns false if it had already ended.
    pub fn finish(&mut self, outcome: MatchOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.phase = MatchPhase::Terminal(outcome);
        info!(match_key = %self.key, ?outcome, "Match ended");
        let _ = self.events.send(MatchEvent::Finished { outcome });
        true
    }
}
