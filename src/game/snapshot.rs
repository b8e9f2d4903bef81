//! Read-only match snapshots for the UI layer

use crate::store::MatchKey;

use super::catalog::{AttackPosition, CharacterType, DefensePosition, MoveCatalog};
use super::r#match::{MatchPhase, MatchStateMachine, Player};
use super::resolver::{FireState, RoundOutcome};
use super::{PlayerId, SelectedMove};

/// One fighter as shown on screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub character: CharacterType,
    pub health: u32,
    pub max_health: u32,
    pub boost: u32,
    /// Fire heating the next attack, if any
    pub fire: Option<FireState>,
    pub rounds_played: usize,
}

impl PlayerSnapshot {
    fn of(player: &Player, max_health: u32) -> Self {
        Self {
            id: player.id().clone(),
            character: player.character(),
            health: player.health(),
            max_health,
            boost: player.boost(),
            fire: player.fire(),
            rounds_played: player.history().len(),
        }
    }
}

/// Point-in-time copy of a match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSnapshot {
    pub match_key: MatchKey,
    pub phase: MatchPhase,
    /// Index of the round being played
    pub round: u32,
    pub player: PlayerSnapshot,
    pub opponent: PlayerSnapshot,
    /// Local selection for the current round, if already made
    pub pending: Option<SelectedMove>,
    /// Attacks the local player may pick this round
    pub available_attacks: Vec<AttackPosition>,
    /// Defenses the local player may pick this round
    pub available_defenses: Vec<DefensePosition>,
    pub last_round: Option<RoundOutcome>,
}

impl MatchSnapshot {
    pub fn capture(sm: &MatchStateMachine) -> Self {
        let max_health = sm.rules().max_health;
        let player = sm.player();
        let round = sm.current_round();
        let open = matches!(sm.phase(), MatchPhase::AwaitingMoves(_)) && player.pending().is_none();

        let moves = MoveCatalog::moves_for(player.character());
        let available_attacks = if open {
            moves
                .attacks
                .iter()
                .map(|a| a.position)
                .filter(|p| {
                    player
                        .validate(&SelectedMove::new(Some(*p), None), round)
                        .is_ok()
                })
                .collect()
        } else {
            Vec::new()
        };
        let available_defenses = if open {
            moves
                .defenses
                .iter()
                .map(|d| d.position)
                .filter(|p| {
                    player
                        .validate(&SelectedMove::new(None, Some(*p)), round)
                        .is_ok()
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            match_key: sm.key().clone(),
            phase: sm.phase(),
            round,
            player: PlayerSnapshot::of(player, max_health),
            opponent: PlayerSnapshot::of(sm.opponent(), max_health),
            pending: player.pending(),
            available_attacks,
            available_defenses,
            last_round: sm.rounds().last().map(|r| r.outcome),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}
