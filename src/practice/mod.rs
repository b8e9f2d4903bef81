//! Practice opponent that picks random legal moves

use std::time::Duration;

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::game::{MatchOutcome, MatchPhase, MatchSnapshot, SelectedMove};
use crate::sync::{MatchHandle, SyncError};

/// Chance of throwing an attack in a round
const ATTACK_CHANCE: f64 = 0.85;
/// Chance of dashing in a round
const DEFENSE_CHANCE: f64 = 0.6;

pub struct PracticeFighter {
    rng: ChaCha8Rng,
}

impl PracticeFighter {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { rng }
    }

    /// Pick among the moves the snapshot offers
    pub fn choose(&mut self, snapshot: &MatchSnapshot) -> SelectedMove {
        let attack = if self.rng.gen_bool(ATTACK_CHANCE) {
            snapshot.available_attacks.choose(&mut self.rng).copied()
        } else {
            None
        };
        let defense = if self.rng.gen_bool(DEFENSE_CHANCE) {
            snapshot.available_defenses.choose(&mut self.rng).copied()
        } else {
            None
        };
        SelectedMove::new(attack, defense)
    }

    /// Play every round of `handle` until the match ends
    pub async fn play(mut self, handle: &MatchHandle, think_time: Duration) -> Option<MatchOutcome> {
        let mut state = handle.watch_state();

        loop {
            let snapshot = state.borrow_and_update().clone();
            match snapshot.phase {
                MatchPhase::Terminal(outcome) => return Some(outcome),
                MatchPhase::AwaitingMoves(round) if snapshot.pending.is_none() => {
                    sleep(think_time).await;
                    let pick = self.choose(&snapshot);
                    debug!(player_id = %handle.player(), round, ?pick, "Practice pick");

                    match handle.submit_move(pick).await {
                        Ok(_) => continue,
                        Err(SyncError::SyncFailure { round, message }) => {
                            warn!(round, %message, "Write failed, retrying once");
                            if let Err(e) = handle.retry_submit().await {
                                warn!(round, error = %e, "Retry failed");
                            }
                        }
                        Err(SyncError::InvalidMove(e)) => {
                            warn!(round, error = %e, "Practice pick refused");
                        }
                        Err(_) => return handle.outcome(),
                    }
                }
                _ => {}
            }

            if state.changed().await.is_err() {
                return handle.outcome();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::r#match::Player;
    use crate::game::{CharacterType, MatchRules, MatchStateMachine, PlayerId};
    use crate::store::MatchKey;

    fn snapshot() -> MatchSnapshot {
        let mut sm = MatchStateMachine::new(
            MatchKey::new("a"),
            Player::new(PlayerId::new("a"), CharacterType::Clara),
            Player::new(PlayerId::new("b"), CharacterType::Samuel),
            MatchRules::default(),
        );
        sm.start();
        sm.snapshot()
    }

    #[test]
    fn picks_are_legal_and_seeded() {
        let snap = snapshot();
        let mut a = PracticeFighter::new(Some(7));
        let mut b = PracticeFighter::new(Some(7));

        for _ in 0..50 {
            let pick = a.choose(&snap);
            assert_eq!(pick, b.choose(&snap));
            if let Some(attack) = pick.attack_position {
                assert!(snap.available_attacks.contains(&attack));
            }
            if let Some(defense) = pick.defense_position {
                assert!(snap.available_defenses.contains(&defense));
            }
        }
    }

    #[test]
    fn nothing_offered_means_nothing_picked() {
        let mut snap = snapshot();
        snap.available_attacks.clear();
        snap.available_defenses.clear();
        let mut fighter = PracticeFighter::new(Some(1));
        for _ in 0..10 {
            assert!(fighter.choose(&snap).is_empty());
        }
    }
}
