//! Round resolution - a pure function both clients run on the same inputs
//!
//! Nothing here reads clocks, randomness or shared state, and all arithmetic is
//! integer, so two clients given the same two moves always agree on the result.

use super::catalog::{Attack, Defense};
use super::{MatchRules, PlayerId};

/// A side's validated moves for one round. Forfeits carry neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundMove {
    pub attack: Option<&'static Attack>,
    pub defense: Option<&'static Defense>,
}

impl RoundMove {
    pub const FORFEIT: RoundMove = RoundMove {
        attack: None,
        defense: None,
    };
}

/// A side's standing going into a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FighterState {
    pub id: PlayerId,
    pub health: u32,
    pub boost: u32,
    pub fire: Option<FireState>,
}

/// Damage bonus earned by landing attacks in consecutive rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FireState {
    /// Heats light and medium attacks
    Small,
    /// Heats every attack, and goes out once used
    Big,
}

impl FireState {
    pub fn bonus_pct(self) -> u32 {
        match self {
            Self::Small => 20,
            Self::Big => 35,
        }
    }

    pub fn applies_to(self, attack: &Attack) -> bool {
        match self {
            Self::Small => !attack.position.is_hard(),
            Self::Big => true,
        }
    }
}

/// Fire a side carries into its next round, given its resolved rounds in
/// order.
///
/// One landed attack lights a small fire and a second in a row a big one.
/// Missing, not attacking, or spending a big fire puts it out.
pub fn fire_after<'a>(rounds: impl IntoIterator<Item = &'a SideOutcome>) -> Option<FireState> {
    let mut streak = 0;
    let mut fire = None;
    for side in rounds {
        if !side.strike.landed() || side.fire == Some(FireState::Big) {
            streak = 0;
            fire = None;
            continue;
        }
        streak += 1;
        fire = if streak > 1 {
            streak = 0;
            Some(FireState::Big)
        } else {
            Some(FireState::Small)
        };
    }
    fire
}

/// What happened to one side's attack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrikeResult {
    /// No attack picked, or knocked out before acting
    NoAttack,
    /// Countered by the defender's dash
    Dodged,
    Hit { damage: u32 },
    /// Hit that took the defender to zero health
    Knockout { damage: u32 },
}

impl StrikeResult {
    pub fn landed(&self) -> bool {
        matches!(self, Self::Hit { .. } | Self::Knockout { .. })
    }

    pub fn damage(&self) -> u32 {
        match self {
            Self::Hit { damage } | Self::Knockout { damage } => *damage,
            Self::NoAttack | Self::Dodged => 0,
        }
    }
}

/// Result of a round for one side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideOutcome {
    /// This side's attack against the other
    pub strike: StrikeResult,
    pub damage_taken: u32,
    /// Hit by the faster side before acting
    pub stunned: bool,
    pub acted_first: bool,
    /// Fire that heated this side's attack
    pub fire: Option<FireState>,
    pub boost_delta: i32,
    pub health_after: u32,
    pub boost_after: u32,
}

/// Fully determined result of one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundOutcome {
    pub round: u32,
    pub player: SideOutcome,
    pub opponent: SideOutcome,
}

impl RoundOutcome {
    /// The same outcome seen from the other client
    pub fn mirrored(&self) -> Self {
        Self {
            round: self.round,
            player: self.opponent,
            opponent: self.player,
        }
    }

    pub fn total_damage(&self) -> u32 {
        self.player.damage_taken + self.opponent.damage_taken
    }
}

struct Fighter<'a> {
    moves: &'a RoundMove,
    fire: Option<FireState>,
    health: u32,
    damage_taken: u32,
    strike: StrikeResult,
    stunned: bool,
    dodged: bool,
    hit: bool,
}

impl<'a> Fighter<'a> {
    fn new(moves: &'a RoundMove, state: &FighterState) -> Self {
        let fire = state
            .fire
            .filter(|f| moves.attack.is_some_and(|a| f.applies_to(a)));
        Self {
            moves,
            fire,
            health: state.health,
            damage_taken: 0,
            strike: StrikeResult::NoAttack,
            stunned: false,
            dodged: false,
            hit: false,
        }
    }

    fn outcome(&self, state: &FighterState, acted_first: bool, rules: &MatchRules) -> SideOutcome {
        let mut delta: i64 = 0;
        if self.dodged {
            delta += rules.boost_gain as i64;
        }
        if self.hit {
            delta -= rules.boost_loss as i64;
        }
        let boost_after = rules.clamp_boost(state.boost as i64 + delta);

        SideOutcome {
            strike: self.strike,
            damage_taken: self.damage_taken,
            stunned: self.stunned,
            acted_first,
            fire: self.fire,
            boost_delta: boost_after as i32 - state.boost as i32,
            health_after: self.health,
            boost_after,
        }
    }
}

/// Resolve one round between the local player and the opponent.
///
/// Never fails: moves must already be validated against the catalog.
pub fn resolve(
    round: u32,
    player_move: &RoundMove,
    opponent_move: &RoundMove,
    player: &FighterState,
    opponent: &FighterState,
    rules: &MatchRules,
) -> RoundOutcome {
    let player_first = acts_first(player_move, player, opponent_move, opponent, rules);

    let mut p = Fighter::new(player_move, player);
    let mut o = Fighter::new(opponent_move, opponent);

    {
        let (first, second) = if player_first {
            (&mut p, &mut o)
        } else {
            (&mut o, &mut p)
        };

        first.strike = strike(first.moves, first.fire, second, 0);
        if first.strike.landed() {
            second.stunned = true;
        }

        if second.health > 0 {
            let stagger = if second.stunned {
                first.moves.attack.map_or(0, |a| a.stagger_pct)
            } else {
                0
            };
            second.strike = strike(second.moves, second.fire, first, stagger);
        }
    }

    RoundOutcome {
        round,
        player: p.outcome(player, player_first, rules),
        opponent: o.outcome(opponent, !player_first, rules),
    }
}

/// Attack priority: attack speed with the dash bonus, plus boost charge
pub fn effective_speed(moves: &RoundMove, state: &FighterState, rules: &MatchRules) -> u32 {
    let attack_speed = moves.attack.map_or(0, |a| {
        let bonus = moves.defense.map_or(0, |d| d.speed_bonus_pct);
        a.speed * (100 + bonus) / 100
    });
    attack_speed + state.boost * rules.speed_per_boost
}

/// Faster side first; ties go to the higher charge, then to the lower player id
fn acts_first(
    player_move: &RoundMove,
    player: &FighterState,
    opponent_move: &RoundMove,
    opponent: &FighterState,
    rules: &MatchRules,
) -> bool {
    let p = (effective_speed(player_move, player, rules), player.boost);
    let o = (effective_speed(opponent_move, opponent, rules), opponent.boost);
    if p != o {
        return p > o;
    }
    player.id <= opponent.id
}

fn strike(
    attacker: &RoundMove,
    fire: Option<FireState>,
    defender: &mut Fighter<'_>,
    stagger_pct: u32,
) -> StrikeResult {
    let Some(attack) = attacker.attack else {
        return StrikeResult::NoAttack;
    };

    if let Some(defense) = defender.moves.defense {
        if defense.counters(attack.position) {
            defender.dodged = true;
            return StrikeResult::Dodged;
        }
    }

    let incoming_pct = defender.moves.defense.map_or(100, |d| d.incoming_damage_pct.min(100));
    let heat = 100 + fire.map_or(0, FireState::bonus_pct);
    let raw = attack.damage * heat * (100 - stagger_pct.min(100)) * incoming_pct / 1_000_000;
    let damage = raw.min(defender.health);

    defender.health -= damage;
    defender.damage_taken += damage;
    defender.hit = true;

    if defender.health == 0 {
        StrikeResult::Knockout { damage }
    } else {
        StrikeResult::Hit { damage }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::catalog::{AttackPosition, CharacterType, DefensePosition, MoveCatalog};
    use proptest::prelude::*;

    fn fighter(id: &str, health: u32, boost: u32) -> FighterState {
        FighterState {
            id: PlayerId::new(id),
            health,
            boost,
            fire: None,
        }
    }

    fn burning(id: &str, fire: FireState) -> FighterState {
        FighterState {
            fire: Some(fire),
            ..fighter(id, 100, 0)
        }
    }

    fn side(strike: StrikeResult, fire: Option<FireState>) -> SideOutcome {
        SideOutcome {
            strike,
            damage_taken: 0,
            stunned: false,
            acted_first: true,
            fire,
            boost_delta: 0,
            health_after: 100,
            boost_after: 0,
        }
    }

    fn moves(
        character: CharacterType,
        attack: Option<AttackPosition>,
        defense: Option<DefensePosition>,
    ) -> RoundMove {
        RoundMove {
            attack: attack.map(|p| MoveCatalog::attack(p, character).unwrap()),
            defense: defense.map(|p| MoveCatalog::defense(p, character).unwrap()),
        }
    }

    #[test]
    fn forfeit_takes_full_damage_and_gains_nothing() {
        let rules = MatchRules::default();
        let a = moves(CharacterType::Clara, Some(AttackPosition::RightHard), None);
        let out = resolve(
            0,
            &a,
            &RoundMove::FORFEIT,
            &fighter("a", 100, 0),
            &fighter("b", 100, 0),
            &rules,
        );

        assert_eq!(out.player.strike, StrikeResult::Hit { damage: 25 });
        assert_eq!(out.opponent.damage_taken, 25);
        assert_eq!(out.opponent.health_after, 75);
        assert_eq!(out.opponent.boost_after, 0);
        assert_eq!(out.player.boost_delta, 0);
        assert_eq!(out.player.damage_taken, 0);
        assert!(out.player.acted_first);
    }

    #[test]
    fn covered_attack_is_dodged_and_charges_boost() {
        let rules = MatchRules::default();
        let a = moves(CharacterType::Samuel, Some(AttackPosition::RightLight), None);
        let b = moves(CharacterType::Clara, None, Some(DefensePosition::Right));
        let out = resolve(3, &a, &b, &fighter("a", 80, 1), &fighter("b", 60, 0), &rules);

        assert_eq!(out.player.strike, StrikeResult::Dodged);
        assert_eq!(out.opponent.damage_taken, 0);
        assert_eq!(out.opponent.boost_delta, rules.boost_gain as i32);
        assert_eq!(out.opponent.boost_after, 1);
        assert_eq!(out.player.boost_after, 1);
    }

    #[test]
    fn second_attacker_is_staggered_by_a_landed_hit() {
        let rules = MatchRules::default();
        // light punch (speed 50) beats hard kick (speed 25)
        let a = moves(CharacterType::Samuel, Some(AttackPosition::LeftLight), None);
        let b = moves(CharacterType::Clara, Some(AttackPosition::RightHard), None);
        let out = resolve(0, &a, &b, &fighter("a", 100, 0), &fighter("b", 100, 0), &rules);

        assert!(out.player.acted_first);
        assert!(out.opponent.stunned);
        assert_eq!(out.opponent.damage_taken, 10);
        // 25 * (100 - 15) / 100 = 21
        assert_eq!(out.player.damage_taken, 21);
        assert_eq!(out.player.boost_after, 0);
    }

    #[test]
    fn backward_dash_softens_the_hit() {
        let rules = MatchRules::default();
        let a = moves(CharacterType::Samuel, Some(AttackPosition::LeftHard), None);
        let b = moves(CharacterType::Clara, None, Some(DefensePosition::Backward));
        let out = resolve(0, &a, &b, &fighter("a", 100, 0), &fighter("b", 100, 2), &rules);
        assert_eq!(out.opponent.damage_taken, 15);
        assert_eq!(out.opponent.boost_after, 1);
    }

    #[test]
    fn knocked_out_side_never_acts() {
        let rules = MatchRules::default();
        let a = moves(CharacterType::Samuel, Some(AttackPosition::LeftLight), None);
        let b = moves(CharacterType::Clara, Some(AttackPosition::RightHard), None);
        let out = resolve(7, &a, &b, &fighter("a", 5, 0), &fighter("b", 4, 0), &rules);

        assert_eq!(out.player.strike, StrikeResult::Knockout { damage: 4 });
        assert_eq!(out.opponent.strike, StrikeResult::NoAttack);
        assert_eq!(out.player.health_after, 5);
        assert_eq!(out.opponent.health_after, 0);
    }

    #[test]
    fn boost_breaks_speed_ties_before_ids() {
        let a = moves(CharacterType::Samuel, Some(AttackPosition::LeftMedium), None);
        let b = moves(CharacterType::Clara, Some(AttackPosition::RightMedium), None);

        let rules = MatchRules::default();
        let out = resolve(0, &a, &b, &fighter("a", 100, 0), &fighter("z", 100, 1), &rules);
        assert!(out.opponent.acted_first, "charge adds priority");

        let flat = MatchRules {
            speed_per_boost: 0,
            ..MatchRules::default()
        };
        let out = resolve(0, &a, &b, &fighter("a", 100, 0), &fighter("z", 100, 1), &flat);
        assert!(out.opponent.acted_first, "equal speed goes to the higher charge");


        let out = resolve(0, &a, &b, &fighter("z", 100, 0), &fighter("a", 100, 0), &rules);
        assert!(out.opponent.acted_first, "lower id wins a full tie");
    }

    #[test]
    fn landed_streaks_light_small_then_big_fire() {
        let hit = StrikeResult::Hit { damage: 10 };
        let small = Some(FireState::Small);
        let big = Some(FireState::Big);

        let fresh: [SideOutcome; 0] = [];
        assert_eq!(fire_after(&fresh), None);
        assert_eq!(fire_after(&[side(hit, None)]), small);
        assert_eq!(fire_after(&[side(hit, None), side(hit, small)]), big);
        // spending the big fire puts it out even on a hit
        assert_eq!(fire_after(&[side(hit, None), side(hit, small), side(hit, big)]), None);
        // a hard attack under a small fire still counts toward the streak
        assert_eq!(fire_after(&[side(hit, None), side(hit, None)]), big);
        assert_eq!(fire_after(&[side(hit, None), side(StrikeResult::Dodged, None)]), None);
        assert_eq!(fire_after(&[side(hit, None), side(StrikeResult::NoAttack, None)]), None);
    }

    #[test]
    fn small_fire_heats_light_attacks_but_not_hard_ones() {
        let rules = MatchRules::default();
        let light = moves(CharacterType::Samuel, Some(AttackPosition::LeftLight), None);
        let out = resolve(
            1,
            &light,
            &RoundMove::FORFEIT,
            &burning("a", FireState::Small),
            &fighter("b", 100, 0),
            &rules,
        );
        assert_eq!(out.player.fire, Some(FireState::Small));
        assert_eq!(out.opponent.damage_taken, 12);

        let hard = moves(CharacterType::Samuel, Some(AttackPosition::LeftHard), None);
        let out = resolve(
            1,
            &hard,
            &RoundMove::FORFEIT,
            &burning("a", FireState::Small),
            &fighter("b", 100, 0),
            &rules,
        );
        assert_eq!(out.player.fire, None);
        assert_eq!(out.opponent.damage_taken, 25);

        let out = resolve(
            1,
            &hard,
            &RoundMove::FORFEIT,
            &burning("a", FireState::Big),
            &fighter("b", 100, 0),
            &rules,
        );
        assert_eq!(out.player.fire, Some(FireState::Big));
        // 25 * 135 / 100
        assert_eq!(out.opponent.damage_taken, 33);
    }

    fn arb_fire() -> impl Strategy<Value = Option<FireState>> {
        prop::option::of(prop::bool::ANY.prop_map(|big| if big { FireState::Big } else { FireState::Small }))
    }

    fn arb_move() -> impl Strategy<Value = RoundMove> {
        (
            prop::bool::ANY,
            prop::option::of(0usize..6),
            prop::option::of(0usize..4),
        )
            .prop_map(|(clara, attack, defense)| {
                let character = if clara {
                    CharacterType::Clara
                } else {
                    CharacterType::Samuel
                };
                moves(
                    character,
                    attack.map(|i| AttackPosition::ALL[i]),
                    defense.map(|i| DefensePosition::ALL[i]),
                )
            })
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic_and_symmetric(
            pm in arb_move(),
            om in arb_move(),
            ph in 1u32..=100,
            oh in 1u32..=100,
            pb in 0u32..=3,
            ob in 0u32..=3,
            pf in arb_fire(),
            of in arb_fire(),
        ) {
            let rules = MatchRules::default();
            let p = FighterState { fire: pf, ..fighter("alice", ph, pb) };
            let o = FighterState { fire: of, ..fighter("bob", oh, ob) };

            let first = resolve(4, &pm, &om, &p, &o, &rules);
            let again = resolve(4, &pm, &om, &p, &o, &rules);
            prop_assert_eq!(first, again);

            let other_client = resolve(4, &om, &pm, &o, &p, &rules);
            prop_assert_eq!(first, other_client.mirrored());
        }

        #[test]
        fn damage_never_exceeds_the_hottest_attacks_involved(
            pm in arb_move(),
            om in arb_move(),
            ph in 1u32..=100,
            oh in 1u32..=100,
            pf in arb_fire(),
            of in arb_fire(),
        ) {
            let rules = MatchRules::default();
            let p = FighterState { fire: pf, ..fighter("a", ph, 0) };
            let o = FighterState { fire: of, ..fighter("b", oh, 0) };
            let out = resolve(0, &pm, &om, &p, &o, &rules);
            let hottest = |m: &RoundMove| m.attack.map_or(0, |a| a.damage * 135 / 100);
            let budget = hottest(&pm) + hottest(&om);
            prop_assert!(out.total_damage() <= budget);
            prop_assert!(out.player.boost_after <= rules.boost_max);
            prop_assert!(out.opponent.boost_after <= rules.boost_max);
        }
    }
}
