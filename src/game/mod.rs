//! Fight simulation: move catalog, round resolution and the per-client match state

pub mod catalog;
pub mod r#match;
pub mod resolver;
pub mod snapshot;

pub use catalog::{AttackPosition, CatalogError, CharacterType, DefensePosition, MoveCatalog};
pub use r#match::{
    AbortReason, InvalidMoveError, MatchError, MatchEvent, MatchOutcome, MatchPhase,
    MatchStateMachine, Player, Round,
};
pub use resolver::{
    fire_after, resolve, FighterState, FireState, RoundMove, RoundOutcome, SideOutcome, StrikeResult,
};
pub use snapshot::MatchSnapshot;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable player identifier handed out by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for PlayerId {
    fn from(id: Uuid) -> Self {
        Self(id.hyphenated().to_string())
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A player's pick for one round. Either position may be empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedMove {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_position: Option<AttackPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defense_position: Option<DefensePosition>,
}

impl SelectedMove {
    pub fn new(attack: Option<AttackPosition>, defense: Option<DefensePosition>) -> Self {
        Self {
            attack_position: attack,
            defense_position: defense,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attack_position.is_none() && self.defense_position.is_none()
    }
}

/// A pick as stored in the shared document: positions are plain integers
/// until checked against the catalog, so one unknown value cannot make the
/// whole document unreadable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawMove {
    pub attack_position: Option<i64>,
    pub defense_position: Option<i64>,
}

impl RawMove {
    pub fn attack(&self) -> Result<Option<AttackPosition>, CatalogError> {
        self.attack_position
            .map(|v| {
                u8::try_from(v)
                    .ok()
                    .and_then(|v| AttackPosition::try_from(v).ok())
                    .ok_or(CatalogError::UnknownAttackPosition(v))
            })
            .transpose()
    }

    pub fn defense(&self) -> Result<Option<DefensePosition>, CatalogError> {
        self.defense_position
            .map(|v| {
                u8::try_from(v)
                    .ok()
                    .and_then(|v| DefensePosition::try_from(v).ok())
                    .ok_or(CatalogError::UnknownDefensePosition(v))
            })
            .transpose()
    }

    /// The recognised positions, unknown ones left empty
    pub fn known(&self) -> SelectedMove {
        SelectedMove::new(self.attack().ok().flatten(), self.defense().ok().flatten())
    }
}

impl From<SelectedMove> for RawMove {
    fn from(m: SelectedMove) -> Self {
        Self {
            attack_position: m.attack_position.map(|p| u8::from(p).into()),
            defense_position: m.defense_position.map(|p| u8::from(p).into()),
        }
    }
}

/// What a side brought to a resolved round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Committed(SelectedMove),
    /// Read from the match document; checked against the catalog and
    /// cooldowns before it is used
    Remote(RawMove),
    /// Nothing arrived before the round window closed
    Forfeit,
}

impl Selection {
    pub fn is_forfeit(&self) -> bool {
        matches!(self, Self::Forfeit)
    }

    pub fn moves(&self) -> SelectedMove {
        match self {
            Self::Committed(m) => *m,
            Self::Remote(raw) => raw.known(),
            Self::Forfeit => SelectedMove::default(),
        }
    }
}

/// Rules both clients must agree on for a match. The host writes its rules
/// into the match document and the challenger plays by those.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchRules {
    /// Starting (and maximum) health
    pub max_health: u32,
    /// Match ends after this many rounds; `None` plays until a knockout
    pub max_rounds: Option<u32>,
    pub boost_min: u32,
    pub boost_max: u32,
    /// Charge gained by a successful dodge
    pub boost_gain: u32,
    /// Charge lost when hit
    pub boost_loss: u32,
    /// Priority added per charge
    pub speed_per_boost: u32,
    /// Charge the owner starts with when the opening boost goes their way
    pub opening_boost: u32,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            max_health: 100,
            max_rounds: None,
            boost_min: 0,
            boost_max: 3,
            boost_gain: 1,
            boost_loss: 1,
            speed_per_boost: 10,
            opening_boost: 1,
        }
    }
}

impl MatchRules {
    /// Clamp a charge into the boost range. Bounds given in the wrong order
    /// are swapped rather than trusted.
    pub fn clamp_boost(&self, charge: i64) -> u32 {
        let low = self.boost_min.min(self.boost_max) as i64;
        let high = self.boost_min.max(self.boost_max) as i64;
        charge.clamp(low, high) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_boost_tolerates_inverted_bounds() {
        let rules = MatchRules {
            boost_min: 3,
            boost_max: 1,
            ..MatchRules::default()
        };
        assert_eq!(rules.clamp_boost(-4), 1);
        assert_eq!(rules.clamp_boost(2), 2);
        assert_eq!(rules.clamp_boost(9), 3);
    }

    #[test]
    fn raw_moves_keep_the_recognised_half() {
        let raw = RawMove {
            attack_position: Some(9),
            defense_position: Some(3),
        };
        assert_eq!(raw.attack(), Err(CatalogError::UnknownAttackPosition(9)));
        assert_eq!(raw.known(), SelectedMove::new(None, Some(DefensePosition::Backward)));

        let huge = RawMove {
            attack_position: Some(300),
            defense_position: None,
        };
        assert!(huge.attack().is_err());
    }

    #[test]
    fn rules_read_from_a_document_fill_in_missing_fields() {
        let rules: MatchRules = serde_json::from_str(r#"{"maxRounds":1}"#).unwrap();
        assert_eq!(rules.max_rounds, Some(1));
        assert_eq!(rules.max_health, 100);
    }
}
