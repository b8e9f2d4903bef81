//! Move catalog - attacks and defenses available per character

use std::fmt;

use serde::{Deserialize, Serialize};

/// Playable characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterType {
    /// Boxer, fights with punches
    Samuel,
    /// Kickboxer, fights with kicks
    Clara,
}

impl Default for CharacterType {
    fn default() -> Self {
        Self::Samuel
    }
}

impl fmt::Display for CharacterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Samuel => f.write_str("samuel"),
            Self::Clara => f.write_str("clara"),
        }
    }
}

/// Which half of the body a move targets or covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Attack slot. Odd positions are left-side attacks, even are right-side.
///
/// Encoded on the wire as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AttackPosition {
    LeftLight = 1,
    RightLight = 2,
    LeftMedium = 3,
    RightMedium = 4,
    LeftHard = 5,
    RightHard = 6,
}

impl AttackPosition {
    pub const ALL: [AttackPosition; 6] = [
        Self::LeftLight,
        Self::RightLight,
        Self::LeftMedium,
        Self::RightMedium,
        Self::LeftHard,
        Self::RightHard,
    ];

    pub fn side(self) -> Side {
        if (self as u8) % 2 == 1 {
            Side::Left
        } else {
            Side::Right
        }
    }

    pub fn is_hard(self) -> bool {
        matches!(self, Self::LeftHard | Self::RightHard)
    }
}

impl TryFrom<u8> for AttackPosition {
    type Error = CatalogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|p| *p as u8 == value)
            .ok_or(CatalogError::UnknownAttackPosition(value.into()))
    }
}

impl From<AttackPosition> for u8 {
    fn from(position: AttackPosition) -> Self {
        position as u8
    }
}

impl fmt::Display for AttackPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Defense slot, encoded on the wire as its integer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DefensePosition {
    Forward = 1,
    Left = 2,
    Backward = 3,
    Right = 4,
}

impl DefensePosition {
    pub const ALL: [DefensePosition; 4] = [Self::Forward, Self::Left, Self::Backward, Self::Right];
}

impl TryFrom<u8> for DefensePosition {
    type Error = CatalogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|p| *p as u8 == value)
            .ok_or(CatalogError::UnknownDefensePosition(value.into()))
    }
}

impl From<DefensePosition> for u8 {
    fn from(position: DefensePosition) -> Self {
        position as u8
    }
}

impl fmt::Display for DefensePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Forward => "forward",
            Self::Left => "left",
            Self::Backward => "backward",
            Self::Right => "right",
        };
        f.write_str(name)
    }
}

/// Attack stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attack {
    pub id: &'static str,
    pub name: &'static str,
    pub position: AttackPosition,
    /// Base damage dealt on a landed hit
    pub damage: u32,
    /// Intrinsic speed, decides who strikes first
    pub speed: u32,
    /// Percentage cut applied to the opponent's counter-attack when this lands first
    pub stagger_pct: u32,
    /// Rounds this attack stays unavailable after use
    pub cooldown: u32,
}

/// Defense stats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defense {
    pub id: &'static str,
    pub name: &'static str,
    pub position: DefensePosition,
    /// Attack side fully dodged by this defense
    pub covers: Option<Side>,
    /// Bonus applied to the defender's own attack speed
    pub speed_bonus_pct: u32,
    /// Share of an uncovered attack's damage that still lands (never above 100)
    pub incoming_damage_pct: u32,
    pub cooldown: u32,
}

impl Defense {
    /// True if this defense dodges an attack at `position`
    pub fn counters(&self, position: AttackPosition) -> bool {
        self.covers == Some(position.side())
    }
}

/// Kind of move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Attack,
    Defense,
}

/// A catalog entry of either kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Attack(&'static Attack),
    Defense(&'static Defense),
}

impl Move {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Attack(a) => a.id,
            Self::Defense(d) => d.id,
        }
    }

    pub fn kind(&self) -> MoveKind {
        match self {
            Self::Attack(_) => MoveKind::Attack,
            Self::Defense(_) => MoveKind::Defense,
        }
    }

    pub fn cooldown(&self) -> u32 {
        match self {
            Self::Attack(a) => a.cooldown,
            Self::Defense(d) => d.cooldown,
        }
    }
}

/// A position of either kind, used for catalog lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Attack(AttackPosition),
    Defense(DefensePosition),
}

/// All moves a character can pick from
#[derive(Debug, Clone, Copy)]
pub struct MoveSet {
    pub attacks: &'static [Attack],
    pub defenses: &'static [Defense],
}

/// Catalog lookup errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown attack position {0}")]
    UnknownAttackPosition(i64),

    #[error("Unknown defense position {0}")]
    UnknownDefensePosition(i64),

    #[error("No attack at position {position} for {character}")]
    AttackNotFound {
        character: CharacterType,
        position: AttackPosition,
    },

    #[error("No defense at position {position} for {character}")]
    DefenseNotFound {
        character: CharacterType,
        position: DefensePosition,
    },
}

static PUNCHES: [Attack; 6] = [
    Attack {
        id: "leftPunchLight",
        name: "Light Left Punch",
        position: AttackPosition::LeftLight,
        damage: 10,
        speed: 50,
        stagger_pct: 15,
        cooldown: 1,
    },
    Attack {
        id: "rightPunchLight",
        name: "Light Right Punch",
        position: AttackPosition::RightLight,
        damage: 10,
        speed: 50,
        stagger_pct: 15,
        cooldown: 1,
    },
    Attack {
        id: "leftPunchMedium",
        name: "Medium Left Punch",
        position: AttackPosition::LeftMedium,
        damage: 15,
        speed: 35,
        stagger_pct: 25,
        cooldown: 2,
    },
    Attack {
        id: "rightPunchMedium",
        name: "Medium Right Punch",
        position: AttackPosition::RightMedium,
        damage: 15,
        speed: 35,
        stagger_pct: 25,
        cooldown: 2,
    },
    Attack {
        id: "leftPunchHard",
        name: "Hard Left Punch",
        position: AttackPosition::LeftHard,
        damage: 25,
        speed: 25,
        stagger_pct: 35,
        cooldown: 3,
    },
    Attack {
        id: "rightPunchHard",
        name: "Hard Right Punch",
        position: AttackPosition::RightHard,
        damage: 25,
        speed: 25,
        stagger_pct: 35,
        cooldown: 3,
    },
];

static KICKS: [Attack; 6] = [
    Attack {
        id: "leftKickLight",
        name: "Light Left Kick",
        position: AttackPosition::LeftLight,
        damage: 10,
        speed: 50,
        stagger_pct: 15,
        cooldown: 1,
    },
    Attack {
        id: "rightKickLight",
        name: "Light Right Kick",
        position: AttackPosition::RightLight,
        damage: 10,
        speed: 50,
        stagger_pct: 15,
        cooldown: 1,
    },
    Attack {
        id: "leftKickMedium",
        name: "Medium Left Kick",
        position: AttackPosition::LeftMedium,
        damage: 15,
        speed: 35,
        stagger_pct: 25,
        cooldown: 2,
    },
    Attack {
        id: "rightKickMedium",
        name: "Medium Right Kick",
        position: AttackPosition::RightMedium,
        damage: 15,
        speed: 35,
        stagger_pct: 25,
        cooldown: 2,
    },
    Attack {
        id: "leftKickHard",
        name: "Hard Left Kick",
        position: AttackPosition::LeftHard,
        damage: 25,
        speed: 25,
        stagger_pct: 35,
        cooldown: 3,
    },
    Attack {
        id: "rightKickHard",
        name: "Hard Right Kick",
        position: AttackPosition::RightHard,
        damage: 25,
        speed: 25,
        stagger_pct: 35,
        cooldown: 3,
    },
];

static DASHES: [Defense; 4] = [
    Defense {
        id: "forward",
        name: "Dash Forward",
        position: DefensePosition::Forward,
        covers: None,
        speed_bonus_pct: 50,
        incoming_damage_pct: 100,
        cooldown: 1,
    },
    Defense {
        id: "left",
        name: "Dash Left",
        position: DefensePosition::Left,
        covers: Some(Side::Left),
        speed_bonus_pct: 0,
        incoming_damage_pct: 100,
        cooldown: 1,
    },
    Defense {
        id: "backward",
        name: "Dash Backward",
        position: DefensePosition::Backward,
        covers: None,
        speed_bonus_pct: 0,
        incoming_damage_pct: 60,
        cooldown: 1,
    },
    Defense {
        id: "right",
        name: "Dash Right",
        position: DefensePosition::Right,
        covers: Some(Side::Right),
        speed_bonus_pct: 0,
        incoming_damage_pct: 100,
        cooldown: 1,
    },
];

/// Read-only move lookup
pub struct MoveCatalog;

impl MoveCatalog {
    /// Every attack and defense available to a character
    pub fn moves_for(character: CharacterType) -> MoveSet {
        let attacks: &'static [Attack] = match character {
            CharacterType::Samuel => &PUNCHES,
            CharacterType::Clara => &KICKS,
        };
        MoveSet {
            attacks,
            defenses: &DASHES,
        }
    }

    /// Look up a move of either kind by position
    pub fn resolve(position: Position, character: CharacterType) -> Result<Move, CatalogError> {
        match position {
            Position::Attack(p) => Self::attack(p, character).map(Move::Attack),
            Position::Defense(p) => Self::defense(p, character).map(Move::Defense),
        }
    }

    pub fn attack(
        position: AttackPosition,
        character: CharacterType,
    ) -> Result<&'static Attack, CatalogError> {
        Self::moves_for(character)
            .attacks
            .iter()
            .find(|a| a.position == position)
            .ok_or(CatalogError::AttackNotFound { character, position })
    }

    pub fn defense(
        position: DefensePosition,
        character: CharacterType,
    ) -> Result<&'static Defense, CatalogError> {
        Self::moves_for(character)
            .defenses
            .iter()
            .find(|d| d.position == position)
            .ok_or(CatalogError::DefenseNotFound { character, position })
    }
}

/// First round a move used in `used_in` can be picked again
pub fn available_from(used_in: u32, cooldown: u32) -> u32 {
    used_in + cooldown + 1
}
