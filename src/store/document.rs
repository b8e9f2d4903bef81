//! Match document wire types
//! This is the contract both clients read and write through the store

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::{CharacterType, MatchRules, PlayerId, RawMove, SelectedMove, Selection};

/// Document key of a match. Matches are keyed by their owner's id, so an
/// owner has at most one open match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchKey(String);

impl MatchKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&PlayerId> for MatchKey {
    fn from(owner: &PlayerId) -> Self {
        Self(owner.as_str().to_string())
    }
}

impl fmt::Display for MatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match lifecycle status as stored remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Owner waiting for a challenger
    Open,
    /// Both players present
    Active,
    Finished,
    /// A player left before the end
    Abandoned,
}

impl MatchStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Finished | Self::Abandoned)
    }
}

/// A player's stored entry for one round.
///
/// Positions are kept as plain integers; they are checked against the
/// catalog only when the round is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defense_position: Option<i64>,
    /// Written by a player who closed the round without the other's entry.
    /// Names the player who forfeits it; both clients honour it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forfeited: Option<PlayerId>,
}

impl MoveEntry {
    pub fn raw(&self) -> RawMove {
        RawMove {
            attack_position: self.attack_position,
            defense_position: self.defense_position,
        }
    }

    /// The same entry, also declaring `opponent` out of the round
    pub fn forfeiting(mut self, opponent: PlayerId) -> Self {
        self.forfeited = Some(opponent);
        self
    }
}

impl From<SelectedMove> for MoveEntry {
    fn from(selection: SelectedMove) -> Self {
        let raw = RawMove::from(selection);
        Self {
            attack_position: raw.attack_position,
            defense_position: raw.defense_position,
            forfeited: None,
        }
    }
}

/// One player's subtree of the match document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    pub character_type: CharacterType,
    /// Entries keyed by round index
    #[serde(default)]
    pub moves: BTreeMap<u32, MoveEntry>,
}

impl PlayerEntry {
    pub fn new(character_type: CharacterType) -> Self {
        Self {
            character_type,
            moves: BTreeMap::new(),
        }
    }
}

/// The shared match record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDocument {
    pub players: BTreeMap<PlayerId, PlayerEntry>,
    pub owner_id: PlayerId,
    pub status: MatchStatus,
    /// Coin flip made at creation: the owner opens with a boost charge
    #[serde(default)]
    pub owner_starts_boosted: bool,
    /// The owner's rules; the challenger plays by these
    #[serde(default)]
    pub rules: MatchRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl MatchDocument {
    /// A fresh open match holding only its owner
    pub fn open(owner: PlayerId, character: CharacterType, owner_starts_boosted: bool) -> Self {
        let mut players = BTreeMap::new();
        players.insert(owner.clone(), PlayerEntry::new(character));
        Self {
            players,
            owner_id: owner,
            status: MatchStatus::Open,
            owner_starts_boosted,
            rules: MatchRules::default(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_rules(mut self, rules: MatchRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn key(&self) -> MatchKey {
        MatchKey::from(&self.owner_id)
    }

    pub fn player(&self, id: &PlayerId) -> Option<&PlayerEntry> {
        self.players.get(id)
    }

    /// The other player, if one has joined
    pub fn opponent_of(&self, id: &PlayerId) -> Option<(&PlayerId, &PlayerEntry)> {
        self.players.iter().find(|(pid, _)| *pid != id)
    }

    pub fn entry(&self, player: &PlayerId, round: u32) -> Option<&MoveEntry> {
        self.players.get(player)?.moves.get(&round)
    }

    /// A player's selection for a round, if written. Unknown positions read
    /// as empty.
    pub fn selection(&self, player: &PlayerId, round: u32) -> Option<SelectedMove> {
        self.entry(player, round).map(|e| e.raw().known())
    }

    /// Inputs for `round` from `player`'s side once the document settles the
    /// round: a forfeit named by either entry, or an entry from each player.
    ///
    /// A forfeit binds even if the named player's entry lands afterwards, so
    /// both clients resolve the round the same way.
    pub fn round_inputs(
        &self,
        player: &PlayerId,
        opponent: &PlayerId,
        round: u32,
    ) -> Option<(Selection, Selection)> {
        let mine = self.entry(player, round);
        let theirs = self.entry(opponent, round);
        let player_out = theirs.is_some_and(|e| e.forfeited.as_ref() == Some(player));
        let opponent_out = mine.is_some_and(|e| e.forfeited.as_ref() == Some(opponent));

        let side = |entry: Option<&MoveEntry>, out: bool| {
            if out {
                Some(Selection::Forfeit)
            } else {
                entry.map(|e| Selection::Remote(e.raw()))
            }
        };

        if player_out || opponent_out {
            Some((
                side(mine, player_out).unwrap_or(Selection::Forfeit),
                side(theirs, opponent_out).unwrap_or(Selection::Forfeit),
            ))
        } else {
            Some((side(mine, false)?, side(theirs, false)?))
        }
    }

    /// True once the document has passed `max_age` without being finished
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (self.created_at, chrono::Duration::from_std(max_age)) {
            (Some(created), Ok(max_age)) => now - created > max_age,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{AttackPosition, DefensePosition};

    fn duel() -> MatchDocument {
        let mut doc = MatchDocument::open(PlayerId::new("owner"), CharacterType::Clara, false);
        doc.players
            .insert(PlayerId::new("rival"), PlayerEntry::new(CharacterType::Samuel));
        doc
    }

    fn put(doc: &mut MatchDocument, player: &str, round: u32, entry: MoveEntry) {
        doc.players
            .get_mut(&PlayerId::new(player))
            .unwrap()
            .moves
            .insert(round, entry);
    }

    #[test]
    fn wire_shape_matches_the_shared_contract() {
        let mut doc = MatchDocument::open(PlayerId::new("owner"), CharacterType::Clara, true);
        doc.created_at = None;
        doc.players
            .get_mut(&PlayerId::new("owner"))
            .unwrap()
            .moves
            .insert(
                0,
                SelectedMove::new(Some(AttackPosition::RightLight), Some(DefensePosition::Backward))
                    .into(),
            );
        doc.players
            .insert(PlayerId::new("rival"), PlayerEntry::new(CharacterType::Samuel));

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "players": {
                    "owner": {
                        "characterType": "clara",
                        "moves": { "0": { "attackPosition": 2, "defensePosition": 3 } }
                    },
                    "rival": { "characterType": "samuel", "moves": {} }
                },
                "ownerId": "owner",
                "status": "open",
                "ownerStartsBoosted": true,
                "rules": {
                    "maxHealth": 100,
                    "maxRounds": null,
                    "boostMin": 0,
                    "boostMax": 3,
                    "boostGain": 1,
                    "boostLoss": 1,
                    "speedPerBoost": 10,
                    "openingBoost": 1
                }
            })
        );

        let back: MatchDocument = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn empty_selection_is_an_empty_object() {
        let json = serde_json::to_string(&MoveEntry::from(SelectedMove::default())).unwrap();
        assert_eq!(json, "{}");

        let partial: MoveEntry = serde_json::from_str(r#"{"defensePosition":4}"#).unwrap();
        assert_eq!(partial.raw().known(), SelectedMove::new(None, Some(DefensePosition::Right)));
    }

    #[test]
    fn unknown_positions_still_decode() {
        let json = serde_json::json!({
            "players": {
                "owner": { "characterType": "clara", "moves": { "0": { "attackPosition": 12, "defensePosition": 1 } } }
            },
            "ownerId": "owner",
            "status": "active"
        });
        let doc: MatchDocument = serde_json::from_value(json).unwrap();
        let owner = PlayerId::new("owner");

        assert_eq!(doc.entry(&owner, 0).unwrap().attack_position, Some(12));
        assert_eq!(
            doc.selection(&owner, 0),
            Some(SelectedMove::new(None, Some(DefensePosition::Forward)))
        );
        assert_eq!(doc.rules, MatchRules::default());
    }

    #[test]
    fn rounds_wait_for_both_entries() {
        let owner = PlayerId::new("owner");
        let rival = PlayerId::new("rival");
        let mut doc = duel();
        assert_eq!(doc.round_inputs(&owner, &rival, 0), None);

        put(&mut doc, "owner", 0, MoveEntry::default());
        assert_eq!(doc.round_inputs(&owner, &rival, 0), None);

        put(&mut doc, "rival", 0, MoveEntry::default());
        assert_eq!(
            doc.round_inputs(&owner, &rival, 0),
            Some((Selection::Remote(RawMove::default()), Selection::Remote(RawMove::default())))
        );
    }

    #[test]
    fn a_forfeit_binds_both_sides_even_after_a_late_entry() {
        let owner = PlayerId::new("owner");
        let rival = PlayerId::new("rival");
        let punch = MoveEntry::from(SelectedMove::new(Some(AttackPosition::LeftLight), None));

        let mut doc = duel();
        put(&mut doc, "owner", 0, punch.clone().forfeiting(rival.clone()));
        let settled = Some((Selection::Remote(punch.raw()), Selection::Forfeit));
        assert_eq!(doc.round_inputs(&owner, &rival, 0), settled);
        assert_eq!(
            doc.round_inputs(&rival, &owner, 0),
            Some((Selection::Forfeit, Selection::Remote(punch.raw())))
        );

        // the rival's write lands late; the round stays closed against them
        put(
            &mut doc,
            "rival",
            0,
            SelectedMove::new(Some(AttackPosition::RightLight), None).into(),
        );
        assert_eq!(doc.round_inputs(&owner, &rival, 0), settled);
        assert_eq!(
            doc.round_inputs(&rival, &owner, 0),
            Some((Selection::Forfeit, Selection::Remote(punch.raw())))
        );

        // both sides claimed the round: neither entry counts
        put(&mut doc, "rival", 0, MoveEntry::default().forfeiting(owner.clone()));
        assert_eq!(
            doc.round_inputs(&owner, &rival, 0),
            Some((Selection::Forfeit, Selection::Forfeit))
        );
    }

    #[test]
    fn rules_travel_with_the_document() {
        let rules = MatchRules {
            max_rounds: Some(1),
            ..MatchRules::default()
        };
        let doc = duel().with_rules(rules.clone());
        let back: MatchDocument = serde_json::from_value(serde_json::to_value(&doc).unwrap()).unwrap();
        assert_eq!(back.rules, rules);
    }

    #[test]
    fn staleness_uses_creation_time() {
        let doc = MatchDocument::open(PlayerId::new("owner"), CharacterType::Samuel, false);
        let created = doc.created_at.unwrap();
        let hour = Duration::from_secs(3600);
        assert!(!doc.is_stale(created + chrono::Duration::minutes(30), hour));
        assert!(doc.is_stale(created + chrono::Duration::minutes(61), hour));
    }
}
