//! Supabase REST API client and the table-backed document store
//!
//! A match document is spread over three tables so each player only ever
//! writes their own rows:
//!
//! - `matches(match_key, owner_id, status, owner_starts_boosted, rules, created_at)`,
//!   `rules` being a jsonb column
//! - `match_players(match_key, player_id, character_type)`
//! - `match_moves(match_key, player_id, round_index, attack_position, defense_position, forfeited_player_id)`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{StoreConfig, SupabaseConfig};
use crate::game::{CharacterType, MatchRules, PlayerId};
use crate::util::rate_limit::{create_limiter, Limiter};

use super::{
    poll_feed, DocumentFeed, DocumentStore, MatchDocument, MatchKey, MatchStatus, MoveEntry,
    PlayerEntry, StoreError,
};

const MATCHES: &str = "matches";
const PLAYERS: &str = "match_players";
const MOVES: &str = "match_moves";

/// Supabase client for PostgREST table access
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
    limiter: Arc<Limiter>,
}

impl SupabaseClient {
    pub fn new(supabase: &SupabaseConfig, store: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(store.request_timeout)
            .build()
            .map_err(|e| StoreError::Transient(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: supabase.url.clone(),
            service_role_key: supabase.service_role_key.clone(),
            limiter: create_limiter(store.requests_per_second),
        })
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    /// Wait for a rate limit slot, send, and reject non-success statuses
    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.limiter.until_ready().await;

        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        Ok(response)
    }

    /// Make an authenticated GET request
    pub async fn get<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>, StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self.send(self.client.get(&url)).await?;
        response.json().await.map_err(parse_error)
    }

    /// Make an authenticated GET request expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, StoreError> {
        let rows: Vec<T> = self.get(table, &format!("{}&limit=1", query)).await?;
        Ok(rows.into_iter().next())
    }

    /// Insert or update rows that collide on `on_conflict`
    pub async fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);
        let request = self
            .client
            .post(&url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data);
        self.send(request).await?;
        Ok(())
    }

    /// Insert rows, leaving any that already exist untouched
    pub async fn insert_if_absent<T: Serialize + ?Sized>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let url = format!("{}?on_conflict={}", self.rest_url(table), on_conflict);
        let request = self
            .client
            .post(&url)
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(data);
        self.send(request).await?;
        Ok(())
    }

    /// Make an authenticated PATCH request (update)
    pub async fn update<T: Serialize>(&self, table: &str, query: &str, data: &T) -> Result<(), StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        self.send(self.client.patch(&url).json(data)).await?;
        Ok(())
    }

    /// Delete every row matching `query`
    pub async fn delete(&self, table: &str, query: &str) -> Result<(), StoreError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }
}

fn request_error(e: reqwest::Error) -> StoreError {
    if e.is_decode() {
        StoreError::Serialization(e.to_string())
    } else {
        StoreError::Transient(e.to_string())
    }
}

fn parse_error(e: reqwest::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn status_error(status: StatusCode, body: String) -> StoreError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        StoreError::Transient(format!("status {}: {}", status.as_u16(), body))
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

/// Row in `matches`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatchRow {
    match_key: String,
    owner_id: String,
    status: MatchStatus,
    owner_starts_boosted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rules: Option<MatchRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

/// Row in `match_players`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlayerRow {
    match_key: String,
    player_id: String,
    character_type: CharacterType,
}

/// Row in `match_moves`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MoveRow {
    match_key: String,
    player_id: String,
    round_index: u32,
    attack_position: Option<i64>,
    defense_position: Option<i64>,
    #[serde(default)]
    forfeited_player_id: Option<String>,
}

#[derive(Serialize)]
struct StatusPatch {
    status: MatchStatus,
}

fn assemble(row: MatchRow, players: Vec<PlayerRow>, moves: Vec<MoveRow>) -> MatchDocument {
    let mut entries: BTreeMap<PlayerId, PlayerEntry> = players
        .into_iter()
        .map(|p| (PlayerId::new(p.player_id), PlayerEntry::new(p.character_type)))
        .collect();

    for m in moves {
        // rows of a withdrawn player may outlive their entry briefly
        if let Some(entry) = entries.get_mut(&PlayerId::new(m.player_id)) {
            entry.moves.insert(
                m.round_index,
                MoveEntry {
                    attack_position: m.attack_position,
                    defense_position: m.defense_position,
                    forfeited: m.forfeited_player_id.map(PlayerId::new),
                },
            );
        }
    }

    MatchDocument {
        players: entries,
        owner_id: PlayerId::new(row.owner_id),
        status: row.status,
        owner_starts_boosted: row.owner_starts_boosted,
        rules: row.rules.unwrap_or_default(),
        created_at: row.created_at,
    }
}

/// Match documents kept in Supabase tables. `watch` polls.
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
    poll_interval: Duration,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    fn by_key(key: &MatchKey) -> String {
        format!("match_key=eq.{}", key)
    }

    fn by_player(key: &MatchKey, player: &PlayerId) -> String {
        format!("match_key=eq.{}&player_id=eq.{}", key, player)
    }
}

impl DocumentStore for SupabaseStore {
    async fn put_merged_field(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        round: u32,
        entry: &MoveEntry,
    ) -> Result<(), StoreError> {
        let row = MoveRow {
            match_key: key.to_string(),
            player_id: player.to_string(),
            round_index: round,
            attack_position: entry.attack_position,
            defense_position: entry.defense_position,
            forfeited_player_id: entry.forfeited.as_ref().map(PlayerId::to_string),
        };
        self.client
            .upsert(MOVES, &row, "match_key,player_id,round_index")
            .await
    }

    async fn get_document(&self, key: &MatchKey) -> Result<Option<MatchDocument>, StoreError> {
        let Some(row) = self
            .client
            .get_one::<MatchRow>(MATCHES, &Self::by_key(key))
            .await?
        else {
            return Ok(None);
        };

        let players: Vec<PlayerRow> = self.client.get(PLAYERS, &Self::by_key(key)).await?;
        let moves: Vec<MoveRow> = self
            .client
            .get(MOVES, &format!("{}&order=round_index.asc", Self::by_key(key)))
            .await?;

        Ok(Some(assemble(row, players, moves)))
    }

    async fn delete_document(&self, key: &MatchKey) -> Result<(), StoreError> {
        self.client.delete(MOVES, &Self::by_key(key)).await?;
        self.client.delete(PLAYERS, &Self::by_key(key)).await?;
        self.client.delete(MATCHES, &Self::by_key(key)).await?;
        debug!(match_key = %key, "Match rows deleted");
        Ok(())
    }

    fn watch(&self, key: &MatchKey) -> DocumentFeed {
        poll_feed(Arc::new(self.clone()), key.clone(), self.poll_interval)
    }

    async fn create_if_absent(&self, document: MatchDocument) -> Result<MatchDocument, StoreError> {
        let key = document.key();
        let row = MatchRow {
            match_key: key.to_string(),
            owner_id: document.owner_id.to_string(),
            status: document.status,
            owner_starts_boosted: document.owner_starts_boosted,
            rules: Some(document.rules.clone()),
            created_at: document.created_at,
        };
        self.client.insert_if_absent(MATCHES, &row, "match_key").await?;

        let players: Vec<PlayerRow> = document
            .players
            .iter()
            .map(|(id, entry)| PlayerRow {
                match_key: key.to_string(),
                player_id: id.to_string(),
                character_type: entry.character_type,
            })
            .collect();
        self.client
            .insert_if_absent(PLAYERS, &players, "match_key,player_id")
            .await?;

        match self.get_document(&key).await? {
            Some(stored) => Ok(stored),
            None => {
                warn!(match_key = %key, "Match vanished right after creation");
                Err(StoreError::NotFound(format!("{}/{}", MATCHES, key)))
            }
        }
    }

    async fn join_player(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        character: CharacterType,
    ) -> Result<(), StoreError> {
        let row = self
            .client
            .get_one::<MatchRow>(MATCHES, &Self::by_key(key))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", MATCHES, key)))?;

        if row.status.is_closed() {
            return Err(StoreError::Rejected {
                status: 409,
                body: format!("match {} is {:?}", key, row.status),
            });
        }

        let entry = PlayerRow {
            match_key: key.to_string(),
            player_id: player.to_string(),
            character_type: character,
        };
        self.client
            .insert_if_absent(PLAYERS, &entry, "match_key,player_id")
            .await
    }

    async fn remove_player(&self, key: &MatchKey, player: &PlayerId) -> Result<(), StoreError> {
        self.client.delete(PLAYERS, &Self::by_player(key, player)).await?;
        self.client.delete(MOVES, &Self::by_player(key, player)).await
    }

    async fn set_status(&self, key: &MatchKey, status: MatchStatus) -> Result<(), StoreError> {
        self.client
            .update(MATCHES, &Self::by_key(key), &StatusPatch { status })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{AttackPosition, SelectedMove, Selection};

    fn move_row(player: &str, round: u32, attack: Option<i64>) -> MoveRow {
        MoveRow {
            match_key: "owner".into(),
            player_id: player.into(),
            round_index: round,
            attack_position: attack,
            defense_position: None,
            forfeited_player_id: None,
        }
    }

    #[test]
    fn rows_assemble_into_a_document() {
        let row = MatchRow {
            match_key: "owner".into(),
            owner_id: "owner".into(),
            status: MatchStatus::Active,
            owner_starts_boosted: true,
            rules: Some(MatchRules {
                max_rounds: Some(5),
                ..MatchRules::default()
            }),
            created_at: None,
        };
        let players = vec![
            PlayerRow {
                match_key: "owner".into(),
                player_id: "owner".into(),
                character_type: CharacterType::Samuel,
            },
            PlayerRow {
                match_key: "owner".into(),
                player_id: "rival".into(),
                character_type: CharacterType::Clara,
            },
        ];
        let moves = vec![
            move_row("owner", 0, Some(1)),
            move_row("rival", 0, None),
            move_row("gone", 0, Some(2)),
        ];

        let doc = assemble(row, players, moves);
        assert_eq!(doc.players.len(), 2);
        assert_eq!(
            doc.selection(&PlayerId::new("owner"), 0),
            Some(SelectedMove::new(Some(AttackPosition::LeftLight), None))
        );
        assert_eq!(doc.selection(&PlayerId::new("rival"), 0), Some(SelectedMove::default()));
        assert!(doc.player(&PlayerId::new("gone")).is_none());
        assert!(doc.owner_starts_boosted);
        assert_eq!(doc.rules.max_rounds, Some(5));
    }

    #[test]
    fn unknown_positions_and_forfeits_survive_assembly() {
        let row = MatchRow {
            match_key: "owner".into(),
            owner_id: "owner".into(),
            status: MatchStatus::Active,
            owner_starts_boosted: false,
            rules: None,
            created_at: None,
        };
        let players = ["owner", "rival"]
            .into_iter()
            .map(|id| PlayerRow {
                match_key: "owner".into(),
                player_id: id.into(),
                character_type: CharacterType::Samuel,
            })
            .collect();
        let mut claim = move_row("owner", 0, Some(9));
        claim.forfeited_player_id = Some("rival".into());

        let doc = assemble(row, players, vec![claim]);
        let (owner, rival) = (PlayerId::new("owner"), PlayerId::new("rival"));
        assert_eq!(doc.entry(&owner, 0).unwrap().attack_position, Some(9));
        assert_eq!(
            doc.round_inputs(&rival, &owner, 0).map(|(mine, _)| mine),
            Some(Selection::Forfeit)
        );
        assert_eq!(doc.rules, MatchRules::default());
    }

    #[test]
    fn move_rows_carry_null_positions() {
        let json = serde_json::to_value(move_row("p", 3, None)).unwrap();
        assert_eq!(json["round_index"], 3);
        assert!(json["attack_position"].is_null());
    }

    #[test]
    fn server_errors_are_transient_and_client_errors_are_not() {
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "dup".into()),
            StoreError::Rejected { status: 409, .. }
        ));
    }
}
