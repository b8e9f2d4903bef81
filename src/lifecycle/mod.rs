//! Match lifecycle: finding or creating a match, and leaving it

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{LifecycleConfig, SyncConfig};
use crate::game::{
    AbortReason, CharacterType, MatchOutcome, MatchRules, MatchSnapshot, MatchStateMachine,
    Player, PlayerId,
};
use crate::identity::{AuthError, IdentityProvider};
use crate::store::{DocumentStore, MatchDocument, MatchKey, MatchStatus, StoreError};
use crate::sync::{MatchHandle, SyncEngine};

/// Where the local player wants to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Own a match keyed by the local player's id and wait for a challenger
    Host,
    /// Join the match under this key
    Join(MatchKey),
}

/// Lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Identity unavailable: {0}")]
    Auth(#[from] AuthError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Match {0} is still running")]
    MatchAlreadyActive(MatchKey),

    #[error("Match {0} not found")]
    MatchNotFound(MatchKey),

    #[error("Match {0} is closed")]
    MatchClosed(MatchKey),

    #[error("Match {0} already has two players")]
    MatchFull(MatchKey),

    #[error("No challenger joined match {0} in time")]
    JoinTimeout(MatchKey),
}

/// Creates and tears down matches for one client
pub struct MatchLifecycle<S: DocumentStore> {
    store: Arc<S>,
    identity: Arc<dyn IdentityProvider>,
    rules: MatchRules,
    sync: SyncConfig,
    config: LifecycleConfig,
    /// Live match per local player
    active: DashMap<PlayerId, watch::Receiver<MatchSnapshot>>,
}

impl<S: DocumentStore> MatchLifecycle<S> {
    pub fn new(
        store: Arc<S>,
        identity: Arc<dyn IdentityProvider>,
        rules: MatchRules,
        sync: SyncConfig,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            identity,
            rules,
            sync,
            config,
            active: DashMap::new(),
        }
    }

    /// Look up or create the match for `placement` and start syncing it.
    ///
    /// Calling this again for a match the local player is already in rejoins
    /// it, picking up any rounds played in the meantime.
    pub async fn create_match(
        &self,
        character: CharacterType,
        placement: Placement,
    ) -> Result<MatchHandle, LifecycleError> {
        let me = self.identity.current_player_id()?;
        self.ensure_idle(&me)?;

        let doc = match placement {
            Placement::Host => self.host(&me, character).await?,
            Placement::Join(key) => self.join(&me, character, key).await?,
        };

        let handle = self.start(&me, doc)?;
        self.active.insert(me, handle.watch_state());
        Ok(handle)
    }

    /// Leave a match: stop its engine, then delete the document if we own
    /// it or withdraw our entry otherwise.
    ///
    /// A match decided by the fight itself stays in the store, marked
    /// finished, so the other client can still read the last round. Hosting
    /// again replaces it.
    pub async fn terminate(&self, handle: MatchHandle) -> Result<(), LifecycleError> {
        let key = handle.key().clone();
        let me = handle.player().clone();

        handle
            .cancel(MatchOutcome::Aborted(AbortReason::PlayerExited))
            .await;
        self.active.remove(&me);

        let policy = self.sync.write_retry;
        if handle.outcome().is_some_and(|o| o.is_decided()) {
            if handle.is_owner() {
                policy
                    .run("set_status", || self.store.set_status(&key, MatchStatus::Finished))
                    .await?;
            }
            info!(match_key = %key, player_id = %me, "Left finished match");
            return Ok(());
        }

        if handle.is_owner() {
            policy
                .run("delete_document", || self.store.delete_document(&key))
                .await?;
            info!(match_key = %key, player_id = %me, "Match deleted");
        } else {
            policy
                .run("remove_player", || self.store.remove_player(&key, &me))
                .await?;
            info!(match_key = %key, player_id = %me, "Left match");
        }
        Ok(())
    }

    fn ensure_idle(&self, me: &PlayerId) -> Result<(), LifecycleError> {
        let live = self.active.get(me).and_then(|state| {
            // a closed channel means the engine task is gone
            let engine_alive = state.has_changed().is_ok();
            let snapshot = state.borrow().clone();
            if engine_alive && !snapshot.is_finished() {
                Some(snapshot.match_key)
            } else {
                None
            }
        });

        match live {
            Some(key) => Err(LifecycleError::MatchAlreadyActive(key)),
            None => {
                self.active.remove(me);
                Ok(())
            }
        }
    }

    async fn host(&self, me: &PlayerId, character: CharacterType) -> Result<MatchDocument, LifecycleError> {
        let key = MatchKey::from(me);

        if let Some(existing) = self.store.get_document(&key).await? {
            if existing.status.is_closed() || existing.is_stale(Utc::now(), self.config.stale_match_after) {
                info!(match_key = %key, status = ?existing.status, "Replacing old match");
                self.store.delete_document(&key).await?;
            }
        }

        let owner_starts_boosted = rand::thread_rng().gen_bool(0.5);
        let doc = self
            .store
            .create_if_absent(
                MatchDocument::open(me.clone(), character, owner_starts_boosted)
                    .with_rules(self.rules.clone()),
            )
            .await?;

        if doc.opponent_of(me).is_some() {
            info!(match_key = %key, "Rejoining match");
            return Ok(doc);
        }

        info!(match_key = %key, owner_starts_boosted = doc.owner_starts_boosted, "Waiting for a challenger");
        let doc = match timeout(self.config.join_timeout, self.wait_for_challenger(me, &key)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(match_key = %key, "No challenger arrived");
                if let Err(e) = self.store.delete_document(&key).await {
                    warn!(match_key = %key, error = %e, "Failed to delete unjoined match");
                }
                return Err(LifecycleError::JoinTimeout(key));
            }
        };

        self.store.set_status(&key, MatchStatus::Active).await?;
        Ok(doc)
    }

    async fn wait_for_challenger(&self, me: &PlayerId, key: &MatchKey) -> Result<MatchDocument, LifecycleError> {
        let mut feed = self.store.watch(key);
        loop {
            match feed.next().await {
                Some(Ok(Some(doc))) if doc.opponent_of(me).is_some() => return Ok(doc),
                Some(Ok(Some(_))) => {}
                Some(Ok(None)) => return Err(LifecycleError::MatchClosed(key.clone())),
                Some(Err(e)) if e.is_transient() => {
                    warn!(match_key = %key, error = %e, "Read failed while waiting for a challenger");
                }
                Some(Err(e)) => return Err(e.into()),
                None => feed = self.store.watch(key),
            }
        }
    }

    async fn join(
        &self,
        me: &PlayerId,
        character: CharacterType,
        key: MatchKey,
    ) -> Result<MatchDocument, LifecycleError> {
        let doc = self
            .store
            .get_document(&key)
            .await?
            .ok_or_else(|| LifecycleError::MatchNotFound(key.clone()))?;

        if doc.status.is_closed() {
            return Err(LifecycleError::MatchClosed(key));
        }
        if doc.player(me).is_none() && doc.players.len() >= 2 {
            return Err(LifecycleError::MatchFull(key));
        }

        self.store.join_player(&key, me, character).await?;
        info!(match_key = %key, player_id = %me, "Joined match");

        self.store
            .get_document(&key)
            .await?
            .ok_or(LifecycleError::MatchClosed(key))
    }

    fn start(&self, me: &PlayerId, doc: MatchDocument) -> Result<MatchHandle, LifecycleError> {
        let key = doc.key();
        let (opponent_id, opponent_entry) = doc
            .opponent_of(me)
            .ok_or_else(|| LifecycleError::MatchClosed(key.clone()))?;
        let my_entry = doc
            .player(me)
            .ok_or_else(|| LifecycleError::MatchClosed(key.clone()))?;

        // the document's rules win so both clients fight by the same ones
        let rules = doc.rules.clone();
        if rules != self.rules {
            debug!(match_key = %key, rules = ?rules, "Playing by the host's rules");
        }

        let boost = |id: &PlayerId| {
            if doc.owner_starts_boosted && *id == doc.owner_id {
                rules.opening_boost
            } else {
                0
            }
        };

        let player = Player::new(me.clone(), my_entry.character_type).with_boost(boost(me));
        let opponent =
            Player::new(opponent_id.clone(), opponent_entry.character_type).with_boost(boost(opponent_id));

        let sm = MatchStateMachine::new(key, player, opponent, rules);
        Ok(SyncEngine::spawn(
            self.store.clone(),
            sm,
            self.sync.clone(),
            doc.owner_id == *me,
        ))
    }
}
