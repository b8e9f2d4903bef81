//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::time::timeout;

use duel_sync::config::SyncConfig;
use duel_sync::game::{
    CharacterType, MatchEvent, MatchRules, MatchSnapshot, MatchStateMachine, Player, PlayerId, Round,
};
use duel_sync::store::{
    poll_feed, DocumentFeed, DocumentStore, InMemoryStore, MatchDocument, MatchKey, MatchStatus,
    MoveEntry, PlayerEntry, StoreError,
};
use duel_sync::sync::{MatchHandle, SyncEngine};
use duel_sync::util::retry::RetryPolicy;

pub const POLL: Duration = Duration::from_millis(50);

pub fn alice() -> PlayerId {
    PlayerId::new("alice")
}

pub fn bob() -> PlayerId {
    PlayerId::new("bob")
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        poll_interval: POLL,
        round_timeout: Duration::from_secs(5),
        opponent_grace: Duration::from_secs(2),
        write_retry: RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
        },
        read_failure_timeout: Duration::from_secs(3),
    }
}

/// In-memory store with switchable failures. Its feed polls, so read
/// failures reach the engine the way a flaky network would.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    failing_writers: Arc<Mutex<HashSet<PlayerId>>>,
    failing_reads: Arc<AtomicBool>,
    /// Feeds end after this many items; zero keeps them open
    feed_items: Arc<AtomicUsize>,
    pub write_attempts: Arc<AtomicU32>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same documents behind separate failure switches, like a second
    /// device on its own network
    pub fn sharing(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            ..Self::default()
        }
    }

    pub fn cut_feeds_after(&self, items: usize) {
        self.feed_items.store(items, Ordering::SeqCst);
    }

    pub fn fail_writes_from(&self, player: &PlayerId, failing: bool) {
        let mut writers = self.failing_writers.lock().unwrap();
        if failing {
            writers.insert(player.clone());
        } else {
            writers.remove(player);
        }
    }

    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    fn write_fails(&self, player: &PlayerId) -> bool {
        self.failing_writers.lock().unwrap().contains(player)
    }
}

impl DocumentStore for FlakyStore {
    async fn put_merged_field(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        round: u32,
        entry: &MoveEntry,
    ) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.write_fails(player) {
            return Err(StoreError::Transient("connection reset".into()));
        }
        self.inner.put_merged_field(key, player, round, entry).await
    }

    async fn get_document(&self, key: &MatchKey) -> Result<Option<MatchDocument>, StoreError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Transient("read timed out".into()));
        }
        self.inner.get_document(key).await
    }

    async fn delete_document(&self, key: &MatchKey) -> Result<(), StoreError> {
        self.inner.delete_document(key).await
    }

    fn watch(&self, key: &MatchKey) -> DocumentFeed {
        let feed = poll_feed(Arc::new(self.clone()), key.clone(), POLL);
        match self.feed_items.load(Ordering::SeqCst) {
            0 => feed,
            items => feed.take(items).boxed(),
        }
    }

    async fn create_if_absent(&self, document: MatchDocument) -> Result<MatchDocument, StoreError> {
        self.inner.create_if_absent(document).await
    }

    async fn join_player(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        character: CharacterType,
    ) -> Result<(), StoreError> {
        self.inner.join_player(key, player, character).await
    }

    async fn remove_player(&self, key: &MatchKey, player: &PlayerId) -> Result<(), StoreError> {
        self.inner.remove_player(key, player).await
    }

    async fn set_status(&self, key: &MatchKey, status: MatchStatus) -> Result<(), StoreError> {
        self.inner.set_status(key, status).await
    }
}

/// Active match owned by alice (samuel) with bob (clara) joined
pub fn duel_document() -> MatchDocument {
    let mut doc = MatchDocument::open(alice(), CharacterType::Samuel, false);
    doc.players.insert(bob(), PlayerEntry::new(CharacterType::Clara));
    doc.status = MatchStatus::Active;
    doc
}

pub async fn open_duel<S: DocumentStore>(store: &S) -> MatchKey {
    store.create_if_absent(duel_document()).await.unwrap().key()
}

/// Start one client's engine for the duel document
pub fn spawn_client<S: DocumentStore>(store: Arc<S>, me: PlayerId, config: SyncConfig) -> MatchHandle {
    spawn_client_with(store, me, config, MatchRules::default())
}

pub fn spawn_client_with<S: DocumentStore>(
    store: Arc<S>,
    me: PlayerId,
    config: SyncConfig,
    rules: MatchRules,
) -> MatchHandle {
    let (my_character, their_id, their_character) = if me == alice() {
        (CharacterType::Samuel, bob(), CharacterType::Clara)
    } else {
        (CharacterType::Clara, alice(), CharacterType::Samuel)
    };
    let is_owner = me == alice();
    let sm = MatchStateMachine::new(
        MatchKey::from(&alice()),
        Player::new(me, my_character),
        Player::new(their_id, their_character),
        rules,
    );
    SyncEngine::spawn(store, sm, config, is_owner)
}

/// Next resolved round on an event stream
pub async fn next_round(events: &mut broadcast::Receiver<MatchEvent>) -> Round {
    timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(MatchEvent::RoundResolved { round, .. }) => return round,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("no round resolved")
}

/// Wait until the handle publishes a snapshot matching `pred`
pub async fn wait_for(handle: &MatchHandle, pred: impl Fn(&MatchSnapshot) -> bool) -> MatchSnapshot {
    let mut state = handle.watch_state();
    timeout(Duration::from_secs(30), async {
        loop {
            let snapshot = state.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            state.changed().await.expect("engine stopped");
        }
    })
    .await
    .expect("condition never reached")
}
