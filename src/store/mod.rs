//! Shared match document storage

pub mod document;
pub mod memory;
pub mod supabase;

pub use document::{MatchDocument, MatchKey, MatchStatus, MoveEntry, PlayerEntry};
pub use memory::InMemoryStore;
pub use supabase::{SupabaseClient, SupabaseStore};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::game::{CharacterType, PlayerId};

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Transient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed document: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Network failures and timeouts; worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Stream of document states; `None` means the document is gone
pub type DocumentFeed = BoxStream<'static, Result<Option<MatchDocument>, StoreError>>;

/// A hosted document database holding one document per match.
///
/// Implementations must merge partial writes at field level: a write to one
/// player's entry never clobbers the other player's entry.
pub trait DocumentStore: Send + Sync + 'static {
    /// Merge one player's entry for one round into the match document
    fn put_merged_field(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        round: u32,
        entry: &MoveEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn get_document(
        &self,
        key: &MatchKey,
    ) -> impl Future<Output = Result<Option<MatchDocument>, StoreError>> + Send;

    /// Remove the document and everything under it. Deleting a missing document is not an error.
    fn delete_document(&self, key: &MatchKey) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Infinite feed of the document's state. Ends only if the connection
    /// drops, in which case callers open a new one.
    fn watch(&self, key: &MatchKey) -> DocumentFeed;

    /// Insert `document` unless one already exists under its key; returns
    /// whichever document is stored afterwards.
    fn create_if_absent(
        &self,
        document: MatchDocument,
    ) -> impl Future<Output = Result<MatchDocument, StoreError>> + Send;

    /// Add a player entry, keeping any moves already stored for them
    fn join_player(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        character: CharacterType,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Withdraw a player's entry and moves
    fn remove_player(
        &self,
        key: &MatchKey,
        player: &PlayerId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn set_status(
        &self,
        key: &MatchKey,
        status: MatchStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Build a feed by re-reading the document every `every`, for stores
/// without change notifications
pub fn poll_feed<S: DocumentStore>(store: Arc<S>, key: MatchKey, every: Duration) -> DocumentFeed {
    let state: (Arc<S>, MatchKey, Option<Interval>) = (store, key, None);

    stream::unfold(state, move |(store, key, ticker)| async move {
        let mut ticker = ticker.unwrap_or_else(|| {
            let mut t = interval(every);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });
        ticker.tick().await;
        let item = store.get_document(&key).await;
        Some((item, (store, key, Some(ticker))))
    })
    .boxed()
}
