//! In-process document store
//!
//! Holds documents in a concurrent map and pushes every change to watchers.
//! Used by the practice binary and by tests; two engines sharing one
//! `InMemoryStore` behave like two devices sharing a hosted database.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::game::{CharacterType, PlayerId};

use super::{
    DocumentFeed, DocumentStore, MatchDocument, MatchKey, MatchStatus, MoveEntry, PlayerEntry, StoreError,
};

struct Inner {
    documents: DashMap<MatchKey, MatchDocument>,
    changes: broadcast::Sender<MatchKey>,
}

/// Shared in-memory store. Clones see the same documents.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                documents: DashMap::new(),
                changes,
            }),
        }
    }

    /// Current copy of a document
    pub fn document(&self, key: &MatchKey) -> Option<MatchDocument> {
        self.inner.documents.get(key).map(|d| d.value().clone())
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.inner.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.documents.is_empty()
    }

    fn notify(&self, key: &MatchKey) {
        let _ = self.inner.changes.send(key.clone());
    }

    fn modify<T>(
        &self,
        key: &MatchKey,
        f: impl FnOnce(&mut MatchDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = {
            let mut doc = self
                .inner
                .documents
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(format!("matches/{}", key)))?;
            f(doc.value_mut())?
        };
        self.notify(key);
        Ok(result)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for InMemoryStore {
    async fn put_merged_field(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        round: u32,
        entry: &MoveEntry,
    ) -> Result<(), StoreError> {
        self.modify(key, |doc| {
            let subtree = doc
                .players
                .get_mut(player)
                .ok_or_else(|| StoreError::NotFound(format!("matches/{}/players/{}", key, player)))?;
            subtree.moves.insert(round, entry.clone());
            Ok(())
        })
    }

    async fn get_document(&self, key: &MatchKey) -> Result<Option<MatchDocument>, StoreError> {
        Ok(self.document(key))
    }

    async fn delete_document(&self, key: &MatchKey) -> Result<(), StoreError> {
        if self.inner.documents.remove(key).is_some() {
            debug!(match_key = %key, "Document deleted");
            self.notify(key);
        }
        Ok(())
    }

    fn watch(&self, key: &MatchKey) -> DocumentFeed {
        // Subscribe before reading so no change slips between the two
        let rx = self.inner.changes.subscribe();
        let current = self.document(key);
        let inner = self.inner.clone();

        let updates = stream::unfold((rx, inner, key.clone()), |(mut rx, inner, key)| async move {
            loop {
                match rx.recv().await {
                    Ok(changed) if changed != key => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        let doc = inner.documents.get(&key).map(|d| d.value().clone());
                        return Some((Ok::<_, StoreError>(doc), (rx, inner, key)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        stream::once(async move { Ok::<_, StoreError>(current) }).chain(updates).boxed()
    }

    async fn create_if_absent(&self, document: MatchDocument) -> Result<MatchDocument, StoreError> {
        let key = document.key();
        let (stored, created) = match self.inner.documents.entry(key.clone()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                slot.insert(document.clone());
                (document, true)
            }
        };

        if created {
            debug!(match_key = %key, "Document created");
            self.notify(&key);
        }
        Ok(stored)
    }

    async fn join_player(
        &self,
        key: &MatchKey,
        player: &PlayerId,
        character: CharacterType,
    ) -> Result<(), StoreError> {
        self.modify(key, |doc| {
            if doc.status.is_closed() {
                return Err(StoreError::Rejected {
                    status: 409,
                    body: format!("match {} is {:?}", key, doc.status),
                });
            }
            doc.players
                .entry(player.clone())
                .or_insert_with(|| PlayerEntry::new(character));
            Ok(())
        })
    }

    async fn remove_player(&self, key: &MatchKey, player: &PlayerId) -> Result<(), StoreError> {
        match self.modify(key, |doc| Ok(doc.players.remove(player))) {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn set_status(&self, key: &MatchKey, status: MatchStatus) -> Result<(), StoreError> {
        self.modify(key, |doc| {
            doc.status = status;
            Ok(())
        })
    }
}
