//! Persistence for pastes.
//!
//! A store only has to offer one interesting primitive: [`PasteStore::update`],
//! an atomic read-modify-write of a single paste. Everything the engine does
//! to an existing paste goes through it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinError;

use crate::paste::Paste;

mod locks;
mod memory;
mod rocks;

pub use locks::KeyLocks;
pub use memory::MemoryStore;
pub use rocks::RocksStore;

/// What an update closure decided to do with the slot it was shown.
#[derive(Debug)]
pub enum Update<T> {
    /// Persist this paste in the slot.
    Put(Paste, T),
    /// Leave the slot untouched.
    Keep(T),
    /// Clear the slot.
    Remove(T),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(#[from] rocksdb::Error),
    #[error("failed to encode or decode a paste: {0}")]
    Codec(#[from] bincode::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] JoinError),
}

#[async_trait]
pub trait PasteStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Paste>, StoreError>;

    /// Runs `f` against the paste stored under `id` and applies its decision.
    ///
    /// No other update of the same id may interleave with this one, and a
    /// failure leaves the slot exactly as it was.
    async fn update<F, T>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Option<&Paste>) -> Update<T> + Send + 'static,
        T: Send + 'static;

    /// Snapshot of every id currently stored.
    async fn ids(&self) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
