use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{PasteStore, StoreError, Update};
use crate::paste::Paste;

/// Process-local store. Updates run while holding the write lock of the
/// shard that owns the id, so they are atomic within this process only.
#[derive(Default)]
pub struct MemoryStore {
    pastes: DashMap<String, Paste>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PasteStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        Ok(self.pastes.get(id).map(|paste| paste.value().clone()))
    }

    async fn update<F, T>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Option<&Paste>) -> Update<T> + Send + 'static,
        T: Send + 'static,
    {
        let out = match self.pastes.entry(id.to_owned()) {
            Entry::Occupied(mut entry) => match f(Some(entry.get())) {
                Update::Put(paste, out) => {
                    entry.insert(paste);
                    out
                }
                Update::Keep(out) => out,
                Update::Remove(out) => {
                    entry.remove();
                    out
                }
            },
            Entry::Vacant(entry) => match f(None) {
                Update::Put(paste, out) => {
                    entry.insert(paste);
                    out
                }
                Update::Keep(out) | Update::Remove(out) => out,
            },
        };

        Ok(out)
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.pastes.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
