use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{IteratorMode, DB};
use tokio::task;
use tracing::warn;

use super::{KeyLocks, PasteStore, StoreError, Update};
use crate::paste::Paste;

/// Pastes persisted in RocksDB, bincode encoded.
///
/// RocksDB only gives us plain gets and puts, so updates to the same id are
/// serialized through [`KeyLocks`]. RocksDB holds an exclusive lock on its
/// directory, so no other process can write underneath us.
pub struct RocksStore {
    db: Arc<DB>,
    locks: Arc<KeyLocks>,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: Arc::new(DB::open_default(path)?),
            locks: Arc::new(KeyLocks::default()),
        })
    }
}

fn load(db: &DB, id: &str) -> Result<Option<Paste>, StoreError> {
    match db.get_pinned(id.as_bytes())? {
        Some(data) => Ok(Some(bincode::deserialize(&data)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl PasteStore for RocksStore {
    async fn get(&self, id: &str) -> Result<Option<Paste>, StoreError> {
        let db = Arc::clone(&self.db);
        let id = id.to_owned();
        task::spawn_blocking(move || load(&db, &id)).await?
    }

    async fn update<F, T>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Option<&Paste>) -> Update<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.locks.lock(id).await;
        let db = Arc::clone(&self.db);
        let id = id.to_owned();

        // The guard travels with the blocking task: if our caller goes away
        // mid-update, the write still completes before the next one starts.
        task::spawn_blocking(move || -> Result<T, StoreError> {
            let _guard = guard;
            let current = load(&db, &id)?;
            match f(current.as_ref()) {
                Update::Put(paste, out) => {
                    let value = bincode::serialize(&paste)?;
                    db.put(id.as_bytes(), value)?;
                    Ok(out)
                }
                Update::Keep(out) => Ok(out),
                Update::Remove(out) => {
                    if current.is_some() {
                        db.delete(id.as_bytes())?;
                    }
                    Ok(out)
                }
            }
        })
        .await?
    }

    async fn ids(&self) -> Result<Vec<String>, StoreError> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<Vec<String>, StoreError> {
            let mut ids = Vec::new();
            for item in db.iterator(IteratorMode::Start) {
                let (key, _) = item?;
                match String::from_utf8(key.into_vec()) {
                    Ok(id) => ids.push(id),
                    Err(e) => warn!("Skipping non utf-8 key: {:?}", e.as_bytes()),
                }
            }
            Ok(ids)
        })
        .await?
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || -> Result<(), StoreError> {
            db.property_int_value("rocksdb.estimate-num-keys")?;
            Ok(())
        })
        .await?
    }
}
