use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A fixed table of mutexes that ids hash into.
///
/// Two ids may share a stripe, which only costs some parallelism. Memory stays
/// bounded no matter how many ids pass through.
pub struct KeyLocks {
    stripes: Box<[Arc<Mutex<()>>]>,
}

impl KeyLocks {
    pub fn with_stripes(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        Self { stripes }
    }

    /// The guard is owned so it can be moved into a blocking task and outlive
    /// the caller's future.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        Arc::clone(&self.stripes[self.stripe(id)]).lock_owned().await
    }

    fn stripe(&self, id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        // Truncation is fine, we only need a well-distributed index.
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        index
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::with_stripes(256)
    }
}
