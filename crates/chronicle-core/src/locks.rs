//! Keyed async locks.
//!
//! Writers serialize per dedup key; the retention pass claims the same key
//! for each record it transitions. Unrelated keys never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::snapshot::DedupKey;

/// Entries are swept once the map grows past this many idle keys.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    inner: Mutex<HashMap<DedupKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub(crate) async fn acquire(&self, key: &DedupKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > SWEEP_THRESHOLD {
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            Arc::clone(map.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}
