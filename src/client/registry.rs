use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::cluster::Broker;

use super::connection_state::ManagedConnection;

/// Entry of one key. Empty until a resolver succeeded.
type Slot<B> = Arc<Mutex<Option<Arc<ManagedConnection<B>>>>>;

/// Open connections keyed by what they serve, e.g. a partition or a consumer group.
///
/// Every key has its own slot. The map lock is only held to find or create a slot, the resolver runs under the slot
/// lock. Concurrent first use of one key therefore runs the resolver once, while different keys resolve in parallel.
/// Entries are only stored after the resolver succeeded.
pub(crate) struct Registry<K, B> {
    slots: RwLock<HashMap<K, Slot<B>>>,
}

impl<K, B> Registry<K, B>
where
    K: Hash + Eq,
    B: Broker,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, key: K) -> Slot<B> {
        if let Some(slot) = self.slots.read().get(&key) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(key).or_default())
    }

    #[cfg(test)]
    pub(crate) async fn get(&self, key: &K) -> Option<Arc<ManagedConnection<B>>> {
        let slot = self.slots.read().get(key).map(Arc::clone)?;
        let conn = slot.lock().await.clone();
        conn
    }

    /// Returns the entry for `key`, running `resolve` if there is none.
    pub(crate) async fn get_or_try_insert<F, Fut, E>(
        &self,
        key: K,
        resolve: F,
    ) -> Result<Arc<ManagedConnection<B>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<ManagedConnection<B>>, E>>,
    {
        self.get_matching_or_try_insert(key, |_| true, resolve)
            .await
    }

    /// Returns the entry for `key` if `is_current` accepts it, otherwise replaces it with the result of `resolve`.
    pub(crate) async fn get_matching_or_try_insert<M, F, Fut, E>(
        &self,
        key: K,
        is_current: M,
        resolve: F,
    ) -> Result<Arc<ManagedConnection<B>>, E>
    where
        M: Fn(&ManagedConnection<B>) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<ManagedConnection<B>>, E>>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock().await;
        if let Some(conn) = entry.as_ref() {
            if is_current(conn) {
                return Ok(Arc::clone(conn));
            }
        }

        let conn = resolve().await?;
        *entry = Some(Arc::clone(&conn));
        Ok(conn)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        let slots: Vec<_> = self.slots.read().values().map(Arc::clone).collect();
        let mut len = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                len += 1;
            }
        }
        len
    }
}

impl<K, B> std::fmt::Debug for Registry<K, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}
