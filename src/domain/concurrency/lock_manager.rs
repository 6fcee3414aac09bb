//! Per-store locks acquired in one global order.
//!
//! Every action declares the stores it touches. [`LockManager::acquire`] sorts
//! that set lexically before taking any lock, so two requests with overlapping
//! sets always contend on the first shared store and never hold one each of a
//! pair the other is waiting for.

use crate::domain::error::{RuntimeError, RuntimeResult};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per resource-type store.
#[derive(Debug, Default)]
pub struct LockManager {
    stores: BTreeMap<String, Arc<Mutex<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a lock for `store`. Registering twice is a no-op.
    pub fn register(&mut self, store: impl Into<String>) {
        self.stores.entry(store.into()).or_default();
    }

    /// The order locks for `names` are taken in: sorted, duplicates removed.
    pub fn acquisition_order<I, S>(names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .map(Into::into)
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect()
    }

    /// Acquires every named store lock in global order.
    ///
    /// Unknown store names fail before anything is locked. The returned set
    /// releases all locks when dropped, on success and error paths alike.
    pub async fn acquire<I, S>(&self, names: I) -> RuntimeResult<LockSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let order = Self::acquisition_order(names);
        let mut locks = Vec::with_capacity(order.len());
        for name in &order {
            let lock = self
                .stores
                .get(name)
                .ok_or_else(|| RuntimeError::UnknownKind(name.clone()))?;
            locks.push(lock.clone());
        }
        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        tracing::trace!(stores = ?order, "locks acquired");
        Ok(LockSet {
            names: order,
            _guards: guards,
        })
    }
}

/// Locks held by one request.
#[derive(Debug)]
pub struct LockSet {
    names: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn holds(&self, store: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(store)).is_ok()
    }

    /// Held store names in acquisition order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
