use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::Id;

use super::StoreError;

/// Advisory lock namespace. Ordering is total so every transaction acquires
/// its keys in the same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    StudioDay { studio_id: Id, date: NaiveDate },
    InstrumentDay { instrument_id: Id, date: NaiveDate },
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::StudioDay { studio_id, date } => write!(f, "studio {studio_id} on {date}"),
            LockKey::InstrumentDay {
                instrument_id,
                date,
            } => write!(f, "instrument {instrument_id} on {date}"),
        }
    }
}

pub(super) struct LockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire every key in sorted order. On timeout the guards taken so far are
    /// dropped before returning.
    pub async fn acquire_all(
        &self,
        mut keys: Vec<LockKey>,
        timeout: Duration,
    ) -> Result<Vec<OwnedMutexGuard<()>>, StoreError> {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.locks.entry(key).or_default().clone();
            let guard = tokio::time::timeout(timeout, mutex.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout(key))?;
            guards.push(guard);
        }
        Ok(guards)
    }

    /// Forget locks nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}
