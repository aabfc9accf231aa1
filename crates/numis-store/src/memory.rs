//! In-process store for tests and offline use.

use std::sync::Mutex;

use async_trait::async_trait;
use numis_core::CoinRecord;

use crate::{CoinStore, StoreError};

#[derive(Default)]
struct Inner {
    next_id: i64,
    records: Vec<CoinRecord>,
}

/// Vec-backed [`CoinStore`]. Ids start at 1 and are never reused.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CoinStore for MemoryStore {
    async fn insert(&self, record: &CoinRecord) -> Result<i64, StoreError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        let mut stored = record.clone();
        stored.id = Some(id);
        inner.records.push(stored);
        Ok(id)
    }

    async fn list_recent(&self) -> Result<Vec<CoinRecord>, StoreError> {
        let inner = self.lock()?;
        let mut records = inner.records.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let before = inner.records.len();
        inner.records.retain(|r| r.id != Some(id));
        Ok(inner.records.len() < before)
    }
}
