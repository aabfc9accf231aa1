//! Storage layer for the coin collection: one logical `coins` collection with
//! insert, newest-first listing, and delete by id.

mod error;
mod memory;
pub use error::StoreError;
pub use memory::MemoryStore;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;

use async_trait::async_trait;
use numis_core::CoinRecord;

/// Record-oriented coin store.
///
/// Records are append-only: there is no update. Implementations synchronise
/// internally so a store can be shared behind `&self`.
#[async_trait]
pub trait CoinStore: Send + Sync {
    /// Insert a record and return the id the store assigned to it.
    async fn insert(&self, record: &CoinRecord) -> Result<i64, StoreError>;

    /// All records, newest first.
    async fn list_recent(&self) -> Result<Vec<CoinRecord>, StoreError>;

    /// Delete by id. Returns `false` when no such record existed.
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
}
