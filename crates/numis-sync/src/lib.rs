//! Sync layer: HTTP collaborators for live spot prices and a remote coin store.

#[cfg(feature = "http")]
mod error;
#[cfg(feature = "http")]
pub mod prices;
#[cfg(feature = "http")]
pub mod rest;

#[cfg(feature = "http")]
pub use error::SyncError;
#[cfg(feature = "http")]
pub use prices::SpotPriceClient;
#[cfg(feature = "http")]
pub use rest::RestStore;
