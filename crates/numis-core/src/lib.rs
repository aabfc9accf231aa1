pub mod coin;
pub mod config;
mod error;
pub mod prices;
pub mod repair;
pub mod value;

pub use coin::{CoinObservation, CoinRecord, Condition, Material, VerificationVerdict};
pub use config::PipelineConfig;
pub use error::CoreError;
pub use prices::{PriceSource, SpotPriceTable, TROY_OUNCE_GRAMS, UNKNOWN_MATERIAL_PRICE_PER_GRAM};
pub use repair::{parse_observation, parse_verdict, repair_observation, repair_verdict};
pub use value::{material_value, parse_measurement, parse_range, parse_value, round_cents};
