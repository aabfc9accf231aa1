//! Live spot prices for the precious metals.

use std::time::Duration;

use chrono::Utc;
use numis_core::{Material, PriceSource, SpotPriceTable, TROY_OUNCE_GRAMS};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{SyncError, check_status};

#[derive(Deserialize)]
struct Quote {
    /// Price per troy ounce in the feed's currency.
    price: f64,
}

/// Client for a spot-price feed answering `GET {base}/latest?symbol=XAU`
/// with `{"price": <per troy ounce>}`.
pub struct SpotPriceClient {
    client: reqwest::Client,
    base_url: String,
}

impl SpotPriceClient {
    /// `base_url` should be like `https://prices.example.com/v1` (no trailing slash).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn quote_url(&self, symbol: &str) -> String {
        format!("{}/latest?symbol={symbol}", self.base_url)
    }

    /// Price per gram for one market symbol.
    pub async fn fetch_per_gram(&self, symbol: &str) -> Result<f64, SyncError> {
        let url = self.quote_url(symbol);
        info!(url = %url, "fetching spot price");
        let resp = check_status(self.client.get(&url).send().await?).await?;
        let body = resp.text().await?;
        parse_quote(&body)
    }

    /// Live prices for every metal the feed serves, static prices for the rest.
    ///
    /// Never fails: a symbol the feed cannot serve keeps its fallback price,
    /// and a feed that serves nothing yields the plain fallback table.
    pub async fn refresh(&self) -> SpotPriceTable {
        let mut live = SpotPriceTable::new(PriceSource::Live).with_fetched_at(Utc::now());
        for material in Material::KNOWN {
            let Some(symbol) = material.spot_symbol() else {
                continue;
            };
            match self.fetch_per_gram(symbol).await {
                Ok(per_gram) => live.insert(material.as_str(), per_gram),
                Err(e) => warn!(symbol, error = %e, "spot price unavailable, using fallback"),
            }
        }

        if live.is_empty() {
            warn!("spot price feed served nothing, using fallback table");
            return SpotPriceTable::fallback();
        }
        info!(live = live.len(), "spot prices refreshed");
        live.fill_missing_from(&SpotPriceTable::fallback());
        live
    }
}

/// Per-gram price from a `{"price": <per troy ounce>}` body.
fn parse_quote(body: &str) -> Result<f64, SyncError> {
    let quote: Quote = serde_json::from_str(body)?;
    Ok(quote.price / TROY_OUNCE_GRAMS)
}
