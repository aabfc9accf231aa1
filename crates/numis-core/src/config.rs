//! Pipeline settings shared by the library crates and the CLI.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one pipeline run. [`Default`] gives the canonical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Vision model used for identification.
    pub model: String,
    /// Model used by the reviewer stage.
    pub verification_model: String,
    /// Stage 2 runs when confidence falls below this.
    pub verification_threshold: f64,
    /// Outcomes below this confidence need a manual override to be stored.
    pub store_threshold: f64,
    /// Longest image edge after downsampling, in pixels.
    pub max_image_dimension: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
    /// Per-request timeout for inference calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            verification_model: "gpt-4o-mini".to_string(),
            verification_threshold: 0.75,
            store_threshold: 0.5,
            max_image_dimension: 1024,
            jpeg_quality: 80,
            request_timeout_secs: 60,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
