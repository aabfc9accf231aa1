//! Vision-model coin identification: upload preprocessing, the extraction and
//! verification stages, and the pipeline that gates one on the other.

pub mod client;
mod error;
pub mod extract;
pub mod imaging;
pub mod pipeline;
pub mod verify;

pub use client::{ContentPart, InferenceClient, InferenceRequest, Message, OpenAiClient, Role};
pub use error::PipelineError;
pub use extract::extract;
pub use imaging::{ImageOptions, preprocess};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineState, Submission, apply_verdict};
pub use verify::{needs_verification, verify};
