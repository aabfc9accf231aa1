use numis_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The upload is not a decodable raster image.
    #[error("could not decode image: {0}")]
    ImageDecode(#[source] image::ImageError),

    #[error("could not encode image: {0}")]
    ImageEncode(#[source] image::ImageError),

    /// Transport failure, timeout, or non-success status from the model host.
    #[error("inference service unavailable: {0}")]
    InferenceUnavailable(String),

    /// The reply could not be read as a JSON object.
    #[error("malformed model reply: {0}")]
    MalformedResponse(String),
}

impl From<CoreError> for PipelineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MalformedResponse(msg) => Self::MalformedResponse(msg),
            other => Self::MalformedResponse(other.to_string()),
        }
    }
}
