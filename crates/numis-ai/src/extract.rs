//! Stage 1: identify the coin from both faces.

use numis_core::{CoinObservation, Condition, parse_observation};
use tracing::info;

use crate::PipelineError;
use crate::client::{ContentPart, InferenceClient, InferenceRequest, Message};

// ── Prompt templates ──

const SYSTEM_PROMPT: &str = "\
You are a numismatist identifying coins from photographs of their obverse and reverse.

Respond ONLY with a JSON object. No markdown fences, no explanation, just raw JSON:
{
  \"name\": \"full name of the coin, e.g. '5 Mark Wilhelm I'\",
  \"year\": \"minting year or era as printed or as can be read\",
  \"country\": \"issuing country or authority\",
  \"material\": \"one of gold, silver, platinum, palladium, copper, nickel, cupronickel, brass, bronze, zinc, steel, iron, aluminium, base, unknown\",
  \"purity\": 0.900,
  \"mass_grams\": 7.96,
  \"diameter\": \"diameter with unit, e.g. '22.5 mm'\",
  \"mintage\": \"number struck, as text\",
  \"collector_value_min\": 0,
  \"collector_value_max\": 0,
  \"description\": \"one or two sentences of history\",
  \"plausibility\": \"ok\" if year, legend and iconography agree, otherwise a short description of the inconsistency,
  \"confidence\": 0.0 to 1.0, how sure you are of the identification
}

Values are in EUR. Purity is the fine fraction (0.900 for 900/1000).
Never guess: if a field cannot be read from the images, leave it empty (\"\") or null.";

fn build_user_prompt(condition: Condition) -> String {
    format!(
        "The first image is the obverse, the second the reverse.\n\
         The owner grades the coin as: {label} ({description}).\n\
         Take this condition into account for the collector value.",
        label = condition.as_str(),
        description = condition.describe(),
    )
}

/// Request carrying the fixed-schema prompt and both (already preprocessed) images.
pub fn build_extraction_request(
    model: &str,
    front: &[u8],
    back: &[u8],
    condition: Condition,
) -> InferenceRequest {
    InferenceRequest {
        model: model.to_string(),
        messages: vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(vec![
                ContentPart::Text(build_user_prompt(condition)),
                ContentPart::Jpeg(front.to_vec()),
                ContentPart::Jpeg(back.to_vec()),
            ]),
        ],
        json_reply: true,
        temperature: 0.0,
    }
}

/// Run the extraction request and repair the reply into a full observation.
///
/// Fails with `InferenceUnavailable` when the service does, and with
/// `MalformedResponse` only when the reply holds no JSON object at all.
pub async fn extract<C: InferenceClient + ?Sized>(
    client: &C,
    model: &str,
    front: &[u8],
    back: &[u8],
    condition: Condition,
) -> Result<CoinObservation, PipelineError> {
    let request = build_extraction_request(model, front, back, condition);
    let reply = client.complete(&request).await?;
    let observation = parse_observation(&reply)?;
    info!(
        name = %observation.name,
        material = %observation.material,
        confidence = observation.confidence,
        plausibility = %observation.plausibility,
        "extraction complete"
    );
    Ok(observation)
}
