//! Stage 2: a reviewer pass over a Stage-1 observation.

use numis_core::{CoinObservation, VerificationVerdict, parse_verdict};
use tracing::info;

use crate::PipelineError;
use crate::client::{ContentPart, InferenceClient, InferenceRequest, Message};

const SYSTEM_PROMPT: &str = "\
You review coin identifications written by another model. You do not see the images.

Look for speculation and hallucination: details stated with more certainty than a \
photograph allows, years or mintages that do not exist for the named type, material \
or weight inconsistent with the type, history unrelated to the coin.

Respond ONLY with a JSON object. No markdown fences, no explanation, just raw JSON:
{
  \"hallucination_detected\": true or false,
  \"confidence_adjustment\": a number between -1.0 and 1.0 to add to the stated confidence,
  \"reason\": \"one sentence naming the problem, or empty if none\"
}";

/// Whether Stage 2 should run: low confidence, or the model flagged its own
/// answer as implausible.
pub fn needs_verification(observation: &CoinObservation, threshold: f64) -> bool {
    observation.confidence < threshold || !observation.is_plausible()
}

pub fn build_verification_request(
    model: &str,
    observation: &CoinObservation,
) -> Result<InferenceRequest, PipelineError> {
    let serialized = serde_json::to_string_pretty(observation)
        .map_err(|e| PipelineError::MalformedResponse(format!("serialising observation: {e}")))?;
    Ok(InferenceRequest {
        model: model.to_string(),
        messages: vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(vec![ContentPart::Text(format!(
                "Identification to review:\n{serialized}"
            ))]),
        ],
        json_reply: true,
        temperature: 0.0,
    })
}

/// Ask the reviewer for a verdict. Advisory only: nothing is modified here.
pub async fn verify<C: InferenceClient + ?Sized>(
    client: &C,
    model: &str,
    observation: &CoinObservation,
) -> Result<VerificationVerdict, PipelineError> {
    let request = build_verification_request(model, observation)?;
    let reply = client.complete(&request).await?;
    let verdict = parse_verdict(&reply)?;
    info!(
        hallucination = verdict.hallucination_detected,
        adjustment = verdict.confidence_adjustment,
        reason = %verdict.reason,
        "verification complete"
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(confidence: f64, plausibility: &str) -> CoinObservation {
        CoinObservation {
            name: "2 Euro".into(),
            confidence,
            plausibility: plausibility.into(),
            ..Default::default()
        }
    }

    #[test]
    fn gate_closed_for_confident_plausible() {
        assert!(!needs_verification(&obs(0.9, "ok"), 0.75));
        assert!(!needs_verification(&obs(0.75, "ok"), 0.75));
    }

    #[test]
    fn gate_open_below_threshold() {
        assert!(needs_verification(&obs(0.74, "ok"), 0.75));
        assert!(needs_verification(&obs(0.0, "ok"), 0.75));
    }

    #[test]
    fn gate_open_when_implausible() {
        assert!(needs_verification(&obs(0.95, "portrait predates year"), 0.75));
    }

    #[test]
    fn missing_plausibility_uses_threshold_only() {
        assert!(!needs_verification(&obs(0.9, ""), 0.75));
        assert!(needs_verification(&obs(0.5, ""), 0.75));
    }

    #[test]
    fn request_embeds_observation() {
        let req = build_verification_request("reviewer", &obs(0.4, "ok")).unwrap();
        assert_eq!(req.model, "reviewer");
        assert_eq!(req.messages[1].image_count(), 0);
        match &req.messages[1].content[0] {
            ContentPart::Text(t) => {
                assert!(t.contains("\"name\": \"2 Euro\""));
                assert!(t.contains("\"confidence\": 0.4"));
            }
            other => panic!("expected text, got {other:?}"),
        }
    }
}
