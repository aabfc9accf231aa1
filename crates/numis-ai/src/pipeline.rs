//! The confidence-gated two-stage pipeline.
//!
//! ```text
//! Idle → Extracting ─┬─────────────→ Done
//!                    ├→ Verifying ─→ Done
//!                    └─────────────→ Failed
//! ```
//!
//! Extraction failures end the run in `Failed` and are returned to the
//! caller. Verification failures are logged and absorbed: the unverified
//! observation stands. A [`Pipeline`] holds no state between runs; every call
//! to [`Pipeline::run`] is a fresh state machine with no retries.

use std::fmt;

use numis_core::{
    CoinObservation, CoinRecord, Condition, PipelineConfig, SpotPriceTable, VerificationVerdict,
};
use tracing::{info, warn};

use crate::PipelineError;
use crate::client::InferenceClient;
use crate::extract::extract;
use crate::imaging::{ImageOptions, preprocess};
use crate::verify::{needs_verification, verify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Extracting,
    Verifying,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Extracting => "extracting",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Legal transitions of a single run.
    pub fn can_advance_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Extracting)
                | (Extracting, Verifying)
                | (Extracting, Done)
                | (Extracting, Failed)
                | (Verifying, Done)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two photographed faces plus the owner's grade.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub front: &'a [u8],
    pub back: &'a [u8],
    pub condition: Condition,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub observation: CoinObservation,
    pub condition: Condition,
    /// Present when Stage 2 ran and answered.
    pub verdict: Option<VerificationVerdict>,
    /// Stage 2 was called, whether or not it answered.
    pub verification_attempted: bool,
    /// Lowered when the reviewer flagged hallucination.
    pub auto_approved: bool,
    /// States visited, starting at `Idle`.
    pub trace: Vec<PipelineState>,
    store_threshold: f64,
}

impl PipelineOutcome {
    pub fn final_state(&self) -> PipelineState {
        self.trace.last().copied().unwrap_or(PipelineState::Idle)
    }

    pub fn visited(&self, state: PipelineState) -> bool {
        self.trace.contains(&state)
    }

    /// Store gate: auto-approved and confident enough, or manually overridden.
    pub fn may_persist(&self, manual_override: bool) -> bool {
        manual_override
            || (self.auto_approved && self.observation.confidence >= self.store_threshold)
    }

    pub fn to_record(&self, prices: &SpotPriceTable) -> CoinRecord {
        CoinRecord::from_observation(
            &self.observation,
            self.condition,
            prices,
            self.verdict.is_some(),
        )
    }
}

/// Fold a verdict into the observation. Returns whether the observation is
/// still auto-approved.
///
/// Confidence becomes `clamp(old + adjustment, 0, 1)`. A flagged
/// hallucination appends the reviewer's reason to the description.
pub fn apply_verdict(observation: &mut CoinObservation, verdict: &VerificationVerdict) -> bool {
    let adjustment = if verdict.confidence_adjustment.is_finite() {
        verdict.confidence_adjustment
    } else {
        0.0
    };
    observation.confidence = (observation.confidence + adjustment).clamp(0.0, 1.0);

    if !verdict.hallucination_detected {
        return true;
    }
    let reason = verdict.reason.trim();
    let reason = if reason.is_empty() {
        "reviewer flagged speculative details"
    } else {
        reason
    };
    observation.append_note(&format!("Review: {reason}"));
    false
}

/// One run's state bookkeeping.
struct Run {
    trace: Vec<PipelineState>,
}

impl Run {
    fn new() -> Self {
        Self {
            trace: vec![PipelineState::Idle],
        }
    }

    fn state(&self) -> PipelineState {
        self.trace.last().copied().unwrap_or(PipelineState::Idle)
    }

    fn advance(&mut self, next: PipelineState) {
        let from = self.state();
        debug_assert!(from.can_advance_to(next), "illegal transition {from} → {next}");
        info!(from = %from, to = %next, "pipeline transition");
        self.trace.push(next);
    }
}

/// Identification pipeline over an inference client.
pub struct Pipeline<C> {
    client: C,
    config: PipelineConfig,
}

impl<C: InferenceClient> Pipeline<C> {
    pub fn new(client: C, config: PipelineConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Preprocess both raw uploads, then run both stages.
    pub async fn run(&self, submission: Submission<'_>) -> Result<PipelineOutcome, PipelineError> {
        let mut run = Run::new();
        run.advance(PipelineState::Extracting);

        let opts = ImageOptions::from(&self.config);
        let front = match preprocess(submission.front, &opts) {
            Ok(jpeg) => jpeg,
            Err(e) => return Err(fail(&mut run, e)),
        };
        let back = match preprocess(submission.back, &opts) {
            Ok(jpeg) => jpeg,
            Err(e) => return Err(fail(&mut run, e)),
        };

        self.run_stages(run, &front, &back, submission.condition).await
    }

    /// Run both stages on images that are already preprocessed.
    pub async fn run_preprocessed(
        &self,
        front: &[u8],
        back: &[u8],
        condition: Condition,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut run = Run::new();
        run.advance(PipelineState::Extracting);
        self.run_stages(run, front, back, condition).await
    }

    async fn run_stages(
        &self,
        mut run: Run,
        front: &[u8],
        back: &[u8],
        condition: Condition,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut observation =
            match extract(&self.client, &self.config.model, front, back, condition).await {
                Ok(obs) => obs,
                Err(e) => return Err(fail(&mut run, e)),
            };

        let mut verdict = None;
        let mut auto_approved = true;
        let verification_attempted =
            needs_verification(&observation, self.config.verification_threshold);

        if verification_attempted {
            run.advance(PipelineState::Verifying);
            match verify(&self.client, &self.config.verification_model, &observation).await {
                Ok(v) => {
                    auto_approved = apply_verdict(&mut observation, &v);
                    verdict = Some(v);
                }
                Err(e) => {
                    warn!(error = %e, "verification failed; keeping unverified observation");
                }
            }
        }

        run.advance(PipelineState::Done);
        info!(
            name = %observation.name,
            confidence = observation.confidence,
            verified = verdict.is_some(),
            auto_approved,
            "pipeline done"
        );

        Ok(PipelineOutcome {
            observation,
            condition,
            verdict,
            verification_attempted,
            auto_approved,
            trace: run.trace,
            store_threshold: self.config.store_threshold,
        })
    }
}

fn fail(run: &mut Run, error: PipelineError) -> PipelineError {
    warn!(error = %error, "pipeline failed");
    run.advance(PipelineState::Failed);
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InferenceRequest;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Replays canned replies in order and records every request.
    #[derive(Default)]
    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<String, PipelineError>>>,
        requests: Mutex<Vec<InferenceRequest>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<String, PipelineError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, i: usize) -> InferenceRequest {
            self.requests.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn complete(&self, request: &InferenceRequest) -> Result<String, PipelineError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(PipelineError::InferenceUnavailable("script exhausted".into())))
        }
    }

    fn extraction(confidence: f64, plausibility: &str) -> Result<String, PipelineError> {
        Ok(format!(
            r#"{{"name": "5 Mark", "year": "1876", "country": "German Empire",
                "material": "Silber", "purity": 0.9, "mass_grams": 27.78,
                "collector_value": "150 - 200€", "description": "Kaiserreich.",
                "plausibility": "{plausibility}", "confidence": {confidence}}}"#
        ))
    }

    fn verdict(hallucination: bool, adjustment: f64, reason: &str) -> Result<String, PipelineError> {
        Ok(format!(
            r#"{{"hallucination_detected": {hallucination}, "confidence_adjustment": {adjustment}, "reason": "{reason}"}}"#
        ))
    }

    async fn run(client: &ScriptedClient) -> Result<PipelineOutcome, PipelineError> {
        Pipeline::new(client, PipelineConfig::default())
            .run_preprocessed(b"front", b"back", Condition::Fine)
            .await
    }

    #[tokio::test]
    async fn confident_plausible_skips_verification() {
        let client = ScriptedClient::new(vec![extraction(0.9, "ok")]);
        let outcome = run(&client).await.unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(
            outcome.trace,
            [PipelineState::Idle, PipelineState::Extracting, PipelineState::Done]
        );
        assert!(!outcome.visited(PipelineState::Verifying));
        assert!(!outcome.verification_attempted);
        assert!(outcome.verdict.is_none());
        assert_eq!(outcome.observation.confidence, 0.9);
        assert!(outcome.auto_approved);
    }

    #[tokio::test]
    async fn low_confidence_verified_exactly_once() {
        let client = ScriptedClient::new(vec![
            extraction(0.6, "ok"),
            verdict(false, -0.05, ""),
            // A second verification would consume this and show up in the call count.
            verdict(false, 0.5, ""),
        ]);
        let outcome = run(&client).await.unwrap();

        assert_eq!(client.calls(), 2);
        assert_eq!(
            outcome.trace,
            [
                PipelineState::Idle,
                PipelineState::Extracting,
                PipelineState::Verifying,
                PipelineState::Done
            ]
        );
        assert!((outcome.observation.confidence - 0.55).abs() < 1e-9);
        assert!(outcome.auto_approved);
        assert!(outcome.verdict.is_some());
    }

    #[tokio::test]
    async fn hallucination_lowers_confidence_and_annotates() {
        let client = ScriptedClient::new(vec![
            extraction(0.4, "ok"),
            verdict(true, -0.4, "speculative year"),
        ]);
        let outcome = run(&client).await.unwrap();

        assert_eq!(outcome.observation.confidence, 0.0);
        assert!(outcome.observation.description.contains("speculative year"));
        assert!(outcome.observation.description.starts_with("Kaiserreich."));
        assert!(!outcome.auto_approved);
        assert_eq!(outcome.final_state(), PipelineState::Done);
    }

    #[tokio::test]
    async fn implausible_answer_is_verified() {
        let client = ScriptedClient::new(vec![
            extraction(0.95, "portrait does not match year"),
            verdict(false, 0.0, ""),
        ]);
        let outcome = run(&client).await.unwrap();
        assert_eq!(client.calls(), 2);
        assert!(outcome.visited(PipelineState::Verifying));
    }

    #[tokio::test]
    async fn verification_request_carries_observation() {
        let client = ScriptedClient::new(vec![extraction(0.3, "ok"), verdict(false, 0.0, "")]);
        run(&client).await.unwrap();

        let first = client.request(0);
        assert_eq!(first.messages[1].image_count(), 2);
        let second = client.request(1);
        assert_eq!(second.messages[1].image_count(), 0);
        assert_eq!(second.model, PipelineConfig::default().verification_model);
    }

    #[tokio::test]
    async fn verification_failure_is_absorbed() {
        let client = ScriptedClient::new(vec![
            extraction(0.5, "ok"),
            Err(PipelineError::InferenceUnavailable("503".into())),
        ]);
        let outcome = run(&client).await.unwrap();

        assert_eq!(client.calls(), 2);
        assert!(outcome.verification_attempted);
        assert!(outcome.verdict.is_none());
        assert_eq!(outcome.observation.confidence, 0.5);
        assert_eq!(outcome.observation.description, "Kaiserreich.");
        assert_eq!(outcome.final_state(), PipelineState::Done);
    }

    #[tokio::test]
    async fn malformed_verdict_is_absorbed() {
        let client = ScriptedClient::new(vec![extraction(0.5, "ok"), Ok("no idea".into())]);
        let outcome = run(&client).await.unwrap();
        assert!(outcome.verdict.is_none());
        assert_eq!(outcome.observation.confidence, 0.5);
    }

    #[tokio::test]
    async fn extraction_unavailable_fails() {
        let client =
            ScriptedClient::new(vec![Err(PipelineError::InferenceUnavailable("timeout".into()))]);
        let result = run(&client).await;
        assert!(matches!(result, Err(PipelineError::InferenceUnavailable(_))));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_extraction_fails_without_verification() {
        let client = ScriptedClient::new(vec![Ok("Sorry, I can't help with that.".into())]);
        let result = run(&client).await;
        assert!(matches!(result, Err(PipelineError::MalformedResponse(_))));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn partial_extraction_is_repaired() {
        let client = ScriptedClient::new(vec![
            Ok(r#"{"Name": "Pfennig", "confidence": 0.8, "plausibility": "ok"}"#.into()),
        ]);
        let outcome = run(&client).await.unwrap();
        assert_eq!(outcome.observation.name, "Pfennig");
        assert_eq!(outcome.observation.mass_grams, 0.0);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn runs_are_independent() {
        let client = ScriptedClient::new(vec![
            extraction(0.4, "ok"),
            verdict(true, -0.4, "speculative year"),
            extraction(0.9, "ok"),
        ]);
        let pipeline = Pipeline::new(&client, PipelineConfig::default());
        let first = pipeline
            .run_preprocessed(b"a", b"b", Condition::Worn)
            .await
            .unwrap();
        let second = pipeline
            .run_preprocessed(b"a", b"b", Condition::Mint)
            .await
            .unwrap();

        assert!(!first.auto_approved);
        assert!(second.auto_approved);
        assert!(!second.visited(PipelineState::Verifying));
        assert_eq!(second.condition, Condition::Mint);
    }

    #[tokio::test]
    async fn run_preprocesses_uploads() {
        let mut png = Cursor::new(Vec::new());
        image::DynamicImage::new_rgba8(1600, 1200)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        let png = png.into_inner();

        let client = ScriptedClient::new(vec![extraction(0.9, "ok")]);
        let pipeline = Pipeline::new(&client, PipelineConfig::default());
        pipeline
            .run(Submission {
                front: &png,
                back: &png,
                condition: Condition::Fine,
            })
            .await
            .unwrap();

        let req = client.request(0);
        let crate::client::ContentPart::Jpeg(sent) = &req.messages[1].content[1] else {
            panic!("expected an image part");
        };
        let decoded = image::load_from_memory(sent).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1024, 768));
    }

    #[tokio::test]
    async fn bad_upload_fails_before_inference() {
        let client = ScriptedClient::new(vec![extraction(0.9, "ok")]);
        let pipeline = Pipeline::new(&client, PipelineConfig::default());
        let result = pipeline
            .run(Submission {
                front: b"not an image",
                back: b"not an image",
                condition: Condition::Fine,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::ImageDecode(_))));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn adjustment_clamped() {
        let mut obs = CoinObservation {
            confidence: 0.75,
            ..Default::default()
        };
        apply_verdict(
            &mut obs,
            &VerificationVerdict {
                confidence_adjustment: -2.0,
                ..Default::default()
            },
        );
        assert_eq!(obs.confidence, 0.0);

        obs.confidence = 0.2;
        apply_verdict(
            &mut obs,
            &VerificationVerdict {
                confidence_adjustment: 5.0,
                ..Default::default()
            },
        );
        assert_eq!(obs.confidence, 1.0);

        obs.confidence = 0.3;
        apply_verdict(
            &mut obs,
            &VerificationVerdict {
                confidence_adjustment: f64::NAN,
                ..Default::default()
            },
        );
        assert_eq!(obs.confidence, 0.3);
    }

    #[test]
    fn flagged_without_reason_still_annotated() {
        let mut obs = CoinObservation::default();
        let approved = apply_verdict(
            &mut obs,
            &VerificationVerdict {
                hallucination_detected: true,
                ..Default::default()
            },
        );
        assert!(!approved);
        assert!(!obs.description.is_empty());
    }

    #[tokio::test]
    async fn store_gate() {
        let client = ScriptedClient::new(vec![
            extraction(0.9, "ok"),
            extraction(0.3, "ok"),
            verdict(false, 0.0, ""),
            extraction(0.6, "ok"),
            verdict(true, 0.0, "mintage invented"),
        ]);
        let pipeline = Pipeline::new(&client, PipelineConfig::default());

        let confident = pipeline.run_preprocessed(b"a", b"b", Condition::Fine).await.unwrap();
        assert!(confident.may_persist(false));

        let unsure = pipeline.run_preprocessed(b"a", b"b", Condition::Fine).await.unwrap();
        assert!(!unsure.may_persist(false));
        assert!(unsure.may_persist(true));

        let flagged = pipeline.run_preprocessed(b"a", b"b", Condition::Fine).await.unwrap();
        assert!(flagged.observation.confidence >= 0.5);
        assert!(!flagged.may_persist(false));
        assert!(flagged.may_persist(true));
    }

    #[tokio::test]
    async fn outcome_to_record() {
        let client = ScriptedClient::new(vec![extraction(0.9, "ok")]);
        let outcome = run(&client).await.unwrap();
        let prices: SpotPriceTable = [("silver", 1.0)].into_iter().collect();
        let record = outcome.to_record(&prices);

        assert_eq!(record.condition, Condition::Fine);
        assert_eq!(record.collector_value, 150.0);
        assert_eq!(record.collector_value_max, 200.0);
        assert!((record.material_value - 27.78 * 0.9).abs() < 1e-9);
        assert!(!record.verified);
        assert_eq!(record.observation(), outcome.observation);
    }

    #[test]
    fn transitions() {
        use PipelineState::*;
        assert!(Idle.can_advance_to(Extracting));
        assert!(Extracting.can_advance_to(Done));
        assert!(Extracting.can_advance_to(Verifying));
        assert!(!Verifying.can_advance_to(Failed));
        assert!(!Done.can_advance_to(Extracting));
        assert!(Done.is_terminal() && Failed.is_terminal());
        assert!(!Verifying.is_terminal());
    }
}
