//! Turning raw model replies into fully populated typed records.
//!
//! Three steps, always in this order:
//!
//! 1. [`parse_object`]: strip code fences or surrounding prose and parse the
//!    outermost JSON object. This is the only step that can fail.
//! 2. [`canonicalize`]: remap synonym keys ("Jahr", "Gewicht", "weight",
//!    "marktwert_min", ...) onto canonical field names. A canonical key the
//!    model wrote itself wins over any synonym.
//! 3. [`repair_observation`] / [`repair_verdict`]: fill missing fields with
//!    type defaults, coerce strings to numbers and clamp into range.
//!
//! Repair is idempotent: repairing the serialisation of a repaired
//! observation yields the same observation.

use serde_json::{Map, Value};
use tracing::debug;

use crate::coin::{CoinObservation, Material, VerificationVerdict};
use crate::error::CoreError;
use crate::value::{parse_measurement, parse_range, parse_value};

/// Free-text collector value before it is split into a range.
const COLLECTOR_VALUE: &str = "collector_value";

const OBSERVATION_SYNONYMS: &[(&str, &str)] = &[
    ("name", "name"),
    ("coin", "name"),
    ("title", "name"),
    ("identification", "name"),
    ("bezeichnung", "name"),
    ("year", "year"),
    ("era", "year"),
    ("date", "year"),
    ("jahr", "year"),
    ("prägejahr", "year"),
    ("praegejahr", "year"),
    ("country", "country"),
    ("issuer", "country"),
    ("issuing_country", "country"),
    ("land", "country"),
    ("herkunft", "country"),
    ("material", "material"),
    ("metal", "material"),
    ("metall", "material"),
    ("purity", "purity"),
    ("fineness", "purity"),
    ("reinheit", "purity"),
    ("feingehalt", "purity"),
    ("mass_grams", "mass_grams"),
    ("mass", "mass_grams"),
    ("weight", "mass_grams"),
    ("weight_grams", "mass_grams"),
    ("gewicht", "mass_grams"),
    ("gewicht_g", "mass_grams"),
    ("diameter", "diameter"),
    ("diameter_mm", "diameter"),
    ("durchmesser", "diameter"),
    ("mintage", "mintage"),
    ("print_run", "mintage"),
    ("auflage", "mintage"),
    ("prägeauflage", "mintage"),
    ("collector_value_min", "collector_value_min"),
    ("value_min", "collector_value_min"),
    ("min_value", "collector_value_min"),
    ("market_value_min", "collector_value_min"),
    ("marktwert_min", "collector_value_min"),
    ("collector_value_max", "collector_value_max"),
    ("value_max", "collector_value_max"),
    ("max_value", "collector_value_max"),
    ("market_value_max", "collector_value_max"),
    ("marktwert_max", "collector_value_max"),
    ("collector_value", COLLECTOR_VALUE),
    ("market_value", COLLECTOR_VALUE),
    ("estimated_value", COLLECTOR_VALUE),
    ("value", COLLECTOR_VALUE),
    ("marktwert", COLLECTOR_VALUE),
    ("sammlerwert", COLLECTOR_VALUE),
    ("collector_value_text", "collector_value_text"),
    ("description", "description"),
    ("narrative", "description"),
    ("history", "description"),
    ("info", "description"),
    ("beschreibung", "description"),
    ("plausibility", "plausibility"),
    ("plausibel", "plausibility"),
    ("plausibilität", "plausibility"),
    ("plausibilitaet", "plausibility"),
    ("confidence", "confidence"),
    ("certainty", "confidence"),
    ("konfidenz", "confidence"),
    ("sicherheit", "confidence"),
];

const VERDICT_SYNONYMS: &[(&str, &str)] = &[
    ("hallucination_detected", "hallucination_detected"),
    ("hallucination", "hallucination_detected"),
    ("hallucinated", "hallucination_detected"),
    ("halluzination", "hallucination_detected"),
    ("halluzination_erkannt", "hallucination_detected"),
    ("confidence_adjustment", "confidence_adjustment"),
    ("adjustment", "confidence_adjustment"),
    ("confidence_delta", "confidence_adjustment"),
    ("delta", "confidence_adjustment"),
    ("konfidenz_anpassung", "confidence_adjustment"),
    ("reason", "reason"),
    ("explanation", "reason"),
    ("begründung", "reason"),
    ("begruendung", "reason"),
];

// ── Step 1: parse ──

/// Parse the first JSON object in a model reply.
///
/// Tolerates markdown fences and prose around the object, including prose
/// with braces of its own; fails only when no object can be read at all.
pub fn parse_object(reply: &str) -> Result<Map<String, Value>, CoreError> {
    let trimmed = reply.trim();
    let mut first_error = None;

    for (start, _) in trimmed.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&trimmed[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(map))) => return Ok(map),
            Some(Ok(other)) => {
                first_error.get_or_insert_with(|| format!("expected a JSON object, got {}", kind(&other)));
            }
            Some(Err(e)) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
            None => {}
        }
    }

    Err(CoreError::MalformedResponse(match first_error {
        Some(e) => format!("{e}; reply: {}", preview(trimmed)),
        None => format!("no JSON object in reply: {}", preview(trimmed)),
    }))
}

fn preview(s: &str) -> String {
    s.chars().take(200).collect()
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── Step 2: canonicalise ──

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Remap synonym keys onto canonical names using `synonyms`
/// (`(normalised synonym, canonical)` pairs). Unknown keys are dropped.
pub fn canonicalize(
    map: Map<String, Value>,
    synonyms: &[(&str, &str)],
) -> Map<String, Value> {
    let mut exact = Map::new();
    let mut aliased = Map::new();

    for (key, value) in map {
        let norm = normalize_key(&key);
        let Some(&(_, canonical)) = synonyms.iter().find(|(syn, _)| *syn == norm) else {
            debug!(key = %key, "dropping unrecognised reply key");
            continue;
        };
        if key == canonical {
            exact.insert(key, value);
        } else {
            aliased.entry(canonical.to_string()).or_insert(value);
        }
    }

    for (key, value) in aliased {
        exact.entry(key).or_insert(value);
    }
    exact
}

// ── Step 3: repair ──

/// Parse, canonicalise and repair a Stage-1 reply.
pub fn parse_observation(reply: &str) -> Result<CoinObservation, CoreError> {
    repair_observation(Value::Object(parse_object(reply)?))
}

/// Parse, canonicalise and repair a reviewer reply.
pub fn parse_verdict(reply: &str) -> Result<VerificationVerdict, CoreError> {
    repair_verdict(Value::Object(parse_object(reply)?))
}

/// Build a fully populated observation from any JSON object.
pub fn repair_observation(value: Value) -> Result<CoinObservation, CoreError> {
    let Value::Object(map) = value else {
        return Err(CoreError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            kind(&value)
        )));
    };
    let map = canonicalize(map, OBSERVATION_SYNONYMS);

    let (collector_value_min, collector_value_max, collector_value_text) = collector_range(&map);

    Ok(CoinObservation {
        name: text(map.get("name")),
        year: text(map.get("year")),
        country: text(map.get("country")),
        material: Material::parse(&text(map.get("material"))),
        purity: fineness(map.get("purity")),
        mass_grams: non_negative(number(map.get("mass_grams")).unwrap_or(0.0)),
        diameter: text(map.get("diameter")),
        mintage: text(map.get("mintage")),
        collector_value_min,
        collector_value_max,
        collector_value_text,
        description: text(map.get("description")),
        plausibility: text(map.get("plausibility")),
        confidence: fraction(map.get("confidence")),
    })
}

/// Build a verdict from any JSON object; missing keys mean "no finding".
pub fn repair_verdict(value: Value) -> Result<VerificationVerdict, CoreError> {
    let Value::Object(map) = value else {
        return Err(CoreError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            kind(&value)
        )));
    };
    let map = canonicalize(map, VERDICT_SYNONYMS);

    Ok(VerificationVerdict {
        hallucination_detected: flag(map.get("hallucination_detected")),
        confidence_adjustment: signed(map.get("confidence_adjustment")),
        reason: text(map.get("reason")),
    })
}

/// Resolve `(min, max, raw text)` from explicit bounds, a free-text value, or
/// a previously kept raw text.
fn collector_range(map: &Map<String, Value>) -> (f64, f64, Option<String>) {
    let kept_text = map
        .get("collector_value_text")
        .map(|v| text(Some(v)))
        .filter(|s| !s.is_empty());

    let has_bounds = map.contains_key("collector_value_min") || map.contains_key("collector_value_max");
    if has_bounds {
        let min = amount(map.get("collector_value_min"));
        let max = match map.get("collector_value_max") {
            Some(v) => amount(Some(v)),
            None => min,
        };
        return (min, max.max(min), kept_text);
    }

    match map.get(COLLECTOR_VALUE) {
        Some(Value::Number(n)) => {
            let v = non_negative(n.as_f64().unwrap_or(0.0));
            (v, v, kept_text)
        }
        Some(Value::String(s)) if !s.trim().is_empty() => match parse_range(s) {
            Ok((low, high)) => (non_negative(low), non_negative(high), kept_text),
            Err(_) => (0.0, 0.0, Some(s.trim().to_string())),
        },
        _ => (0.0, 0.0, kept_text),
    }
}

fn text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("null") { String::new() } else { s.to_string() }
        }
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Measurement from a JSON number or numeric text; `None` when neither.
fn number(v: Option<&Value>) -> Option<f64> {
    read_number(v, parse_measurement)
}

fn read_number(v: Option<&Value>, parse: fn(&str) -> Result<f64, CoreError>) -> Option<f64> {
    let n = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse(s).ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn non_negative(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 { x } else { 0.0 }
}

/// Money amount; "1.500 €" is fifteen hundred.
fn amount(v: Option<&Value>) -> f64 {
    non_negative(read_number(v, parse_value).unwrap_or(0.0))
}

fn signed(v: Option<&Value>) -> f64 {
    let Some(value) = v else { return 0.0 };
    let negative = matches!(value, Value::String(s) if s.trim_start().starts_with(['-', '−']));
    match number(Some(value)) {
        Some(n) if negative => -n.abs(),
        Some(n) => n,
        None => 0.0,
    }
}

fn is_percent(v: Option<&Value>) -> bool {
    matches!(v, Some(Value::String(s)) if s.contains('%'))
}

/// A fraction in [0, 1]; values above 1 are percentages.
fn fraction(v: Option<&Value>) -> f64 {
    let Some(n) = number(v) else { return 0.0 };
    let n = if is_percent(v) || n > 1.0 { n / 100.0 } else { n };
    n.clamp(0.0, 1.0)
}

/// Fineness as a fraction: up to 100 is a percentage, above that per mille.
fn fineness(v: Option<&Value>) -> f64 {
    let Some(n) = number(v) else { return 0.0 };
    let n = if is_percent(v) || (n > 1.0 && n <= 100.0) {
        n / 100.0
    } else if n > 100.0 {
        n / 1000.0
    } else {
        n
    };
    n.clamp(0.0, 1.0)
}

fn flag(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
        Some(Value::String(s)) => matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "ja" | "1" | "y"
        ),
        _ => false,
    }
}
