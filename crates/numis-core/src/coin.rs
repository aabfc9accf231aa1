//! Shared coin types: what the model observes, what the reviewer says about it,
//! and what ends up in the collection.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prices::SpotPriceTable;
use crate::value::material_value;

// ── Condition ──

/// Preservation grade chosen by the user, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    Worn,
    #[default]
    Fine,
    VeryFine,
    Mint,
}

impl Condition {
    pub const ALL: [Condition; 4] = [Self::Worn, Self::Fine, Self::VeryFine, Self::Mint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worn => "worn",
            Self::Fine => "fine",
            Self::VeryFine => "very-fine",
            Self::Mint => "mint",
        }
    }

    /// Wording used in the extraction prompt.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Worn => "heavily worn, details partly rubbed off",
            Self::Fine => "fine, clear wear on high points",
            Self::VeryFine => "very fine, light wear only",
            Self::Mint => "mint state, as struck",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    /// Accepts the English labels and the German grading terms
    /// (s, ss, vz, stgl).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_lowercase().replace(['_', ' '], "-");
        match norm.as_str() {
            "worn" | "poor" | "good" | "g" | "stark-abgenutzt" | "abgenutzt" => Ok(Self::Worn),
            "fine" | "f" | "schön" | "schoen" | "s" | "ss" | "sehr-schön" => Ok(Self::Fine),
            "very-fine" | "veryfine" | "vf" | "xf" | "vorzüglich" | "vorzueglich" | "vz" => {
                Ok(Self::VeryFine)
            }
            "mint" | "unc" | "bu" | "stempelglanz" | "stgl" | "stempelglanz-(wie-neu)" => {
                Ok(Self::Mint)
            }
            _ => Err(format!("unknown condition {s:?} (expected worn, fine, very-fine or mint)")),
        }
    }
}

// ── Material ──

/// Fixed metal vocabulary. Anything else is [`Material::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Material {
    Gold,
    Silver,
    Platinum,
    Palladium,
    Copper,
    Nickel,
    Cupronickel,
    Brass,
    Bronze,
    Zinc,
    Steel,
    Iron,
    Aluminium,
    /// Unspecified non-precious alloy ("Unedel").
    Base,
    #[default]
    Unknown,
}

/// Substring aliases checked in order; compound alloys come before their parts.
const MATERIAL_ALIASES: &[(&str, Material)] = &[
    ("cupronickel", Material::Cupronickel),
    ("copper-nickel", Material::Cupronickel),
    ("copper nickel", Material::Cupronickel),
    ("kupfernickel", Material::Cupronickel),
    ("platin", Material::Platinum),
    ("palladium", Material::Palladium),
    ("gold", Material::Gold),
    ("silver", Material::Silver),
    ("silber", Material::Silver),
    ("argent", Material::Silver),
    ("brass", Material::Brass),
    ("messing", Material::Brass),
    ("bronze", Material::Bronze),
    ("copper", Material::Copper),
    ("kupfer", Material::Copper),
    ("nickel", Material::Nickel),
    ("alumin", Material::Aluminium),
    ("zinc", Material::Zinc),
    ("zink", Material::Zinc),
    ("steel", Material::Steel),
    ("stahl", Material::Steel),
    ("iron", Material::Iron),
    ("eisen", Material::Iron),
    ("unedel", Material::Base),
    ("base", Material::Base),
];

impl Material {
    pub const KNOWN: [Material; 14] = [
        Self::Gold,
        Self::Silver,
        Self::Platinum,
        Self::Palladium,
        Self::Copper,
        Self::Nickel,
        Self::Cupronickel,
        Self::Brass,
        Self::Bronze,
        Self::Zinc,
        Self::Steel,
        Self::Iron,
        Self::Aluminium,
        Self::Base,
    ];

    /// Map free text ("Silber", "Gold 900/1000", "Cu-Ni") onto the vocabulary.
    pub fn parse(s: &str) -> Self {
        let norm = s.trim().to_lowercase();
        if norm.is_empty() {
            return Self::Unknown;
        }
        if norm == "cu-ni" || norm == "cuni" {
            return Self::Cupronickel;
        }
        MATERIAL_ALIASES
            .iter()
            .find(|(alias, _)| norm.contains(alias))
            .map(|&(_, m)| m)
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Platinum => "platinum",
            Self::Palladium => "palladium",
            Self::Copper => "copper",
            Self::Nickel => "nickel",
            Self::Cupronickel => "cupronickel",
            Self::Brass => "brass",
            Self::Bronze => "bronze",
            Self::Zinc => "zinc",
            Self::Steel => "steel",
            Self::Iron => "iron",
            Self::Aluminium => "aluminium",
            Self::Base => "base",
            Self::Unknown => "unknown",
        }
    }

    /// Market symbol for metals with a live spot price.
    pub fn spot_symbol(&self) -> Option<&'static str> {
        match self {
            Self::Gold => Some("XAU"),
            Self::Silver => Some("XAG"),
            Self::Platinum => Some("XPT"),
            Self::Palladium => Some("XPD"),
            _ => None,
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Material {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Material> for String {
    fn from(m: Material) -> Self {
        m.as_str().to_string()
    }
}

// ── Observation ──

/// Stage-1 answer of the vision model after repair.
///
/// Every field has a default, so a repaired observation is always fully
/// populated even when the model left keys out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinObservation {
    pub name: String,
    /// Minting year or era, as free text ("1876", "ca. 200 BC").
    pub year: String,
    pub country: String,
    pub material: Material,
    /// Fine fraction in [0, 1], e.g. 0.900.
    pub purity: f64,
    pub mass_grams: f64,
    pub diameter: String,
    pub mintage: String,
    pub collector_value_min: f64,
    pub collector_value_max: f64,
    /// The model's collector value verbatim, kept only when it held no number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collector_value_text: Option<String>,
    pub description: String,
    /// Self-reported consistency judgement; `ok` when year, legend and
    /// iconography agree. Empty when the model gave none.
    pub plausibility: String,
    pub confidence: f64,
}

impl Default for CoinObservation {
    fn default() -> Self {
        Self {
            name: String::new(),
            year: String::new(),
            country: String::new(),
            material: Material::Unknown,
            purity: 0.0,
            mass_grams: 0.0,
            diameter: String::new(),
            mintage: String::new(),
            collector_value_min: 0.0,
            collector_value_max: 0.0,
            collector_value_text: None,
            description: String::new(),
            plausibility: String::new(),
            confidence: 0.0,
        }
    }
}

impl CoinObservation {
    /// True unless the model explicitly flagged its own answer.
    pub fn is_plausible(&self) -> bool {
        let p = self.plausibility.trim();
        p.is_empty() || p.eq_ignore_ascii_case("ok")
    }

    /// Append a note to the narrative, separated from existing text.
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        if self.description.trim().is_empty() {
            self.description = note.to_string();
        } else {
            self.description = format!("{}\n{note}", self.description.trim_end());
        }
    }
}

// ── Verdict ──

/// Reviewer judgement on a Stage-1 observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationVerdict {
    pub hallucination_detected: bool,
    /// Signed delta applied to the observation's confidence.
    pub confidence_adjustment: f64,
    pub reason: String,
}

// ── Record ──

/// A confirmed coin in the collection.
///
/// Built once from an observation; stores assign `id` on insert and never
/// update a record in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub year: String,
    pub country: String,
    pub material: Material,
    pub purity: f64,
    pub mass_grams: f64,
    pub diameter: String,
    pub mintage: String,
    pub condition: Condition,
    /// Collector value (lower bound of the model's estimate).
    pub collector_value: f64,
    pub collector_value_max: f64,
    #[serde(default)]
    pub collector_value_text: Option<String>,
    /// mass × purity × spot price at the time of the scan.
    pub material_value: f64,
    pub description: String,
    #[serde(default)]
    pub plausibility: String,
    pub confidence: f64,
    /// Whether the reviewer stage ran and returned a verdict.
    #[serde(default)]
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl CoinRecord {
    pub fn from_observation(
        obs: &CoinObservation,
        condition: Condition,
        prices: &SpotPriceTable,
        verified: bool,
    ) -> Self {
        let material_value =
            material_value(obs.mass_grams, obs.purity, obs.material.as_str(), prices);
        Self {
            id: None,
            name: obs.name.clone(),
            year: obs.year.clone(),
            country: obs.country.clone(),
            material: obs.material,
            purity: obs.purity,
            mass_grams: obs.mass_grams,
            diameter: obs.diameter.clone(),
            mintage: obs.mintage.clone(),
            condition,
            collector_value: obs.collector_value_min,
            collector_value_max: obs.collector_value_max,
            collector_value_text: obs.collector_value_text.clone(),
            material_value,
            description: obs.description.clone(),
            plausibility: obs.plausibility.clone(),
            confidence: obs.confidence,
            verified,
            created_at: Utc::now(),
        }
    }

    /// Rebuild the observation this record was created from.
    pub fn observation(&self) -> CoinObservation {
        CoinObservation {
            name: self.name.clone(),
            year: self.year.clone(),
            country: self.country.clone(),
            material: self.material,
            purity: self.purity,
            mass_grams: self.mass_grams,
            diameter: self.diameter.clone(),
            mintage: self.mintage.clone(),
            collector_value_min: self.collector_value,
            collector_value_max: self.collector_value_max,
            collector_value_text: self.collector_value_text.clone(),
            description: self.description.clone(),
            plausibility: self.plausibility.clone(),
            confidence: self.confidence,
        }
    }

    /// Display title, e.g. "5 Mark (1876)".
    pub fn title(&self) -> String {
        let name = if self.name.is_empty() {
            "Unidentified coin"
        } else {
            &self.name
        };
        if self.year.is_empty() {
            name.to_string()
        } else {
            format!("{name} ({})", self.year)
        }
    }
}
