//! Vertical card display for coins and price tables.
//!
//! A card is a title line followed by labelled sections. Empty fields are
//! skipped, and a section with no fields left is skipped entirely.

use chrono::SecondsFormat;
use numis_ai::{PipelineOutcome, PipelineState};
use numis_core::{CoinRecord, SpotPriceTable};

const LABEL_WIDTH: usize = 20;

type Section = (&'static str, Vec<(&'static str, String)>);

// ── Public API ──

/// Print a stored or freshly built record as a card.
pub fn print_coin_card(record: &CoinRecord) {
    print!("{}", render_card(record, None));
}

/// Print the result of a scan: the card plus how the pipeline got there.
pub fn print_scan_card(outcome: &PipelineOutcome, record: &CoinRecord) {
    print!("{}", render_card(record, Some(outcome)));
}

/// One line per coin, newest first.
pub fn print_coin_list(records: &[CoinRecord]) {
    if records.is_empty() {
        println!("No coins stored.");
        return;
    }
    for record in records {
        let id = record.id.map(|i| i.to_string()).unwrap_or_default();
        println!(
            "{id:>5}  {:<40} {:<10} {:>12} {:>12}",
            truncate(&record.title(), 40),
            record.condition.as_str(),
            eur(record.collector_value),
            eur(record.material_value),
        );
    }
    println!("\n{} coin(s)", records.len());
}

pub fn print_price_table(table: &SpotPriceTable) {
    let fetched = table
        .fetched_at()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".into());
    println!("Spot prices ({}, fetched {fetched})", table.source().as_str());
    for (material, price) in table.iter() {
        println!("  {material:<LABEL_WIDTH$} {price:>12.4} €/g");
    }
}

// ── Rendering ──

pub fn render_card(record: &CoinRecord, outcome: Option<&PipelineOutcome>) -> String {
    let mut out = format!("=== {} ===\n", record.title());
    if let Some(id) = record.id {
        out.push_str(&format!("#{id}\n"));
    }
    out.push('\n');

    for (header, fields) in sections(record, outcome) {
        let fields: Vec<_> = fields.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        if fields.is_empty() {
            continue;
        }
        out.push_str(header);
        out.push('\n');
        for (label, value) in fields {
            out.push_str(&format!("  {label:<LABEL_WIDTH$} {value}\n"));
        }
        out.push('\n');
    }
    out
}

fn sections(record: &CoinRecord, outcome: Option<&PipelineOutcome>) -> Vec<Section> {
    let mut sections = vec![
        (
            "Identity",
            vec![
                ("name", record.name.clone()),
                ("year", record.year.clone()),
                ("country", record.country.clone()),
                ("condition", record.condition.to_string()),
            ],
        ),
        (
            "Physical",
            vec![
                ("material", record.material.to_string()),
                ("purity", nonzero(record.purity, |p| format!("{p:.3}"))),
                ("mass", nonzero(record.mass_grams, |m| format!("{m:.2} g"))),
                ("diameter", record.diameter.clone()),
                ("mintage", record.mintage.clone()),
            ],
        ),
        (
            "Value",
            vec![
                ("collector value", collector_value(record)),
                ("material value", eur(record.material_value)),
            ],
        ),
        (
            "Assessment",
            vec![
                ("confidence", format!("{:.0}%", record.confidence * 100.0)),
                ("plausibility", record.plausibility.clone()),
                ("verified", yes_no(record.verified).into()),
                ("description", record.description.clone()),
            ],
        ),
    ];

    if let Some(outcome) = outcome {
        let path: Vec<&str> = outcome.trace.iter().map(PipelineState::as_str).collect();
        sections.push((
            "Pipeline",
            vec![
                ("path", path.join(" → ")),
                ("reviewer called", yes_no(outcome.verification_attempted).into()),
                (
                    "hallucination",
                    outcome
                        .verdict
                        .as_ref()
                        .map(|v| yes_no(v.hallucination_detected).to_string())
                        .unwrap_or_default(),
                ),
                ("auto approved", yes_no(outcome.auto_approved).into()),
            ],
        ));
    }

    sections.push((
        "Timestamps",
        vec![(
            "created_at",
            record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )],
    ));
    sections
}

// ── Formatting helpers ──

fn eur(v: f64) -> String {
    format!("{v:.2} €")
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn nonzero(v: f64, f: impl Fn(f64) -> String) -> String {
    if v > 0.0 { f(v) } else { String::new() }
}

fn collector_value(record: &CoinRecord) -> String {
    let (min, max) = (record.collector_value, record.collector_value_max);
    match &record.collector_value_text {
        Some(text) if min == 0.0 && max == 0.0 => text.clone(),
        _ if max > min => format!("{min:.2} - {max:.2} €"),
        _ => eur(min),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
