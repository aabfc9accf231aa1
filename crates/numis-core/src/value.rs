//! Metal value calculation and tolerant parsing of model-written amounts.
//!
//! Models write values the way people do: "1.234,50 €", "ca. 150 - 200€",
//! "7,96 g", "CHF 1'200". [`parse_value`] pulls the first well-formed number
//! out of such text.
//!
//! # Separator rules
//!
//! - Both `.` and `,` present: the one that occurs last is the decimal point.
//! - One kind, repeated: thousands separators ("1.000.000").
//! - One kind, once: thousands separator when exactly three digits follow and
//!   the integer part is a non-zero group of one to three digits ("1.500",
//!   "12,000"); otherwise a decimal point ("7,96", "0,900", "12.5").
//! - `'` is always a thousands separator.
//!
//! [`parse_measurement`] reads masses and fineness, where a four-digit gram
//! weight is implausible: there a single separator is always a decimal point
//! ("7.965 g", "27,778").
//!
//! Signs are ignored: every amount in this domain is non-negative, and a
//! dash between two numbers is a range, not a minus.

use crate::error::CoreError;
use crate::prices::SpotPriceTable;

/// `mass × purity × price_per_gram(material)`.
///
/// Never fails: negative or non-finite inputs count as zero and unknown
/// materials use the table's near-zero default price.
pub fn material_value(
    mass_grams: f64,
    purity: f64,
    material: &str,
    prices: &SpotPriceTable,
) -> f64 {
    let value = non_negative(mass_grams) * non_negative(purity) * prices.price_per_gram(material);
    if value.is_finite() { value } else { 0.0 }
}

fn non_negative(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 { x } else { 0.0 }
}

/// Round to whole cents for display.
pub fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// How a lone `.` or `,` followed by three digits is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grouping {
    /// "1.500" is fifteen hundred.
    Amount,
    /// "7.965" is seven point nine six five.
    Measurement,
}

/// First number found in `text`, reading it as a money amount.
pub fn parse_value(text: &str) -> Result<f64, CoreError> {
    first_number(text, Grouping::Amount)
}

/// First number found in `text`, reading a single separator as a decimal point.
pub fn parse_measurement(text: &str) -> Result<f64, CoreError> {
    first_number(text, Grouping::Measurement)
}

fn first_number(text: &str, grouping: Grouping) -> Result<f64, CoreError> {
    scan_numbers(text, grouping)
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::ValueParse(text.to_string()))
}

/// First two numbers in `text` as `(low, high)`. A single number yields
/// `(n, n)`; a reversed pair is reordered.
pub fn parse_range(text: &str) -> Result<(f64, f64), CoreError> {
    let numbers = scan_numbers(text, Grouping::Amount);
    match numbers.as_slice() {
        [] => Err(CoreError::ValueParse(text.to_string())),
        [n] => Ok((*n, *n)),
        [a, b, ..] => Ok((a.min(*b), a.max(*b))),
    }
}

/// All numbers in reading order.
fn scan_numbers(text: &str, grouping: Grouping) -> Vec<f64> {
    let chars: Vec<char> = text.chars().collect();
    let mut numbers = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        // A separator only belongs to the token when a digit follows it.
        let start = i;
        while i < chars.len() {
            let c = chars[i];
            if c.is_ascii_digit() {
                i += 1;
            } else if matches!(c, '.' | ',' | '\'')
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
            {
                i += 1;
            } else {
                break;
            }
        }

        let token: String = chars[start..i].iter().collect();
        if let Some(n) = interpret(&token, grouping) {
            numbers.push(n);
        }
    }

    numbers
}

fn interpret(token: &str, grouping: Grouping) -> Option<f64> {
    let token = token.replace('\'', "");
    let dots = token.matches('.').count();
    let commas = token.matches(',').count();

    let normalized = match (dots, commas) {
        (0, 0) => token,
        (d, c) if d > 0 && c > 0 => {
            let last_dot = token.rfind('.')?;
            let last_comma = token.rfind(',')?;
            if last_comma > last_dot {
                token.replace('.', "").replace(',', ".")
            } else {
                token.replace(',', "")
            }
        }
        (d, c) => {
            let sep = if d > 0 { '.' } else { ',' };
            if d + c > 1 {
                token.replace(sep, "")
            } else {
                let (int, frac) = token.split_once(sep)?;
                let grouped = grouping == Grouping::Amount
                    && frac.len() == 3
                    && int.len() <= 3
                    && !int.trim_start_matches('0').is_empty();
                if grouped {
                    format!("{int}{frac}")
                } else {
                    format!("{int}.{frac}")
                }
            }
        }
    };

    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn silver_scenario() {
        let prices: SpotPriceTable = [("Silber", 1.60)].into_iter().collect();
        let v = material_value(15.55, 0.5, "Silber", &prices);
        assert!(approx(v, 12.44), "got {v}");
        assert_eq!(round_cents(v), 12.44);
    }

    #[test]
    fn unknown_material_degrades() {
        let prices = SpotPriceTable::fallback();
        let v = material_value(10.0, 1.0, "unobtainium", &prices);
        assert!(approx(v, 0.01));
    }

    #[test]
    fn material_value_is_total() {
        let prices = SpotPriceTable::fallback();
        let cases = [
            (0.0, 0.0, "gold"),
            (f64::NAN, 0.9, "silver"),
            (-5.0, 0.9, "silver"),
            (5.0, f64::INFINITY, "silver"),
            (f64::MAX, f64::MAX, "gold"),
            (7.96, 0.9, ""),
            (7.96, 0.9, "Kupfer"),
        ];
        for (mass, purity, material) in cases {
            let v = material_value(mass, purity, material, &prices);
            assert!(v.is_finite() && v >= 0.0, "{mass} {purity} {material} → {v}");
        }
    }

    #[test]
    fn range_with_currency() {
        assert_eq!(parse_value("150 - 200€").unwrap(), 150.0);
        assert_eq!(parse_range("150 - 200€").unwrap(), (150.0, 200.0));
    }

    #[test]
    fn comma_decimal() {
        assert!(approx(parse_value("7,96 g").unwrap(), 7.96));
        assert!(approx(parse_value("0,900").unwrap(), 0.9));
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(parse_value("1.500 €").unwrap(), 1500.0);
        assert_eq!(parse_value("12,000 USD").unwrap(), 12000.0);
        assert_eq!(parse_value("1.000.000").unwrap(), 1_000_000.0);
        assert_eq!(parse_value("CHF 1'200").unwrap(), 1200.0);
    }

    #[test]
    fn measurements_read_single_separator_as_decimal() {
        assert!(approx(parse_measurement("7.965 g").unwrap(), 7.965));
        assert!(approx(parse_measurement("27,778").unwrap(), 27.778));
        assert!(approx(parse_measurement("1.234,5 g").unwrap(), 1234.5));
        assert_eq!(parse_value("7.965").unwrap(), 7965.0);
    }

    #[test]
    fn mixed_separators() {
        assert!(approx(parse_value("1.234,50 €").unwrap(), 1234.5));
        assert!(approx(parse_value("$1,234.50").unwrap(), 1234.5));
    }

    #[test]
    fn plain_decimal() {
        assert!(approx(parse_value("ca. 12.5 Euro").unwrap(), 12.5));
    }

    #[test]
    fn trailing_period_is_not_a_separator() {
        assert_eq!(parse_value("Worth about 40.").unwrap(), 40.0);
    }

    #[test]
    fn no_number_is_an_error() {
        assert!(matches!(parse_value("priceless"), Err(CoreError::ValueParse(_))));
        assert!(parse_range("").is_err());
    }

    #[test]
    fn reversed_range_reordered() {
        assert_eq!(parse_range("200 bis 150").unwrap(), (150.0, 200.0));
    }

    #[test]
    fn single_value_range() {
        assert_eq!(parse_range("about 35 €").unwrap(), (35.0, 35.0));
    }
}
