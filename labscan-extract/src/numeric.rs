//! Numbers, unit spellings and bracketed spans within a single line.

use std::ops::Range;
use std::sync::LazyLock;

use labscan_core::ReferenceRange;
use regex::Regex;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)?").unwrap());

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(\[\{].*?[\)\]\}]").unwrap());

static BRACKETED_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\(\[\{]\s*([0-9]+(?:\.[0-9]+)?)\s*[-\u{2013}\u{2014}]\s*([0-9]+(?:\.[0-9]+)?)\s*[\)\]\}]",
    )
    .unwrap()
});

static UNIT: LazyLock<Regex> = LazyLock::new(|| {
    let mut spellings: Vec<&str> = KNOWN_UNITS.to_vec();
    spellings.sort_by_key(|s| std::cmp::Reverse(s.len()));
    let alternation = spellings
        .iter()
        .map(|s| regex::escape(s))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{alternation})")).unwrap()
});

/// Unit spellings recognized in report lines. Multiplier forms appear both
/// raw and with the caret already stripped by normalization.
const KNOWN_UNITS: &[&str] = &[
    "10^3/µL", "10^3/uL", "10^6/µL", "10^6/uL", "10^9/L", "10^12/L",
    "x103/µL", "x103/uL", "103/µL", "103/uL", "x106/µL", "x106/uL", "106/µL",
    "106/uL", "x109/L", "109/L", "x1012/L", "1012/L", "K/µL", "K/uL", "M/µL",
    "M/uL", "thou/µL", "thou/uL", "mil/µL", "mil/uL", "cells/µL", "cells/uL",
    "mg/dL", "g/dL", "ng/dL", "µg/dL", "ug/dL", "mg/L", "g/L", "µg/L", "ug/L",
    "mmol/L", "µmol/L", "umol/L", "nmol/L", "pmol/L", "mEq/L", "mmol/mol",
    "U/L", "IU/L", "mU/L", "mIU/L", "µIU/mL", "uIU/mL", "mIU/mL", "ng/mL",
    "pg/mL", "µg/mL", "ug/mL", "%",
];

/// A maximal `digits(.digits)?` run.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericToken {
    pub value: f64,
    /// Byte offset of the first digit.
    pub start: usize,
    pub end: usize,
    /// Preceded directly by a letter, as in `FT4` or `x10`.
    pub glued: bool,
}

/// A known unit spelling found in a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitToken {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl UnitToken {
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// All numeric runs of a line in reading order.
pub fn extract_numbers(line: &str) -> Vec<NumericToken> {
    NUMBER
        .find_iter(line)
        .filter_map(|m| {
            let value = m.as_str().parse::<f64>().ok()?;
            let glued = line[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphabetic());
            Some(NumericToken {
                value,
                start: m.start(),
                end: m.end(),
                glued,
            })
        })
        .collect()
}

/// Numbers paired with the unit written right after them, or else the
/// nearest unit spelling of the line.
pub fn extract_numbers_with_units(line: &str) -> Vec<(NumericToken, Option<UnitToken>)> {
    let units = find_units(line);
    extract_numbers(line)
        .into_iter()
        .map(|token| {
            let unit = unit_following(line, &token, &units)
                .or_else(|| units.iter().min_by_key(|unit| unit.start.abs_diff(token.start)))
                .cloned();
            (token, unit)
        })
        .collect()
}

/// Every known unit spelling in the line, left to right.
pub fn find_units(line: &str) -> Vec<UnitToken> {
    UNIT.find_iter(line)
        .filter(|m| {
            let before_ok = !line[..m.start()]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_ascii_alphabetic());
            let after_ok = !line[m.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric());
            before_ok && after_ok
        })
        .map(|m| UnitToken {
            text: m.as_str().to_string(),
            start: m.start(),
            end: m.end(),
        })
        .collect()
}

/// The unit separated from `token` by whitespace only.
pub fn unit_following<'u>(
    line: &str,
    token: &NumericToken,
    units: &'u [UnitToken],
) -> Option<&'u UnitToken> {
    units.iter().find(|unit| {
        unit.start >= token.end && line[token.end..unit.start].chars().all(char::is_whitespace)
    })
}

/// Byte spans of `(...)`, `[...]` and `{...}` groups.
pub fn bracket_spans(line: &str) -> Vec<Range<usize>> {
    BRACKETED.find_iter(line).map(|m| m.range()).collect()
}

/// A `low-high` range printed in brackets, e.g. `(12.0-15.5)` or `[3.9 – 5.5]`.
pub fn reported_range(line: &str) -> Option<ReferenceRange> {
    let caps = BRACKETED_RANGE.captures(line)?;
    let low = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let high = caps.get(2)?.as_str().parse::<f64>().ok()?;
    Some(ReferenceRange::new(low, high))
}

/// First number of a field, ignoring digits that belong to a word or a unit.
pub fn first_meaningful_number(text: &str) -> Option<NumericToken> {
    let units = find_units(text);
    extract_numbers(text)
        .into_iter()
        .find(|token| !is_noise(token, &units))
}

/// Leading number of a token, parsed the way a lenient float parser would.
pub fn leading_number(token: &str) -> Option<f64> {
    let m = NUMBER.find(token)?;
    if m.start() != 0 {
        return None;
    }
    m.as_str().parse::<f64>().ok()
}

/// Digits glued to a word or sitting inside a unit spelling.
pub fn is_noise(token: &NumericToken, units: &[UnitToken]) -> bool {
    token.glued || units.iter().any(|unit| unit.span().contains(&token.start))
}
