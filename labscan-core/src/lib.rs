//! Core data model for turning lab report text into interpreted results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod catalog;

pub use catalog::{
    normalize_phrase, LabCatalog, LabDefinition, ReferenceRange, ReferenceRanges, SynonymIndex,
};

/// Tolerance of the fuzzy synonym match: a phrase of `n` characters accepts
/// an edit distance up to `max(min_distance, floor(n * length_ratio))`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FuzzyPolicy {
    pub min_distance: usize,
    pub length_ratio: f64,
}

impl FuzzyPolicy {
    pub fn threshold(&self, phrase_len: usize) -> usize {
        let scaled = (phrase_len as f64 * self.length_ratio).floor() as usize;
        self.min_distance.max(scaled)
    }
}

impl Default for FuzzyPolicy {
    fn default() -> Self {
        Self {
            min_distance: 2,
            length_ratio: 0.3,
        }
    }
}

/// What happens when a key is matched again on a later line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// The later line replaces the earlier result.
    #[default]
    LastMatchWins,
    /// The later line only replaces a result of lower or equal confidence.
    KeepHighestConfidence,
}

/// Tuning knobs of the extraction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub fuzzy: FuzzyPolicy,
    /// Longest leading token run tried as a lab name.
    pub max_name_tokens: usize,
    /// Lines searched below a name-only line for its value.
    pub lookahead_lines: usize,
    /// End the lookahead at a line that starts with a lab name.
    pub lookahead_stops_at_name: bool,
    pub split_on_semicolon: bool,
    /// Treat runs of 2+ spaces as column separators.
    pub column_mode: bool,
    /// Scan header rows for column titles (vertical tables).
    pub header_scan: bool,
    pub overwrite: OverwritePolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            fuzzy: FuzzyPolicy::default(),
            max_name_tokens: 3,
            lookahead_lines: 2,
            lookahead_stops_at_name: true,
            split_on_semicolon: false,
            column_mode: true,
            header_scan: false,
            overwrite: OverwritePolicy::LastMatchWins,
        }
    }
}

/// Sex category used to select a reference range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Other,
}

impl Sex {
    /// Anything unrecognized maps to `Other`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "male" | "m" | "man" => Sex::Male,
            "female" | "f" | "woman" => Sex::Female,
            _ => Sex::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Other => "other",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one result against its reference range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    Low,
    Normal,
    High,
    Qualitative,
    Unknown,
}

impl Flag {
    pub fn symbol(&self) -> &'static str {
        match self {
            Flag::Low => "↓",
            Flag::High => "↑",
            Flag::Normal => "–",
            Flag::Qualitative | Flag::Unknown => "?",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, Flag::Low | Flag::High)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Flag::Low => "Low",
            Flag::Normal => "Normal",
            Flag::High => "High",
            Flag::Qualitative => "Qualitative",
            Flag::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// How much a match can be trusted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Which rule tied a value to a key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Name in the first column, value in a later column.
    Column,
    /// Synonym found as a whole word inside the line.
    Inline,
    /// Leading tokens of the line resolved as a name.
    Prefix,
    /// Name-only line, value taken from a following line.
    Lookahead,
    /// Column title in a header row, value further down the same column.
    HeaderColumn,
}

/// Where a result came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub line_index: usize,
    pub source_line: String,
    pub strategy: MatchStrategy,
    pub confidence: Confidence,
    pub raw_unit: Option<String>,
}

/// Interpreted value of one lab test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterpretedResult {
    pub key: String,
    pub display_name: String,
    pub raw_value: Option<f64>,
    pub converted_value: Option<f64>,
    /// Rounded for presentation only.
    pub display_value: Option<f64>,
    /// Original token of a qualitative result ("negative", "detected").
    pub qualitative: Option<String>,
    pub unit: String,
    pub flag: Flag,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub conversion_note: Option<String>,
    /// Range printed next to the value in the report, if any.
    pub reported_range: Option<ReferenceRange>,
    pub provenance: Option<Provenance>,
}

impl InterpretedResult {
    pub fn symbol(&self) -> &'static str {
        self.flag.symbol()
    }
}

/// A key matched on more than one line with different values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchConflict {
    pub key: String,
    pub kept_line: usize,
    pub kept_value: Option<f64>,
    pub discarded_line: usize,
    pub discarded_value: Option<f64>,
}

/// Caller-supplied options of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AnalysisOptions {
    #[serde(default)]
    pub sex: Sex,
    #[serde(default)]
    pub config: ExtractionConfig,
}

impl AnalysisOptions {
    pub fn for_sex(sex: Sex) -> Self {
        Self {
            sex,
            ..Self::default()
        }
    }
}

/// Output of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub sex: Sex,
    pub results: BTreeMap<String, InterpretedResult>,
    #[serde(default)]
    pub conflicts: Vec<MatchConflict>,
    /// Lines that produced no result.
    pub unrecognized_lines: usize,
}

impl AnalysisReport {
    pub fn new(
        sex: Sex,
        results: BTreeMap<String, InterpretedResult>,
        conflicts: Vec<MatchConflict>,
        unrecognized_lines: usize,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            sex,
            results,
            conflicts,
            unrecognized_lines,
        }
    }

    pub fn get(&self, key: &str) -> Option<&InterpretedResult> {
        self.results.get(key)
    }

    /// Results flagged low or high.
    pub fn abnormal(&self) -> impl Iterator<Item = &InterpretedResult> {
        self.results.values().filter(|result| result.flag.is_abnormal())
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Errors surfaced to callers of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("no usable text to analyze")]
    EmptyInput,
    #[error("invalid catalog: {0}")]
    Catalog(String),
    #[error("could not parse input: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_threshold_has_floor_and_ratio() {
        let policy = FuzzyPolicy::default();
        assert_eq!(policy.threshold(0), 2);
        assert_eq!(policy.threshold(6), 2);
        assert_eq!(policy.threshold(10), 3);
        assert_eq!(policy.threshold(27), 8);
    }

    #[test]
    fn unknown_sex_maps_to_other() {
        assert_eq!(Sex::parse_lenient("Female"), Sex::Female);
        assert_eq!(Sex::parse_lenient(" M "), Sex::Male);
        assert_eq!(Sex::parse_lenient("nonbinary"), Sex::Other);
        assert_eq!(Sex::parse_lenient(""), Sex::Other);
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: AnalysisOptions = serde_json::from_str(r#"{"sex":"female"}"#).unwrap();
        assert_eq!(options.sex, Sex::Female);
        assert_eq!(options.config, ExtractionConfig::default());
    }
}
