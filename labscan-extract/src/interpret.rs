//! Classifying a value against the catalog reference range.

use labscan_core::{Flag, InterpretedResult, LabCatalog, Sex};

/// Terms that report a result as a category. Listed so that a longer term
/// shadows the shorter one it contains ("not detected" before "detected").
const QUALITATIVE_TERMS: &[&str] = &[
    "not detected",
    "non-reactive",
    "non reactive",
    "nonreactive",
    "undetected",
    "detected",
    "reactive",
    "positive",
    "negative",
    "present",
    "absent",
    "trace",
    "equivocal",
    "indeterminate",
];

/// What the pipeline read for a lab.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Numeric(f64),
    Qualitative(String),
}

/// Earliest qualitative term of the line, lowercased.
pub fn qualitative_token(line: &str) -> Option<String> {
    let haystack = line.to_ascii_lowercase();
    let mut best: Option<(usize, &str)> = None;
    for term in QUALITATIVE_TERMS {
        for (start, _) in haystack.match_indices(term) {
            let end = start + term.len();
            let before = haystack[..start].chars().next_back();
            let after = haystack[end..].chars().next();
            let bounded = !before.is_some_and(|c| c.is_ascii_alphanumeric() || c == '-')
                && !after.is_some_and(|c| c.is_ascii_alphanumeric());
            if bounded && best.map_or(true, |(s, _)| start < s) {
                best = Some((start, term));
            }
        }
    }
    best.map(|(_, term)| term.to_string())
}

/// Presentation rounding: integers from 100, one decimal from 10, else two.
pub fn display_round(value: f64) -> f64 {
    let factor = if value >= 100.0 {
        1.0
    } else if value >= 10.0 {
        10.0
    } else {
        100.0
    };
    (value * factor).round() / factor
}

/// Interpret a measurement for `key`. Never fails: unknown keys and
/// non-finite values come back flagged `Unknown`.
pub fn interpret(
    catalog: &LabCatalog,
    key: &str,
    measurement: Measurement,
    sex: Sex,
) -> InterpretedResult {
    let mut result = InterpretedResult {
        key: key.to_string(),
        display_name: key.to_string(),
        raw_value: None,
        converted_value: None,
        display_value: None,
        qualitative: None,
        unit: String::new(),
        flag: Flag::Unknown,
        low: None,
        high: None,
        conversion_note: None,
        reported_range: None,
        provenance: None,
    };

    if let Measurement::Numeric(value) = measurement {
        if value.is_finite() {
            result.raw_value = Some(value);
            result.converted_value = Some(value);
            result.display_value = Some(display_round(value));
        }
    }

    let Some(definition) = catalog.get(key) else {
        if let Measurement::Qualitative(token) = measurement {
            result.qualitative = Some(token);
        }
        return result;
    };

    result.display_name = definition.display_name.clone();
    result.unit = definition.canonical_unit.clone();
    let range = definition.reference_ranges.for_sex(sex);
    result.low = range.map(|r| r.low);
    result.high = range.map(|r| r.high);

    result.flag = match (&measurement, result.converted_value, range) {
        (Measurement::Qualitative(_), _, _) => Flag::Qualitative,
        (Measurement::Numeric(_), Some(value), Some(range)) if range.contains(value) => Flag::Normal,
        (Measurement::Numeric(_), Some(value), Some(range)) if value < range.low => Flag::Low,
        (Measurement::Numeric(_), Some(_), Some(_)) => Flag::High,
        _ => Flag::Unknown,
    };

    if let Measurement::Qualitative(token) = measurement {
        result.qualitative = Some(token);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag(key: &str, value: f64, sex: Sex) -> Flag {
        interpret(&LabCatalog::builtin(), key, Measurement::Numeric(value), sex).flag
    }

    #[test]
    fn hemoglobin_female_range() {
        assert_eq!(flag("HGB", 11.0, Sex::Female), Flag::Low);
        assert_eq!(flag("HGB", 13.0, Sex::Female), Flag::Normal);
        assert_eq!(flag("HGB", 16.0, Sex::Female), Flag::High);
    }

    #[test]
    fn bounds_are_inclusive() {
        assert_eq!(flag("HGB", 12.0, Sex::Female), Flag::Normal);
        assert_eq!(flag("HGB", 15.5, Sex::Female), Flag::Normal);
    }

    #[test]
    fn unrecognized_sex_uses_other_range() {
        let sex = Sex::parse_lenient("prefer not to say");
        let result = interpret(&LabCatalog::builtin(), "HGB", Measurement::Numeric(17.0), sex);
        assert_eq!(result.low, Some(12.0));
        assert_eq!(result.high, Some(17.5));
        assert_eq!(result.flag, Flag::Normal);
    }

    #[test]
    fn unknown_key_is_flagged_unknown() {
        let result = interpret(&LabCatalog::builtin(), "XYZ", Measurement::Numeric(4.0), Sex::Male);
        assert_eq!(result.flag, Flag::Unknown);
        assert_eq!(result.unit, "");
        assert_eq!(result.low, None);
        assert_eq!(result.high, None);
    }

    #[test]
    fn non_finite_value_degrades_to_unknown() {
        let result = interpret(
            &LabCatalog::builtin(),
            "GLU",
            Measurement::Numeric(f64::INFINITY),
            Sex::Other,
        );
        assert_eq!(result.flag, Flag::Unknown);
        assert_eq!(result.converted_value, None);
    }

    #[test]
    fn qualitative_result_keeps_its_token() {
        let result = interpret(
            &LabCatalog::builtin(),
            "HBSAG",
            Measurement::Qualitative("negative".into()),
            Sex::Other,
        );
        assert_eq!(result.flag, Flag::Qualitative);
        assert_eq!(result.qualitative.as_deref(), Some("negative"));
        assert_eq!(result.unit, "");
    }

    #[test]
    fn display_rounding_tiers() {
        assert_eq!(display_round(123.6), 124.0);
        assert_eq!(display_round(13.46), 13.5);
        assert_eq!(display_round(1.236), 1.24);
    }

    #[test]
    fn finds_qualitative_terms() {
        assert_eq!(qualitative_token("HBsAg Not Detected").as_deref(), Some("not detected"));
        assert_eq!(qualitative_token("HBsAg: NEGATIVE").as_deref(), Some("negative"));
        assert_eq!(qualitative_token("HIV non-reactive").as_deref(), Some("non-reactive"));
        assert_eq!(qualitative_token("positively pending"), None);
    }
}
