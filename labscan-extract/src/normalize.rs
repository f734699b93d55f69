//! Cleanup of OCR and PDF extraction artifacts.

use std::sync::LazyLock;

use regex::Regex;

static COLUMN_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}|\t").unwrap());

const MICRO_SIGN: char = '\u{00B5}';
const GREEK_MU: char = '\u{03BC}';

/// Normalize extracted report text.
///
/// Commas become periods, digit-adjacent glyph misreads are fixed, characters
/// outside the allow-list are dropped, and each line is trimmed with inner
/// whitespace runs collapsed. Line breaks are kept. Applying it twice gives
/// the same result as applying it once.
pub fn normalize_text(text: &str) -> String {
    clean_glyphs(text)
        .split('\n')
        .map(collapse_spaces)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Character-level cleanup without any whitespace collapsing, so that column
/// gaps survive for table detection.
pub fn clean_glyphs(text: &str) -> String {
    let chars: Vec<char> = text
        .chars()
        .map(|c| match c {
            ',' => '.',
            GREEK_MU => MICRO_SIGN,
            other => other,
        })
        .collect();

    let fixed = fix_misreads(chars);
    let kept: Vec<char> = fixed.into_iter().filter(|c| is_allowed(*c)).collect();
    // Stripping can put a letter next to a digit, so fix again.
    fix_misreads(kept).into_iter().collect()
}

/// Collapse runs of 2+ whitespace characters into one space and trim.
pub fn collapse_spaces(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut run = String::new();
    for ch in line.trim().chars() {
        if ch.is_whitespace() {
            run.push(ch);
            continue;
        }
        flush_whitespace(&mut out, &mut run);
        out.push(ch);
    }
    out
}

fn flush_whitespace(out: &mut String, run: &mut String) {
    if run.chars().count() >= 2 {
        out.push(' ');
    } else {
        out.push_str(run);
    }
    run.clear();
}

/// Split text into trimmed, non-empty lines; optionally also on semicolons.
pub fn segment_lines(text: &str, split_on_semicolon: bool) -> Vec<&str> {
    text.lines()
        .flat_map(|line| {
            if split_on_semicolon {
                line.split(';').collect::<Vec<_>>()
            } else {
                vec![line]
            }
        })
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Fields of a line laid out as a table (separated by tabs or 2+ spaces).
pub fn split_columns(line: &str) -> Vec<String> {
    COLUMN_GAP
        .split(line.trim())
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            MICRO_SIGN
                | '%'
                | '('
                | ')'
                | '['
                | ']'
                | '.'
                | '-'
                | '/'
                | ':'
                | '\u{2013}' // en-dash
                | '\u{2014}' // em-dash
        )
}

fn is_word(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_digit(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_digit())
}

/// Repeat single passes until stable; chains like `lI5` need more than one.
fn fix_misreads(mut chars: Vec<char>) -> Vec<char> {
    loop {
        let (next, changed) = fix_misreads_once(&chars);
        if !changed {
            return next;
        }
        chars = next;
    }
}

fn fix_misreads_once(chars: &[char]) -> (Vec<char>, bool) {
    let mut changed = false;
    let out = chars
        .iter()
        .enumerate()
        .map(|(idx, &c)| {
            let prev = idx.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(idx + 1).copied();
            let replacement = match c {
                'O' if is_digit(next) || (!is_word(prev) && !is_word(next)) => Some('0'),
                'S' if !is_word(prev) && is_digit(next) => Some('5'),
                'l' | 'I' if is_digit(next) => Some('1'),
                _ => None,
            };
            match replacement {
                Some(r) => {
                    changed = true;
                    r
                }
                None => c,
            }
        })
        .collect();
    (out, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_comma_becomes_period() {
        assert_eq!(normalize_text("Hb 13,2 g/dL"), "Hb 13.2 g/dL");
    }

    #[test]
    fn fixes_misreads_only_next_to_digits() {
        assert_eq!(normalize_text("PLT 2O5"), "PLT 205");
        assert_eq!(normalize_text("value O"), "value 0");
        assert_eq!(normalize_text("S4 units"), "54 units");
        assert_eq!(normalize_text("l2.5 and I3"), "12.5 and 13");
        assert_eq!(normalize_text("Sodium Oral lipid"), "Sodium Oral lipid");
        assert_eq!(normalize_text("BASO 1"), "BASO 1");
    }

    #[test]
    fn strips_noise_but_keeps_range_punctuation() {
        assert_eq!(
            normalize_text("HGB* 11.0 g/dL (12.0\u{2013}15.5) #"),
            "HGB 11.0 g/dL (12.0\u{2013}15.5)"
        );
        assert_eq!(normalize_text("TSH 2.1 μIU/mL"), "TSH 2.1 µIU/mL");
        assert_eq!(normalize_text("WBC 13.5 10^3/uL"), "WBC 13.5 103/uL");
    }

    #[test]
    fn keeps_line_breaks_and_trims_lines() {
        assert_eq!(
            normalize_text("  WBC    9.4 \n\n  HGB 13  "),
            "WBC 9.4\n\nHGB 13"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "Patient: John\nWBC 13,5 10^3/uL\nHGB 11.0 g/dL (12.0-15.5)\n",
            "l#5 O#7 lI5 S#9",
            "Glucose ... 5,4 mmol/L   [3.9 - 5.5]",
            "TSH\t2.1\tµIU/mL",
        ];
        for sample in samples {
            let once = normalize_text(sample);
            assert_eq!(normalize_text(&once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn segments_on_newlines_and_optional_semicolons() {
        let text = "WBC 9.4; HGB 13\n\n  PLT 250  ";
        assert_eq!(segment_lines(text, false), vec!["WBC 9.4; HGB 13", "PLT 250"]);
        assert_eq!(segment_lines(text, true), vec!["WBC 9.4", "HGB 13", "PLT 250"]);
    }

    #[test]
    fn splits_columns_on_wide_gaps() {
        assert_eq!(
            split_columns("Hemoglobin   13.2    g/dL  12-15.5"),
            vec!["Hemoglobin", "13.2", "g/dL", "12-15.5"]
        );
        assert_eq!(split_columns("Hemoglobin 13.2 g/dL"), vec!["Hemoglobin 13.2 g/dL"]);
    }
}
