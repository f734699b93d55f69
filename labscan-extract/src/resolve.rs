//! Mapping free-text phrases onto canonical lab keys.

use std::ops::Range;

use labscan_core::{normalize_phrase, FuzzyPolicy, LabCatalog};

/// A phrase resolved to a catalog key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution<'a> {
    pub key: &'a str,
    /// Edit distance to the matched synonym; zero for exact matches.
    pub distance: usize,
}

impl Resolution<'_> {
    pub fn is_exact(&self) -> bool {
        self.distance == 0
    }
}

/// A name read from the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixMatch<'a> {
    pub resolution: Resolution<'a>,
    /// Byte offset just past the last name token.
    pub end: usize,
    /// Every token of the line was part of the name.
    pub whole_line: bool,
}

/// Whole-word synonym occurrence inside a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineMatch<'a> {
    pub key: &'a str,
    pub start: usize,
    pub end: usize,
}

/// Exact-then-fuzzy resolver over a catalog's synonym index.
#[derive(Debug, Clone, Copy)]
pub struct SynonymResolver<'a> {
    catalog: &'a LabCatalog,
    policy: FuzzyPolicy,
}

impl<'a> SynonymResolver<'a> {
    pub fn new(catalog: &'a LabCatalog, policy: FuzzyPolicy) -> Self {
        Self { catalog, policy }
    }

    /// Resolve a short phrase. Phrases without letters never match.
    pub fn resolve(&self, phrase: &str) -> Option<Resolution<'a>> {
        let normalized = normalize_phrase(phrase);
        if !normalized.chars().any(|c| c.is_ascii_lowercase()) {
            return None;
        }

        let index = self.catalog.synonyms();
        if let Some(key) = index.get(&normalized) {
            return Some(Resolution { key, distance: 0 });
        }

        let mut best: Option<Resolution<'a>> = None;
        for (synonym, key) in index.iter() {
            let distance = strsim::levenshtein(&normalized, synonym);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Resolution { key, distance });
            }
        }

        let limit = self.policy.threshold(normalized.chars().count());
        best.filter(|b| b.distance <= limit)
    }

    /// Resolve the leading 1..=`max_tokens` whitespace tokens, longest first.
    /// A name ends at the first token starting with a digit.
    pub fn resolve_prefix(&self, line: &str, max_tokens: usize) -> Option<PrefixMatch<'a>> {
        let spans = token_spans(line);
        let tokens: Vec<&str> = spans.iter().map(|span| &line[span.clone()]).collect();
        let name_tokens = tokens
            .iter()
            .take_while(|token| !token.starts_with(|c: char| c.is_ascii_digit()))
            .count();
        let longest = max_tokens.min(name_tokens);
        (1..=longest).rev().find_map(|take| {
            let resolution = self.resolve(&tokens[..take].join(" "))?;
            Some(PrefixMatch {
                resolution,
                end: spans[take - 1].end,
                whole_line: take == tokens.len(),
            })
        })
    }

    /// Synonyms that appear as whole words in `line`, one match per key.
    ///
    /// Where occurrences overlap the longer synonym wins, so "hemoglobin a1c"
    /// is not also read as "hemoglobin".
    pub fn scan_inline(&self, line: &str) -> Vec<InlineMatch<'a>> {
        let haystack = line.to_ascii_lowercase();
        let mut found: Vec<InlineMatch<'a>> = Vec::new();
        for (synonym, key) in self.catalog.synonyms().iter() {
            for (start, _) in haystack.match_indices(synonym) {
                let end = start + synonym.len();
                if is_bounded(&haystack, start, end) {
                    found.push(InlineMatch { key, start, end });
                }
            }
        }

        found.sort_by_key(|m| (std::cmp::Reverse(m.end - m.start), m.start));
        let mut accepted: Vec<InlineMatch<'a>> = Vec::new();
        for candidate in found {
            let overlaps = accepted
                .iter()
                .any(|a| candidate.start < a.end && a.start < candidate.end);
            let duplicate = accepted.iter().any(|a| a.key == candidate.key);
            if !overlaps && !duplicate {
                accepted.push(candidate);
            }
        }
        accepted.sort_by_key(|m| m.start);
        accepted
    }
}

/// Byte spans of the whitespace-separated tokens of `line`.
fn token_spans(line: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(from)) => {
                spans.push(from..idx);
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(from) = start {
        spans.push(from..line.len());
    }
    spans
}

fn is_bounded(haystack: &str, start: usize, end: usize) -> bool {
    let before = haystack[..start].chars().next_back();
    let after = haystack[end..].chars().next();
    !before.is_some_and(|c| c.is_ascii_alphanumeric())
        && !after.is_some_and(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(catalog: &LabCatalog) -> SynonymResolver<'_> {
        SynonymResolver::new(catalog, FuzzyPolicy::default())
    }

    #[test]
    fn every_synonym_resolves_exactly() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        for definition in catalog.definitions() {
            for synonym in &definition.synonyms {
                let resolution = resolver.resolve(synonym).expect("synonym must resolve");
                assert_eq!(resolution.key, definition.key, "synonym {synonym}");
                assert_eq!(resolution.distance, 0);
            }
        }
    }

    #[test]
    fn one_substitution_still_resolves() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        assert_eq!(resolver.resolve("hemoglobim").map(|r| r.key), Some("HGB"));
        assert_eq!(resolver.resolve("creatinlne").map(|r| r.key), Some("CREAT"));
        assert_eq!(resolver.resolve("Platelels").map(|r| r.key), Some("PLT"));
        assert_eq!(resolver.resolve("hemoglobim").map(|r| r.distance), Some(1));
    }

    #[test]
    fn scrambled_phrase_does_not_resolve() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        assert_eq!(resolver.resolve("qwxzqwxz"), None);
        assert_eq!(resolver.resolve("patient john"), None);
    }

    #[test]
    fn empty_and_numeric_phrases_never_match() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        assert_eq!(resolver.resolve(""), None);
        assert_eq!(resolver.resolve("  ()  "), None);
        assert_eq!(resolver.resolve("13.5"), None);
    }

    #[test]
    fn stricter_policy_rejects_distant_phrases() {
        let catalog = LabCatalog::builtin();
        let strict = SynonymResolver::new(
            &catalog,
            FuzzyPolicy {
                min_distance: 0,
                length_ratio: 0.0,
            },
        );
        assert_eq!(strict.resolve("hemoglobim"), None);
        assert_eq!(strict.resolve("Hemoglobin").map(|r| r.key), Some("HGB"));
    }

    #[test]
    fn prefix_tries_longest_run_first() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        let found = resolver.resolve_prefix("Serum Creatinine 1.0 mg/dL", 3).unwrap();
        assert_eq!(found.resolution.key, "CREAT");
        assert!(!found.whole_line);
        assert_eq!(resolver.resolve_prefix("Patient: John", 3), None);
    }

    #[test]
    fn prefix_stops_before_the_value() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        let found = resolver.resolve_prefix("Hemoglobin 11.0 g/dL", 3).unwrap();
        assert_eq!(found.resolution.key, "HGB");
        assert!(found.resolution.is_exact());
        assert_eq!(found.end, 10);
        let free_t4 = resolver.resolve_prefix("Free  T4", 3).unwrap();
        assert!(free_t4.whole_line);
        assert_eq!(free_t4.end, 8);
        assert_eq!(resolver.resolve_prefix("13.2 g/dL", 3), None);
    }

    #[test]
    fn inline_scan_respects_word_boundaries() {
        let catalog = LabCatalog::builtin();
        let resolver = resolver(&catalog);
        assert!(resolver.scan_inline("last result pending").is_empty());

        let keys: Vec<&str> = resolver
            .scan_inline("Hemoglobin A1c 6.1 %")
            .iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["HBA1C"]);

        let keys: Vec<&str> = resolver
            .scan_inline("ALT 30 U/L, AST 25 U/L")
            .iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(keys, vec!["ALT", "AST"]);
    }
}
