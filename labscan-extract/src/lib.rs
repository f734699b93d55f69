//! Lab report text to `AnalysisReport` extraction pipeline.

use std::collections::{btree_map::Entry, BTreeMap};
use std::ops::Range;

use labscan_core::{
    AnalysisOptions, AnalysisReport, Confidence, ExtractionConfig, InterpretedResult, LabCatalog,
    LabDefinition, LabError, MatchConflict, MatchStrategy, OverwritePolicy, Provenance, Sex,
};
use tracing::{debug, info, warn};

pub mod convert;
pub mod disambiguate;
pub mod interpret;
pub mod normalize;
pub mod numeric;
pub mod resolve;

pub use convert::{Conversion, ConversionRule, Scale, UnitConverter};
pub use disambiguate::{pick_value, PickedValue};
pub use interpret::{display_round, interpret, qualitative_token, Measurement};
pub use normalize::{normalize_text, segment_lines};
pub use resolve::{InlineMatch, PrefixMatch, Resolution, SynonymResolver};

/// Header rows and columns inspected by the header-column scan.
const HEADER_ROWS: usize = 4;
const HEADER_COLUMNS: usize = 6;

/// Analyze report text with the default unit conversions.
pub fn analyze(
    catalog: &LabCatalog,
    text: &str,
    options: &AnalysisOptions,
) -> Result<AnalysisReport, LabError> {
    analyze_with(catalog, &UnitConverter::default(), text, options)
}

/// Analyze report text with a caller-supplied conversion table.
///
/// Fails only when the text holds nothing to analyze; every other problem
/// (unknown phrases, missing numbers) just leaves the lab out of the report.
pub fn analyze_with(
    catalog: &LabCatalog,
    converter: &UnitConverter,
    text: &str,
    options: &AnalysisOptions,
) -> Result<AnalysisReport, LabError> {
    if text.trim().is_empty() {
        return Err(LabError::EmptyInput);
    }

    let lines = prepare_lines(text, &options.config);
    if lines.is_empty() {
        return Err(LabError::EmptyInput);
    }

    let pipeline = Pipeline {
        catalog,
        converter,
        resolver: SynonymResolver::new(catalog, options.config.fuzzy),
        config: &options.config,
        sex: options.sex,
    };
    let mut accumulator = ResultAccumulator::new(options.config.overwrite);

    for idx in 0..lines.len() {
        if !pipeline.handle_line(idx, &lines, &mut accumulator) {
            accumulator.unrecognized += 1;
        }
    }

    if options.config.header_scan {
        pipeline.scan_header_columns(&lines, &mut accumulator);
    }

    info!(
        lines = lines.len(),
        recognized = accumulator.results.len(),
        conflicts = accumulator.conflicts.len(),
        "lab report analyzed"
    );

    Ok(accumulator.finalize(options.sex))
}

/// A segmented line: collapsed text plus its table fields.
#[derive(Debug, Clone)]
struct PreparedLine {
    text: String,
    fields: Vec<String>,
}

fn prepare_lines(text: &str, config: &ExtractionConfig) -> Vec<PreparedLine> {
    normalize::segment_lines(text, config.split_on_semicolon)
        .into_iter()
        .filter_map(|raw| {
            let cleaned = normalize::clean_glyphs(raw);
            let text = normalize::collapse_spaces(&cleaned);
            if text.is_empty() {
                return None;
            }
            Some(PreparedLine {
                fields: normalize::split_columns(&cleaned),
                text,
            })
        })
        .collect()
}

/// A key named on a line, before its value is read.
#[derive(Debug, Clone, Copy)]
struct LineMatch<'a> {
    key: &'a str,
    /// Byte span of the name within the line.
    start: usize,
    end: usize,
    strategy: MatchStrategy,
    confidence: Confidence,
    /// The line starts with the name, so the value may sit below it.
    leads_line: bool,
}

struct Pipeline<'a> {
    catalog: &'a LabCatalog,
    converter: &'a UnitConverter,
    resolver: SynonymResolver<'a>,
    config: &'a ExtractionConfig,
    sex: Sex,
}

impl<'a> Pipeline<'a> {
    /// Returns whether the line produced at least one result.
    fn handle_line(
        &self,
        idx: usize,
        lines: &[PreparedLine],
        accumulator: &mut ResultAccumulator,
    ) -> bool {
        let line = &lines[idx];

        if self.config.column_mode && line.fields.len() >= 2 {
            if let Some(resolution) = self.resolver.resolve(&line.fields[0]) {
                let matched = LineMatch {
                    key: resolution.key,
                    start: 0,
                    end: line.fields[0].len().min(line.text.len()),
                    strategy: MatchStrategy::Column,
                    confidence: name_confidence(resolution),
                    leads_line: resolution.is_exact(),
                };
                return self.handle_column_row(idx, lines, matched, accumulator);
            }
        }

        let matches = self.line_matches(&line.text);
        let mut recorded = false;
        for matched in &matches {
            // Each name reads its value from the text up to the next name;
            // the first one also owns whatever precedes it.
            let from = if matches.iter().any(|other| other.start < matched.start) {
                matched.start
            } else {
                0
            };
            let end = matches
                .iter()
                .map(|other| other.start)
                .filter(|&start| start > matched.start)
                .min()
                .unwrap_or(line.text.len());
            let segment = &line.text[from..end];
            let name = matched.start - from..matched.end - from;
            recorded |= self.handle_match(idx, lines, *matched, segment, name, accumulator);
        }
        recorded
    }

    fn line_matches(&self, text: &str) -> Vec<LineMatch<'a>> {
        let mut matches: Vec<LineMatch<'a>> = self
            .resolver
            .scan_inline(text)
            .into_iter()
            .map(|inline| LineMatch {
                key: inline.key,
                start: inline.start,
                end: inline.end,
                strategy: MatchStrategy::Inline,
                confidence: Confidence::High,
                leads_line: inline.start == 0,
            })
            .collect();

        if let Some(prefix) = self.resolver.resolve_prefix(text, self.config.max_name_tokens) {
            let resolution = prefix.resolution;
            // A fuzzy name followed by other words is too weak to pull values from below.
            let leads_line = resolution.is_exact() || prefix.whole_line;
            // Words the prefix read as one name ("Hb A1c") are not names of their own.
            matches.retain(|m| m.key == resolution.key || m.start >= prefix.end);
            match matches.iter_mut().find(|m| m.key == resolution.key) {
                Some(existing) => {
                    existing.start = 0;
                    existing.end = existing.end.max(prefix.end);
                    existing.leads_line |= leads_line;
                }
                None => matches.insert(
                    0,
                    LineMatch {
                        key: resolution.key,
                        start: 0,
                        end: prefix.end,
                        strategy: MatchStrategy::Prefix,
                        confidence: name_confidence(resolution),
                        leads_line,
                    },
                ),
            }
        }
        matches
    }

    fn handle_column_row(
        &self,
        idx: usize,
        lines: &[PreparedLine],
        matched: LineMatch<'a>,
        accumulator: &mut ResultAccumulator,
    ) -> bool {
        let line = &lines[idx];
        let from_fields = line.fields[1..].iter().enumerate().find_map(|(pos, field)| {
            let token = numeric::first_meaningful_number(field)?;
            let units = numeric::find_units(field);
            // A bare number takes the unit of the next column that has one.
            let unit = numeric::unit_following(field, &token, &units)
                .map(|u| u.text.clone())
                .or_else(|| {
                    line.fields[pos + 2..]
                        .iter()
                        .find_map(|later| numeric::find_units(later).into_iter().next())
                        .map(|u| u.text)
                });
            Some(PickedValue {
                value: token.value,
                start: token.start,
                unit,
            })
        });

        match from_fields {
            Some(picked) => {
                self.record_numeric(idx, &line.text, &line.text, matched, picked, accumulator);
                true
            }
            None => {
                let name = matched.start..matched.end;
                self.handle_match(idx, lines, matched, &line.text, name, accumulator)
            }
        }
    }

    fn handle_match(
        &self,
        idx: usize,
        lines: &[PreparedLine],
        matched: LineMatch<'a>,
        segment: &str,
        name: Range<usize>,
        accumulator: &mut ResultAccumulator,
    ) -> bool {
        let line = &lines[idx];
        let definition = self.catalog.get(matched.key);
        // Categorical tests prefer the word over any index number printed beside it.
        let qualitative_first = definition.is_some_and(LabDefinition::is_qualitative);

        if qualitative_first
            && self.record_qualitative(idx, &line.text, segment, matched, accumulator)
        {
            return true;
        }

        if let Some(picked) = pick_value(segment, definition, Some(name)) {
            self.record_numeric(idx, &line.text, segment, matched, picked, accumulator);
            return true;
        }

        if !qualitative_first
            && self.record_qualitative(idx, &line.text, segment, matched, accumulator)
        {
            return true;
        }

        if !matched.leads_line {
            return false;
        }

        match self.look_ahead(idx, lines, definition) {
            Some((value_idx, picked)) => {
                debug!(
                    key = matched.key,
                    name_line = idx,
                    value_line = value_idx,
                    "value found below name"
                );
                let lookahead = LineMatch {
                    strategy: MatchStrategy::Lookahead,
                    confidence: Confidence::Low,
                    ..matched
                };
                let text = &lines[value_idx].text;
                self.record_numeric(value_idx, text, text, lookahead, picked, accumulator);
                true
            }
            None => false,
        }
    }

    fn record_qualitative(
        &self,
        idx: usize,
        source_line: &str,
        segment: &str,
        matched: LineMatch<'a>,
        accumulator: &mut ResultAccumulator,
    ) -> bool {
        let Some(token) = qualitative_token(segment) else {
            return false;
        };
        let mut result =
            interpret(self.catalog, matched.key, Measurement::Qualitative(token), self.sex);
        result.provenance = Some(provenance(idx, source_line, matched, None));
        debug!(key = matched.key, line = idx, "qualitative result");
        accumulator.record(result);
        true
    }

    /// First value on the next `lookahead_lines` lines. With
    /// `lookahead_stops_at_name`, a line that names a lab of its own ends the
    /// search.
    fn look_ahead(
        &self,
        idx: usize,
        lines: &[PreparedLine],
        definition: Option<&LabDefinition>,
    ) -> Option<(usize, PickedValue)> {
        let last = idx
            .saturating_add(self.config.lookahead_lines)
            .min(lines.len().saturating_sub(1));
        for next in idx + 1..=last {
            let text = &lines[next].text;
            if self.config.lookahead_stops_at_name
                && self
                    .resolver
                    .resolve_prefix(text, self.config.max_name_tokens)
                    .is_some()
            {
                return None;
            }
            if let Some(picked) = pick_value(text, definition, None) {
                return Some((next, picked));
            }
        }
        None
    }

    /// Column titles in the first rows whose values sit further down the
    /// same whitespace column. Only exact titles count, and only keys that
    /// are still missing get filled.
    fn scan_header_columns(&self, lines: &[PreparedLine], accumulator: &mut ResultAccumulator) {
        let tokenized: Vec<Vec<&str>> = lines
            .iter()
            .map(|line| line.text.split_whitespace().collect())
            .collect();

        for col in 0..HEADER_COLUMNS {
            for row in 0..HEADER_ROWS.min(tokenized.len()) {
                let Some(head) = tokenized[row].get(col) else {
                    continue;
                };
                let Some(resolution) = self.resolver.resolve(head).filter(|r| r.is_exact()) else {
                    continue;
                };
                if accumulator.contains(resolution.key) {
                    continue;
                }

                let below = (row + 1..tokenized.len()).find_map(|r| {
                    let value = tokenized[r].get(col).and_then(|t| numeric::leading_number(t))?;
                    Some((r, value))
                });
                if let Some((value_row, value)) = below {
                    let matched = LineMatch {
                        key: resolution.key,
                        start: 0,
                        end: 0,
                        strategy: MatchStrategy::HeaderColumn,
                        confidence: Confidence::Low,
                        leads_line: false,
                    };
                    let picked = PickedValue {
                        value,
                        start: 0,
                        unit: None,
                    };
                    let text = &lines[value_row].text;
                    self.record_numeric(value_row, text, "", matched, picked, accumulator);
                }
            }
        }
    }

    /// `range_text` is where a printed reference range is looked for.
    fn record_numeric(
        &self,
        idx: usize,
        source_line: &str,
        range_text: &str,
        matched: LineMatch<'a>,
        picked: PickedValue,
        accumulator: &mut ResultAccumulator,
    ) {
        let conversion = self
            .converter
            .convert(matched.key, picked.value, picked.unit.as_deref());
        let mut result = interpret(
            self.catalog,
            matched.key,
            Measurement::Numeric(conversion.value),
            self.sex,
        );
        result.raw_value = Some(picked.value);
        result.conversion_note = conversion.note;
        result.reported_range = numeric::reported_range(range_text);
        result.provenance = Some(provenance(idx, source_line, matched, picked.unit));

        debug!(
            key = matched.key,
            line = idx,
            value = picked.value,
            strategy = ?matched.strategy,
            flag = %result.flag,
            "lab value extracted"
        );
        accumulator.record(result);
    }
}

fn name_confidence(resolution: Resolution<'_>) -> Confidence {
    if resolution.is_exact() {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

fn provenance(idx: usize, text: &str, matched: LineMatch<'_>, raw_unit: Option<String>) -> Provenance {
    Provenance {
        line_index: idx,
        source_line: text.to_string(),
        strategy: matched.strategy,
        confidence: matched.confidence,
        raw_unit,
    }
}

/// Per-run result map; one entry per key.
struct ResultAccumulator {
    policy: OverwritePolicy,
    results: BTreeMap<String, InterpretedResult>,
    conflicts: Vec<MatchConflict>,
    unrecognized: usize,
}

impl ResultAccumulator {
    fn new(policy: OverwritePolicy) -> Self {
        Self {
            policy,
            results: BTreeMap::new(),
            conflicts: Vec::new(),
            unrecognized: 0,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.results.contains_key(key)
    }

    fn record(&mut self, result: InterpretedResult) {
        match self.results.entry(result.key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(result);
            }
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                let replace = match self.policy {
                    OverwritePolicy::LastMatchWins => true,
                    OverwritePolicy::KeepHighestConfidence => {
                        confidence_of(&result) >= confidence_of(existing)
                    }
                };

                if !same_reading(existing, &result) {
                    let (kept, discarded) = if replace {
                        (&result, &*existing)
                    } else {
                        (&*existing, &result)
                    };
                    warn!(
                        key = %result.key,
                        kept = ?kept.converted_value,
                        discarded = ?discarded.converted_value,
                        "lab matched on several lines with different values"
                    );
                    self.conflicts.push(MatchConflict {
                        key: result.key.clone(),
                        kept_line: line_of(kept),
                        kept_value: kept.converted_value,
                        discarded_line: line_of(discarded),
                        discarded_value: discarded.converted_value,
                    });
                }

                if replace {
                    *existing = result;
                }
            }
        }
    }

    fn finalize(self, sex: Sex) -> AnalysisReport {
        AnalysisReport::new(sex, self.results, self.conflicts, self.unrecognized)
    }
}

fn confidence_of(result: &InterpretedResult) -> Confidence {
    result
        .provenance
        .as_ref()
        .map_or(Confidence::Low, |p| p.confidence)
}

fn line_of(result: &InterpretedResult) -> usize {
    result.provenance.as_ref().map_or(0, |p| p.line_index)
}

fn same_reading(a: &InterpretedResult, b: &InterpretedResult) -> bool {
    a.converted_value == b.converted_value && a.qualitative == b.qualitative
}
