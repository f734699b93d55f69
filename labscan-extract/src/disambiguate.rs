//! Choosing the measured value among the numbers of a line.

use std::ops::Range;

use labscan_core::LabDefinition;

use crate::numeric::{
    bracket_spans, extract_numbers, find_units, is_noise, unit_following, NumericToken, UnitToken,
};

/// The number taken as a line's result, with the unit read next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PickedValue {
    pub value: f64,
    pub start: usize,
    pub unit: Option<String>,
}

/// Pick the result value of `line`, or `None` when the line has no number.
///
/// Digits inside `name` (the byte span of the lab name, as in `FT4` or
/// `25 OH Vitamin D`) are never candidates. Numbers inside brackets are
/// treated as reference ranges. With several numbers left outside, the one
/// nearest to the unit wins, or the first one when the line carries no unit.
pub fn pick_value(
    line: &str,
    definition: Option<&LabDefinition>,
    name: Option<Range<usize>>,
) -> Option<PickedValue> {
    let units = find_units(line);
    let all: Vec<NumericToken> = extract_numbers(line)
        .into_iter()
        .filter(|t| !name.as_ref().is_some_and(|span| span.contains(&t.start)))
        .collect();
    let meaningful: Vec<&NumericToken> = all.iter().filter(|t| !is_noise(t, &units)).collect();
    // Only a bare multiplier unit such as `103/uL` can stand in for the value.
    let candidates: Vec<&NumericToken> = if meaningful.is_empty() {
        all.iter()
            .filter(|t| !t.glued && units.iter().any(|u| u.span().contains(&t.start)))
            .collect()
    } else {
        meaningful
    };

    let chosen = choose(line, &candidates, &units, definition)?;
    let unit = unit_following(line, chosen, &units)
        .or_else(|| anchor_unit(line, &units, definition))
        .map(|unit| unit.text.clone());

    Some(PickedValue {
        value: chosen.value,
        start: chosen.start,
        unit,
    })
}

fn choose<'t>(
    line: &str,
    candidates: &[&'t NumericToken],
    units: &[UnitToken],
    definition: Option<&LabDefinition>,
) -> Option<&'t NumericToken> {
    match candidates {
        [] => return None,
        [only] => return Some(*only),
        _ => {}
    }

    let spans = bracket_spans(line);
    let outside: Vec<&NumericToken> = candidates
        .iter()
        .copied()
        .filter(|t| !spans.iter().any(|span| span.contains(&t.start)))
        .collect();

    match outside.as_slice() {
        [] => Some(candidates[0]),
        [only] => Some(*only),
        [first, ..] => match anchor_unit(line, units, definition) {
            Some(unit) => outside
                .iter()
                .copied()
                .min_by_key(|t| t.start.abs_diff(unit.start)),
            None => Some(*first),
        },
    }
}

/// Unit used as the distance anchor: the lab's canonical unit when the line
/// spells it, else the first unit outside brackets, else any unit.
fn anchor_unit<'u>(
    line: &str,
    units: &'u [UnitToken],
    definition: Option<&LabDefinition>,
) -> Option<&'u UnitToken> {
    if let Some(canonical) = definition
        .map(|d| d.canonical_unit.as_str())
        .filter(|u| !u.is_empty())
    {
        if let Some(unit) = units.iter().find(|u| u.text.eq_ignore_ascii_case(canonical)) {
            return Some(unit);
        }
    }

    let spans = bracket_spans(line);
    units
        .iter()
        .find(|u| !spans.iter().any(|span| span.contains(&u.start)))
        .or_else(|| units.first())
}
