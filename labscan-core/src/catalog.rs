//! Reference catalog of lab tests and the synonym index derived from it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{LabError, Sex};

/// Closed interval considered normal for a lab value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRange {
    pub low: f64,
    pub high: f64,
}

impl ReferenceRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Reference ranges per sex category. `other` is the fallback for the
/// sex-specific slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReferenceRanges {
    #[serde(default)]
    pub male: Option<ReferenceRange>,
    #[serde(default)]
    pub female: Option<ReferenceRange>,
    #[serde(default)]
    pub other: Option<ReferenceRange>,
}

impl ReferenceRanges {
    /// Same bounds for every sex category.
    pub fn uniform(low: f64, high: f64) -> Self {
        let range = Some(ReferenceRange::new(low, high));
        Self {
            male: range,
            female: range,
            other: range,
        }
    }

    pub fn by_sex(male: (f64, f64), female: (f64, f64), other: (f64, f64)) -> Self {
        Self {
            male: Some(ReferenceRange::new(male.0, male.1)),
            female: Some(ReferenceRange::new(female.0, female.1)),
            other: Some(ReferenceRange::new(other.0, other.1)),
        }
    }

    pub fn for_sex(&self, sex: Sex) -> Option<ReferenceRange> {
        let specific = match sex {
            Sex::Male => self.male,
            Sex::Female => self.female,
            Sex::Other => None,
        };
        specific.or(self.other)
    }

    pub fn is_empty(&self) -> bool {
        self.male.is_none() && self.female.is_none() && self.other.is_none()
    }

    fn iter(&self) -> impl Iterator<Item = &ReferenceRange> {
        [&self.male, &self.female, &self.other]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// One lab test known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabDefinition {
    pub key: String,
    pub display_name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub canonical_unit: String,
    #[serde(default)]
    pub reference_ranges: ReferenceRanges,
}

impl LabDefinition {
    /// Tests reported as categories (positive/negative) rather than numbers.
    pub fn is_qualitative(&self) -> bool {
        self.canonical_unit.is_empty() && self.reference_ranges.is_empty()
    }
}

/// Lowercase a phrase and keep only `[a-z0-9 ]`, with single spaces.
///
/// Both the index and every lookup go through this so that punctuation and
/// casing never decide a match.
pub fn normalize_phrase(phrase: &str) -> String {
    let lowered = phrase.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flattened phrase → key lookup built from a catalog.
///
/// Entries keep catalog order (display name first, then synonyms) so that
/// fuzzy ties resolve deterministically.
#[derive(Debug, Clone, Default)]
pub struct SynonymIndex {
    entries: Vec<(String, String)>,
    lookup: HashMap<String, usize>,
}

impl SynonymIndex {
    fn build(definitions: &[LabDefinition]) -> Self {
        let mut index = Self::default();
        for definition in definitions {
            let phrases = std::iter::once(&definition.display_name)
                .chain(std::iter::once(&definition.key))
                .chain(definition.synonyms.iter());
            for phrase in phrases {
                let normalized = normalize_phrase(phrase);
                if normalized.is_empty() || index.lookup.contains_key(&normalized) {
                    continue;
                }
                index.lookup.insert(normalized.clone(), index.entries.len());
                index.entries.push((normalized, definition.key.clone()));
            }
        }
        index
    }

    /// Exact lookup of an already normalized phrase.
    pub fn get(&self, phrase: &str) -> Option<&str> {
        self.lookup
            .get(phrase)
            .map(|&idx| self.entries[idx].1.as_str())
    }

    /// `(phrase, key)` pairs in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(phrase, key)| (phrase.as_str(), key.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable set of lab definitions plus the derived synonym index.
///
/// Built once and shared read-only between analyses.
#[derive(Debug, Clone)]
pub struct LabCatalog {
    definitions: Vec<LabDefinition>,
    by_key: HashMap<String, usize>,
    index: SynonymIndex,
}

impl LabCatalog {
    /// Validate and index a list of definitions.
    pub fn new(definitions: Vec<LabDefinition>) -> Result<Self, LabError> {
        validate(&definitions)?;
        Ok(Self::assemble(definitions))
    }

    /// Parse a JSON array of definitions.
    pub fn from_json_str(json: &str) -> Result<Self, LabError> {
        let definitions: Vec<LabDefinition> =
            serde_json::from_str(json).map_err(|err| LabError::Parse(err.to_string()))?;
        Self::new(definitions)
    }

    /// Parse definitions from an already decoded JSON value.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, LabError> {
        let definitions: Vec<LabDefinition> =
            serde_json::from_value(value).map_err(|err| LabError::Parse(err.to_string()))?;
        Self::new(definitions)
    }

    /// Catalog of common hematology, chemistry and thyroid tests.
    pub fn builtin() -> Self {
        Self::assemble(builtin_definitions())
    }

    fn assemble(definitions: Vec<LabDefinition>) -> Self {
        let by_key = definitions
            .iter()
            .enumerate()
            .map(|(idx, definition)| (definition.key.clone(), idx))
            .collect();
        let index = SynonymIndex::build(&definitions);
        Self {
            definitions,
            by_key,
            index,
        }
    }

    pub fn get(&self, key: &str) -> Option<&LabDefinition> {
        self.by_key.get(key).map(|&idx| &self.definitions[idx])
    }

    pub fn definitions(&self) -> &[LabDefinition] {
        &self.definitions
    }

    pub fn synonyms(&self) -> &SynonymIndex {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for LabCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn validate(definitions: &[LabDefinition]) -> Result<(), LabError> {
    let mut keys: HashSet<&str> = HashSet::new();
    let mut owners: HashMap<String, &str> = HashMap::new();

    for definition in definitions {
        if definition.key.trim().is_empty() {
            return Err(LabError::Catalog("lab definition with empty key".into()));
        }
        if normalize_phrase(&definition.display_name).is_empty() {
            return Err(LabError::Catalog(format!(
                "{} has no usable display name",
                definition.key
            )));
        }
        if !keys.insert(&definition.key) {
            return Err(LabError::Catalog(format!(
                "duplicate key {}",
                definition.key
            )));
        }

        for range in definition.reference_ranges.iter() {
            if !range.low.is_finite() || !range.high.is_finite() || range.low > range.high {
                return Err(LabError::Catalog(format!(
                    "{} has invalid range {}-{}",
                    definition.key, range.low, range.high
                )));
            }
        }

        let phrases = std::iter::once(&definition.display_name)
            .chain(std::iter::once(&definition.key))
            .chain(definition.synonyms.iter());
        for phrase in phrases {
            let normalized = normalize_phrase(phrase);
            if normalized.is_empty() {
                continue;
            }
            match owners.get(&normalized) {
                Some(owner) if *owner != definition.key => {
                    return Err(LabError::Catalog(format!(
                        "synonym \"{normalized}\" maps to both {owner} and {}",
                        definition.key
                    )));
                }
                _ => {
                    owners.insert(normalized, &definition.key);
                }
            }
        }
    }

    Ok(())
}

fn lab(
    key: &str,
    display_name: &str,
    synonyms: &[&str],
    canonical_unit: &str,
    reference_ranges: ReferenceRanges,
) -> LabDefinition {
    LabDefinition {
        key: key.to_string(),
        display_name: display_name.to_string(),
        synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        canonical_unit: canonical_unit.to_string(),
        reference_ranges,
    }
}

fn builtin_definitions() -> Vec<LabDefinition> {
    vec![
        lab(
            "WBC",
            "WBC",
            &["wbc", "white blood cell", "white blood cells", "leukocyte"],
            "10^3/µL",
            ReferenceRanges::uniform(4.0, 11.0),
        ),
        lab(
            "HGB",
            "Hemoglobin",
            &["hgb", "hemoglobin", "hb", "haemoglobin"],
            "g/dL",
            ReferenceRanges::by_sex((13.5, 17.5), (12.0, 15.5), (12.0, 17.5)),
        ),
        lab(
            "HCT",
            "Hematocrit",
            &["hct", "hematocrit", "haematocrit"],
            "%",
            ReferenceRanges::by_sex((41.0, 53.0), (36.0, 46.0), (36.0, 53.0)),
        ),
        lab(
            "RBC",
            "RBC",
            &["rbc", "red blood cell", "red blood cells", "erythrocyte"],
            "10^6/µL",
            ReferenceRanges::by_sex((4.5, 5.9), (4.1, 5.1), (4.1, 5.9)),
        ),
        lab(
            "PLT",
            "Platelets",
            &["plt", "platelet", "platelets"],
            "10^3/µL",
            ReferenceRanges::uniform(150.0, 450.0),
        ),
        lab(
            "ALT",
            "Alanine Aminotransferase",
            &["alt", "alanine aminotransferase", "sgpt"],
            "U/L",
            ReferenceRanges::uniform(7.0, 56.0),
        ),
        lab(
            "AST",
            "Aspartate Aminotransferase",
            &["ast", "aspartate aminotransferase", "sgot"],
            "U/L",
            ReferenceRanges::uniform(10.0, 40.0),
        ),
        lab(
            "ALP",
            "Alkaline Phosphatase",
            &["alp", "alkaline phosphatase"],
            "U/L",
            ReferenceRanges::by_sex((45.0, 115.0), (30.0, 100.0), (30.0, 115.0)),
        ),
        lab(
            "GLU",
            "Fasting Glucose",
            &["glu", "glucose", "fasting glucose", "blood sugar"],
            "mg/dL",
            ReferenceRanges::uniform(70.0, 99.0),
        ),
        lab(
            "CREAT",
            "Creatinine",
            &["creat", "creatinine", "serum creatinine"],
            "mg/dL",
            ReferenceRanges::by_sex((0.7, 1.3), (0.6, 1.1), (0.6, 1.3)),
        ),
        lab(
            "TSH",
            "Thyroid Stimulating Hormone",
            &["tsh", "thyroid stimulating hormone"],
            "µIU/mL",
            ReferenceRanges::uniform(0.4, 4.0),
        ),
        lab(
            "FT4",
            "Free T4",
            &["ft4", "free t4", "thyroxine"],
            "ng/dL",
            ReferenceRanges::uniform(0.8, 1.8),
        ),
        lab(
            "FT3",
            "Free T3",
            &["ft3", "free t3", "triiodothyronine"],
            "pg/mL",
            ReferenceRanges::uniform(2.3, 4.2),
        ),
        lab(
            "VITD",
            "Vitamin D",
            &[
                "vitd",
                "vitamin d",
                "vit d",
                "25 oh vitamin d",
                "25 hydroxy vitamin d",
            ],
            "ng/mL",
            ReferenceRanges::uniform(30.0, 100.0),
        ),
        lab(
            "CHOL",
            "Total Cholesterol",
            &["chol", "cholesterol", "total cholesterol"],
            "mg/dL",
            ReferenceRanges::uniform(0.0, 200.0),
        ),
        lab(
            "HBA1C",
            "HbA1c",
            &[
                "hba1c",
                "a1c",
                "hemoglobin a1c",
                "glycated hemoglobin",
                "glycosylated hemoglobin",
            ],
            "%",
            ReferenceRanges::uniform(4.0, 5.6),
        ),
        lab(
            "HBSAG",
            "Hepatitis B Surface Antigen",
            &["hbsag", "hbs ag", "hbs antigen"],
            "",
            ReferenceRanges::default(),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_passes_validation() {
        let catalog = LabCatalog::new(builtin_definitions()).expect("builtin must validate");
        assert_eq!(catalog.len(), LabCatalog::builtin().len());
    }

    #[test]
    fn every_key_is_indexed_under_its_own_name() {
        let catalog = LabCatalog::builtin();
        for definition in catalog.definitions() {
            let name = normalize_phrase(&definition.display_name);
            assert_eq!(catalog.synonyms().get(&name), Some(definition.key.as_str()));
        }
    }

    #[test]
    fn sex_specific_range_falls_back_to_other() {
        let ranges = ReferenceRanges {
            male: None,
            female: Some(ReferenceRange::new(12.0, 15.5)),
            other: Some(ReferenceRange::new(12.0, 17.5)),
        };
        assert_eq!(ranges.for_sex(Sex::Female).map(|r| r.high), Some(15.5));
        assert_eq!(ranges.for_sex(Sex::Male).map(|r| r.high), Some(17.5));
        assert_eq!(ranges.for_sex(Sex::Other).map(|r| r.high), Some(17.5));
    }

    #[test]
    fn rejects_duplicate_keys_and_inverted_ranges() {
        let dup = vec![
            lab("A", "Alpha", &[], "", ReferenceRanges::default()),
            lab("A", "Again", &[], "", ReferenceRanges::default()),
        ];
        assert!(matches!(LabCatalog::new(dup), Err(LabError::Catalog(_))));

        let inverted = vec![lab("B", "Beta", &[], "U/L", ReferenceRanges::uniform(5.0, 1.0))];
        assert!(matches!(LabCatalog::new(inverted), Err(LabError::Catalog(_))));
    }

    #[test]
    fn rejects_synonym_shared_between_keys() {
        let defs = vec![
            lab("A", "Alpha", &["shared"], "", ReferenceRanges::default()),
            lab("B", "Beta", &["Shared"], "", ReferenceRanges::default()),
        ];
        assert!(matches!(LabCatalog::new(defs), Err(LabError::Catalog(_))));
    }

    #[test]
    fn loads_catalog_from_json() {
        let json = r#"[
            {
                "key": "NA",
                "display_name": "Sodium",
                "synonyms": ["na", "serum sodium"],
                "canonical_unit": "mmol/L",
                "reference_ranges": { "other": { "low": 135.0, "high": 145.0 } }
            }
        ]"#;
        let catalog = LabCatalog::from_json_str(json).expect("valid catalog");
        let sodium = catalog.get("NA").expect("sodium present");
        assert_eq!(sodium.reference_ranges.for_sex(Sex::Male).map(|r| r.low), Some(135.0));
        assert_eq!(catalog.synonyms().get("serum sodium"), Some("NA"));
    }

    #[test]
    fn normalize_phrase_strips_punctuation_and_case() {
        assert_eq!(normalize_phrase("  Hemoglobin (HGB): "), "hemoglobin hgb");
        assert_eq!(normalize_phrase("µIU/mL"), "iuml");
        assert_eq!(normalize_phrase("--"), "");
    }
}
