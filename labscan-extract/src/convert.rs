//! Rescaling values reported in alternative units into the catalog unit.

use serde::{Deserialize, Serialize};

use labscan_core::LabError;

/// Arithmetic applied by one conversion rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Multiply(f64),
    Divide(f64),
}

impl Scale {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            Scale::Multiply(factor) => value * factor,
            Scale::Divide(divisor) => value / divisor,
        }
    }
}

/// One (lab, source unit) pair and how to reach the canonical unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionRule {
    pub key: String,
    /// Matched case-insensitively as a substring of the detected unit.
    pub unit_fragment: String,
    pub scale: Scale,
    pub target_unit: String,
}

impl ConversionRule {
    pub fn new(key: &str, unit_fragment: &str, scale: Scale, target_unit: &str) -> Self {
        Self {
            key: key.to_string(),
            unit_fragment: unit_fragment.to_string(),
            scale,
            target_unit: target_unit.to_string(),
        }
    }

    fn matches(&self, key: &str, unit: &str) -> bool {
        self.key == key && unit.to_lowercase().contains(&self.unit_fragment.to_lowercase())
    }
}

/// Converted value and the note describing the conversion, if one applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub value: f64,
    pub note: Option<String>,
}

/// Table of per-lab unit conversions; the first matching rule applies.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitConverter {
    rules: Vec<ConversionRule>,
}

impl UnitConverter {
    pub fn new(rules: Vec<ConversionRule>) -> Self {
        Self { rules }
    }

    /// Parse a JSON array of rules.
    pub fn from_json_str(json: &str) -> Result<Self, LabError> {
        let rules: Vec<ConversionRule> =
            serde_json::from_str(json).map_err(|err| LabError::Parse(err.to_string()))?;
        Ok(Self::new(rules))
    }

    /// Append a rule; earlier rules keep precedence.
    pub fn with_rule(mut self, rule: ConversionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ConversionRule] {
        &self.rules
    }

    pub fn convert(&self, key: &str, value: f64, detected_unit: Option<&str>) -> Conversion {
        let unchanged = Conversion { value, note: None };
        let Some(unit) = detected_unit.map(str::trim).filter(|u| !u.is_empty()) else {
            return unchanged;
        };
        let Some(rule) = self.rules.iter().find(|rule| rule.matches(key, unit)) else {
            return unchanged;
        };

        let converted = rule.scale.apply(value);
        tracing::debug!(key, value, unit, converted, "unit conversion applied");
        Conversion {
            value: converted,
            note: Some(format!(
                "{value} {unit} → {converted:.3} {}",
                rule.target_unit
            )),
        }
    }
}

impl Default for UnitConverter {
    fn default() -> Self {
        Self::new(vec![
            ConversionRule::new("VITD", "nmol", Scale::Divide(2.496), "ng/mL"),
            ConversionRule::new("CREAT", "µmol", Scale::Divide(88.4), "mg/dL"),
            ConversionRule::new("CREAT", "umol", Scale::Divide(88.4), "mg/dL"),
            ConversionRule::new("GLU", "mmol", Scale::Multiply(18.0), "mg/dL"),
            ConversionRule::new("CHOL", "mmol", Scale::Multiply(38.67), "mg/dL"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creatinine_micromolar_to_mg_per_dl() {
        let converter = UnitConverter::default();
        let conversion = converter.convert("CREAT", 88.4, Some("µmol/L"));
        assert!((conversion.value - 1.0).abs() < 1e-9);
        assert_eq!(
            conversion.note.as_deref(),
            Some("88.4 µmol/L → 1.000 mg/dL")
        );

        let back = conversion.value * 88.4;
        assert!((back - 88.4).abs() < 1e-9);
    }

    #[test]
    fn glucose_and_vitamin_d_rules() {
        let converter = UnitConverter::default();
        assert!((converter.convert("GLU", 5.5, Some("MMOL/L")).value - 99.0).abs() < 1e-9);
        let vitd = converter.convert("VITD", 74.88, Some("nmol/L"));
        assert!((vitd.value - 30.0).abs() < 1e-9);
        assert_eq!(vitd.note.as_deref(), Some("74.88 nmol/L → 30.000 ng/mL"));
    }

    #[test]
    fn missing_unit_or_rule_leaves_value_untouched() {
        let converter = UnitConverter::default();
        assert_eq!(
            converter.convert("CREAT", 1.1, None),
            Conversion { value: 1.1, note: None }
        );
        assert_eq!(
            converter.convert("CREAT", 1.1, Some("mg/dL")),
            Conversion { value: 1.1, note: None }
        );
        assert_eq!(
            converter.convert("HGB", 7.0, Some("mmol/L")),
            Conversion { value: 7.0, note: None }
        );
    }

    #[test]
    fn table_is_extensible() {
        let converter = UnitConverter::default().with_rule(ConversionRule::new(
            "HGB",
            "g/l",
            Scale::Divide(10.0),
            "g/dL",
        ));
        let conversion = converter.convert("HGB", 135.0, Some("g/L"));
        assert!((conversion.value - 13.5).abs() < 1e-9);
    }

    #[test]
    fn rules_load_from_json() {
        let json = r#"[{"key":"UREA","unit_fragment":"mmol","scale":{"multiply":2.8},"target_unit":"mg/dL"}]"#;
        let converter = UnitConverter::from_json_str(json).expect("valid rules");
        assert_eq!(converter.rules().len(), 1);
        assert!((converter.convert("UREA", 5.0, Some("mmol/L")).value - 14.0).abs() < 1e-9);
    }
}
