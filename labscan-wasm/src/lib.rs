//! Framework-neutral WASM bridge for analyzing report text from JavaScript.

use labscan_core::{AnalysisOptions, LabCatalog, LabError, OverwritePolicy, Sex};
use serde::Deserialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

/// Options as JavaScript callers send them; every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsAnalysisOptions {
    #[serde(default)]
    sex: Option<String>,
    #[serde(default)]
    split_on_semicolon: Option<bool>,
    #[serde(default)]
    column_mode: Option<bool>,
    #[serde(default)]
    header_scan: Option<bool>,
    #[serde(default)]
    lookahead_lines: Option<usize>,
    #[serde(default)]
    stop_at_next_name: Option<bool>,
    #[serde(default)]
    keep_highest_confidence: Option<bool>,
    /// Replaces the builtin catalog with this array of definitions.
    #[serde(default)]
    catalog: Option<serde_json::Value>,
}

impl JsAnalysisOptions {
    fn analysis_options(&self) -> AnalysisOptions {
        let sex = self
            .sex
            .as_deref()
            .map(Sex::parse_lenient)
            .unwrap_or_default();
        let mut options = AnalysisOptions::for_sex(sex);
        let config = &mut options.config;
        if let Some(split) = self.split_on_semicolon {
            config.split_on_semicolon = split;
        }
        if let Some(column_mode) = self.column_mode {
            config.column_mode = column_mode;
        }
        if let Some(header_scan) = self.header_scan {
            config.header_scan = header_scan;
        }
        if let Some(lines) = self.lookahead_lines {
            config.lookahead_lines = lines;
        }
        if let Some(stop) = self.stop_at_next_name {
            config.lookahead_stops_at_name = stop;
        }
        if self.keep_highest_confidence == Some(true) {
            config.overwrite = OverwritePolicy::KeepHighestConfidence;
        }
        options
    }
}

#[wasm_bindgen(js_name = analyzeText)]
pub fn analyze_text(text: &str, options: Option<JsValue>) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let js_options = match options {
        Some(value) if !value.is_undefined() && !value.is_null() => {
            from_value::<JsAnalysisOptions>(value)
                .map_err(|err| JsValue::from_str(&format!("Invalid options: {err}")))?
        }
        _ => JsAnalysisOptions::default(),
    };

    let report = run(text, js_options).map_err(|err| JsValue::from_str(&format_lab_error(err)))?;

    to_value(&report).map_err(|err| JsValue::from_str(&format!("Could not serialize report: {err}")))
}

fn run(text: &str, js_options: JsAnalysisOptions) -> Result<labscan_core::AnalysisReport, LabError> {
    let options = js_options.analysis_options();
    let catalog = match js_options.catalog {
        Some(definitions) => LabCatalog::from_json_value(definitions)?,
        None => LabCatalog::builtin(),
    };
    labscan_extract::analyze(&catalog, text, &options)
}

fn format_lab_error(err: LabError) -> String {
    format!("Lab analysis error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_keep_defaults() {
        let options: JsAnalysisOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.analysis_options(), AnalysisOptions::default());
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let options: JsAnalysisOptions = serde_json::from_str(
            r#"{"sex":"F","splitOnSemicolon":true,"lookaheadLines":1,"stopAtNextName":false,"keepHighestConfidence":true}"#,
        )
        .unwrap();
        let options = options.analysis_options();
        assert_eq!(options.sex, Sex::Female);
        assert!(options.config.split_on_semicolon);
        assert_eq!(options.config.lookahead_lines, 1);
        assert!(!options.config.lookahead_stops_at_name);
        assert_eq!(options.config.overwrite, OverwritePolicy::KeepHighestConfidence);
        assert!(options.config.column_mode);
    }

    #[test]
    fn runs_with_inline_catalog() {
        let options: JsAnalysisOptions = serde_json::from_str(
            r#"{"catalog":[{"key":"K","display_name":"Potassium","canonical_unit":"mmol/L",
                "reference_ranges":{"other":{"low":3.5,"high":5.1}}}]}"#,
        )
        .unwrap();
        let report = run("Potassium 5.9 mmol/L", options).unwrap();
        assert_eq!(report.get("K").and_then(|r| r.raw_value), Some(5.9));
    }

    #[test]
    fn errors_are_prefixed() {
        assert_eq!(
            format_lab_error(LabError::EmptyInput),
            "Lab analysis error: no usable text to analyze"
        );
        let err = run("   ", JsAnalysisOptions::default()).unwrap_err();
        assert!(matches!(err, LabError::EmptyInput));
    }
}
