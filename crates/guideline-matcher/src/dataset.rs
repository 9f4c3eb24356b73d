//! Patient datasets.
//!
//! A [`PatientDataset`] is a per-call value: four sections of observed data
//! (vital signs, lab results, clinical findings, treatments), each a list of
//! [`PatientDatum`]s. Derived values are never stored here; the engine
//! computes them for each evaluation.
//!
//! # JSON layout
//!
//! ```rust
//! use guideline_matcher::{DatumValue, PatientDataset};
//!
//! let dataset = PatientDataset::from_json(r#"{
//!     "vital_signs": [
//!         {"parameter": "systolic_bp", "value": 85, "unit": "mmHg",
//!          "timestamp": "2024-03-01T10:15:00Z", "flag": "low"},
//!         {"parameter": "heart_rate", "value": "115", "unit": "bpm"}
//!     ],
//!     "lab_results": [
//!         {"parameter": "lactate", "value": {"nested": true}}
//!     ],
//!     "clinical_findings": [
//!         {"parameter": "blood_culture", "value": "Positive", "code": "5758002"}
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(dataset.vital_signs.len(), 2);
//! assert_eq!(dataset.vital_signs[1].value, DatumValue::Text("115".into()));
//! // The lactate entry has an unsupported value shape and is skipped.
//! assert!(dataset.lab_results.is_empty());
//! assert_eq!(dataset.skipped.len(), 1);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{MatcherError, MatcherResult};

/// Section of a dataset a datum belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Heart rate, blood pressure, temperature and similar.
    VitalSigns,
    /// Laboratory results, including culture results.
    LabResults,
    /// Examination findings and diagnoses.
    ClinicalFindings,
    /// Therapies given or in progress.
    Treatments,
    /// Values computed by the engine during an evaluation.
    Derived,
}

impl Section {
    /// Sections a caller can supply, in lookup order.
    pub const OBSERVED: [Section; 4] = [
        Section::VitalSigns,
        Section::LabResults,
        Section::ClinicalFindings,
        Section::Treatments,
    ];

    /// Returns the JSON key of the section.
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::VitalSigns => "vital_signs",
            Section::LabResults => "lab_results",
            Section::ClinicalFindings => "clinical_findings",
            Section::Treatments => "treatments",
            Section::Derived => "derived",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Precomputed abnormality classification of an observed datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    /// Below the reference range (`L`).
    #[serde(alias = "L")]
    Low,
    /// Within the reference range (`N`).
    #[serde(alias = "N")]
    Normal,
    /// Above the reference range (`H`).
    #[serde(alias = "H")]
    High,
}

/// An observed value: number, boolean or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatumValue {
    /// Yes/no observation (`true`, `false`).
    Bool(bool),
    /// Numeric measurement.
    Number(f64),
    /// Free text, such as `positive` or `"38.5"`.
    Text(String),
}

impl DatumValue {
    /// Returns the numeric value, coercing numeric text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatumValue::Number(n) => Some(*n),
            DatumValue::Text(s) => s.trim().parse().ok(),
            DatumValue::Bool(_) => None,
        }
    }

    /// Returns the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DatumValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// False for NaN and infinite numbers, numeric text included.
    pub fn is_finite(&self) -> bool {
        self.as_f64().map_or(true, f64::is_finite)
    }
}

impl From<f64> for DatumValue {
    fn from(value: f64) -> Self {
        DatumValue::Number(value)
    }
}

impl From<bool> for DatumValue {
    fn from(value: bool) -> Self {
        DatumValue::Bool(value)
    }
}

impl From<&str> for DatumValue {
    fn from(value: &str) -> Self {
        DatumValue::Text(value.to_string())
    }
}

impl From<String> for DatumValue {
    fn from(value: String) -> Self {
        DatumValue::Text(value)
    }
}

impl fmt::Display for DatumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatumValue::Bool(b) => write!(f, "{b}"),
            DatumValue::Number(n) => write!(f, "{n}"),
            DatumValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One observation about the patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDatum {
    /// Parameter name; canonicalized through the vocabulary at lookup time.
    pub parameter: String,
    /// Observed value.
    pub value: DatumValue,
    /// Unit as recorded; informational only.
    #[serde(default)]
    pub unit: String,
    /// Observation time. Untimed data ranks oldest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Abnormality flag from the source system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<Flag>,
    /// LOINC, SNOMED CT or ICD-10 code of the observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl PatientDatum {
    /// Creates an untimed, uncoded datum.
    pub fn new(parameter: impl Into<String>, value: impl Into<DatumValue>) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.into(),
            unit: String::new(),
            timestamp: None,
            flag: None,
            code: None,
        }
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the observation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the abnormality flag.
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Sets the code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Describes why this datum cannot be evaluated, if it cannot.
    pub(crate) fn defect(&self) -> Option<&'static str> {
        if self.parameter.trim().is_empty() {
            Some("parameter is empty")
        } else if !self.value.is_finite() {
            Some("value is not a finite number")
        } else {
            None
        }
    }
}

/// A datum left out of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDatum {
    /// Section the datum was supplied in.
    pub section: Section,
    /// Position within the section as supplied.
    pub index: usize,
    /// Parameter name, when one could be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    /// Why the datum was skipped.
    pub reason: String,
}

impl fmt::Display for SkippedDatum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.section, self.index)?;
        if let Some(parameter) = &self.parameter {
            write!(f, " ({parameter})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Structured clinical data for one patient.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatientDataset {
    #[serde(default)]
    pub vital_signs: Vec<PatientDatum>,
    #[serde(default)]
    pub lab_results: Vec<PatientDatum>,
    #[serde(default)]
    pub clinical_findings: Vec<PatientDatum>,
    #[serde(default)]
    pub treatments: Vec<PatientDatum>,
    /// Entries dropped by [`PatientDataset::from_json`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedDatum>,
}

impl PatientDataset {
    /// Creates an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vital sign.
    pub fn with_vital_sign(mut self, datum: PatientDatum) -> Self {
        self.vital_signs.push(datum);
        self
    }

    /// Adds a lab result.
    pub fn with_lab_result(mut self, datum: PatientDatum) -> Self {
        self.lab_results.push(datum);
        self
    }

    /// Adds a clinical finding.
    pub fn with_clinical_finding(mut self, datum: PatientDatum) -> Self {
        self.clinical_findings.push(datum);
        self
    }

    /// Adds a treatment.
    pub fn with_treatment(mut self, datum: PatientDatum) -> Self {
        self.treatments.push(datum);
        self
    }

    /// Data of one section. Derived values are not stored, so
    /// [`Section::Derived`] is always empty.
    pub fn section(&self, section: Section) -> &[PatientDatum] {
        match section {
            Section::VitalSigns => &self.vital_signs,
            Section::LabResults => &self.lab_results,
            Section::ClinicalFindings => &self.clinical_findings,
            Section::Treatments => &self.treatments,
            Section::Derived => &[],
        }
    }

    fn section_mut(&mut self, section: Section) -> Option<&mut Vec<PatientDatum>> {
        match section {
            Section::VitalSigns => Some(&mut self.vital_signs),
            Section::LabResults => Some(&mut self.lab_results),
            Section::ClinicalFindings => Some(&mut self.clinical_findings),
            Section::Treatments => Some(&mut self.treatments),
            Section::Derived => None,
        }
    }

    /// Iterates over all data with their section and position.
    pub fn iter(&self) -> impl Iterator<Item = (Section, usize, &PatientDatum)> {
        Section::OBSERVED.into_iter().flat_map(move |section| {
            self.section(section)
                .iter()
                .enumerate()
                .map(move |(index, datum)| (section, index, datum))
        })
    }

    /// Total number of data across all sections.
    pub fn len(&self) -> usize {
        Section::OBSERVED.iter().map(|s| self.section(*s).len()).sum()
    }

    /// Returns true if no section holds data.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a dataset from JSON, skipping malformed entries.
    ///
    /// Entries that do not have the [`PatientDatum`] shape are recorded in
    /// [`skipped`](PatientDataset::skipped) and loading continues. Only a
    /// document that is not a JSON object, or a section that is not an
    /// array, is an error. Unknown top-level keys are ignored.
    pub fn from_json(json: &str) -> MatcherResult<Self> {
        let root: Value =
            serde_json::from_str(json).map_err(|e| MatcherError::Dataset(e.to_string()))?;
        let Value::Object(mut root) = root else {
            return Err(MatcherError::Dataset(format!(
                "expected a JSON object, found {}",
                kind(&root)
            )));
        };

        let mut dataset = Self::new();
        for section in Section::OBSERVED {
            let entries = match root.remove(section.as_str()) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(entries)) => entries,
                Some(other) => {
                    return Err(MatcherError::Dataset(format!(
                        "section '{section}' must be an array, found {}",
                        kind(&other)
                    )))
                }
            };

            for (index, entry) in entries.into_iter().enumerate() {
                let parameter = entry
                    .get("parameter")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                match serde_json::from_value::<PatientDatum>(entry) {
                    Ok(datum) => {
                        if let Some(data) = dataset.section_mut(section) {
                            data.push(datum);
                        }
                    }
                    Err(e) => {
                        warn!(%section, index, error = %e, "skipping malformed patient datum");
                        dataset.skipped.push(SkippedDatum {
                            section,
                            index,
                            parameter,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(dataset)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
