//! Versioned keyword tables used by the extractor, compiler and matcher.
//!
//! Every lexical decision (qualifier terms, conditional markers, category
//! keyword families, parameter aliases and the parameter → data type table)
//! lives here rather than in the parsing code, so the tables can be loaded
//! from JSON, tested and evolved independently.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CriteriaError, CriteriaResult};
use crate::model::{ClinicalCategory, DataType, RequiredState};
use crate::text::snake_case;

/// Version of the built-in tables.
pub const VOCABULARY_VERSION: u32 = 1;

/// A phrase that introduces a conditional clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalMarker {
    /// Marker phrase, lowercase (e.g. `"provided that"`).
    pub phrase: String,
    /// Verdict the referenced criterion must reach.
    pub required_state: RequiredState,
}

/// Keywords that classify a criterion into one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFamily {
    /// Category this family stands for.
    pub category: ClinicalCategory,
    /// Keywords, matched on word boundaries.
    pub keywords: Vec<String>,
}

/// Controlled vocabularies for criterion analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Table version; bump when any table changes meaning.
    pub version: u32,
    /// Severity words.
    pub severity_terms: Vec<String>,
    /// Temporal words.
    pub temporal_terms: Vec<String>,
    /// Markers that open a persistence clause.
    pub persistence_markers: Vec<String>,
    /// Conditional markers and the state each requires.
    pub conditional_markers: Vec<ConditionalMarker>,
    /// Category families in priority order; the first family with a hit wins.
    pub category_families: Vec<CategoryFamily>,
    /// Words that end the primary phrase of a criterion.
    pub primary_splitters: Vec<String>,
    /// `snake_case` parameter name → canonical parameter name.
    pub parameter_aliases: BTreeMap<String, String>,
    /// Canonical parameter name → data type.
    pub parameter_types: BTreeMap<String, DataType>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        let conditional_markers = [
            ("only if", RequiredState::Met),
            ("provided that", RequiredState::Met),
            ("if", RequiredState::Met),
            ("unless", RequiredState::NotMet),
        ]
        .into_iter()
        .map(|(phrase, required_state)| ConditionalMarker {
            phrase: phrase.to_string(),
            required_state,
        })
        .collect();

        let category_families = vec![
            CategoryFamily {
                category: ClinicalCategory::Hemodynamic,
                keywords: strings(&[
                    "hemodynamic", "hemodynamically", "blood pressure", "hypotension",
                    "hypotensive", "shock", "bp", "tachycardia", "hypoperfusion",
                    "vasopressor", "vasopressors",
                ]),
            },
            CategoryFamily {
                category: ClinicalCategory::Respiratory,
                keywords: strings(&[
                    "respiratory", "hypoxemia", "hypoxia", "oxygen", "breathing", "dyspnea",
                    "tachypnea", "ventilation", "spo2", "pneumonia",
                ]),
            },
            CategoryFamily {
                category: ClinicalCategory::Infectious,
                keywords: strings(&[
                    "bacteremia", "sepsis", "septic", "infection", "infections", "fever",
                    "febrile", "culture", "cultures", "antibiotic", "antibiotics",
                ]),
            },
            CategoryFamily {
                category: ClinicalCategory::Neurologic,
                keywords: strings(&[
                    "mental status", "altered", "confusion", "delirium", "consciousness",
                    "seizure", "seizures", "glasgow", "lethargy", "obtunded",
                ]),
            },
            CategoryFamily {
                category: ClinicalCategory::Renal,
                keywords: strings(&[
                    "renal", "kidney", "creatinine", "urine output", "oliguria", "dialysis",
                ]),
            },
            CategoryFamily {
                category: ClinicalCategory::Metabolic,
                keywords: strings(&[
                    "dehydration", "hydration", "fluid", "fluids", "electrolyte",
                    "electrolytes", "acidosis", "lactate", "glucose", "hypoglycemia",
                    "hyperglycemia", "sodium", "potassium",
                ]),
            },
        ];

        let parameter_aliases = [
            ("systolic_blood_pressure", "systolic_bp"),
            ("systolic", "systolic_bp"),
            ("sbp", "systolic_bp"),
            ("blood_pressure", "systolic_bp"),
            ("diastolic_blood_pressure", "diastolic_bp"),
            ("diastolic", "diastolic_bp"),
            ("dbp", "diastolic_bp"),
            ("pulse", "heart_rate"),
            ("pulse_rate", "heart_rate"),
            ("hr", "heart_rate"),
            ("respiration_rate", "respiratory_rate"),
            ("rr", "respiratory_rate"),
            ("temp", "temperature"),
            ("body_temperature", "temperature"),
            ("spo2", "oxygen_saturation"),
            ("o2_saturation", "oxygen_saturation"),
            ("map", "mean_arterial_pressure"),
            ("gcs", "glasgow_coma_scale"),
            ("glasgow_coma_score", "glasgow_coma_scale"),
            ("platelets", "platelet_count"),
            ("wbc", "white_blood_cell_count"),
            ("wbc_count", "white_blood_cell_count"),
            ("lactic_acid", "lactate"),
            ("serum_lactate", "lactate"),
        ]
        .into_iter()
        .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
        .collect();

        let mut parameter_types = BTreeMap::new();
        for name in [
            "systolic_bp", "diastolic_bp", "heart_rate", "respiratory_rate", "temperature",
            "oxygen_saturation",
        ] {
            parameter_types.insert(name.to_string(), DataType::VitalSign);
        }
        for name in [
            "platelet_count", "white_blood_cell_count", "lactate", "creatinine", "bilirubin",
            "hemoglobin", "glucose", "sodium", "potassium", "procalcitonin", "blood_culture",
            "blood_cultures_performed",
        ] {
            parameter_types.insert(name.to_string(), DataType::Laboratory);
        }
        for name in [
            "glasgow_coma_scale", "mental_status", "shock_index", "mean_arterial_pressure",
            "pulse_pressure", "urine_output",
        ] {
            parameter_types.insert(name.to_string(), DataType::ClinicalAssessment);
        }

        Self {
            version: VOCABULARY_VERSION,
            severity_terms: strings(&[
                "severe", "moderate", "mild", "major", "minor", "critical", "significant",
                "marked", "profound", "refractory", "resistant", "unresponsive",
            ]),
            temporal_terms: strings(&[
                "acute", "chronic", "sudden", "new", "new-onset", "recent", "recurrent",
                "intermittent", "progressive", "worsening", "deteriorating", "rapidly",
            ]),
            persistence_markers: strings(&[
                "persistent", "persists", "persisting", "persist", "despite", "refractory to",
                "unresponsive to", "continues", "continuing", "ongoing",
            ]),
            conditional_markers,
            category_families,
            primary_splitters: strings(&[
                "and", "or", "with", "that", "requiring", "despite", "if", "unless",
                "provided", "when", "including",
            ]),
            parameter_aliases,
            parameter_types,
        }
    }
}

impl Vocabulary {
    /// Loads a vocabulary from JSON and checks it for consistency.
    pub fn from_json(json: &str) -> CriteriaResult<Self> {
        let vocabulary: Vocabulary =
            serde_json::from_str(json).map_err(|e| CriteriaError::Vocabulary(e.to_string()))?;
        vocabulary.check()?;
        Ok(vocabulary)
    }

    /// Checks table consistency.
    pub fn check(&self) -> CriteriaResult<()> {
        if self.version == 0 {
            return Err(CriteriaError::Vocabulary("version must be at least 1".to_string()));
        }
        for family in &self.category_families {
            if !family.category.is_recognized() {
                return Err(CriteriaError::Vocabulary(format!(
                    "category family '{}' is outside the taxonomy",
                    family.category
                )));
            }
            if family.keywords.is_empty() {
                return Err(CriteriaError::Vocabulary(format!(
                    "category family '{}' has no keywords",
                    family.category
                )));
            }
        }
        if let Some(marker) = self.conditional_markers.iter().find(|m| m.phrase.trim().is_empty()) {
            return Err(CriteriaError::Vocabulary(format!(
                "empty conditional marker for state {}",
                marker.required_state
            )));
        }
        Ok(())
    }

    /// Maps a free-text parameter name to its canonical `snake_case` name.
    pub fn canonical_parameter(&self, name: &str) -> String {
        let snake = snake_case(name);
        self.parameter_aliases.get(&snake).cloned().unwrap_or(snake)
    }

    /// Data type of a canonical parameter; unmapped parameters are clinical findings.
    pub fn data_type_for(&self, canonical_parameter: &str) -> DataType {
        self.parameter_types
            .get(canonical_parameter)
            .copied()
            .unwrap_or(DataType::ClinicalFinding)
    }
}
