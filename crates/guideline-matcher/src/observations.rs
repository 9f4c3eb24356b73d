//! Per-evaluation lookup index over patient data.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use guideline_criteria::{ConceptCodes, Vocabulary};
use tracing::warn;

use crate::dataset::{PatientDataset, PatientDatum, Section, SkippedDatum};

/// A datum admitted to an evaluation.
#[derive(Debug, Clone)]
pub(crate) struct Observation<'a> {
    pub section: Section,
    /// Canonical parameter name.
    pub name: String,
    pub datum: Cow<'a, PatientDatum>,
    /// Position across the whole dataset; later entries win timestamp ties.
    order: usize,
}

impl Observation<'_> {
    /// Recency rank. `None` sorts before any timestamp, so untimed data is oldest.
    fn rank(&self) -> (Option<DateTime<Utc>>, usize) {
        (self.datum.timestamp, self.order)
    }
}

/// Observations keyed by canonical parameter name.
#[derive(Debug, Default)]
pub(crate) struct Observations<'a> {
    entries: Vec<Observation<'a>>,
    by_name: BTreeMap<String, Vec<usize>>,
}

impl<'a> Observations<'a> {
    /// Indexes every well-formed datum; malformed ones go to `skipped`.
    pub fn collect(
        dataset: &'a PatientDataset,
        vocabulary: &Vocabulary,
        skipped: &mut Vec<SkippedDatum>,
    ) -> Self {
        let mut observations = Self::default();
        for (section, index, datum) in dataset.iter() {
            if let Some(reason) = datum.defect() {
                warn!(%section, index, parameter = %datum.parameter, reason, "skipping patient datum");
                skipped.push(SkippedDatum {
                    section,
                    index,
                    parameter: Some(datum.parameter.clone()).filter(|p| !p.trim().is_empty()),
                    reason: reason.to_string(),
                });
                continue;
            }
            let name = vocabulary.canonical_parameter(&datum.parameter);
            observations.push(section, name, Cow::Borrowed(datum));
        }
        observations
    }

    fn push(&mut self, section: Section, name: String, datum: Cow<'a, PatientDatum>) {
        let order = self.entries.len();
        self.by_name.entry(name.clone()).or_default().push(order);
        self.entries.push(Observation {
            section,
            name,
            datum,
            order,
        });
    }

    /// Adds a value computed by the engine.
    pub fn push_derived(&mut self, datum: PatientDatum) {
        let name = datum.parameter.clone();
        self.push(Section::Derived, name, Cow::Owned(datum));
    }

    /// Returns true if any datum has this canonical name.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Most recent datum with this canonical name.
    pub fn latest(&self, name: &str) -> Option<&Observation<'a>> {
        self.named(name).max_by_key(|o| o.rank())
    }

    /// Most recent numeric datum with this canonical name.
    pub fn latest_number(&self, name: &str) -> Option<(f64, &Observation<'a>)> {
        self.named(name)
            .filter_map(|o| o.datum.value.as_f64().map(|v| (v, o)))
            .max_by_key(|(_, o)| o.rank())
    }

    /// Most recent datum whose code matches one of `codes`.
    pub fn latest_coded(&self, codes: &ConceptCodes) -> Option<&Observation<'a>> {
        if codes.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .filter(|o| o.datum.code.as_deref().is_some_and(|c| codes.matches(c)))
            .max_by_key(|o| o.rank())
    }

    fn named(&self, name: &str) -> impl Iterator<Item = &Observation<'a>> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.entries.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatumValue;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_latest_prefers_newest_timestamp() {
        let dataset = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("heart_rate", 90.0).with_timestamp(at(10)))
            .with_vital_sign(PatientDatum::new("HR", 120.0).with_timestamp(at(12)))
            .with_vital_sign(PatientDatum::new("Heart Rate", 100.0).with_timestamp(at(11)));
        let mut skipped = Vec::new();
        let observations = Observations::collect(&dataset, &Vocabulary::default(), &mut skipped);

        let latest = observations.latest("heart_rate").unwrap();
        assert_eq!(latest.datum.value, DatumValue::Number(120.0));
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_untimed_data_ranks_oldest() {
        let dataset = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("heart_rate", 90.0).with_timestamp(at(8)))
            .with_vital_sign(PatientDatum::new("heart_rate", 130.0));
        let observations = Observations::collect(&dataset, &Vocabulary::default(), &mut Vec::new());
        assert_eq!(
            observations.latest("heart_rate").unwrap().datum.value,
            DatumValue::Number(90.0)
        );
    }

    #[test]
    fn test_ties_go_to_later_entry() {
        let dataset = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("heart_rate", 90.0))
            .with_vital_sign(PatientDatum::new("heart_rate", 95.0));
        let observations = Observations::collect(&dataset, &Vocabulary::default(), &mut Vec::new());
        assert_eq!(
            observations.latest("heart_rate").unwrap().datum.value,
            DatumValue::Number(95.0)
        );
    }

    #[test]
    fn test_latest_number_skips_text() {
        let dataset = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("systolic_bp", 88.0).with_timestamp(at(9)))
            .with_vital_sign(PatientDatum::new("systolic_bp", "unmeasurable").with_timestamp(at(10)));
        let observations = Observations::collect(&dataset, &Vocabulary::default(), &mut Vec::new());

        assert_eq!(observations.latest("systolic_bp").unwrap().datum.value.as_f64(), None);
        assert_eq!(observations.latest_number("systolic_bp").map(|(v, _)| v), Some(88.0));
    }

    #[test]
    fn test_code_lookup() {
        let dataset = PatientDataset::new()
            .with_lab_result(PatientDatum::new("serum lactic acid level", 5.1).with_code("2524-7"));
        let observations = Observations::collect(&dataset, &Vocabulary::default(), &mut Vec::new());

        let codes = ConceptCodes {
            loinc: Some("2524-7".into()),
            ..ConceptCodes::default()
        };
        assert_eq!(observations.latest_coded(&codes).unwrap().section, Section::LabResults);
        assert!(observations.latest_coded(&ConceptCodes::default()).is_none());
    }

    #[test]
    fn test_malformed_data_is_skipped() {
        let dataset = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("", 90.0))
            .with_vital_sign(PatientDatum::new("heart_rate", f64::NAN))
            .with_vital_sign(PatientDatum::new("heart_rate", 101.0))
            .with_lab_result(PatientDatum::new("lactate", "NaN"));
        let mut skipped = Vec::new();
        let observations = Observations::collect(&dataset, &Vocabulary::default(), &mut skipped);

        assert_eq!(skipped.len(), 3);
        assert_eq!(skipped[2].section, Section::LabResults);
        assert!(!observations.contains("lactate"));
        assert_eq!(skipped[0].parameter, None);
        assert_eq!(skipped[1].index, 1);
        assert_eq!(
            observations.latest("heart_rate").unwrap().datum.value,
            DatumValue::Number(101.0)
        );
    }

    #[test]
    fn test_derived_values_are_indexed() {
        let dataset = PatientDataset::new();
        let mut observations = Observations::collect(&dataset, &Vocabulary::default(), &mut Vec::new());
        assert!(!observations.contains("shock_index"));

        observations.push_derived(PatientDatum::new("shock_index", 1.2));
        let latest = observations.latest("shock_index").unwrap();
        assert_eq!(latest.section, Section::Derived);
        assert_eq!(latest.name, "shock_index");
    }
}
