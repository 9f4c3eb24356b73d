//! The matching engine.
//!
//! Evaluation of one dataset:
//!
//! 1. Index the patient data by canonical parameter name, skipping
//!    malformed data.
//! 2. Compute derived values that were not observed directly.
//! 3. Visit criteria in dependency order. A criterion whose dependencies
//!    are not satisfied is `not_applicable` and its tree is not evaluated.
//! 4. Evaluate each remaining tree: a leaf with no datum is false, AND is
//!    all, OR is any, an empty group is false.
//! 5. Admission is indicated when at least `minimum_criteria_count`
//!    criteria are met.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use guideline_criteria::{
    validate, ComparisonOperator, Criterion, GuidelineSchema, LogicOperator, MatchingCondition,
    MatchingConditionGroup, MatchingNode, ThresholdValue,
};
use tracing::{debug, info, warn};

use crate::config::MatcherConfig;
use crate::dataset::{DatumValue, PatientDataset};
use crate::derived::derive;
use crate::error::{MatcherError, MatcherResult};
use crate::observations::Observations;
use crate::verdict::{Evidence, Verdict, VerdictReport};

/// Evaluates a validated schema against patient datasets.
///
/// Construction validates the schema and fixes the evaluation order; the
/// engine is immutable afterwards and can be shared between threads.
///
/// # Example
///
/// ```rust
/// use guideline_criteria::{
///     Criterion, DataType, GuidelineMetadata, GuidelineSchema, MatchingCondition,
///     MatchingConditionGroup,
/// };
/// use guideline_matcher::{MatchingEngine, PatientDataset, PatientDatum};
///
/// let hypotension = Criterion::new(
///     "criterion_001",
///     "Hypotension or shock index above 1",
///     MatchingConditionGroup::any([
///         MatchingCondition::less_than("systolic_bp", DataType::VitalSign, 90.0),
///         MatchingCondition::greater_than("shock_index", DataType::ClinicalAssessment, 1.0),
///     ]),
/// );
/// let schema = GuidelineSchema::new(GuidelineMetadata::from_name("Shock"), vec![hypotension], 1);
///
/// let engine = MatchingEngine::new(&schema).unwrap();
/// let report = engine.evaluate(
///     &PatientDataset::new()
///         .with_vital_sign(PatientDatum::new("systolic_bp", 85.0))
///         .with_vital_sign(PatientDatum::new("heart_rate", 115.0)),
/// );
///
/// assert!(report.admission_indicated);
/// assert!(report.derived_values["shock_index"] > 1.3);
/// ```
#[derive(Debug, Clone)]
pub struct MatchingEngine<'s> {
    schema: &'s GuidelineSchema,
    config: MatcherConfig,
    /// Criterion indices in evaluation order.
    order: Vec<usize>,
}

impl<'s> MatchingEngine<'s> {
    /// Creates an engine with default configuration.
    ///
    /// Fails with [`MatcherError::DependencyCycle`] when the dependency
    /// graph has a cycle, and with [`MatcherError::SchemaInvalid`] for any
    /// other validation error.
    pub fn new(schema: &'s GuidelineSchema) -> MatcherResult<Self> {
        Self::with_config(schema, MatcherConfig::default())
    }

    /// Creates an engine with custom configuration.
    pub fn with_config(schema: &'s GuidelineSchema, config: MatcherConfig) -> MatcherResult<Self> {
        let report = validate(schema);
        if let Some(cycle) = report.cycle() {
            warn!(
                guideline = %schema.guideline_metadata.guideline_id,
                cycle = %cycle.join(" -> "),
                "refusing schema with dependency cycle"
            );
            return Err(MatcherError::DependencyCycle {
                path: cycle.to_vec(),
            });
        }
        if !report.ok {
            let issues: Vec<_> = report.errors().cloned().collect();
            warn!(
                guideline = %schema.guideline_metadata.guideline_id,
                errors = issues.len(),
                "refusing invalid schema"
            );
            return Err(MatcherError::SchemaInvalid { issues });
        }

        let order = evaluation_order(schema.criteria())?;
        Ok(Self {
            schema,
            config,
            order,
        })
    }

    /// Returns the schema.
    pub fn schema(&self) -> &'s GuidelineSchema {
        self.schema
    }

    /// Returns a reference to the engine configuration.
    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Criterion ids in the order they are evaluated.
    pub fn evaluation_order(&self) -> Vec<&'s str> {
        let criteria = self.schema.criteria();
        self.order
            .iter()
            .map(|&i| criteria[i].criterion_id.as_str())
            .collect()
    }

    /// Evaluates the schema against one dataset.
    ///
    /// Malformed data is skipped and listed in the report; evaluation never
    /// fails once the engine exists.
    pub fn evaluate(&self, dataset: &PatientDataset) -> VerdictReport {
        let criteria = self.schema.criteria();
        let mut skipped_data = dataset.skipped.clone();
        let mut observations =
            Observations::collect(dataset, &self.config.vocabulary, &mut skipped_data);

        let mut derived_values = BTreeMap::new();
        if self.config.derived_values {
            for datum in derive(&observations) {
                if let Some(value) = datum.value.as_f64() {
                    derived_values.insert(datum.parameter.clone(), value);
                }
                observations.push_derived(datum);
            }
        }

        let mut per_criterion = BTreeMap::new();
        let mut evidence = BTreeMap::new();
        for &index in &self.order {
            let criterion = &criteria[index];
            let verdict = match blocking_dependency(criterion, &per_criterion) {
                Some(reason) => {
                    debug!(criterion = %criterion.criterion_id, %reason, "criterion not applicable");
                    Verdict::NotApplicable { reason }
                }
                None => {
                    let mut trail = Vec::new();
                    let met = self.evaluate_group(
                        &criterion.matching_conditions,
                        &observations,
                        &mut trail,
                    );
                    debug!(criterion = %criterion.criterion_id, met, "criterion evaluated");
                    evidence.insert(criterion.criterion_id.clone(), trail);
                    if met {
                        Verdict::Met
                    } else {
                        Verdict::NotMet
                    }
                }
            };
            per_criterion.insert(criterion.criterion_id.clone(), verdict);
        }

        let matched_criterion_ids: Vec<String> = criteria
            .iter()
            .filter(|c| per_criterion.get(&c.criterion_id).is_some_and(Verdict::is_met))
            .map(|c| c.criterion_id.clone())
            .collect();
        let met_count = matched_criterion_ids.len();
        let minimum_criteria_count = self.schema.minimum_criteria_count();
        let admission_indicated = met_count >= minimum_criteria_count;

        info!(
            guideline = %self.schema.guideline_metadata.guideline_id,
            criteria = criteria.len(),
            met = met_count,
            minimum = minimum_criteria_count,
            admission_indicated,
            skipped = skipped_data.len(),
            "evaluated patient dataset"
        );

        VerdictReport {
            guideline_id: self.schema.guideline_metadata.guideline_id.clone(),
            admission_indicated,
            minimum_criteria_count,
            met_count,
            matched_criterion_ids,
            per_criterion,
            evidence,
            derived_values,
            skipped_data,
        }
    }

    fn evaluate_group(
        &self,
        group: &MatchingConditionGroup,
        observations: &Observations<'_>,
        trail: &mut Vec<Evidence>,
    ) -> bool {
        if group.conditions.is_empty() {
            return false;
        }
        // Every child is visited so the evidence lists all leaves.
        let results: Vec<bool> = group
            .conditions
            .iter()
            .map(|node| match node {
                MatchingNode::Condition(condition) => {
                    self.evaluate_leaf(condition, observations, trail)
                }
                MatchingNode::Group(inner) => self.evaluate_group(inner, observations, trail),
            })
            .collect();
        match group.logic_operator {
            LogicOperator::And => results.iter().all(|r| *r),
            LogicOperator::Or => results.iter().any(|r| *r),
        }
    }

    fn evaluate_leaf(
        &self,
        condition: &MatchingCondition,
        observations: &Observations<'_>,
        trail: &mut Vec<Evidence>,
    ) -> bool {
        let name = self.config.vocabulary.canonical_parameter(&condition.parameter);
        let found = observations
            .latest(&name)
            .map(|o| (o, false))
            .or_else(|| observations.latest_coded(&condition.codes).map(|o| (o, true)));

        let Some((observation, matched_by_code)) = found else {
            trail.push(Evidence {
                parameter: name,
                condition: condition.to_string(),
                observed: None,
                unit: String::new(),
                section: None,
                matched_by_code: false,
                satisfied: false,
            });
            return false;
        };

        let satisfied = condition_holds(condition, &observation.datum.value);
        trail.push(Evidence {
            parameter: name,
            condition: condition.to_string(),
            observed: Some(observation.datum.value.clone()),
            unit: observation.datum.unit.clone(),
            section: Some(observation.section),
            matched_by_code,
            satisfied,
        });
        satisfied
    }
}

/// Evaluates a schema against one dataset with default configuration.
pub fn evaluate(schema: &GuidelineSchema, dataset: &PatientDataset) -> MatcherResult<VerdictReport> {
    Ok(MatchingEngine::new(schema)?.evaluate(dataset))
}

/// Describes the first unsatisfied dependency of `criterion`, if any.
fn blocking_dependency(
    criterion: &Criterion,
    verdicts: &BTreeMap<String, Verdict>,
) -> Option<String> {
    criterion.dependencies.iter().find_map(|dependency| {
        let target = &dependency.required_criterion_id;
        match verdicts.get(target) {
            Some(verdict) if verdict.state() == Some(dependency.required_state) => None,
            Some(verdict) => Some(format!(
                "requires {target} to be {}, but it is {}",
                dependency.required_state,
                verdict_name(verdict)
            )),
            None => Some(format!("requires {target}, which was not evaluated")),
        }
    })
}

fn verdict_name(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Met => "met",
        Verdict::NotMet => "not_met",
        Verdict::NotApplicable { .. } => "not_applicable",
    }
}

/// Kahn's algorithm over dependency edges. Among ready criteria the one
/// declared first goes first.
fn evaluation_order(criteria: &[Criterion]) -> MatcherResult<Vec<usize>> {
    let position: HashMap<&str, usize> = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| (c.criterion_id.as_str(), i))
        .collect();

    let mut pending = vec![0usize; criteria.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); criteria.len()];
    for (i, criterion) in criteria.iter().enumerate() {
        for dependency in &criterion.dependencies {
            if let Some(&target) = position.get(dependency.required_criterion_id.as_str()) {
                pending[i] += 1;
                dependents[target].push(i);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..criteria.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(criteria.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < criteria.len() {
        let path = criteria
            .iter()
            .enumerate()
            .filter(|(i, _)| pending[*i] > 0)
            .map(|(_, c)| c.criterion_id.clone())
            .collect();
        return Err(MatcherError::DependencyCycle { path });
    }
    Ok(order)
}

/// Applies a leaf condition's operator to an observed value.
///
/// `less_than` and `greater_than` are strict. `equals` compares numbers
/// exactly when both sides are numeric (numeric text included) and
/// otherwise compares the text forms ignoring case. `between` excludes a
/// bound unless it is marked inclusive. `contains` is a case-insensitive
/// substring match on text data only.
pub fn condition_holds(condition: &MatchingCondition, observed: &DatumValue) -> bool {
    let threshold = condition.value.as_ref();
    match condition.operator {
        ComparisonOperator::LessThan => {
            match (observed.as_f64(), threshold.and_then(ThresholdValue::as_f64)) {
                (Some(a), Some(t)) => a < t,
                _ => false,
            }
        }
        ComparisonOperator::GreaterThan => {
            match (observed.as_f64(), threshold.and_then(ThresholdValue::as_f64)) {
                (Some(a), Some(t)) => a > t,
                _ => false,
            }
        }
        ComparisonOperator::Equals => match threshold {
            Some(threshold) => equals(observed, threshold),
            None => false,
        },
        ComparisonOperator::Between => {
            match (observed.as_f64(), condition.value_min, condition.value_max) {
                (Some(x), Some(min), Some(max)) => {
                    let above = if condition.min_inclusive { x >= min } else { x > min };
                    let below = if condition.max_inclusive { x <= max } else { x < max };
                    above && below
                }
                _ => false,
            }
        }
        ComparisonOperator::Contains => {
            match (observed.as_text(), threshold.and_then(ThresholdValue::as_text)) {
                (Some(text), Some(needle)) => text.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            }
        }
    }
}

fn equals(observed: &DatumValue, threshold: &ThresholdValue) -> bool {
    let numeric = match threshold {
        ThresholdValue::Bool(_) => None,
        _ => observed.as_f64().zip(threshold.as_f64()),
    };
    match numeric {
        Some((a, t)) => (a - t).abs() < f64::EPSILON,
        None => observed
            .to_string()
            .trim()
            .eq_ignore_ascii_case(threshold.to_string().trim()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PatientDatum;
    use guideline_criteria::{DataType, GuidelineMetadata, RequiredState};

    fn schema(criteria: Vec<Criterion>) -> GuidelineSchema {
        GuidelineSchema::new(GuidelineMetadata::from_name("Test"), criteria, 1)
    }

    fn criterion(n: usize, group: MatchingConditionGroup) -> Criterion {
        Criterion::new(format!("criterion_{n:03}"), format!("criterion {n}"), group)
    }

    fn hypotension() -> MatchingConditionGroup {
        MatchingConditionGroup::any([MatchingCondition::less_than(
            "systolic_bp",
            DataType::VitalSign,
            90.0,
        )])
    }

    #[test]
    fn test_strict_comparisons() {
        let below = MatchingCondition::less_than("systolic_bp", DataType::VitalSign, 90.0);
        assert!(condition_holds(&below, &89.9.into()));
        assert!(!condition_holds(&below, &90.0.into()));
        assert!(condition_holds(&below, &"85".into()));
        assert!(!condition_holds(&below, &"low".into()));
        assert!(!condition_holds(&below, &true.into()));

        let above = MatchingCondition::greater_than("heart_rate", DataType::VitalSign, 100.0);
        assert!(!condition_holds(&above, &100.0.into()));
        assert!(condition_holds(&above, &100.5.into()));
    }

    #[test]
    fn test_between_bounds() {
        let range = MatchingCondition::between("heart_rate", DataType::VitalSign, 70.0, 100.0);
        assert!(!condition_holds(&range, &70.0.into()));
        assert!(condition_holds(&range, &85.0.into()));
        assert!(!condition_holds(&range, &100.0.into()));

        let closed = range.clone().inclusive(true, true);
        assert!(condition_holds(&closed, &70.0.into()));
        assert!(condition_holds(&closed, &100.0.into()));

        let half = range.inclusive(false, true);
        assert!(!condition_holds(&half, &70.0.into()));
        assert!(condition_holds(&half, &100.0.into()));
    }

    #[test]
    fn test_equals() {
        let positive = MatchingCondition::equals(
            "blood_culture",
            DataType::Laboratory,
            ThresholdValue::Text("positive".into()),
        );
        assert!(condition_holds(&positive, &"Positive".into()));
        assert!(condition_holds(&positive, &" POSITIVE ".into()));
        assert!(!condition_holds(&positive, &"negative".into()));

        let performed = MatchingCondition::equals(
            "blood_cultures_performed",
            DataType::Laboratory,
            ThresholdValue::Bool(true),
        );
        assert!(condition_holds(&performed, &true.into()));
        assert!(condition_holds(&performed, &"TRUE".into()));
        assert!(!condition_holds(&performed, &false.into()));
        assert!(!condition_holds(&performed, &1.0.into()));

        let gcs = MatchingCondition::equals(
            "glasgow_coma_scale",
            DataType::ClinicalAssessment,
            ThresholdValue::Number(8.0),
        );
        assert!(condition_holds(&gcs, &8.0.into()));
        assert!(condition_holds(&gcs, &"8".into()));
        assert!(!condition_holds(&gcs, &9.0.into()));
    }

    #[test]
    fn test_contains() {
        let finding = MatchingCondition::contains("chest_xray", DataType::ClinicalFinding, "Infiltrate");
        assert!(condition_holds(&finding, &"bilateral infiltrates".into()));
        assert!(!condition_holds(&finding, &"clear".into()));
        assert!(!condition_holds(&finding, &1.0.into()));
    }

    #[test]
    fn test_missing_datum_is_not_met() {
        let schema = schema(vec![criterion(1, hypotension())]);
        let report = evaluate(&schema, &PatientDataset::new()).unwrap();

        assert_eq!(report.verdict("criterion_001"), Some(&Verdict::NotMet));
        assert!(!report.admission_indicated);
        assert_eq!(report.evidence["criterion_001"][0].observed, None);
    }

    #[test]
    fn test_code_fallback() {
        let group = MatchingConditionGroup::any([MatchingCondition::greater_than(
            "lactate",
            DataType::Laboratory,
            4.0,
        )
        .with_codes(guideline_criteria::ConceptCodes {
            loinc: Some("2524-7".into()),
            ..Default::default()
        })]);
        let schema = schema(vec![criterion(1, group)]);
        let dataset = PatientDataset::new()
            .with_lab_result(PatientDatum::new("Lactic acid, venous", 5.2).with_code("2524-7"));

        let report = evaluate(&schema, &dataset).unwrap();
        assert!(report.verdict("criterion_001").unwrap().is_met());
        assert!(report.evidence["criterion_001"][0].matched_by_code);
    }

    #[test]
    fn test_nested_groups() {
        let group = MatchingConditionGroup::all([
            MatchingNode::from(MatchingCondition::greater_than(
                "heart_rate",
                DataType::VitalSign,
                100.0,
            )),
            MatchingNode::from(MatchingConditionGroup::any([
                MatchingCondition::less_than("systolic_bp", DataType::VitalSign, 90.0),
                MatchingCondition::greater_than("lactate", DataType::Laboratory, 4.0),
            ])),
        ]);
        let schema = schema(vec![criterion(1, group)]);

        let tachycardic_only = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("heart_rate", 120.0))
            .with_vital_sign(PatientDatum::new("systolic_bp", 110.0));
        let report = evaluate(&schema, &tachycardic_only).unwrap();
        assert_eq!(report.verdict("criterion_001"), Some(&Verdict::NotMet));
        assert_eq!(report.evidence["criterion_001"].len(), 3);

        let with_lactate = tachycardic_only.with_lab_result(PatientDatum::new("serum lactate", 4.4));
        let report = evaluate(&schema, &with_lactate).unwrap();
        assert_eq!(report.verdict("criterion_001"), Some(&Verdict::Met));
    }

    #[test]
    fn test_empty_group_is_false() {
        let empty = MatchingConditionGroup::any(Vec::<MatchingCondition>::new());
        let schema = schema(vec![criterion(1, hypotension())]);
        let engine = MatchingEngine::new(&schema).unwrap();
        let observations = Observations::default();
        assert!(!engine.evaluate_group(&empty, &observations, &mut Vec::new()));
    }

    #[test]
    fn test_dependency_order_and_short_circuit() {
        // criterion_001 depends on criterion_002, declared later.
        let cultures = criterion(
            2,
            MatchingConditionGroup::any([MatchingCondition::equals(
                "blood_cultures_performed",
                DataType::Laboratory,
                ThresholdValue::Bool(true),
            )]),
        );
        let bacteremia = criterion(
            1,
            MatchingConditionGroup::any([MatchingCondition::equals(
                "blood_culture",
                DataType::Laboratory,
                ThresholdValue::Text("positive".into()),
            )]),
        )
        .with_dependency("criterion_002", RequiredState::Met);
        let schema = schema(vec![bacteremia, cultures]);

        let engine = MatchingEngine::new(&schema).unwrap();
        assert_eq!(engine.evaluation_order(), vec!["criterion_002", "criterion_001"]);

        let report = engine.evaluate(&PatientDataset::new());
        assert_eq!(
            report.verdict("criterion_001"),
            Some(&Verdict::NotApplicable {
                reason: "requires criterion_002 to be met, but it is not_met".into()
            })
        );
        assert!(!report.evidence.contains_key("criterion_001"));
    }

    #[test]
    fn test_not_met_dependency() {
        let stable = criterion(1, hypotension());
        let unless = criterion(
            2,
            MatchingConditionGroup::any([MatchingCondition::greater_than(
                "heart_rate",
                DataType::VitalSign,
                100.0,
            )]),
        )
        .with_dependency("criterion_001", RequiredState::NotMet);
        let schema = schema(vec![stable, unless]);
        let engine = MatchingEngine::new(&schema).unwrap();

        let normotensive = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("systolic_bp", 120.0))
            .with_vital_sign(PatientDatum::new("heart_rate", 110.0));
        assert_eq!(engine.evaluate(&normotensive).verdict("criterion_002"), Some(&Verdict::Met));

        let hypotensive = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("systolic_bp", 80.0))
            .with_vital_sign(PatientDatum::new("heart_rate", 110.0));
        assert!(engine
            .evaluate(&hypotensive)
            .verdict("criterion_002")
            .unwrap()
            .is_not_applicable());
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let criteria = (1..=4).map(|n| criterion(n, hypotension())).collect();
        let schema = schema(criteria);
        let engine = MatchingEngine::new(&schema).unwrap();
        assert_eq!(
            engine.evaluation_order(),
            vec!["criterion_001", "criterion_002", "criterion_003", "criterion_004"]
        );
    }

    #[test]
    fn test_cycle_is_refused() {
        let a = criterion(1, hypotension()).with_dependency("criterion_002", RequiredState::Met);
        let b = criterion(2, hypotension()).with_dependency("criterion_001", RequiredState::Met);
        let schema = schema(vec![a, b]);

        match MatchingEngine::new(&schema) {
            Err(MatcherError::DependencyCycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected a dependency cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_schema_is_refused() {
        let bad = criterion(
            1,
            MatchingConditionGroup::any([MatchingCondition::between(
                "heart_rate",
                DataType::VitalSign,
                100.0,
                70.0,
            )]),
        );
        let schema = schema(vec![bad]);
        match evaluate(&schema, &PatientDataset::new()) {
            Err(MatcherError::SchemaInvalid { issues }) => assert!(!issues.is_empty()),
            other => panic!("expected an invalid schema, got {other:?}"),
        }
    }

    #[test]
    fn test_derived_values_can_be_disabled() {
        let group = MatchingConditionGroup::any([MatchingCondition::greater_than(
            "shock_index",
            DataType::ClinicalAssessment,
            1.0,
        )]);
        let schema = schema(vec![criterion(1, group)]);
        let dataset = PatientDataset::new()
            .with_vital_sign(PatientDatum::new("systolic_bp", 85.0))
            .with_vital_sign(PatientDatum::new("heart_rate", 115.0));

        let enabled = MatchingEngine::new(&schema).unwrap().evaluate(&dataset);
        assert!(enabled.verdict("criterion_001").unwrap().is_met());

        let config = MatcherConfig::builder().with_derived_values(false).build();
        let disabled = MatchingEngine::with_config(&schema, config).unwrap().evaluate(&dataset);
        assert!(!disabled.verdict("criterion_001").unwrap().is_met());
        assert!(disabled.derived_values.is_empty());
    }
}
