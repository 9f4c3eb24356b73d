//! Clinical scenarios evaluated end to end.

use guideline_criteria::{
    Criterion, DataType, GuidelineMetadata, GuidelineSchema, MatchingCondition,
    MatchingConditionGroup, RequiredState, ThresholdValue,
};
use guideline_matcher::{
    evaluate, MatcherError, MatchingEngine, PatientDataset, PatientDatum, Section, Verdict,
    SHOCK_INDEX,
};

fn schema(name: &str, criteria: Vec<Criterion>) -> GuidelineSchema {
    GuidelineSchema::new(GuidelineMetadata::from_name(name), criteria, 1)
}

fn heart_rate_between() -> GuidelineSchema {
    schema(
        "Heart rate",
        vec![Criterion::new(
            "criterion_001",
            "Heart rate between 70 and 100",
            MatchingConditionGroup::any([MatchingCondition::between(
                "heart_rate",
                DataType::VitalSign,
                70.0,
                100.0,
            )]),
        )],
    )
}

#[test]
fn test_between_is_exclusive() {
    let schema = heart_rate_between();
    let engine = MatchingEngine::new(&schema).unwrap();

    for (rate, expected) in [(70.0, false), (85.0, true), (100.0, false)] {
        let dataset = PatientDataset::new().with_vital_sign(PatientDatum::new("heart_rate", rate));
        let report = engine.evaluate(&dataset);
        assert_eq!(
            report.verdict("criterion_001").unwrap().is_met(),
            expected,
            "heart rate {rate}"
        );
    }
}

#[test]
fn test_shock_index_scenario() {
    let schema = schema(
        "Shock",
        vec![Criterion::new(
            "criterion_001",
            "Hypotension or elevated shock index",
            MatchingConditionGroup::any([
                MatchingCondition::less_than("systolic_bp", DataType::VitalSign, 90.0),
                MatchingCondition::greater_than(SHOCK_INDEX, DataType::ClinicalAssessment, 1.0),
            ]),
        )],
    );
    let dataset = PatientDataset::new()
        .with_vital_sign(PatientDatum::new("systolic_bp", 85.0).with_unit("mmHg"))
        .with_vital_sign(PatientDatum::new("heart_rate", 115.0).with_unit("bpm"));

    let report = evaluate(&schema, &dataset).unwrap();

    let shock_index = report.derived_values[SHOCK_INDEX];
    assert!((shock_index - 1.3529).abs() < 1e-3);
    assert_eq!(report.verdict("criterion_001"), Some(&Verdict::Met));

    let evidence = &report.evidence["criterion_001"];
    assert!(evidence.iter().all(|e| e.satisfied));
    assert_eq!(evidence[1].section, Some(Section::Derived));
    assert!(report.admission_indicated);
}

#[test]
fn test_bacteremia_without_cultures_is_not_applicable() {
    let cultures = Criterion::new(
        "criterion_001",
        "Blood cultures performed",
        MatchingConditionGroup::any([MatchingCondition::equals(
            "blood_cultures_performed",
            DataType::Laboratory,
            ThresholdValue::Bool(true),
        )]),
    );
    let bacteremia = Criterion::new(
        "criterion_002",
        "Bacteremia if blood cultures were performed",
        MatchingConditionGroup::any([MatchingCondition::equals(
            "blood_culture",
            DataType::Laboratory,
            ThresholdValue::Text("positive".into()),
        )]),
    )
    .with_dependency("criterion_001", RequiredState::Met);
    let schema = schema("Bacteremia", vec![cultures, bacteremia]);
    let engine = MatchingEngine::new(&schema).unwrap();

    // A positive culture without the performed flag still does not count.
    let dataset = PatientDataset::new()
        .with_lab_result(PatientDatum::new("blood_culture", "positive"));
    let report = engine.evaluate(&dataset);
    assert_eq!(report.verdict("criterion_001"), Some(&Verdict::NotMet));
    assert!(report.verdict("criterion_002").unwrap().is_not_applicable());
    assert!(!report.evidence.contains_key("criterion_002"));
    assert_eq!(report.not_applicable_count(), 1);

    let dataset = dataset.with_lab_result(PatientDatum::new("blood_cultures_performed", true));
    let report = engine.evaluate(&dataset);
    assert_eq!(report.matched_criterion_ids, vec!["criterion_001", "criterion_002"]);
}

#[test]
fn test_one_of_ten_criteria_indicates_admission() {
    let criteria: Vec<Criterion> = (1..=10u32)
        .map(|n| {
            Criterion::new(
                format!("criterion_{n:03}"),
                format!("lactate above {}", n * 2),
                MatchingConditionGroup::any([MatchingCondition::greater_than(
                    "lactate",
                    DataType::Laboratory,
                    f64::from(n * 2),
                )]),
            )
        })
        .collect();
    let schema = schema("Lactate ladder", criteria);
    let dataset = PatientDataset::new().with_lab_result(PatientDatum::new("lactate", 2.5));

    let report = evaluate(&schema, &dataset).unwrap();
    assert_eq!(report.met_count, 1);
    assert_eq!(report.matched_criterion_ids, vec!["criterion_001"]);
    assert_eq!(report.per_criterion.len(), 10);
    assert!(report.admission_indicated);
}

#[test]
fn test_minimum_count_above_one() {
    let criteria = vec![
        Criterion::new(
            "criterion_001",
            "Tachycardia",
            MatchingConditionGroup::any([MatchingCondition::greater_than(
                "heart_rate",
                DataType::VitalSign,
                100.0,
            )]),
        ),
        Criterion::new(
            "criterion_002",
            "Tachypnea",
            MatchingConditionGroup::any([MatchingCondition::greater_than(
                "respiratory_rate",
                DataType::VitalSign,
                22.0,
            )]),
        ),
    ];
    let schema = GuidelineSchema::new(GuidelineMetadata::from_name("SIRS"), criteria, 2);
    let engine = MatchingEngine::new(&schema).unwrap();

    let one = PatientDataset::new().with_vital_sign(PatientDatum::new("HR", 120.0));
    assert!(!engine.evaluate(&one).admission_indicated);

    let both = one.with_vital_sign(PatientDatum::new("RR", 28.0));
    let report = engine.evaluate(&both);
    assert_eq!(report.met_count, 2);
    assert!(report.admission_indicated);
}

#[test]
fn test_malformed_datum_does_not_abort() {
    let schema = heart_rate_between();
    let dataset = PatientDataset::from_json(
        r#"{
            "vital_signs": [
                {"parameter": "heart_rate", "value": [1, 2]},
                {"parameter": "", "value": 80},
                {"parameter": "heart_rate", "value": 88, "unit": "bpm"}
            ]
        }"#,
    )
    .unwrap();

    let report = evaluate(&schema, &dataset).unwrap();
    assert!(report.verdict("criterion_001").unwrap().is_met());
    assert_eq!(report.skipped_data.len(), 2);
    assert_eq!(report.skipped_data[0].index, 0);
    assert_eq!(report.skipped_data[1].reason, "parameter is empty");
}

#[test]
fn test_persisted_schema_evaluates() {
    let json = r#"{
        "schema_version": "1.0",
        "schema_created": "2024-03-01T00:00:00Z",
        "guideline_metadata": {"guideline_id": "guideline_sepsis", "guideline_name": "Sepsis"},
        "admission_decision_logic": {
            "rule_type": "disjunctive",
            "description": "Admission if any criterion is met",
            "minimum_criteria_count": 1,
            "criteria": [{
                "criterion_id": "criterion_001",
                "criterion_text": "Hypotension",
                "clinical_category": "hemodynamic",
                "primary_condition": {"term": "Hypotension"},
                "matching_conditions": {
                    "logic_operator": "OR",
                    "conditions": [
                        {"node_type": "condition", "parameter": "systolic_bp",
                         "data_type": "vital_sign", "operator": "less_than", "value": 90}
                    ]
                }
            }]
        },
        "alternatives_to_admission": []
    }"#;
    let schema: GuidelineSchema = serde_json::from_str(json).unwrap();
    let dataset = PatientDataset::new()
        .with_vital_sign(PatientDatum::new("Systolic Blood Pressure", 82.0));

    let report = evaluate(&schema, &dataset).unwrap();
    assert_eq!(report.guideline_id, "guideline_sepsis");
    assert!(report.admission_indicated);
}

#[test]
fn test_unknown_dependency_target_is_refused() {
    let orphan = Criterion::new(
        "criterion_001",
        "Orphan",
        MatchingConditionGroup::any([MatchingCondition::greater_than(
            "heart_rate",
            DataType::VitalSign,
            100.0,
        )]),
    )
    .with_dependency("criterion_099", RequiredState::Met);
    let schema = schema("Orphan", vec![orphan]);

    assert!(matches!(
        MatchingEngine::new(&schema),
        Err(MatcherError::SchemaInvalid { .. })
    ));
}
