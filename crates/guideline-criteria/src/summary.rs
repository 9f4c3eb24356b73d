//! Human-readable summary of a compiled schema.

use std::fmt::Write;

use crate::model::{GuidelineSchema, MatchingConditionGroup, MatchingNode, RuleType};

const RULE: usize = 80;

/// Longest criterion text shown before truncation.
const TEXT_PREVIEW: usize = 100;

/// Renders a plain-text summary of a schema: metadata, each criterion with
/// its category, rule tree and dependencies, then the alternatives.
///
/// # Example
///
/// ```rust
/// use guideline_criteria::{
///     render_summary, Criterion, DataType, GuidelineMetadata, GuidelineSchema,
///     MatchingCondition, MatchingConditionGroup,
/// };
///
/// let criterion = Criterion::new(
///     "criterion_001",
///     "Hypotension",
///     MatchingConditionGroup::any([MatchingCondition::less_than(
///         "systolic_bp",
///         DataType::VitalSign,
///         90.0,
///     )]),
/// );
/// let schema = GuidelineSchema::new(GuidelineMetadata::from_name("Sepsis"), vec![criterion], 1);
///
/// let summary = render_summary(&schema);
/// assert!(summary.contains("less_than(systolic_bp, 90)"));
/// ```
pub fn render_summary(schema: &GuidelineSchema) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_summary(schema, &mut out);
    out
}

fn write_summary(schema: &GuidelineSchema, out: &mut String) -> std::fmt::Result {
    let metadata = &schema.guideline_metadata;
    let logic = &schema.admission_decision_logic;

    writeln!(out, "{}", "=".repeat(RULE))?;
    writeln!(out, "GUIDELINE SCHEMA SUMMARY")?;
    writeln!(out, "{}", "=".repeat(RULE))?;
    writeln!(out)?;

    heading(out, "GUIDELINE INFORMATION")?;
    writeln!(out, "Name: {}", or_unknown(&metadata.guideline_name))?;
    writeln!(out, "ID: {}", or_unknown(&metadata.guideline_id))?;
    writeln!(out, "Version: {}", or_unknown(&metadata.version))?;
    writeln!(out, "Effective Date: {}", or_unknown(&metadata.effective_date))?;
    writeln!(out, "Specialty: {}", or_unknown(&metadata.specialty))?;
    writeln!(out, "Schema Version: {}", schema.schema_version)?;
    writeln!(out)?;

    heading(out, "ADMISSION CRITERIA")?;
    writeln!(out, "Total Criteria: {}", logic.criteria.len())?;
    let rule_type = match logic.rule_type {
        RuleType::Disjunctive => "disjunctive",
    };
    writeln!(out, "Rule Type: {rule_type}")?;
    writeln!(out, "Minimum Criteria Count: {}", logic.minimum_criteria_count)?;
    writeln!(out)?;

    for (i, criterion) in logic.criteria.iter().enumerate() {
        writeln!(out, "{}. {}", i + 1, criterion.criterion_id)?;
        writeln!(out, "   Category: {}", criterion.clinical_category)?;
        writeln!(out, "   Text: {}", preview(&criterion.criterion_text))?;
        writeln!(out, "   Primary Condition: {}", criterion.primary_condition.term)?;
        writeln!(out, "   Matching Conditions: {}", criterion.matching_conditions.leaf_count())?;
        write_group(out, &criterion.matching_conditions, 5)?;
        for dependency in &criterion.dependencies {
            writeln!(
                out,
                "   Requires: {} is {}",
                dependency.required_criterion_id, dependency.required_state
            )?;
        }
        for unresolved in &criterion.unresolved_dependencies {
            writeln!(out, "   Unresolved: \"{}\"", unresolved.hint)?;
        }
        writeln!(out)?;
    }

    if !schema.alternatives_to_admission.is_empty() {
        heading(out, "ALTERNATIVES TO ADMISSION")?;
        for alternative in &schema.alternatives_to_admission {
            writeln!(out, "- {}", alternative.description)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn heading(out: &mut String, title: &str) -> std::fmt::Result {
    writeln!(out, "{title}")?;
    writeln!(out, "{}", "-".repeat(RULE))
}

fn write_group(out: &mut String, group: &MatchingConditionGroup, indent: usize) -> std::fmt::Result {
    writeln!(out, "{:indent$}{}", "", group.logic_operator)?;
    for node in &group.conditions {
        match node {
            MatchingNode::Condition(c) => writeln!(out, "{:width$}- {c}", "", width = indent + 2)?,
            MatchingNode::Group(g) => write_group(out, g, indent + 2)?,
        }
    }
    Ok(())
}

fn or_unknown(value: &str) -> &str {
    if value.trim().is_empty() {
        "Unknown"
    } else {
        value
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= TEXT_PREVIEW {
        text.to_string()
    } else {
        let cut: String = text.chars().take(TEXT_PREVIEW).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Alternative, CareSetting, ClinicalCategory, Criterion, DataType, GuidelineMetadata,
        MatchingCondition, RequiredState, ThresholdValue,
    };

    fn schema() -> GuidelineSchema {
        let shock = Criterion::new(
            "criterion_001",
            "Shock",
            MatchingConditionGroup::any([
                MatchingNode::from(MatchingCondition::less_than(
                    "systolic_bp",
                    DataType::VitalSign,
                    90.0,
                )),
                MatchingNode::from(MatchingConditionGroup::all([
                    MatchingCondition::greater_than("heart_rate", DataType::VitalSign, 120.0),
                    MatchingCondition::greater_than("lactate", DataType::Laboratory, 4.0),
                ])),
            ]),
        )
        .with_category(ClinicalCategory::Hemodynamic);
        let bacteremia = Criterion::new(
            "criterion_002",
            "x".repeat(150),
            MatchingConditionGroup::any([MatchingCondition::equals(
                "bacteremia",
                DataType::ClinicalFinding,
                ThresholdValue::Bool(true),
            )]),
        )
        .with_dependency("criterion_001", RequiredState::NotMet);

        GuidelineSchema::new(GuidelineMetadata::from_name("Sepsis"), vec![shock, bacteremia], 1)
            .with_alternatives(vec![Alternative {
                alternative_id: "alt_001".to_string(),
                description: "Observation unit".to_string(),
                care_setting: CareSetting::ObservationUnit,
                requirements: Vec::new(),
            }])
    }

    #[test]
    fn test_summary_sections() {
        let summary = render_summary(&schema());
        assert!(summary.contains("Name: Sepsis"));
        assert!(summary.contains("Total Criteria: 2"));
        assert!(summary.contains("Rule Type: disjunctive"));
        assert!(summary.contains("Category: hemodynamic"));
        assert!(summary.contains("Requires: criterion_001 is not_met"));
        assert!(summary.contains("ALTERNATIVES TO ADMISSION\n"));
        assert!(summary.contains("- Observation unit"));
    }

    #[test]
    fn test_summary_renders_nested_groups() {
        let summary = render_summary(&schema());
        assert!(summary.contains("     OR\n       - less_than(systolic_bp, 90)\n       AND\n"));
        assert!(summary.contains("         - greater_than(lactate, 4)\n"));
    }

    #[test]
    fn test_long_text_is_truncated() {
        let summary = render_summary(&schema());
        assert!(summary.contains(&format!("Text: {}...", "x".repeat(100))));
    }

    #[test]
    fn test_empty_metadata_is_unknown() {
        let mut s = schema();
        s.guideline_metadata.version.clear();
        assert!(render_summary(&s).contains("Version: Unknown"));
    }
}
