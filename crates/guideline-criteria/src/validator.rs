//! Structural validation of compiled schemas.
//!
//! [`validate`] is read-only and deterministic: issues come out in schema
//! order, and validating the same schema twice yields the same report.
//! A schema is accepted by the matching engine only when the report has no
//! errors; warnings are informational.
//!
//! # Example
//!
//! ```rust
//! use guideline_criteria::{
//!     validate, Criterion, DataType, GuidelineMetadata, GuidelineSchema, MatchingCondition,
//!     MatchingConditionGroup,
//! };
//!
//! let criterion = Criterion::new(
//!     "criterion_001",
//!     "Hypotension",
//!     MatchingConditionGroup::any([MatchingCondition::less_than(
//!         "systolic_bp",
//!         DataType::VitalSign,
//!         90.0,
//!     )]),
//! );
//! let schema = GuidelineSchema::new(GuidelineMetadata::from_name("Sepsis"), vec![criterion], 1);
//!
//! let report = validate(&schema);
//! assert!(report.ok);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{
    ComparisonOperator, Confidence, Criterion, GuidelineSchema, MatchingCondition,
    MatchingConditionGroup, MatchingNode,
};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Makes the schema unusable.
    Error,
    /// Informational.
    Warning,
}

/// One finding of the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Criterion the issue belongs to; `None` for schema-level issues.
    pub criterion_id: Option<String>,
    /// Path of the offending field, e.g. `matching_conditions.conditions[1].value_min`.
    pub field: String,
    /// What is wrong.
    pub message: String,
    /// Whether the issue blocks use of the schema.
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.criterion_id {
            Some(id) => write!(f, "{level}: {id}.{}: {}", self.field, self.message),
            None => write!(f, "{level}: {}: {}", self.field, self.message),
        }
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff there are no errors.
    pub ok: bool,
    /// Issues in the order they were found.
    pub issues: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cycle: Option<Vec<String>>,
}

impl ValidationReport {
    /// Issues with [`Severity::Error`].
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    /// Issues with [`Severity::Warning`].
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// First dependency cycle found, as a closed path (`[a, b, a]`).
    pub fn cycle(&self) -> Option<&[String]> {
        self.cycle.as_deref()
    }
}

/// Collects issues while walking a schema.
struct Collector {
    issues: Vec<ValidationIssue>,
}

impl Collector {
    fn push(&mut self, criterion_id: Option<&str>, field: impl Into<String>, message: impl Into<String>, severity: Severity) {
        self.issues.push(ValidationIssue {
            criterion_id: criterion_id.map(str::to_string),
            field: field.into(),
            message: message.into(),
            severity,
        });
    }

    fn error(&mut self, criterion_id: Option<&str>, field: impl Into<String>, message: impl Into<String>) {
        self.push(criterion_id, field, message, Severity::Error);
    }

    fn warning(&mut self, criterion_id: Option<&str>, field: impl Into<String>, message: impl Into<String>) {
        self.push(criterion_id, field, message, Severity::Warning);
    }
}

/// Validates a schema.
pub fn validate(schema: &GuidelineSchema) -> ValidationReport {
    let mut out = Collector { issues: Vec::new() };

    check_metadata(schema, &mut out);
    check_decision_logic(schema, &mut out);

    let known: HashSet<&str> = schema.criteria().iter().map(|c| c.criterion_id.as_str()).collect();
    for criterion in schema.criteria() {
        check_criterion(criterion, &known, &mut out);
    }

    let cycle = find_cycle(schema.criteria());
    if let Some(path) = &cycle {
        out.error(
            path.first().map(String::as_str),
            "dependencies",
            format!("dependency cycle: {}", path.join(" -> ")),
        );
    }

    let ok = !out.issues.iter().any(|i| i.severity == Severity::Error);
    if !ok {
        tracing::warn!(
            guideline_id = %schema.guideline_metadata.guideline_id,
            errors = out.issues.iter().filter(|i| i.severity == Severity::Error).count(),
            "schema validation failed"
        );
    }

    ValidationReport { ok, issues: out.issues, cycle }
}

fn check_metadata(schema: &GuidelineSchema, out: &mut Collector) {
    let metadata = &schema.guideline_metadata;
    if metadata.guideline_id.trim().is_empty() {
        out.warning(None, "guideline_metadata.guideline_id", "guideline id is empty");
    }
    if metadata.guideline_name.trim().is_empty() {
        out.warning(None, "guideline_metadata.guideline_name", "guideline name is empty");
    }
}

fn check_decision_logic(schema: &GuidelineSchema, out: &mut Collector) {
    let count = schema.criteria().len();
    let minimum = schema.minimum_criteria_count();

    if count == 0 {
        out.error(None, "admission_decision_logic.criteria", "schema has no criteria");
    }
    if minimum < 1 {
        out.error(
            None,
            "admission_decision_logic.minimum_criteria_count",
            "minimum criteria count must be at least 1",
        );
    } else if count > 0 && minimum > count {
        out.error(
            None,
            "admission_decision_logic.minimum_criteria_count",
            format!("minimum criteria count {minimum} exceeds the {count} criteria"),
        );
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, criterion) in schema.criteria().iter().enumerate() {
        if let Some(first) = seen.insert(criterion.criterion_id.as_str(), i) {
            out.error(
                Some(&criterion.criterion_id),
                "criterion_id",
                format!("duplicate criterion id (first used by criteria[{first}])"),
            );
        }
    }
}

fn check_criterion(criterion: &Criterion, known: &HashSet<&str>, out: &mut Collector) {
    let id = Some(criterion.criterion_id.as_str());

    if criterion.criterion_id.trim().is_empty() {
        out.error(None, "criterion_id", "criterion id is empty");
    }
    if !criterion.clinical_category.is_recognized() {
        out.error(
            id,
            "clinical_category",
            format!("unrecognized clinical category '{}'", criterion.clinical_category),
        );
    }

    if criterion.matching_conditions.leaf_count() == 0 {
        out.error(id, "matching_conditions", "criterion has no leaf conditions");
    }
    check_group(id, &criterion.matching_conditions, "matching_conditions", out);

    for (i, dependency) in criterion.dependencies.iter().enumerate() {
        let field = format!("dependencies[{i}]");
        if dependency.criterion_id != criterion.criterion_id {
            out.error(
                id,
                format!("{field}.criterion_id"),
                format!("dependency belongs to '{}'", dependency.criterion_id),
            );
        }
        if !known.contains(dependency.required_criterion_id.as_str()) {
            out.error(
                id,
                format!("{field}.required_criterion_id"),
                format!("unknown dependency target '{}'", dependency.required_criterion_id),
            );
        }
    }

    if criterion.confidence == Confidence::Low {
        out.warning(id, "confidence", "compiled without a normalized concept");
    }
    for (i, unresolved) in criterion.unresolved_dependencies.iter().enumerate() {
        out.warning(
            id,
            format!("unresolved_dependencies[{i}]"),
            format!("unresolved dependency hint '{}': {}", unresolved.hint, unresolved.reason),
        );
    }
}

fn check_group(id: Option<&str>, group: &MatchingConditionGroup, path: &str, out: &mut Collector) {
    if group.conditions.is_empty() {
        out.error(id, path, "empty condition group");
    }
    for (i, node) in group.conditions.iter().enumerate() {
        let child = format!("{path}.conditions[{i}]");
        match node {
            MatchingNode::Condition(condition) => check_leaf(id, condition, &child, out),
            MatchingNode::Group(nested) => check_group(id, nested, &child, out),
        }
    }
}

fn check_leaf(id: Option<&str>, leaf: &MatchingCondition, path: &str, out: &mut Collector) {
    if leaf.parameter.trim().is_empty() {
        out.error(id, format!("{path}.parameter"), "parameter is empty");
    }

    match leaf.operator {
        ComparisonOperator::Between => match (leaf.value_min, leaf.value_max) {
            (Some(min), Some(max)) => {
                if !min.is_finite() || !max.is_finite() {
                    out.error(id, path, "between bounds must be finite");
                } else if min >= max {
                    out.error(
                        id,
                        path,
                        format!("between requires value_min < value_max (got {min} and {max})"),
                    );
                }
            }
            (None, _) => out.error(id, format!("{path}.value_min"), "between requires value_min"),
            (_, None) => out.error(id, format!("{path}.value_max"), "between requires value_max"),
        },
        ComparisonOperator::LessThan | ComparisonOperator::GreaterThan => {
            match leaf.value.as_ref().and_then(|v| v.as_f64()) {
                Some(n) if n.is_finite() => {}
                Some(_) => out.error(id, format!("{path}.value"), "threshold must be finite"),
                None => out.error(
                    id,
                    format!("{path}.value"),
                    format!("{} requires a numeric value", leaf.operator),
                ),
            }
        }
        ComparisonOperator::Equals => {
            if leaf.value.is_none() {
                out.error(id, format!("{path}.value"), "equals requires a value");
            }
        }
        ComparisonOperator::Contains => {
            if leaf.value.as_ref().and_then(|v| v.as_text()).is_none() {
                out.error(id, format!("{path}.value"), "contains requires a text value");
            }
        }
    }

    if leaf.operator != ComparisonOperator::Between
        && (leaf.value_min.is_some() || leaf.value_max.is_some())
    {
        out.error(id, path, format!("bounds are only allowed on between, not {}", leaf.operator));
    }
}

// ============================================================================
// Dependency cycles
// ============================================================================

/// Depth-first search with visited / in-progress marking. Returns the first
/// cycle found, closed (`[a, b, a]`). Roots and edges are visited in
/// declaration order, so the result is deterministic.
fn find_cycle(criteria: &[Criterion]) -> Option<Vec<String>> {
    let edges: BTreeMap<&str, Vec<&str>> = criteria
        .iter()
        .map(|c| {
            let targets = c
                .dependencies
                .iter()
                .map(|d| d.required_criterion_id.as_str())
                .collect();
            (c.criterion_id.as_str(), targets)
        })
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    for criterion in criteria {
        let id = criterion.criterion_id.as_str();
        if !visited.contains(id) {
            if let Some(cycle) = visit(id, &edges, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    edges: &BTreeMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(id);
    stack.push(id);

    for &next in edges.get(id).map(Vec::as_slice).unwrap_or_default() {
        if let Some(start) = stack.iter().position(|&s| s == next) {
            let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            path.push(next.to_string());
            return Some(path);
        }
        if !visited.contains(next) && edges.contains_key(next) {
            if let Some(cycle) = visit(next, edges, visited, stack) {
                return Some(cycle);
            }
        }
    }

    stack.pop();
    None
}
