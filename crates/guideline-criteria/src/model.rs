//! Schema types for compiled admission criteria.
//!
//! A [`GuidelineSchema`] is the persisted document produced by the rule
//! compiler and consumed by the matching engine. Field names follow the
//! persisted JSON layout exactly.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the persisted schema layout.
pub const SCHEMA_VERSION: &str = "1.0";

/// Formats the sequential identifier of the `n`-th criterion (1-based).
pub fn criterion_id(n: usize) -> String {
    format!("criterion_{n:03}")
}

// =============================================================================
// Schema
// =============================================================================

/// A compiled guideline: metadata, decision logic and alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineSchema {
    /// Persisted layout version.
    pub schema_version: String,
    /// When the schema was compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_created: Option<DateTime<Utc>>,
    /// Descriptive metadata of the source guideline.
    pub guideline_metadata: GuidelineMetadata,
    /// Top-level decision logic holding the criteria.
    pub admission_decision_logic: AdmissionDecisionLogic,
    /// Care options offered instead of admission.
    #[serde(default)]
    pub alternatives_to_admission: Vec<Alternative>,
}

impl GuidelineSchema {
    /// Creates a schema with disjunctive decision logic.
    pub fn new(
        metadata: GuidelineMetadata,
        criteria: Vec<Criterion>,
        minimum_criteria_count: usize,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            schema_created: None,
            guideline_metadata: metadata,
            admission_decision_logic: AdmissionDecisionLogic::disjunctive(
                criteria,
                minimum_criteria_count,
            ),
            alternatives_to_admission: Vec::new(),
        }
    }

    /// Sets the alternatives to admission.
    pub fn with_alternatives(mut self, alternatives: Vec<Alternative>) -> Self {
        self.alternatives_to_admission = alternatives;
        self
    }

    /// Sets the compilation timestamp.
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.schema_created = Some(created);
        self
    }

    /// Returns the criteria in declaration order.
    pub fn criteria(&self) -> &[Criterion] {
        &self.admission_decision_logic.criteria
    }

    /// Looks up a criterion by ID.
    pub fn criterion(&self, criterion_id: &str) -> Option<&Criterion> {
        self.criteria()
            .iter()
            .find(|c| c.criterion_id == criterion_id)
    }

    /// Minimum number of met criteria that indicates admission.
    pub fn minimum_criteria_count(&self) -> usize {
        self.admission_decision_logic.minimum_criteria_count
    }
}

/// Descriptive metadata for a guideline document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineMetadata {
    /// Slug derived from the name, prefixed `guideline_`.
    pub guideline_id: String,
    /// Human-readable guideline title.
    pub guideline_name: String,
    /// Issuing organisation code.
    #[serde(default)]
    pub org_code: String,
    /// Guideline version as published.
    #[serde(default)]
    pub version: String,
    /// Date the guideline takes effect.
    #[serde(default)]
    pub effective_date: String,
    /// Clinical specialty.
    #[serde(default)]
    pub specialty: String,
    /// Care setting the criteria admit to.
    #[serde(default)]
    pub care_setting: String,
    /// File the guideline was read from.
    #[serde(default)]
    pub source_document: String,
    /// When the criteria were extracted.
    #[serde(default)]
    pub extraction_date: String,
}

impl GuidelineMetadata {
    /// Creates metadata for a named guideline with a derived ID.
    pub fn from_name(guideline_name: &str) -> Self {
        Self {
            guideline_id: guideline_id_from_name(guideline_name),
            guideline_name: guideline_name.to_string(),
            org_code: String::new(),
            version: String::new(),
            effective_date: String::new(),
            specialty: "General Medicine".to_string(),
            care_setting: "inpatient".to_string(),
            source_document: String::new(),
            extraction_date: String::new(),
        }
    }
}

impl Default for GuidelineMetadata {
    fn default() -> Self {
        Self::from_name("Unknown Guideline")
    }
}

/// Derives a stable guideline ID from its name.
///
/// Non-word characters are dropped, runs of whitespace and dashes become a
/// single underscore and the slug is limited to 50 characters.
pub fn guideline_id_from_name(name: &str) -> String {
    let kept: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let slug = kept
        .split(|c: char| c == '-' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug: String = slug.chars().take(50).collect();
    format!("guideline_{slug}")
}

/// How criteria combine into the admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Admission is indicated if any criterion (up to the minimum count) is met.
    #[default]
    Disjunctive,
}

/// Top-level decision logic of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecisionLogic {
    /// Always `disjunctive`.
    pub rule_type: RuleType,
    /// Plain-language statement of the rule.
    #[serde(default)]
    pub description: String,
    /// Met criteria needed to indicate admission.
    pub minimum_criteria_count: usize,
    /// Criteria in declaration order.
    pub criteria: Vec<Criterion>,
}

impl AdmissionDecisionLogic {
    /// Creates disjunctive logic over the given criteria.
    pub fn disjunctive(criteria: Vec<Criterion>, minimum_criteria_count: usize) -> Self {
        Self {
            rule_type: RuleType::Disjunctive,
            description: "Patient meets admission criteria if any of the following conditions are met"
                .to_string(),
            minimum_criteria_count,
            criteria,
        }
    }
}

// =============================================================================
// Criterion
// =============================================================================

/// Clinical category taxonomy.
///
/// Persisted values outside the taxonomy deserialize as
/// [`ClinicalCategory::Unrecognized`] so that validation can report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClinicalCategory {
    /// Blood pressure, shock, perfusion.
    Hemodynamic,
    /// Oxygenation and breathing.
    Respiratory,
    /// Sepsis, bacteremia, fever.
    Infectious,
    /// Mental status, seizures, stroke.
    Neurologic,
    /// Kidney function and urine output.
    Renal,
    /// Electrolytes, glucose, acid-base.
    Metabolic,
    /// No keyword family matched.
    Other,
    /// A value that is not part of the taxonomy.
    Unrecognized(String),
}

impl ClinicalCategory {
    /// The fixed taxonomy, in classifier priority order.
    pub const TAXONOMY: [ClinicalCategory; 7] = [
        ClinicalCategory::Hemodynamic,
        ClinicalCategory::Respiratory,
        ClinicalCategory::Infectious,
        ClinicalCategory::Neurologic,
        ClinicalCategory::Renal,
        ClinicalCategory::Metabolic,
        ClinicalCategory::Other,
    ];

    /// Parses a category name; unknown names become `Unrecognized`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "hemodynamic" => Self::Hemodynamic,
            "respiratory" => Self::Respiratory,
            "infectious" => Self::Infectious,
            "neurologic" | "neurological" => Self::Neurologic,
            "renal" => Self::Renal,
            "metabolic" => Self::Metabolic,
            "other" => Self::Other,
            _ => Self::Unrecognized(name.to_string()),
        }
    }

    /// Returns the persisted name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hemodynamic => "hemodynamic",
            Self::Respiratory => "respiratory",
            Self::Infectious => "infectious",
            Self::Neurologic => "neurologic",
            Self::Renal => "renal",
            Self::Metabolic => "metabolic",
            Self::Other => "other",
            Self::Unrecognized(name) => name,
        }
    }

    /// Returns true if the category is part of the taxonomy.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for ClinicalCategory {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ClinicalCategory> for String {
    fn from(value: ClinicalCategory) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ClinicalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity, temporal and persistence qualifiers of a criterion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Qualifiers {
    /// Severity terms such as `severe` or `refractory`.
    #[serde(default)]
    pub severity: BTreeSet<String>,
    /// Time course, e.g. `acute, for more than 24 hours`.
    #[serde(default)]
    pub temporal: String,
    /// Persistence clauses, e.g. `despite fluid resuscitation`.
    #[serde(default)]
    pub persistence: String,
}

impl Qualifiers {
    /// Returns true if no qualifier was detected.
    pub fn is_empty(&self) -> bool {
        self.severity.is_empty() && self.temporal.is_empty() && self.persistence.is_empty()
    }
}

/// Coded identifiers for a concept.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConceptCodes {
    /// SNOMED CT concept id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snomed: Option<String>,
    /// ICD-10 codes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icd10: Vec<String>,
    /// LOINC code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loinc: Option<String>,
}

impl ConceptCodes {
    /// Returns true if no code is present.
    pub fn is_empty(&self) -> bool {
        self.snomed.is_none() && self.icd10.is_empty() && self.loinc.is_none()
    }

    /// Iterates over all codes.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.loinc
            .iter()
            .chain(self.snomed.iter())
            .chain(self.icd10.iter())
            .map(String::as_str)
    }

    /// Returns true if any code equals `code`, ignoring case.
    pub fn matches(&self, code: &str) -> bool {
        let code = code.trim();
        !code.is_empty() && self.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}

/// The coded primary condition of a criterion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrimaryCondition {
    /// Preferred term.
    pub term: String,
    /// Coded identifiers of the term.
    #[serde(default)]
    pub codes: ConceptCodes,
    /// Alternative names used when resolving dependencies.
    #[serde(default)]
    pub synonyms: Vec<String>,
}

impl PrimaryCondition {
    /// Creates an uncoded condition from a bare term.
    pub fn uncoded(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            codes: ConceptCodes::default(),
            synonyms: Vec::new(),
        }
    }
}

/// Verdict a dependency target must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredState {
    /// The target must be met (`if`, `provided that`).
    #[default]
    Met,
    /// The target must not be met (`unless`).
    NotMet,
}

impl fmt::Display for RequiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequiredState::Met => write!(f, "met"),
            RequiredState::NotMet => write!(f, "not_met"),
        }
    }
}

/// A resolved edge: `criterion_id` may only be evaluated once
/// `required_criterion_id` reaches `required_state`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Criterion that depends on the target.
    pub criterion_id: String,
    /// Criterion whose verdict is required.
    pub required_criterion_id: String,
    /// Verdict the target must have.
    #[serde(default)]
    pub required_state: RequiredState,
}

/// A conditional hint that could not be linked to another criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedDependency {
    /// Hint text as written.
    pub hint: String,
    /// State the hint asked for.
    #[serde(default)]
    pub required_state: RequiredState,
    /// Why no target could be chosen.
    pub reason: String,
}

/// Confidence in a compiled criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Compiled from a normalized concept.
    #[default]
    High,
    /// Compiled without a usable normalizer response.
    Low,
}

/// One admission criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Identifier of the form `criterion_NNN`.
    pub criterion_id: String,
    /// Criterion text as written in the guideline.
    pub criterion_text: String,
    /// Clinical domain.
    pub clinical_category: ClinicalCategory,
    /// Severity, temporal and persistence qualifiers.
    #[serde(default)]
    pub qualifiers: Qualifiers,
    /// The condition the criterion is about.
    pub primary_condition: PrimaryCondition,
    /// Root of the rule tree.
    pub matching_conditions: MatchingConditionGroup,
    /// Criteria whose verdicts gate this one.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Conditional hints that could not be linked.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_dependencies: Vec<UnresolvedDependency>,
    /// How the criterion was compiled.
    #[serde(default)]
    pub confidence: Confidence,
    /// Numbered references cited in the text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_citations: Vec<u32>,
}

impl Criterion {
    /// Creates a criterion with an uncoded primary condition taken from the
    /// text and category `other`.
    pub fn new(
        criterion_id: impl Into<String>,
        criterion_text: impl Into<String>,
        matching_conditions: MatchingConditionGroup,
    ) -> Self {
        let criterion_text = criterion_text.into();
        Self {
            criterion_id: criterion_id.into(),
            primary_condition: PrimaryCondition::uncoded(criterion_text.clone()),
            criterion_text,
            clinical_category: ClinicalCategory::Other,
            qualifiers: Qualifiers::default(),
            matching_conditions,
            dependencies: Vec::new(),
            unresolved_dependencies: Vec::new(),
            confidence: Confidence::High,
            evidence_citations: Vec::new(),
        }
    }

    /// Sets the clinical category.
    pub fn with_category(mut self, category: ClinicalCategory) -> Self {
        self.clinical_category = category;
        self
    }

    /// Sets the primary condition.
    pub fn with_primary_condition(mut self, primary: PrimaryCondition) -> Self {
        self.primary_condition = primary;
        self
    }

    /// Adds a dependency on another criterion.
    pub fn with_dependency(
        mut self,
        required_criterion_id: impl Into<String>,
        required_state: RequiredState,
    ) -> Self {
        self.dependencies.push(Dependency {
            criterion_id: self.criterion_id.clone(),
            required_criterion_id: required_criterion_id.into(),
            required_state,
        });
        self
    }
}

// =============================================================================
// Matching conditions
// =============================================================================

/// Boolean combinator of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicOperator {
    /// All children must hold.
    And,
    /// At least one child must hold.
    #[default]
    Or,
}

impl fmt::Display for LogicOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicOperator::And => write!(f, "AND"),
            LogicOperator::Or => write!(f, "OR"),
        }
    }
}

/// Child of a [`MatchingConditionGroup`]: a leaf condition or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum MatchingNode {
    /// A leaf comparison.
    Condition(MatchingCondition),
    /// A nested group.
    Group(MatchingConditionGroup),
}

impl From<MatchingCondition> for MatchingNode {
    fn from(condition: MatchingCondition) -> Self {
        MatchingNode::Condition(condition)
    }
}

impl From<MatchingConditionGroup> for MatchingNode {
    fn from(group: MatchingConditionGroup) -> Self {
        MatchingNode::Group(group)
    }
}

/// A boolean (AND/OR) combination of conditions and nested groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchingConditionGroup {
    /// How the children combine.
    pub logic_operator: LogicOperator,
    /// Optional label for the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Child conditions and groups.
    #[serde(default)]
    pub conditions: Vec<MatchingNode>,
}

impl MatchingConditionGroup {
    /// Creates a group with the given operator and children.
    pub fn new(logic_operator: LogicOperator, conditions: Vec<MatchingNode>) -> Self {
        Self {
            logic_operator,
            description: None,
            conditions,
        }
    }

    /// OR over the given children.
    pub fn any<I, N>(conditions: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<MatchingNode>,
    {
        Self::new(LogicOperator::Or, conditions.into_iter().map(Into::into).collect())
    }

    /// AND over the given children.
    pub fn all<I, N>(conditions: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<MatchingNode>,
    {
        Self::new(LogicOperator::And, conditions.into_iter().map(Into::into).collect())
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Collects all leaf conditions, depth first.
    pub fn leaves(&self) -> Vec<&MatchingCondition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a MatchingCondition>) {
        for node in &self.conditions {
            match node {
                MatchingNode::Condition(c) => out.push(c),
                MatchingNode::Group(g) => g.collect_leaves(out),
            }
        }
    }

    /// Number of leaf conditions in the tree.
    pub fn leaf_count(&self) -> usize {
        self.conditions
            .iter()
            .map(|node| match node {
                MatchingNode::Condition(_) => 1,
                MatchingNode::Group(g) => g.leaf_count(),
            })
            .sum()
    }
}

impl fmt::Display for MatchingConditionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.logic_operator)?;
        for (i, node) in self.conditions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match node {
                MatchingNode::Condition(c) => write!(f, "{c}")?,
                MatchingNode::Group(g) => write!(f, "{g}")?,
            }
        }
        write!(f, "]")
    }
}

/// Kind of patient data a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Vital signs such as heart rate.
    VitalSign,
    /// Laboratory results.
    Laboratory,
    /// Scores and derived assessments.
    ClinicalAssessment,
    /// Findings without a specific table.
    ClinicalFinding,
}

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    /// Strictly less than `value`.
    LessThan,
    /// Strictly greater than `value`.
    GreaterThan,
    /// Numeric equality or case-insensitive string match.
    Equals,
    /// Between `value_min` and `value_max`, exclusive unless marked inclusive.
    Between,
    /// Case-insensitive substring match on text data.
    Contains,
}

impl ComparisonOperator {
    /// Returns the persisted name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessThan => "less_than",
            Self::GreaterThan => "greater_than",
            Self::Equals => "equals",
            Self::Between => "between",
            Self::Contains => "contains",
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "less_than" | "lt" | "<" => Ok(Self::LessThan),
            "greater_than" | "gt" | ">" => Ok(Self::GreaterThan),
            "equals" | "equal" | "eq" | "=" | "==" => Ok(Self::Equals),
            "between" | "range" => Ok(Self::Between),
            "contains" => Ok(Self::Contains),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threshold value: number, boolean or text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    /// `true` / `false`.
    Bool(bool),
    /// A numeric threshold.
    Number(f64),
    /// A text value such as `positive`.
    Text(String),
}

impl ThresholdValue {
    /// Returns the numeric value, coercing numeric text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ThresholdValue::Number(n) => Some(*n),
            ThresholdValue::Text(s) => s.trim().parse().ok(),
            ThresholdValue::Bool(_) => None,
        }
    }

    /// Returns the text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ThresholdValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdValue::Bool(b) => write!(f, "{b}"),
            ThresholdValue::Number(n) => write!(f, "{n}"),
            ThresholdValue::Text(s) => write!(f, "{s}"),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// An atomic comparison against one patient parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingCondition {
    /// Canonical `snake_case` parameter name.
    pub parameter: String,
    /// Where the parameter is usually recorded.
    pub data_type: DataType,
    /// Comparison to apply.
    pub operator: ComparisonOperator,
    /// Threshold for `less_than`, `greater_than`, `equals` and `contains`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ThresholdValue>,
    /// Lower bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
    /// Whether the lower bound is included.
    #[serde(default, skip_serializing_if = "is_false")]
    pub min_inclusive: bool,
    /// Whether the upper bound is included.
    #[serde(default, skip_serializing_if = "is_false")]
    pub max_inclusive: bool,
    /// Unit of the threshold.
    #[serde(default)]
    pub unit: String,
    /// Codes matched against datum codes when no name matches.
    #[serde(default, skip_serializing_if = "ConceptCodes::is_empty")]
    pub codes: ConceptCodes,
    /// Threshold text the condition was parsed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_text: Option<String>,
}

impl MatchingCondition {
    fn base(parameter: impl Into<String>, data_type: DataType, operator: ComparisonOperator) -> Self {
        Self {
            parameter: parameter.into(),
            data_type,
            operator,
            value: None,
            value_min: None,
            value_max: None,
            min_inclusive: false,
            max_inclusive: false,
            unit: String::new(),
            codes: ConceptCodes::default(),
            threshold_text: None,
        }
    }

    /// `parameter < value`.
    pub fn less_than(parameter: impl Into<String>, data_type: DataType, value: f64) -> Self {
        let mut c = Self::base(parameter, data_type, ComparisonOperator::LessThan);
        c.value = Some(ThresholdValue::Number(value));
        c
    }

    /// `parameter > value`.
    pub fn greater_than(parameter: impl Into<String>, data_type: DataType, value: f64) -> Self {
        let mut c = Self::base(parameter, data_type, ComparisonOperator::GreaterThan);
        c.value = Some(ThresholdValue::Number(value));
        c
    }

    /// `parameter == value`.
    pub fn equals(parameter: impl Into<String>, data_type: DataType, value: ThresholdValue) -> Self {
        let mut c = Self::base(parameter, data_type, ComparisonOperator::Equals);
        c.value = Some(value);
        c
    }

    /// `min < parameter < max`.
    pub fn between(parameter: impl Into<String>, data_type: DataType, min: f64, max: f64) -> Self {
        let mut c = Self::base(parameter, data_type, ComparisonOperator::Between);
        c.value_min = Some(min);
        c.value_max = Some(max);
        c
    }

    /// `parameter` contains `text`.
    pub fn contains(parameter: impl Into<String>, data_type: DataType, text: impl Into<String>) -> Self {
        let mut c = Self::base(parameter, data_type, ComparisonOperator::Contains);
        c.value = Some(ThresholdValue::Text(text.into()));
        c
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the coded identifiers.
    pub fn with_codes(mut self, codes: ConceptCodes) -> Self {
        self.codes = codes;
        self
    }

    /// Marks the `between` bounds as inclusive.
    pub fn inclusive(mut self, min_inclusive: bool, max_inclusive: bool) -> Self {
        self.min_inclusive = min_inclusive;
        self.max_inclusive = max_inclusive;
        self
    }
}

impl fmt::Display for MatchingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.operator, self.parameter)?;
        match (self.operator, &self.value) {
            (ComparisonOperator::Between, _) => {
                let bound = |v: Option<f64>| v.map_or_else(|| "?".to_string(), |v| v.to_string());
                write!(f, ", {}, {}", bound(self.value_min), bound(self.value_max))?;
            }
            (_, Some(value)) => write!(f, ", {value}")?,
            (_, None) => {}
        }
        if !self.unit.is_empty() {
            write!(f, " {}", self.unit)?;
        }
        write!(f, ")")
    }
}

// =============================================================================
// Alternatives
// =============================================================================

/// Care setting of an alternative to admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareSetting {
    /// Hospital observation unit.
    ObservationUnit,
    /// Emergency department management.
    EmergencyDepartment,
    /// Outpatient follow-up.
    Outpatient,
    /// Care at home.
    HomeCare,
    /// Outpatient infusion center.
    InfusionCenter,
    /// Any other setting.
    #[default]
    AlternativeCare,
}

impl CareSetting {
    /// Classifies a care setting from free text.
    pub fn from_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("observation") {
            Self::ObservationUnit
        } else if lower.contains("emergency") || lower.contains("ed ") {
            Self::EmergencyDepartment
        } else if lower.contains("outpatient") {
            Self::Outpatient
        } else if lower.contains("home") {
            Self::HomeCare
        } else if lower.contains("infusion") {
            Self::InfusionCenter
        } else {
            Self::AlternativeCare
        }
    }
}

/// A care option offered instead of inpatient admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    /// Identifier of the form `alt_NNN`.
    pub alternative_id: String,
    /// The alternative as written.
    pub description: String,
    /// Setting the alternative takes place in.
    #[serde(default)]
    pub care_setting: CareSetting,
    /// Conditions for choosing the alternative.
    #[serde(default)]
    pub requirements: Vec<String>,
}
