//! Rule compilation: drafts plus normalized concepts into a schema.
//!
//! [`RuleCompiler`] joins each criterion draft with its normalizer outcome,
//! builds the matching-condition tree, merges category and qualifiers,
//! resolves dependency hints and validates the result. A criterion is
//! always compiled: when its outcome is missing or failed it falls back to
//! a single presence condition on its primary phrase with low confidence.
//!
//! [`GuidelineCompiler`] runs the whole pipeline from section text.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use guideline_criteria::text::normalize_key;
use guideline_criteria::{
    criterion_id, extract, parse_alternatives, segment_criteria, validate, Alternative,
    ClinicalCategory, Confidence, Criterion, CriterionDraft, DataType, GuidelineMetadata,
    GuidelineSchema, MatchingCondition, MatchingConditionGroup, MatchingNode, PrimaryCondition,
    Qualifiers, RequiredState, ThresholdValue, ValidationReport, Vocabulary,
};
use tracing::{debug, info, warn};

use crate::cache::NormalizationCache;
use crate::config::CompilerConfig;
use crate::error::{CompilerResult, NormalizationFailure, ResponseError};
use crate::normalizer::{ConceptNormalizer, NormalizationRequest};
use crate::resolver::{DependencyHint, DependencyResolver};
use crate::response::{FindingAssertion, NormalizerResponse};
use crate::service::{NormalizationOutcome, NormalizationService};
use crate::strategy::{ConnectiveStrategy, KeywordConnectiveStrategy};

// =============================================================================
// Report
// =============================================================================

/// Kind of a compilation warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// No category keyword matched and the normalizer did not supply one.
    AmbiguousCategory,
    /// The criterion was compiled without a usable normalizer response.
    NormalizationFailure,
    /// The normalizer response listed no findings.
    NoFindings,
    /// A dependency hint was not linked to another criterion.
    UnresolvedDependency,
}

/// A non-fatal problem found while compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationWarning {
    /// Criterion the warning concerns.
    pub criterion_id: String,
    /// What kind of problem this is.
    pub kind: WarningKind,
    /// Human-readable details.
    pub message: String,
}

impl fmt::Display for CompilationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.criterion_id, self.message)
    }
}

/// Summary of a compilation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationReport {
    /// Number of criteria in the schema.
    pub criteria_compiled: usize,
    /// Number of criteria compiled without a usable response.
    pub fallback_count: usize,
    /// Non-fatal problems, in criterion order.
    pub warnings: Vec<CompilationWarning>,
}

impl CompilationReport {
    /// Warnings of the given kind.
    pub fn warnings_of(&self, kind: WarningKind) -> impl Iterator<Item = &CompilationWarning> {
        self.warnings.iter().filter(move |w| w.kind == kind)
    }
}

/// A compiled schema with its compilation and validation reports.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledGuideline {
    /// The compiled schema.
    pub schema: GuidelineSchema,
    /// What happened during compilation.
    pub report: CompilationReport,
    /// Result of validating the schema.
    pub validation: ValidationReport,
}

// =============================================================================
// Rule compiler
// =============================================================================

/// Compiles criterion drafts and normalizer outcomes into a schema.
pub struct RuleCompiler {
    vocabulary: Vocabulary,
    strategy: Box<dyn ConnectiveStrategy>,
    resolver: DependencyResolver,
    minimum_criteria_count: usize,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(Vocabulary::default())
    }
}

impl fmt::Debug for RuleCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleCompiler")
            .field("vocabulary_version", &self.vocabulary.version)
            .field("minimum_criteria_count", &self.minimum_criteria_count)
            .finish()
    }
}

impl RuleCompiler {
    /// Creates a compiler with the keyword connective strategy.
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            strategy: Box::new(KeywordConnectiveStrategy::default()),
            resolver: DependencyResolver::default(),
            minimum_criteria_count: 1,
        }
    }

    /// Replaces the connective strategy.
    pub fn with_strategy(mut self, strategy: impl ConnectiveStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    /// Replaces the dependency resolver.
    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the minimum number of met criteria.
    pub fn with_minimum_criteria_count(mut self, count: usize) -> Self {
        self.minimum_criteria_count = count;
        self
    }

    /// Compiles drafts into a validated schema.
    ///
    /// Outcomes are matched to drafts by normalized criterion text, so
    /// their order does not matter.
    pub fn compile(
        &self,
        mut metadata: GuidelineMetadata,
        drafts: &[CriterionDraft],
        outcomes: &[NormalizationOutcome],
        alternatives: Vec<Alternative>,
    ) -> CompiledGuideline {
        info!(
            guideline = %metadata.guideline_id,
            criteria = drafts.len(),
            "compiling guideline"
        );

        let mut by_text: HashMap<String, &NormalizationOutcome> = HashMap::new();
        for outcome in outcomes {
            by_text
                .entry(normalize_key(&outcome.criterion_text))
                .or_insert(outcome);
        }

        let mut report = CompilationReport::default();
        let mut criteria = Vec::with_capacity(drafts.len());
        let mut hints = Vec::with_capacity(drafts.len());

        for (index, draft) in drafts.iter().enumerate() {
            let id = criterion_id(index + 1);
            let result = match by_text.get(&normalize_key(&draft.criterion_text)) {
                Some(outcome) => outcome.result.as_ref().map_err(Clone::clone),
                None => Err(NormalizationFailure::Missing),
            };
            let compiled = match result {
                Ok(response) => match self.from_response(&id, draft, response, &mut report) {
                    Ok(compiled) => compiled,
                    Err(error) => {
                        let failure = NormalizationFailure::Malformed(error);
                        self.fallback(&id, draft, failure, &mut report)
                    }
                },
                Err(failure) => self.fallback(&id, draft, failure, &mut report),
            };
            criteria.push(compiled.criterion);
            hints.push(compiled.hints);
        }

        for unresolved in self.resolver.resolve(&mut criteria, &hints) {
            report.warnings.push(CompilationWarning {
                criterion_id: unresolved.criterion_id,
                kind: WarningKind::UnresolvedDependency,
                message: format!(
                    "dependency hint '{}' unresolved: {}",
                    unresolved.dependency.hint, unresolved.dependency.reason
                ),
            });
        }
        report.warnings.sort_by(|a, b| a.criterion_id.cmp(&b.criterion_id));
        report.criteria_compiled = criteria.len();

        let now = Utc::now();
        if metadata.extraction_date.is_empty() {
            metadata.extraction_date = now.format("%Y-%m-%d").to_string();
        }
        let schema = GuidelineSchema::new(metadata, criteria, self.minimum_criteria_count)
            .with_alternatives(alternatives)
            .with_created(now);
        let validation = validate(&schema);

        info!(
            guideline = %schema.guideline_metadata.guideline_id,
            criteria = report.criteria_compiled,
            fallbacks = report.fallback_count,
            warnings = report.warnings.len(),
            valid = validation.ok,
            "compiled guideline"
        );

        CompiledGuideline {
            schema,
            report,
            validation,
        }
    }

    fn from_response(
        &self,
        id: &str,
        draft: &CriterionDraft,
        response: &NormalizerResponse,
        report: &mut CompilationReport,
    ) -> Result<CompiledCriterion, ResponseError> {
        let primary = response.primary_condition.clone();
        let group = if response.clinical_findings.is_empty() {
            report.warnings.push(CompilationWarning {
                criterion_id: id.to_string(),
                kind: WarningKind::NoFindings,
                message: "normalizer response has no clinical findings, using presence condition"
                    .to_string(),
            });
            self.presence_group(id, &primary)
        } else {
            let conditions = response
                .clinical_findings
                .iter()
                .map(|finding| self.condition(finding).map(MatchingNode::from))
                .collect::<Result<Vec<_>, _>>()?;
            let operator = self
                .strategy
                .connective(&draft.criterion_text, conditions.len());
            MatchingConditionGroup::new(operator, conditions).with_description(primary.term.clone())
        };

        let category = merge_category(draft, response.clinical_category.as_deref());
        if category == ClinicalCategory::Other && draft.ambiguous {
            report.warnings.push(ambiguity_warning(id));
        }

        let mut criterion = Criterion::new(id, draft.criterion_text.clone(), group)
            .with_category(category)
            .with_primary_condition(primary);
        criterion.qualifiers = merge_qualifiers(&draft.qualifiers, response);
        criterion.evidence_citations = draft.evidence_citations.clone();

        let mut hints = draft_hints(draft);
        hints.extend(
            response
                .dependencies_hint
                .iter()
                .filter(|h| !h.trim().is_empty())
                .map(|h| DependencyHint::new(h.trim(), RequiredState::Met)),
        );
        debug!(criterion = %id, leaves = criterion.matching_conditions.leaf_count(), "compiled criterion");

        Ok(CompiledCriterion {
            criterion,
            hints: dedup_hints(hints),
        })
    }

    fn fallback(
        &self,
        id: &str,
        draft: &CriterionDraft,
        failure: NormalizationFailure,
        report: &mut CompilationReport,
    ) -> CompiledCriterion {
        warn!(criterion = %id, %failure, "compiling criterion without normalized concept");
        report.fallback_count += 1;
        report.warnings.push(CompilationWarning {
            criterion_id: id.to_string(),
            kind: WarningKind::NormalizationFailure,
            message: failure.to_string(),
        });
        if draft.ambiguous {
            report.warnings.push(ambiguity_warning(id));
        }

        let term = if draft.primary_phrase.is_empty() {
            draft.criterion_text.clone()
        } else {
            draft.primary_phrase.clone()
        };
        let primary = PrimaryCondition::uncoded(term);
        let mut criterion =
            Criterion::new(id, draft.criterion_text.clone(), self.presence_group(id, &primary))
                .with_category(draft.clinical_category.clone())
                .with_primary_condition(primary);
        criterion.qualifiers = draft.qualifiers.clone();
        criterion.confidence = Confidence::Low;
        criterion.evidence_citations = draft.evidence_citations.clone();

        CompiledCriterion {
            criterion,
            hints: draft_hints(draft),
        }
    }

    /// A single condition asserting that the primary condition is present.
    ///
    /// A term with no letters or digits yields `<criterion id>_present`.
    fn presence_group(&self, id: &str, primary: &PrimaryCondition) -> MatchingConditionGroup {
        let mut parameter = self.vocabulary.canonical_parameter(&primary.term);
        if parameter.is_empty() {
            parameter = format!("{id}_present");
        }
        let condition = MatchingCondition::equals(
            parameter,
            DataType::ClinicalFinding,
            ThresholdValue::Bool(true),
        )
        .with_codes(primary.codes.clone());
        MatchingConditionGroup::any([condition]).with_description(primary.term.clone())
    }

    fn condition(&self, finding: &FindingAssertion) -> Result<MatchingCondition, ResponseError> {
        let threshold = finding.resolve_threshold()?;
        let parameter = self.vocabulary.canonical_parameter(&finding.parameter);
        if parameter.is_empty() {
            return Err(ResponseError::Shape {
                field: "parameter".to_string(),
                message: format!("'{}' has no usable name", finding.parameter),
            });
        }
        let data_type = self.vocabulary.data_type_for(&parameter);
        Ok(MatchingCondition {
            parameter,
            data_type,
            operator: threshold.operator,
            value: threshold.value,
            value_min: threshold.value_min,
            value_max: threshold.value_max,
            min_inclusive: false,
            max_inclusive: false,
            unit: threshold.unit.unwrap_or_default(),
            codes: finding.codes.clone().unwrap_or_default(),
            threshold_text: finding.threshold.clone(),
        })
    }
}

struct CompiledCriterion {
    criterion: Criterion,
    hints: Vec<DependencyHint>,
}

fn ambiguity_warning(id: &str) -> CompilationWarning {
    CompilationWarning {
        criterion_id: id.to_string(),
        kind: WarningKind::AmbiguousCategory,
        message: "no category keyword matched, classified as other".to_string(),
    }
}

/// A recognized category other than `other` from the response wins.
fn merge_category(draft: &CriterionDraft, proposed: Option<&str>) -> ClinicalCategory {
    match proposed.map(ClinicalCategory::parse) {
        Some(category) if category.is_recognized() && category != ClinicalCategory::Other => {
            category
        }
        _ => draft.clinical_category.clone(),
    }
}

fn merge_qualifiers(extracted: &Qualifiers, response: &NormalizerResponse) -> Qualifiers {
    let Some(proposed) = &response.qualifiers else {
        return extracted.clone();
    };
    let mut severity: BTreeSet<String> = extracted.severity.clone();
    severity.extend(
        proposed
            .severity
            .iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty()),
    );
    let pick = |own: &str, other: &Option<String>| {
        if own.is_empty() {
            other.as_deref().map(str::trim).unwrap_or_default().to_string()
        } else {
            own.to_string()
        }
    };
    Qualifiers {
        severity,
        temporal: pick(&extracted.temporal, &proposed.temporal),
        persistence: pick(&extracted.persistence, &proposed.persistence),
    }
}

fn draft_hints(draft: &CriterionDraft) -> Vec<DependencyHint> {
    draft
        .conditional_clause
        .iter()
        .map(|clause| DependencyHint::new(clause.hint.clone(), clause.required_state))
        .collect()
}

/// Drops hints whose text repeats an earlier one, ignoring case.
fn dedup_hints(hints: Vec<DependencyHint>) -> Vec<DependencyHint> {
    let mut seen = BTreeSet::new();
    hints
        .into_iter()
        .filter(|hint| seen.insert(normalize_key(&hint.text)))
        .collect()
}

// =============================================================================
// Pipeline
// =============================================================================

/// Criterion text of a guideline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCriteria {
    /// Raw section text, segmented into criteria.
    Section(String),
    /// Criteria already split into units.
    Units(Vec<String>),
}

/// Input to [`GuidelineCompiler::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuidelineSource {
    /// Guideline metadata.
    pub metadata: GuidelineMetadata,
    /// The admission criteria.
    pub criteria: SourceCriteria,
    /// Raw text of the alternatives-to-admission section.
    pub alternatives_text: Option<String>,
}

impl GuidelineSource {
    /// Source from raw admission-criteria section text.
    pub fn from_section(metadata: GuidelineMetadata, section_text: impl Into<String>) -> Self {
        Self {
            metadata,
            criteria: SourceCriteria::Section(section_text.into()),
            alternatives_text: None,
        }
    }

    /// Source from criteria that are already split.
    pub fn from_units<I, S>(metadata: GuidelineMetadata, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            metadata,
            criteria: SourceCriteria::Units(units.into_iter().map(Into::into).collect()),
            alternatives_text: None,
        }
    }

    /// Adds the alternatives-to-admission section text.
    pub fn with_alternatives(mut self, text: impl Into<String>) -> Self {
        self.alternatives_text = Some(text.into());
        self
    }
}

/// Runs segmentation, extraction, normalization and compilation.
///
/// # Example
///
/// ```rust
/// use guideline_compiler::{GuidelineCompiler, GuidelineSource, NormalizationRequest, NormalizerError};
/// use guideline_compiler::CompilerConfig;
/// use guideline_criteria::GuidelineMetadata;
///
/// let normalizer = |request: &NormalizationRequest| -> Result<String, NormalizerError> {
///     Err(NormalizerError::Rejected(format!("offline: {}", request.criterion_text)))
/// };
/// let compiler = GuidelineCompiler::new(normalizer, CompilerConfig::default()).unwrap();
///
/// let source = GuidelineSource::from_units(
///     GuidelineMetadata::from_name("Sepsis"),
///     ["Septic shock", "Lactate elevation despite fluids"],
/// );
/// let compiled = compiler.build(&source).unwrap();
///
/// assert_eq!(compiled.schema.criteria().len(), 2);
/// assert_eq!(compiled.report.fallback_count, 2);
/// assert!(compiled.validation.ok);
/// ```
pub struct GuidelineCompiler<N> {
    normalizer: Arc<N>,
    config: CompilerConfig,
    cache: Option<NormalizationCache>,
    rules: RuleCompiler,
}

impl<N: ConceptNormalizer + 'static> GuidelineCompiler<N> {
    /// Creates a compiler, checking the configuration.
    pub fn new(normalizer: N, config: CompilerConfig) -> CompilerResult<Self> {
        config.check()?;
        let cache = config.cache.clone().map(NormalizationCache::new);
        let rules = RuleCompiler::new(config.vocabulary.clone())
            .with_minimum_criteria_count(config.minimum_criteria_count);
        Ok(Self {
            normalizer: Arc::new(normalizer),
            config,
            cache,
            rules,
        })
    }

    /// Replaces the connective strategy.
    pub fn with_strategy(mut self, strategy: impl ConnectiveStrategy + 'static) -> Self {
        self.rules = self.rules.with_strategy(strategy);
        self
    }

    /// The normalization cache, when caching is enabled.
    pub fn cache(&self) -> Option<&NormalizationCache> {
        self.cache.as_ref()
    }

    /// The active configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles a guideline.
    pub fn build(&self, source: &GuidelineSource) -> CompilerResult<CompiledGuideline> {
        let units: Vec<String> = match &source.criteria {
            SourceCriteria::Section(text) => segment_criteria(text),
            SourceCriteria::Units(units) => units
                .iter()
                .filter(|u| !u.trim().is_empty())
                .cloned()
                .collect(),
        };

        let drafts = units
            .iter()
            .map(|unit| extract(unit, &self.config.vocabulary))
            .collect::<Result<Vec<_>, _>>()?;

        let context = source.metadata.guideline_name.clone();
        let requests: Vec<NormalizationRequest> = drafts
            .iter()
            .map(|d| NormalizationRequest::new(d.criterion_text.clone()).with_context(context.clone()))
            .collect();

        let mut service = NormalizationService::new(Arc::clone(&self.normalizer), &self.config);
        if let Some(cache) = &self.cache {
            service = service.with_cache(cache);
        }
        let outcomes = service.normalize_all(&requests)?;

        let alternatives = match (&source.alternatives_text, self.config.include_alternatives) {
            (Some(text), true) => parse_alternatives(text),
            _ => Vec::new(),
        };

        Ok(self
            .rules
            .compile(source.metadata.clone(), &drafts, &outcomes, alternatives))
    }
}
