//! Structural extraction of criterion components from free text.
//!
//! The extractor is purely lexical: it finds qualifiers, a conditional
//! clause, a clinical category, the primary phrase and evidence citations
//! using the tables of a [`Vocabulary`]. It never resolves anything; the
//! conditional clause is kept as a raw hint for the rule compiler.
//!
//! # Example
//!
//! ```rust
//! use guideline_criteria::{extract, ClinicalCategory, Vocabulary};
//!
//! let draft = extract(
//!     "Severe hypotension persisting for more than 30 minutes despite fluids",
//!     &Vocabulary::default(),
//! )
//! .unwrap();
//!
//! assert!(draft.qualifiers.severity.contains("severe"));
//! assert_eq!(draft.qualifiers.temporal, "for more than 30 minutes");
//! assert_eq!(draft.clinical_category, ClinicalCategory::Hemodynamic);
//! assert_eq!(draft.primary_phrase, "Severe hypotension persisting for more than 30 minutes");
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map_res, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::error::{CriteriaError, CriteriaResult};
use crate::model::{ClinicalCategory, Qualifiers, RequiredState};
use crate::text::{clause_len, find_word, find_word_from};
use crate::vocabulary::{ConditionalMarker, Vocabulary};

/// A raw conditional clause found in a criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalClause {
    /// Marker phrase as listed in the vocabulary (e.g. `"unless"`).
    pub marker: String,
    /// State the referenced criterion must reach.
    pub required_state: RequiredState,
    /// Clause text following the marker.
    pub hint: String,
}

/// Output of [`extract`]: the lexical components of one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionDraft {
    /// Whitespace-normalized criterion text.
    pub criterion_text: String,
    /// Severity, temporal and persistence qualifiers.
    pub qualifiers: Qualifiers,
    /// The first conditional clause, if any.
    pub conditional_clause: Option<ConditionalClause>,
    /// Category from the keyword families.
    pub clinical_category: ClinicalCategory,
    /// Leading noun phrase, used when no normalized concept is available.
    pub primary_phrase: String,
    /// Numeric references such as `(3)` in text order.
    pub evidence_citations: Vec<u32>,
    /// True when no category keyword matched.
    pub ambiguous: bool,
}

/// Extracts the components of one criterion.
///
/// Returns [`CriteriaError::EmptyCriterion`] for empty or whitespace-only text.
pub fn extract(text: &str, vocabulary: &Vocabulary) -> CriteriaResult<CriterionDraft> {
    let criterion_text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if criterion_text.is_empty() {
        return Err(CriteriaError::EmptyCriterion);
    }
    // ASCII lowercasing keeps byte offsets aligned with `criterion_text`.
    let lower = criterion_text.to_ascii_lowercase();

    let qualifiers = Qualifiers {
        severity: vocabulary
            .severity_terms
            .iter()
            .filter(|term| find_word(&lower, &term.to_ascii_lowercase()).is_some())
            .map(|term| term.to_ascii_lowercase())
            .collect(),
        temporal: temporal_qualifier(&criterion_text, &lower, vocabulary),
        persistence: persistence_qualifier(&criterion_text, &lower, vocabulary),
    };

    let conditional_clause = conditional_clause(&criterion_text, &lower, vocabulary);

    let (clinical_category, ambiguous) = match classify(&lower, vocabulary) {
        Some(category) => (category, false),
        None => {
            tracing::debug!(criterion = %criterion_text, "no category keyword matched");
            (ClinicalCategory::Other, true)
        }
    };

    let primary_phrase = primary_phrase(&criterion_text, vocabulary);
    let evidence_citations = evidence_citations(&criterion_text);

    Ok(CriterionDraft {
        criterion_text,
        qualifiers,
        conditional_clause,
        clinical_category,
        primary_phrase,
        evidence_citations,
        ambiguous,
    })
}

// ============================================================================
// Qualifiers
// ============================================================================

/// A matched span of the criterion text.
#[derive(Debug)]
struct Span {
    start: usize,
    end: usize,
}

/// Orders spans by start, longest first, and drops spans that begin inside
/// an already accepted span.
fn non_overlapping(mut spans: Vec<Span>) -> Vec<Span> {
    spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    let mut accepted: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        if accepted.last().is_some_and(|last| span.start < last.end) {
            continue;
        }
        accepted.push(span);
    }
    accepted
}

fn temporal_qualifier(text: &str, lower: &str, vocabulary: &Vocabulary) -> String {
    let mut spans = Vec::new();
    for term in &vocabulary.temporal_terms {
        let term = term.to_ascii_lowercase();
        if let Some(start) = find_word(lower, &term) {
            spans.push(Span { start, end: start + term.len() });
        }
    }
    for start in word_starts(lower) {
        if let Ok((rest, _)) = duration_phrase(&lower[start..]) {
            if !rest.chars().next().is_some_and(char::is_alphanumeric) {
                spans.push(Span { start, end: lower.len() - rest.len() });
            }
        }
    }

    non_overlapping(spans)
        .iter()
        .map(|span| &text[span.start..span.end])
        .collect::<Vec<_>>()
        .join(", ")
}

fn persistence_qualifier(text: &str, lower: &str, vocabulary: &Vocabulary) -> String {
    let mut spans = Vec::new();
    for marker in &vocabulary.persistence_markers {
        let marker = marker.to_ascii_lowercase();
        if let Some(start) = find_word(lower, &marker) {
            let after = start + marker.len();
            let end = after + clause_len(&lower[after..]);
            spans.push(Span { start, end });
        }
    }

    non_overlapping(spans)
        .iter()
        .map(|span| text[span.start..span.end].trim())
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn word_starts(lower: &str) -> impl Iterator<Item = usize> + '_ {
    let mut previous_alphanumeric = false;
    lower.char_indices().filter_map(move |(i, c)| {
        let starts = c.is_alphanumeric() && !previous_alphanumeric;
        previous_alphanumeric = c.is_alphanumeric();
        starts.then_some(i)
    })
}

/// `for|over|within|after|lasting [more than|at least|greater than|less than] N unit`
fn duration_phrase(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        alt((tag("for"), tag("over"), tag("within"), tag("after"), tag("lasting"))),
        multispace1,
        opt(terminated(
            alt((tag("more than"), tag("at least"), tag("greater than"), tag("less than"))),
            multispace1,
        )),
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        multispace0,
        alt((
            tag("minutes"),
            tag("minute"),
            tag("mins"),
            tag("min"),
            tag("hours"),
            tag("hour"),
            tag("hrs"),
            tag("hr"),
            tag("days"),
            tag("day"),
            tag("weeks"),
            tag("week"),
        )),
    )))(input)
}

// ============================================================================
// Conditional clause
// ============================================================================

fn conditional_clause(text: &str, lower: &str, vocabulary: &Vocabulary) -> Option<ConditionalClause> {
    let (start, marker) = first_marker(lower, vocabulary)?;
    let after = start + marker.phrase.len();
    let clause = &text[after..];
    let clause = clause.trim_start();
    let hint = clause[..clause_len(clause)].trim();
    if hint.is_empty() {
        return None;
    }
    Some(ConditionalClause {
        marker: marker.phrase.clone(),
        required_state: marker.required_state,
        hint: hint.to_string(),
    })
}

/// Earliest conditional marker; ties go to the longest phrase.
fn first_marker<'v>(
    lower: &str,
    vocabulary: &'v Vocabulary,
) -> Option<(usize, &'v ConditionalMarker)> {
    vocabulary
        .conditional_markers
        .iter()
        .filter_map(|marker| find_word(lower, &marker.phrase.to_ascii_lowercase()).map(|i| (i, marker)))
        .min_by(|(a, ma), (b, mb)| a.cmp(b).then(mb.phrase.len().cmp(&ma.phrase.len())))
}

// ============================================================================
// Category
// ============================================================================

fn classify(lower: &str, vocabulary: &Vocabulary) -> Option<ClinicalCategory> {
    vocabulary
        .category_families
        .iter()
        .find(|family| {
            family
                .keywords
                .iter()
                .any(|keyword| find_word(lower, &keyword.to_ascii_lowercase()).is_some())
        })
        .map(|family| family.category.clone())
}

// ============================================================================
// Primary phrase
// ============================================================================

fn primary_phrase(text: &str, vocabulary: &Vocabulary) -> String {
    let stripped = strip_enclosed(text);
    let lower = stripped.to_ascii_lowercase();

    // Drop the conditional clause (marker and hint).
    let mut working = stripped.clone();
    if let Some((start, marker)) = first_marker(&lower, vocabulary) {
        let after = start + marker.phrase.len();
        let rest = &lower[after..];
        let skipped = rest.len() - rest.trim_start().len();
        let end = after + skipped + clause_len(&rest[skipped..]);
        working = format!("{}{}", &stripped[..start], &stripped[end..]);
    }
    let working_lower = working.to_ascii_lowercase();

    // Cut before the first splitter word that is not the first word.
    let cut = vocabulary
        .primary_splitters
        .iter()
        .filter_map(|splitter| {
            let splitter = splitter.to_ascii_lowercase();
            let mut from = 0;
            while let Some(i) = find_word_from(&working_lower, &splitter, from) {
                if !working_lower[..i].trim().is_empty() {
                    return Some(i);
                }
                from = i + splitter.len();
            }
            None
        })
        .min()
        .unwrap_or(working.len());

    let phrase = working[..cut]
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '.' | '-'));
    if phrase.is_empty() {
        stripped.trim().to_string()
    } else {
        phrase.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Removes `(...)` and `[...]` groups, including nested ones.
fn strip_enclosed(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Evidence citations
// ============================================================================

fn citation_list(input: &str) -> IResult<&str, Vec<u32>> {
    let numbers = || {
        separated_list1(
            tuple((multispace0, char(','), multispace0)),
            map_res(digit1, str::parse::<u32>),
        )
    };
    alt((
        delimited(pair(char('('), multispace0), numbers(), pair(multispace0, char(')'))),
        delimited(pair(char('['), multispace0), numbers(), pair(multispace0, char(']'))),
    ))(input)
}

fn evidence_citations(text: &str) -> Vec<u32> {
    let mut citations = Vec::new();
    for (i, c) in text.char_indices() {
        if c != '(' && c != '[' {
            continue;
        }
        if let Ok((_, numbers)) = citation_list(&text[i..]) {
            for n in numbers {
                if !citations.contains(&n) {
                    citations.push(n);
                }
            }
        }
    }
    citations
}
