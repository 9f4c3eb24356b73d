//! Resolution of free-text dependency hints into criterion edges.
//!
//! A hint such as "blood cultures were performed" is linked to the
//! criterion whose primary term (or a synonym) it mentions. Matching is
//! done on significant tokens: stopwords are dropped and a plural `s` is
//! stripped. A candidate qualifies when all tokens of one of its terms
//! appear in the hint, or all tokens of the hint appear in the term; the
//! candidate with the largest overlap wins and ties go to the earlier
//! criterion. Hints that match nothing, or whose edge would close a
//! dependency cycle, are recorded as unresolved on the criterion.

use std::collections::{BTreeSet, HashMap};

use guideline_criteria::text::tokens;
use guideline_criteria::{Criterion, Dependency, RequiredState, UnresolvedDependency};
use tracing::{debug, warn};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "to", "in", "on", "at", "for", "by", "as", "from", "with", "and",
    "or", "is", "are", "was", "were", "be", "been", "being", "has", "have", "had", "that",
    "this", "there", "any", "than", "more", "less", "patient", "patients",
];

/// A dependency hint waiting to be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyHint {
    /// Free-text reference to another criterion.
    pub text: String,
    /// Verdict the referenced criterion must reach.
    pub required_state: RequiredState,
}

impl DependencyHint {
    /// Creates a hint.
    pub fn new(text: impl Into<String>, required_state: RequiredState) -> Self {
        Self {
            text: text.into(),
            required_state,
        }
    }
}

/// A hint that could not be turned into an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedHint {
    /// Criterion the hint belongs to.
    pub criterion_id: String,
    /// The recorded unresolved dependency.
    pub dependency: UnresolvedDependency,
}

/// Links dependency hints to criteria by token overlap.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    stopwords: BTreeSet<String>,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(STOPWORDS.iter().copied())
    }
}

impl DependencyResolver {
    /// Creates a resolver with a custom stopword list.
    pub fn new<I, S>(stopwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stopwords: stopwords
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .collect(),
        }
    }

    fn significant(&self, text: &str) -> BTreeSet<String> {
        tokens(text)
            .into_iter()
            .filter(|t| !self.stopwords.contains(t))
            .map(|t| stem(&t))
            .collect()
    }

    /// Finds the criterion a hint refers to, excluding `source`.
    pub fn find_target(&self, hint: &str, source: usize, criteria: &[Criterion]) -> Option<usize> {
        let hint_tokens = self.significant(hint);
        if hint_tokens.is_empty() {
            return None;
        }
        self.best_match(&hint_tokens, source, criteria)
    }

    fn best_match(
        &self,
        hint_tokens: &BTreeSet<String>,
        source: usize,
        criteria: &[Criterion],
    ) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (index, candidate) in criteria.iter().enumerate() {
            if index == source {
                continue;
            }
            let primary = &candidate.primary_condition;
            let score = std::iter::once(&primary.term)
                .chain(primary.synonyms.iter())
                .map(|term| self.significant(term))
                .filter(|term| !term.is_empty())
                .filter(|term| term.is_subset(hint_tokens) || hint_tokens.is_subset(term))
                .map(|term| term.intersection(hint_tokens).count())
                .max();
            if let Some(score) = score {
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((index, score));
                }
            }
        }
        best.map(|(index, _)| index)
    }

    /// Resolves the hints of every criterion, adding edges in place.
    ///
    /// `hints[i]` belongs to `criteria[i]`. Existing dependencies are kept
    /// and taken into account for cycle detection. Returns the hints that
    /// were recorded as unresolved.
    pub fn resolve(
        &self,
        criteria: &mut [Criterion],
        hints: &[Vec<DependencyHint>],
    ) -> Vec<UnresolvedHint> {
        let index_of: HashMap<String, usize> = criteria
            .iter()
            .enumerate()
            .map(|(i, c)| (c.criterion_id.clone(), i))
            .collect();
        let mut edges: Vec<Vec<usize>> = criteria
            .iter()
            .map(|c| {
                c.dependencies
                    .iter()
                    .filter_map(|d| index_of.get(&d.required_criterion_id).copied())
                    .collect()
            })
            .collect();

        let mut unresolved = Vec::new();
        for (source, criterion_hints) in hints.iter().enumerate().take(criteria.len()) {
            for hint in criterion_hints {
                let outcome = match self.find_target(&hint.text, source, criteria) {
                    None => Err("no criterion matches the hint".to_string()),
                    Some(target) => match path_between(&edges, target, source) {
                        Some(path) => {
                            let ids: Vec<&str> = std::iter::once(source)
                                .chain(path)
                                .map(|i| criteria[i].criterion_id.as_str())
                                .collect();
                            Err(format!("would create dependency cycle: {}", ids.join(" -> ")))
                        }
                        None => Ok(target),
                    },
                };

                let source_id = criteria[source].criterion_id.clone();
                match outcome {
                    Ok(target) => {
                        let target_id = criteria[target].criterion_id.clone();
                        let dependency = Dependency {
                            criterion_id: source_id.clone(),
                            required_criterion_id: target_id.clone(),
                            required_state: hint.required_state,
                        };
                        if criteria[source].dependencies.contains(&dependency) {
                            continue;
                        }
                        debug!(
                            criterion = %source_id,
                            target = %target_id,
                            state = %hint.required_state,
                            hint = %hint.text,
                            "resolved dependency hint"
                        );
                        criteria[source].dependencies.push(dependency);
                        edges[source].push(target);
                    }
                    Err(reason) => {
                        warn!(criterion = %source_id, hint = %hint.text, %reason, "unresolved dependency hint");
                        let dependency = UnresolvedDependency {
                            hint: hint.text.clone(),
                            required_state: hint.required_state,
                            reason,
                        };
                        criteria[source]
                            .unresolved_dependencies
                            .push(dependency.clone());
                        unresolved.push(UnresolvedHint {
                            criterion_id: source_id,
                            dependency,
                        });
                    }
                }
            }
        }
        unresolved
    }
}

/// Strips a plural `s` so that "cultures" matches "culture".
fn stem(token: &str) -> String {
    let plural = token.len() > 3
        && token.ends_with('s')
        && !["ss", "is", "us"].iter().any(|end| token.ends_with(end));
    if plural {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Path `from -> ... -> to` along existing edges, if any.
fn path_between(edges: &[Vec<usize>], from: usize, to: usize) -> Option<Vec<usize>> {
    let mut visited = vec![false; edges.len()];
    let mut path = vec![from];
    if walk(edges, to, &mut visited, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn walk(edges: &[Vec<usize>], to: usize, visited: &mut [bool], path: &mut Vec<usize>) -> bool {
    let Some(&node) = path.last() else {
        return false;
    };
    if node == to {
        return true;
    }
    if visited[node] {
        return false;
    }
    visited[node] = true;
    for &next in &edges[node] {
        path.push(next);
        if walk(edges, to, visited, path) {
            return true;
        }
        path.pop();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use guideline_criteria::{
        criterion_id, DataType, MatchingCondition, MatchingConditionGroup, PrimaryCondition,
    };

    fn criterion(n: usize, term: &str, synonyms: &[&str]) -> Criterion {
        Criterion::new(
            criterion_id(n),
            term,
            MatchingConditionGroup::any([MatchingCondition::greater_than(
                "heart_rate",
                DataType::VitalSign,
                100.0,
            )]),
        )
        .with_primary_condition(PrimaryCondition {
            term: term.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            ..PrimaryCondition::default()
        })
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("cultures"), "culture");
        assert_eq!(stem("status"), "status");
        assert_eq!(stem("abscess"), "abscess");
        assert_eq!(stem("gas"), "gas");
    }

    #[test]
    fn test_blood_culture_hint_resolves() {
        let mut criteria = vec![
            criterion(1, "Blood cultures performed", &[]),
            criterion(2, "Bacteremia", &[]),
        ];
        let hints = vec![
            vec![],
            vec![DependencyHint::new("blood cultures were performed", RequiredState::Met)],
        ];
        let unresolved = DependencyResolver::default().resolve(&mut criteria, &hints);

        assert!(unresolved.is_empty());
        assert_eq!(criteria[1].dependencies.len(), 1);
        assert_eq!(criteria[1].dependencies[0].required_criterion_id, "criterion_001");
        assert_eq!(criteria[1].dependencies[0].required_state, RequiredState::Met);
    }

    #[test]
    fn test_synonym_match() {
        let criteria = vec![
            criterion(1, "Fever", &[]),
            criterion(2, "Altered mental status", &["Confusion"]),
        ];
        let target = DependencyResolver::default().find_target("new confusion", 0, &criteria);
        assert_eq!(target, Some(1));
    }

    #[test]
    fn test_best_overlap_wins_and_ties_go_first() {
        let criteria = vec![
            criterion(1, "Source", &[]),
            criterion(2, "Renal failure", &[]),
            criterion(3, "Acute renal failure", &[]),
            criterion(4, "Renal failure", &[]),
        ];
        let resolver = DependencyResolver::default();
        assert_eq!(resolver.find_target("acute renal failure", 0, &criteria), Some(2));
        assert_eq!(resolver.find_target("renal failure", 0, &criteria), Some(1));
    }

    #[test]
    fn test_self_is_excluded() {
        let criteria = vec![criterion(1, "Sepsis", &[])];
        assert_eq!(DependencyResolver::default().find_target("sepsis", 0, &criteria), None);
    }

    #[test]
    fn test_unmatched_hint_is_recorded() {
        let mut criteria = vec![criterion(1, "Dehydration", &[]), criterion(2, "Fever", &[])];
        let hints = vec![
            vec![DependencyHint::new("able to tolerate oral fluids", RequiredState::NotMet)],
            vec![],
        ];
        let unresolved = DependencyResolver::default().resolve(&mut criteria, &hints);

        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].criterion_id, "criterion_001");
        assert!(criteria[0].dependencies.is_empty());
        let recorded = &criteria[0].unresolved_dependencies[0];
        assert_eq!(recorded.hint, "able to tolerate oral fluids");
        assert_eq!(recorded.required_state, RequiredState::NotMet);
        assert_eq!(recorded.reason, "no criterion matches the hint");
    }

    #[test]
    fn test_stopword_only_hint_is_unresolved() {
        let mut criteria = vec![criterion(1, "Fever", &[]), criterion(2, "The patient", &[])];
        let hints = vec![vec![DependencyHint::new("there is more", RequiredState::Met)], vec![]];
        let unresolved = DependencyResolver::default().resolve(&mut criteria, &hints);
        assert_eq!(unresolved.len(), 1);
    }

    #[test]
    fn test_cycle_closing_edge_is_skipped() {
        let mut criteria = vec![criterion(1, "Hypotension", &[]), criterion(2, "Lactate elevation", &[])];
        let hints = vec![
            vec![DependencyHint::new("lactate elevation", RequiredState::Met)],
            vec![DependencyHint::new("hypotension", RequiredState::Met)],
        ];
        let unresolved = DependencyResolver::default().resolve(&mut criteria, &hints);

        assert_eq!(criteria[0].dependencies.len(), 1);
        assert!(criteria[1].dependencies.is_empty());
        assert_eq!(unresolved.len(), 1);
        assert_eq!(
            unresolved[0].dependency.reason,
            "would create dependency cycle: criterion_002 -> criterion_001 -> criterion_002"
        );
    }

    #[test]
    fn test_duplicate_hint_adds_one_edge() {
        let mut criteria = vec![criterion(1, "Fever", &[]), criterion(2, "Rash", &[])];
        let hints = vec![
            vec![],
            vec![
                DependencyHint::new("fever", RequiredState::Met),
                DependencyHint::new("documented fever", RequiredState::Met),
            ],
        ];
        DependencyResolver::default().resolve(&mut criteria, &hints);
        assert_eq!(criteria[1].dependencies.len(), 1);
    }
}
