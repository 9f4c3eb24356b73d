//! Normalizer response model and parsing.
//!
//! Services rarely return a bare JSON document: bodies come wrapped in
//! markdown fences or surrounded by prose. [`parse_response`] locates the
//! JSON object, deserializes it and enforces the shape the compiler relies
//! on. Any violation is a [`ResponseError`], which the compiler turns into a
//! fallback for the affected criterion only.
//!
//! # Example
//!
//! ```rust
//! use guideline_compiler::parse_response;
//! use guideline_criteria::ComparisonOperator;
//!
//! let body = concat!(
//!     "Here is the result:\n```json\n",
//!     r#"{"primary_condition": {"term": "Hypotension", "codes": {"snomed": "45007003"}},"#,
//!     r#" "clinical_findings": [{"parameter": "Systolic BP", "operator": "less_than","#,
//!     r#" "value": 90, "unit": "mmHg"}]}"#,
//!     "\n```",
//! );
//!
//! let response = parse_response(body).unwrap();
//! assert_eq!(response.primary_condition.term, "Hypotension");
//! let threshold = response.clinical_findings[0].resolve_threshold().unwrap();
//! assert_eq!(threshold.operator, ComparisonOperator::LessThan);
//! ```

use guideline_criteria::{
    parse_threshold, ComparisonOperator, ConceptCodes, ParsedThreshold, PrimaryCondition,
    ThresholdValue,
};
use guideline_criteria::text::snake_case;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ResponseError;

/// A well-formed normalizer response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizerResponse {
    /// The coded primary condition.
    pub primary_condition: PrimaryCondition,
    /// Measurable findings that make up the criterion.
    #[serde(default)]
    pub clinical_findings: Vec<FindingAssertion>,
    /// Free-text references to other criteria this one depends on.
    #[serde(default)]
    pub dependencies_hint: Vec<String>,
    /// Category proposed by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_category: Option<String>,
    /// Qualifiers proposed by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifiers: Option<ResponseQualifiers>,
}

/// Qualifiers as reported by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseQualifiers {
    /// Severity terms; a single string is accepted as a one-element list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub severity: Vec<String>,
    /// Temporal qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<String>,
    /// Persistence qualifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
    Null(Option<()>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Null(_) => Vec::new(),
    })
}

/// A value in a finding: a scalar or an inline range object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssertedValue {
    /// `{"value_min": 70, "value_max": 100}`.
    Range {
        /// Lower bound.
        value_min: f64,
        /// Upper bound.
        value_max: f64,
    },
    /// Number, boolean or text.
    Scalar(ThresholdValue),
}

/// One measurable finding asserted by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingAssertion {
    /// Parameter name as written by the service.
    pub parameter: String,
    /// Data type proposed by the service. Not trusted by the compiler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// Operator name (`less_than`, `<`, `between`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Comparison value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AssertedValue>,
    /// Lower bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_min: Option<f64>,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_max: Option<f64>,
    /// Unit of the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Codes of the measured parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes: Option<ConceptCodes>,
    /// Free-text threshold such as `"< 90 mmHg"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
}

impl FindingAssertion {
    /// Resolves operator, value and bounds into a single threshold.
    ///
    /// Explicit fields win. Fields that are missing are filled from the
    /// free-text `threshold`. Non-strict operators (`<=`, `>=`) are read as
    /// their strict counterparts.
    pub fn resolve_threshold(&self) -> Result<ParsedThreshold, ResponseError> {
        let declared = match self.operator.as_deref().map(str::trim) {
            Some(op) if !op.is_empty() => {
                Some(parse_operator(op).ok_or_else(|| {
                    ResponseError::shape("operator", format!("unknown operator '{op}'"))
                })?)
            }
            _ => None,
        };
        let from_text = match self.threshold.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => parse_threshold(text).ok(),
            _ => None,
        };

        let (mut value_min, mut value_max) = match &self.value {
            Some(AssertedValue::Range {
                value_min,
                value_max,
            }) => (Some(*value_min), Some(*value_max)),
            _ => (self.value_min, self.value_max),
        };
        let mut value = match &self.value {
            Some(AssertedValue::Scalar(v)) => Some(v.clone()),
            _ => None,
        };

        let operator = match declared {
            Some(op) => op,
            None if value_min.is_some() && value_max.is_some() => ComparisonOperator::Between,
            None if value.is_some() => ComparisonOperator::Equals,
            None => match &from_text {
                Some(parsed) => parsed.operator,
                None => return Err(ResponseError::shape("operator", "missing operator")),
            },
        };

        if let Some(parsed) = &from_text {
            if value.is_none() {
                value = parsed.value.clone();
            }
            if value_min.is_none() && value_max.is_none() {
                value_min = parsed.value_min;
                value_max = parsed.value_max;
            }
        }

        let resolved = match operator {
            ComparisonOperator::Between => {
                let (Some(min), Some(max)) = (value_min, value_max) else {
                    return Err(ResponseError::shape(
                        "value",
                        "between requires value_min and value_max",
                    ));
                };
                if !min.is_finite() || !max.is_finite() || min >= max {
                    return Err(ResponseError::shape(
                        "value",
                        format!("between bounds must satisfy min < max, got {min} and {max}"),
                    ));
                }
                ParsedThreshold {
                    operator,
                    value: None,
                    value_min: Some(min),
                    value_max: Some(max),
                    unit: None,
                }
            }
            ComparisonOperator::LessThan | ComparisonOperator::GreaterThan => {
                let number = value
                    .as_ref()
                    .and_then(ThresholdValue::as_f64)
                    .filter(|n| n.is_finite())
                    .ok_or_else(|| {
                        ResponseError::shape("value", format!("{operator} requires a numeric value"))
                    })?;
                numeric(operator, number)
            }
            ComparisonOperator::Equals => {
                let value = value.ok_or_else(|| {
                    ResponseError::shape("value", "equals requires a value")
                })?;
                ParsedThreshold {
                    operator,
                    value: Some(value),
                    value_min: None,
                    value_max: None,
                    unit: None,
                }
            }
            ComparisonOperator::Contains => {
                let text = value
                    .as_ref()
                    .and_then(ThresholdValue::as_text)
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| {
                        ResponseError::shape("value", "contains requires a text value")
                    })?;
                ParsedThreshold {
                    operator,
                    value: Some(ThresholdValue::Text(text.to_string())),
                    value_min: None,
                    value_max: None,
                    unit: None,
                }
            }
        };

        let unit = self
            .unit
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| from_text.and_then(|parsed| parsed.unit));
        Ok(ParsedThreshold { unit, ..resolved })
    }
}

fn numeric(operator: ComparisonOperator, number: f64) -> ParsedThreshold {
    ParsedThreshold {
        operator,
        value: Some(ThresholdValue::Number(number)),
        value_min: None,
        value_max: None,
        unit: None,
    }
}

fn parse_operator(op: &str) -> Option<ComparisonOperator> {
    match op.to_lowercase().as_str() {
        "<=" | "≤" | "lte" | "less_than_or_equal" | "less_than_or_equal_to" => {
            Some(ComparisonOperator::LessThan)
        }
        ">=" | "≥" | "gte" | "greater_than_or_equal" | "greater_than_or_equal_to" => {
            Some(ComparisonOperator::GreaterThan)
        }
        other => other.parse().ok(),
    }
}

/// Locates the JSON object in a response body.
///
/// Tries, in order: a ```` ```json ```` fence, a plain fence whose content
/// starts with `{` or `[`, and the span from the first `{` to the last `}`.
pub fn extract_json_block(raw: &str) -> Result<&str, ResponseError> {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Ok(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Ok(block);
            }
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&trimmed[start..=end]),
        _ => Err(ResponseError::NoJson),
    }
}

/// Parses and checks a raw normalizer response body.
pub fn parse_response(raw: &str) -> Result<NormalizerResponse, ResponseError> {
    let block = extract_json_block(raw)?;
    let response = match serde_json::from_str::<NormalizerResponse>(block) {
        Ok(response) => response,
        Err(first) => {
            // Raw line breaks inside string literals are a common defect.
            let flattened = block.replace(['\r', '\n'], " ");
            serde_json::from_str(&flattened).map_err(|_| ResponseError::Json(first.to_string()))?
        }
    };
    check_shape(&response)?;
    Ok(response)
}

fn check_shape(response: &NormalizerResponse) -> Result<(), ResponseError> {
    if response.primary_condition.term.trim().is_empty() {
        return Err(ResponseError::shape(
            "primary_condition.term",
            "must not be empty",
        ));
    }
    if snake_case(&response.primary_condition.term).is_empty() {
        return Err(ResponseError::shape(
            "primary_condition.term",
            "must contain a letter or digit",
        ));
    }
    for (i, finding) in response.clinical_findings.iter().enumerate() {
        if finding.parameter.trim().is_empty() {
            return Err(ResponseError::shape(
                format!("clinical_findings[{i}].parameter"),
                "must not be empty",
            ));
        }
        finding.resolve_threshold().map_err(|e| match e {
            ResponseError::Shape { field, message } => {
                ResponseError::shape(format!("clinical_findings[{i}].{field}"), message)
            }
            other => other,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(json: &str) -> FindingAssertion {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extract_json_block_from_fenced() {
        let body = "Sure.\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json_block(body).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_block_from_plain_fence() {
        let body = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json_block(body).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_block_from_prose() {
        let body = "The answer is {\"a\": {\"b\": 2}} as requested.";
        assert_eq!(extract_json_block(body).unwrap(), "{\"a\": {\"b\": 2}}");
    }

    #[test]
    fn test_extract_json_block_no_json() {
        assert_eq!(extract_json_block("no json here"), Err(ResponseError::NoJson));
        assert_eq!(extract_json_block("} backwards {"), Err(ResponseError::NoJson));
    }

    #[test]
    fn test_parse_minimal_response() {
        let response = parse_response(r#"{"primary_condition": {"term": "Sepsis"}}"#).unwrap();
        assert_eq!(response.primary_condition.term, "Sepsis");
        assert!(response.primary_condition.codes.is_empty());
        assert!(response.clinical_findings.is_empty());
        assert!(response.qualifiers.is_none());
    }

    #[test]
    fn test_parse_rejects_empty_term() {
        let err = parse_response(r#"{"primary_condition": {"term": "  "}}"#).unwrap_err();
        assert!(matches!(err, ResponseError::Shape { ref field, .. } if field == "primary_condition.term"));
    }

    #[test]
    fn test_parse_rejects_punctuation_only_term() {
        let err = parse_response(r#"{"primary_condition": {"term": "—"}}"#).unwrap_err();
        assert!(matches!(err, ResponseError::Shape { ref field, .. } if field == "primary_condition.term"));
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let err = parse_response(r#"{"primary_condition": {"term": 12}}"#).unwrap_err();
        assert!(matches!(err, ResponseError::Json(_)));
    }

    #[test]
    fn test_parse_tolerates_raw_newlines_in_strings() {
        let body = "{\"primary_condition\": {\"term\": \"Acute\nkidney injury\"}}";
        let response = parse_response(body).unwrap();
        assert_eq!(response.primary_condition.term, "Acute kidney injury");
    }

    #[test]
    fn test_bad_finding_reports_indexed_field() {
        let body = r#"{
            "primary_condition": {"term": "Tachycardia"},
            "clinical_findings": [
                {"parameter": "heart_rate", "operator": "greater_than", "value": 100},
                {"parameter": "systolic_bp", "operator": "between", "value_min": 100, "value_max": 90}
            ]
        }"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, ResponseError::Shape { ref field, .. } if field == "clinical_findings[1].value"));
    }

    #[test]
    fn test_qualifier_severity_accepts_string() {
        let body = r#"{"primary_condition": {"term": "Hypoxemia"},
                       "qualifiers": {"severity": "severe", "temporal": "acute"}}"#;
        let qualifiers = parse_response(body).unwrap().qualifiers.unwrap();
        assert_eq!(qualifiers.severity, vec!["severe".to_string()]);
        assert_eq!(qualifiers.temporal.as_deref(), Some("acute"));
    }

    #[test]
    fn test_resolve_explicit_fields() {
        let parsed = finding(r#"{"parameter": "lactate", "operator": ">", "value": "4.0", "unit": "mmol/L"}"#)
            .resolve_threshold()
            .unwrap();
        assert_eq!(parsed.operator, ComparisonOperator::GreaterThan);
        assert_eq!(parsed.value, Some(ThresholdValue::Number(4.0)));
        assert_eq!(parsed.unit.as_deref(), Some("mmol/L"));
    }

    #[test]
    fn test_resolve_inline_range() {
        let parsed = finding(r#"{"parameter": "heart_rate", "operator": "between", "value": {"value_min": 70, "value_max": 100}}"#)
            .resolve_threshold()
            .unwrap();
        assert_eq!(parsed.value_min, Some(70.0));
        assert_eq!(parsed.value_max, Some(100.0));
    }

    #[test]
    fn test_resolve_from_threshold_text() {
        let parsed = finding(r#"{"parameter": "systolic_bp", "threshold": "<= 90 mmHg"}"#)
            .resolve_threshold()
            .unwrap();
        assert_eq!(parsed.operator, ComparisonOperator::LessThan);
        assert_eq!(parsed.value, Some(ThresholdValue::Number(90.0)));
        assert_eq!(parsed.unit.as_deref(), Some("mmHg"));
    }

    #[test]
    fn test_resolve_infers_operator_from_value() {
        let parsed = finding(r#"{"parameter": "blood_culture", "value": "positive"}"#)
            .resolve_threshold()
            .unwrap();
        assert_eq!(parsed.operator, ComparisonOperator::Equals);

        let parsed = finding(r#"{"parameter": "temperature", "value_min": 36, "value_max": 38}"#)
            .resolve_threshold()
            .unwrap();
        assert_eq!(parsed.operator, ComparisonOperator::Between);
    }

    #[test]
    fn test_resolve_non_strict_operator_is_strict() {
        let parsed = finding(r#"{"parameter": "spo2", "operator": "less_than_or_equal", "value": 90}"#)
            .resolve_threshold()
            .unwrap();
        assert_eq!(parsed.operator, ComparisonOperator::LessThan);
    }

    #[test]
    fn test_resolve_errors() {
        let missing = finding(r#"{"parameter": "heart_rate"}"#).resolve_threshold();
        assert!(missing.is_err());

        let text_for_numeric =
            finding(r#"{"parameter": "heart_rate", "operator": "greater_than", "value": "fast"}"#)
                .resolve_threshold();
        assert!(text_for_numeric.is_err());

        let unknown = finding(r#"{"parameter": "heart_rate", "operator": "approximately", "value": 100}"#)
            .resolve_threshold();
        assert!(matches!(unknown, Err(ResponseError::Shape { ref field, .. }) if field == "operator"));

        let numeric_contains = finding(r#"{"parameter": "cxr", "operator": "contains", "value": 3}"#)
            .resolve_threshold();
        assert!(numeric_contains.is_err());
    }
}
