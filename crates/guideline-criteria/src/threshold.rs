//! Threshold-text parser using nom.
//!
//! Normalizer responses sometimes carry a threshold only as text
//! (`"< 90 mmHg"`, `"70-100"`, `"between 36 and 38"`, `"positive"`). This
//! module turns such text into an operator plus value or bounds.
//!
//! Non-strict comparisons (`<=`, `at least`) map onto the strict operators:
//! leaves only carry `less_than` / `greater_than`, and the original text is
//! kept on the condition as `threshold_text`.

use nom::{
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize, rest, value},
    sequence::{pair, preceded, tuple},
    IResult,
};

use crate::error::{CriteriaError, CriteriaResult};
use crate::model::{ComparisonOperator, ThresholdValue};

/// A threshold parsed from text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedThreshold {
    /// Comparison the text describes.
    pub operator: ComparisonOperator,
    /// Value for single-valued operators.
    pub value: Option<ThresholdValue>,
    /// Lower bound for `between`.
    pub value_min: Option<f64>,
    /// Upper bound for `between`.
    pub value_max: Option<f64>,
    /// Unit text following the number, if any.
    pub unit: Option<String>,
}

/// Parses threshold text.
///
/// # Examples
///
/// ```rust
/// use guideline_criteria::{parse_threshold, ComparisonOperator};
///
/// let t = parse_threshold("< 90 mmHg").unwrap();
/// assert_eq!(t.operator, ComparisonOperator::LessThan);
/// assert_eq!(t.unit.as_deref(), Some("mmHg"));
///
/// let t = parse_threshold("between 70 and 100").unwrap();
/// assert_eq!((t.value_min, t.value_max), (Some(70.0), Some(100.0)));
/// ```
pub fn parse_threshold(input: &str) -> CriteriaResult<ParsedThreshold> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CriteriaError::ThresholdParse {
            position: 0,
            message: "empty threshold".to_string(),
        });
    }

    match alt((range_threshold, comparison_threshold, numeric_threshold))(input) {
        Ok((_, threshold)) => Ok(threshold),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            if starts_with_comparison(input) {
                // A comparison keyword without a number is not a usable threshold.
                return Err(CriteriaError::ThresholdParse {
                    position: input.len() - e.input.len(),
                    message: format!("expected a number in '{input}'"),
                });
            }
            Ok(text_threshold(input))
        }
        Err(nom::Err::Incomplete(_)) => Err(CriteriaError::ThresholdParse {
            position: input.len(),
            message: "incomplete threshold".to_string(),
        }),
    }
}

fn starts_with_comparison(input: &str) -> bool {
    comparison_operator(input).is_ok()
}

fn text_threshold(input: &str) -> ParsedThreshold {
    let value = match input.to_lowercase().as_str() {
        "true" | "yes" => ThresholdValue::Bool(true),
        "false" | "no" => ThresholdValue::Bool(false),
        _ => ThresholdValue::Text(input.to_string()),
    };
    ParsedThreshold {
        operator: ComparisonOperator::Equals,
        value: Some(value),
        value_min: None,
        value_max: None,
        unit: None,
    }
}

// ============================================================================
// Grammar
// ============================================================================

fn number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        str::parse::<f64>,
    )(input)
}

fn unit(input: &str) -> IResult<&str, Option<String>> {
    map(preceded(multispace0, rest), |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    })(input)
}

fn comparison_operator(input: &str) -> IResult<&str, ComparisonOperator> {
    use ComparisonOperator::{GreaterThan, LessThan};

    alt((
        value(LessThan, tag_no_case("<=")),
        value(LessThan, tag_no_case("≤")),
        value(GreaterThan, tag_no_case(">=")),
        value(GreaterThan, tag_no_case("≥")),
        value(LessThan, tag_no_case("<")),
        value(GreaterThan, tag_no_case(">")),
        value(LessThan, tag_no_case("less than or equal to")),
        value(GreaterThan, tag_no_case("greater than or equal to")),
        value(LessThan, tag_no_case("less than")),
        value(GreaterThan, tag_no_case("greater than")),
        value(GreaterThan, tag_no_case("more than")),
        value(LessThan, tag_no_case("at most")),
        value(GreaterThan, tag_no_case("at least")),
        value(LessThan, tag_no_case("below")),
        value(LessThan, tag_no_case("under")),
        value(GreaterThan, tag_no_case("above")),
        value(GreaterThan, tag_no_case("over")),
        value(GreaterThan, tag_no_case("exceeding")),
    ))(input)
}

fn comparison_threshold(input: &str) -> IResult<&str, ParsedThreshold> {
    map(
        tuple((comparison_operator, multispace0, number, unit)),
        |(operator, _, n, unit)| ParsedThreshold {
            operator,
            value: Some(ThresholdValue::Number(n)),
            value_min: None,
            value_max: None,
            unit,
        },
    )(input)
}

fn range_separator(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(tuple((multispace0, alt((tag_no_case("-"), tag_no_case("–"))), multispace0))),
        recognize(tuple((multispace1, tag_no_case("to"), multispace1))),
    ))(input)
}

fn range_threshold(input: &str) -> IResult<&str, ParsedThreshold> {
    let between = map(
        tuple((
            tag_no_case("between"),
            multispace1,
            number,
            multispace1,
            tag_no_case("and"),
            multispace1,
            number,
        )),
        |(_, _, min, _, _, _, max)| (min, max),
    );
    let dashed = map(tuple((number, range_separator, number)), |(min, _, max)| (min, max));

    map(pair(alt((between, dashed)), unit), |((min, max), unit)| ParsedThreshold {
        operator: ComparisonOperator::Between,
        value: None,
        value_min: Some(min),
        value_max: Some(max),
        unit,
    })(input)
}

fn numeric_threshold(input: &str) -> IResult<&str, ParsedThreshold> {
    map(
        tuple((opt(pair(alt((tag_no_case("=="), tag_no_case("="))), multispace0)), number, unit)),
        |(_, n, unit)| ParsedThreshold {
            operator: ComparisonOperator::Equals,
            value: Some(ThresholdValue::Number(n)),
            value_min: None,
            value_max: None,
            unit,
        },
    )(input)
}
