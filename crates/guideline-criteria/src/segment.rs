//! Splitting guideline sections into criterion and alternative units.
//!
//! Guideline sections arrive as line-broken text with bullets, numbered or
//! lettered items, page furniture and wrapped lines. The segmenter turns a
//! section into one string per unit, with list markers stripped and wrapped
//! lines joined.
//!
//! # Example
//!
//! ```rust
//! use guideline_criteria::segment_criteria;
//!
//! let section = "Admission is indicated for any of the following:\n\
//!                • Hypotension despite fluid resuscitation\n\
//!                • Altered mental status\n\
//!                  with focal deficits\n\
//!                Page 3";
//!
//! let units = segment_criteria(section);
//! assert_eq!(units, vec![
//!     "Hypotension despite fluid resuscitation",
//!     "Altered mental status with focal deficits",
//! ]);
//! ```

use nom::{
    branch::alt,
    bytes::complete::take_while_m_n,
    character::complete::{char, digit1, multispace1, one_of, satisfy},
    combinator::recognize,
    sequence::{pair, terminated, tuple},
    IResult,
};

use crate::model::{Alternative, CareSetting};

/// Lines longer than this are treated as prose, not list items.
const MAX_UNIT_LINE_LEN: usize = 200;

/// Unmarked lines shorter than this never open a new unit.
const MIN_UNMARKED_UNIT_LEN: usize = 15;

const BULLETS: &str = "•●○■□▪▫◦‣⁃-*";

/// Alternative items never open with `*`.
const ALTERNATIVE_BULLETS: &str = "•●○■□▪▫◦‣⁃-";

/// Splits an admission-criteria section into criterion texts.
pub fn segment_criteria(section_text: &str) -> Vec<String> {
    let mut units: Vec<String> = Vec::new();
    let mut in_list = false;

    for line in section_text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if !in_list && is_list_introduction(line) {
            in_list = true;
            continue;
        }
        if is_page_furniture(line) {
            continue;
        }

        if let Some(item) = strip_marker(line) {
            units.push(item.to_string());
            continue;
        }

        let opens_unit = in_list
            && line.chars().count() >= MIN_UNMARKED_UNIT_LEN
            && line.chars().next().is_some_and(char::is_uppercase);

        match units.last_mut() {
            Some(current) if !opens_unit => {
                current.push(' ');
                current.push_str(line);
            }
            _ if opens_unit => units.push(line.to_string()),
            _ => {}
        }
    }

    tracing::debug!(units = units.len(), "segmented criteria section");
    units
}

/// Parses an alternatives-to-admission section.
///
/// Only bullet and numbered items open a new alternative; other lines
/// continue the current one.
pub fn parse_alternatives(section_text: &str) -> Vec<Alternative> {
    let mut descriptions: Vec<String> = Vec::new();

    for line in section_text.lines().map(str::trim) {
        if line.is_empty() || is_page_furniture(line) {
            continue;
        }
        match alternative_marker(line) {
            Ok((item, _)) => descriptions.push(item.trim().to_string()),
            Err(_) => {
                if let Some(current) = descriptions.last_mut() {
                    current.push(' ');
                    current.push_str(line);
                }
            }
        }
    }

    let alternatives: Vec<Alternative> = descriptions
        .into_iter()
        .enumerate()
        .map(|(i, description)| Alternative {
            alternative_id: format!("alt_{:03}", i + 1),
            care_setting: CareSetting::from_text(&description),
            requirements: Vec::new(),
            description,
        })
        .collect();

    tracing::info!(alternatives = alternatives.len(), "parsed alternatives to admission");
    alternatives
}

fn is_list_introduction(line: &str) -> bool {
    let lower = line.to_lowercase();
    ["admission", "indicated", "following"]
        .iter()
        .filter_map(|keyword| lower.find(keyword))
        .any(|i| lower[i..].contains(':'))
}

fn is_page_furniture(line: &str) -> bool {
    line.starts_with("http")
        || line.starts_with("Page ")
        || line.starts_with("ISC -")
        || date_prefix(line).is_ok()
        || line.chars().count() > MAX_UNIT_LINE_LEN
}

fn strip_marker(line: &str) -> Option<&str> {
    list_marker(line).ok().map(|(rest, _)| rest.trim())
}

// ============================================================================
// Markers
// ============================================================================

fn bullet(input: &str) -> IResult<&str, &str> {
    recognize(one_of(BULLETS))(input)
}

fn numbered(input: &str) -> IResult<&str, &str> {
    recognize(pair(digit1, one_of(".)")))(input)
}

fn lettered(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(|c| c.is_ascii_alphabetic()), one_of(".)")))(input)
}

/// Bullet, numbered or lettered marker followed by whitespace.
fn list_marker(input: &str) -> IResult<&str, &str> {
    terminated(alt((bullet, numbered, lettered)), multispace1)(input)
}

fn alternative_bullet(input: &str) -> IResult<&str, &str> {
    recognize(one_of(ALTERNATIVE_BULLETS))(input)
}

fn alternative_marker(input: &str) -> IResult<&str, &str> {
    terminated(alt((alternative_bullet, numbered)), multispace1)(input)
}

/// `d{1,2}/d{1,2}/d{2,4}` at the start of a line.
fn date_prefix(input: &str) -> IResult<&str, &str> {
    let digits = |min, max| take_while_m_n(min, max, |c: char| c.is_ascii_digit());
    recognize(tuple((digits(1, 2), char('/'), digits(1, 2), char('/'), digits(2, 4))))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bullets_numbers_and_letters() {
        let section = "\
The following criteria indicate admission:
1. Hypotension with SBP below 90 mmHg
2) Respiratory distress
a. Sepsis with organ dysfunction
- Inability to tolerate oral intake
* Persistent vomiting";
        assert_eq!(
            segment_criteria(section),
            vec![
                "Hypotension with SBP below 90 mmHg",
                "Respiratory distress",
                "Sepsis with organ dysfunction",
                "Inability to tolerate oral intake",
                "Persistent vomiting",
            ]
        );
    }

    #[test]
    fn test_unmarked_lines_inside_list() {
        let section = "\
Inpatient admission is indicated if:
Hemodynamic instability requiring
vasopressor support
Severe hypoxemia on room air
Short line";
        assert_eq!(
            segment_criteria(section),
            vec![
                "Hemodynamic instability requiring vasopressor support",
                "Severe hypoxemia on room air Short line",
            ]
        );
    }

    #[test]
    fn test_skips_page_furniture() {
        let long = "x".repeat(201);
        let section = format!(
            "Admission criteria:\n• Fever above 38.3 C\nhttps://example.org/guideline\nPage 4 of 10\nISC - Sepsis Admission 2024\n12/01/2024\n{long}\n• Altered mental status"
        );
        assert_eq!(
            segment_criteria(&section),
            vec!["Fever above 38.3 C", "Altered mental status"]
        );
    }

    #[test]
    fn test_unmarked_lines_before_list_are_ignored() {
        let section = "Background paragraph about the condition\n• Severe dehydration";
        assert_eq!(segment_criteria(section), vec!["Severe dehydration"]);
    }

    #[test]
    fn test_marker_requires_following_whitespace() {
        assert!(strip_marker("-5 degrees").is_none());
        assert_eq!(strip_marker("-  Fever"), Some("Fever"));
    }

    #[test]
    fn test_parse_alternatives() {
        let section = "\
• Observation unit stay for up to 24 hours
• Outpatient follow-up within 48 hours
  with primary care
2. Home health nursing for IV antibiotics
3. Daily visits to the infusion clinic";
        let alternatives = parse_alternatives(section);
        assert_eq!(alternatives.len(), 4);
        assert_eq!(alternatives[0].alternative_id, "alt_001");
        assert_eq!(alternatives[0].care_setting, CareSetting::ObservationUnit);
        assert_eq!(
            alternatives[1].description,
            "Outpatient follow-up within 48 hours with primary care"
        );
        assert_eq!(alternatives[1].care_setting, CareSetting::Outpatient);
        assert_eq!(alternatives[2].care_setting, CareSetting::HomeCare);
        assert_eq!(alternatives[3].care_setting, CareSetting::InfusionCenter);
    }

    #[test]
    fn test_star_continues_an_alternative() {
        let section = "\
• Observation unit stay for up to 24 hours
* if lactate is below 2 mmol/L
• Home care with oral antibiotics";
        let alternatives = parse_alternatives(section);
        assert_eq!(alternatives.len(), 2);
        assert_eq!(
            alternatives[0].description,
            "Observation unit stay for up to 24 hours * if lactate is below 2 mmol/L"
        );
    }

    #[test]
    fn test_empty_section() {
        assert!(segment_criteria("").is_empty());
        assert!(parse_alternatives("\n\n").is_empty());
    }
}
