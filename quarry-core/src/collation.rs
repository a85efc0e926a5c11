// src/collation.rs
//! String collation and date parsing adapters
//!
//! Locale tables are out of scope: the engine only needs a comparator for
//! strings and a parser for date strings. Hosts with real ICU data plug in
//! their own `Collator`; `BasicCollator` covers the locale-independent parts
//! of a collation document (strength, case ordering, numeric ordering and
//! shifted punctuation).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Collation document as accepted by `$sort`, cursors and `EngineConfig`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollationSpec {
    pub locale: String,
    /// 1 = base letters, 2 = accents, 3 = case (default)
    #[serde(default)]
    pub strength: Option<u8>,
    /// "upper", "lower" or "off"
    #[serde(default)]
    pub case_first: Option<String>,
    #[serde(default)]
    pub numeric_ordering: bool,
    /// "non-ignorable" (default) or "shifted"
    #[serde(default)]
    pub alternate: Option<String>,
}

impl CollationSpec {
    pub fn new(locale: impl Into<String>) -> Self {
        CollationSpec {
            locale: locale.into(),
            strength: None,
            case_first: None,
            numeric_ordering: false,
            alternate: None,
        }
    }

    pub fn with_strength(mut self, strength: u8) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn with_numeric_ordering(mut self, numeric: bool) -> Self {
        self.numeric_ordering = numeric;
        self
    }

    pub fn with_case_first(mut self, case_first: impl Into<String>) -> Self {
        self.case_first = Some(case_first.into());
        self
    }

    pub fn with_alternate(mut self, alternate: impl Into<String>) -> Self {
        self.alternate = Some(alternate.into());
        self
    }
}

/// Opaque string comparator
pub trait Collator: Send + Sync + fmt::Debug {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

/// Locale-independent collator driven by a `CollationSpec`
#[derive(Debug, Clone)]
pub struct BasicCollator {
    spec: CollationSpec,
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

impl BasicCollator {
    pub fn new(spec: CollationSpec) -> Self {
        BasicCollator { spec }
    }

    pub fn spec(&self) -> &CollationSpec {
        &self.spec
    }

    fn strength(&self) -> u8 {
        self.spec.strength.unwrap_or(3)
    }

    fn shifted(&self) -> bool {
        self.spec.alternate.as_deref() == Some("shifted")
    }

    fn prepare(&self, s: &str) -> String {
        if self.shifted() {
            s.chars()
                .filter(|c| !c.is_whitespace() && !c.is_ascii_punctuation())
                .collect()
        } else {
            s.to_string()
        }
    }

    fn chunks(s: &str) -> Vec<Chunk<'_>> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut in_digits: Option<bool> = None;
        for (i, c) in s.char_indices() {
            let digit = c.is_ascii_digit();
            match in_digits {
                Some(prev) if prev != digit => {
                    out.push(Self::chunk(&s[start..i], prev));
                    start = i;
                }
                _ => {}
            }
            in_digits = Some(digit);
        }
        if let Some(prev) = in_digits {
            out.push(Self::chunk(&s[start..], prev));
        }
        out
    }

    fn chunk(s: &str, digits: bool) -> Chunk<'_> {
        if digits {
            Chunk::Digits(s)
        } else {
            Chunk::Text(s)
        }
    }

    fn compare_digits(a: &str, b: &str) -> Ordering {
        let a = a.trim_start_matches('0');
        let b = b.trim_start_matches('0');
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }

    fn compare_folded(a: &str, b: &str) -> Ordering {
        a.chars()
            .flat_map(char::to_lowercase)
            .cmp(b.chars().flat_map(char::to_lowercase))
    }

    /// Comparison ignoring case
    fn primary(&self, a: &str, b: &str) -> Ordering {
        if !self.spec.numeric_ordering {
            return Self::compare_folded(a, b);
        }
        let left = Self::chunks(a);
        let right = Self::chunks(b);
        for (l, r) in left.iter().zip(right.iter()) {
            let ord = match (l, r) {
                (Chunk::Digits(x), Chunk::Digits(y)) => Self::compare_digits(x, y),
                (Chunk::Digits(x), Chunk::Text(y))
                | (Chunk::Text(x), Chunk::Digits(y))
                | (Chunk::Text(x), Chunk::Text(y)) => Self::compare_folded(x, y),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        left.len().cmp(&right.len())
    }

    /// Case tie-break between strings that are equal ignoring case
    fn tertiary(&self, a: &str, b: &str) -> Ordering {
        let upper_first = self.spec.case_first.as_deref() == Some("upper");
        for (x, y) in a.chars().zip(b.chars()) {
            if x == y {
                continue;
            }
            let ord = match (x.is_uppercase(), y.is_uppercase()) {
                (true, false) if upper_first => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if upper_first => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ => x.cmp(&y),
            };
            return ord;
        }
        a.len().cmp(&b.len())
    }
}

impl Collator for BasicCollator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        let a = self.prepare(a);
        let b = self.prepare(b);
        let ord = self.primary(&a, &b);
        if ord != Ordering::Equal || self.strength() < 3 {
            return ord;
        }
        self.tertiary(&a, &b)
    }
}

/// Date string parser consumed by `$dateFromString` and `$toDate`
pub trait DateParser: Send + Sync + fmt::Debug {
    fn parse(&self, input: &str, format: Option<&str>) -> Option<DateTime<Utc>>;
}

/// Default parser built on `chrono`
///
/// Accepts RFC 3339 and the common ISO-8601 shapes when no format is given;
/// a format uses strftime directives with `%L` for milliseconds.
#[derive(Debug, Clone, Default)]
pub struct ChronoDateParser;

const ISO_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

impl ChronoDateParser {
    fn parse_naive(input: &str, format: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_str(input, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        NaiveDate::parse_from_str(input, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

impl DateParser for ChronoDateParser {
    fn parse(&self, input: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
        let input = input.trim();
        if let Some(format) = format {
            let format = format.replace("%L", "%3f");
            return Self::parse_naive(input, &format);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(dt.with_timezone(&Utc));
        }
        ISO_FORMATS
            .iter()
            .find_map(|f| Self::parse_naive(input, f))
            .or_else(|| Self::parse_naive(input, "%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_strength_one_ignores_case() {
        let c = BasicCollator::new(CollationSpec::new("en").with_strength(1));
        assert_eq!(c.compare("apple", "APPLE"), Ordering::Equal);
        assert_eq!(c.compare("apple", "Banana"), Ordering::Less);
    }

    #[test]
    fn test_default_strength_breaks_case_ties() {
        let lower = BasicCollator::new(CollationSpec::new("en"));
        assert_eq!(lower.compare("a", "A"), Ordering::Less);

        let upper = BasicCollator::new(CollationSpec::new("en").with_case_first("upper"));
        assert_eq!(upper.compare("a", "A"), Ordering::Greater);
        assert_eq!(upper.compare("b", "A"), Ordering::Greater);
    }

    #[test]
    fn test_numeric_ordering() {
        let c = BasicCollator::new(CollationSpec::new("en").with_numeric_ordering(true));
        assert_eq!(c.compare("item2", "item10"), Ordering::Less);
        assert_eq!(c.compare("007", "7"), Ordering::Equal);

        let plain = BasicCollator::new(CollationSpec::new("en"));
        assert_eq!(plain.compare("item2", "item10"), Ordering::Greater);
    }

    #[test]
    fn test_shifted_ignores_punctuation() {
        let c = BasicCollator::new(
            CollationSpec::new("en")
                .with_strength(1)
                .with_alternate("shifted"),
        );
        assert_eq!(c.compare("black-bird", "blackbird"), Ordering::Equal);
    }

    #[test]
    fn test_collation_spec_deserializes_camel_case() {
        let spec: CollationSpec = serde_json::from_value(serde_json::json!({
            "locale": "fr",
            "strength": 2,
            "numericOrdering": true
        }))
        .unwrap();
        assert_eq!(spec.locale, "fr");
        assert_eq!(spec.strength, Some(2));
        assert!(spec.numeric_ordering);
    }

    #[test]
    fn test_chrono_parser_formats() {
        let p = ChronoDateParser;
        let d = p.parse("2017-02-08T12:10:40.787Z", None).unwrap();
        assert_eq!(d.timestamp_millis(), 1486555840787);

        let d = p.parse("2021-06-15", None).unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2021, 6, 15));

        let d = p.parse("15/06/2021", Some("%d/%m/%Y")).unwrap();
        assert_eq!(d.month(), 6);

        assert!(p.parse("not a date", None).is_none());
    }
}
