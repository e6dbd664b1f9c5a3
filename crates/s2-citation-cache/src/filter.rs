//! Predicate filtering over cached records.
//!
//! A [`Filter`] is a conjunction of [`Predicate`]s. Predicates deserialize
//! from JSON documents such as
//!
//! ```json
//! [
//!   {"type": "year", "min": 2016, "max": 2019},
//!   {"type": "citation_count", "op": ">=", "value": 50},
//!   {"type": "title", "pattern": "graph", "mode": "regex", "invert": true}
//! ]
//! ```
//!
//! and are compiled once; regular expressions are anchored at the start of
//! the field and case-insensitive. Evaluation runs cheapest-first. A record
//! missing the field a predicate looks at does not match it.

use std::borrow::Borrow;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::models::PaperRecord;

/// Numeric comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Strictly less than.
    #[serde(alias = "<")]
    Lt,
    /// Less than or equal.
    #[serde(alias = "<=")]
    Le,
    /// Equal.
    #[serde(alias = "==", alias = "=")]
    Eq,
    /// Greater than or equal.
    #[serde(alias = ">=")]
    Ge,
    /// Strictly greater than.
    #[serde(alias = ">")]
    Gt,
}

impl Comparison {
    /// Evaluate `lhs <op> rhs`.
    #[must_use]
    pub const fn eval(self, lhs: u64, rhs: u64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
        }
    }
}

/// How a text pattern is matched. Always case-insensitive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatch {
    /// Pattern occurs anywhere in the field.
    #[default]
    Substring,
    /// Field equals the pattern.
    Exact,
    /// Regular expression anchored at the start of the field.
    Regex,
}

/// One condition on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Publication year within an inclusive range; either bound may be open.
    Year {
        /// Earliest year.
        #[serde(default)]
        min: Option<i32>,
        /// Latest year.
        #[serde(default)]
        max: Option<i32>,
    },

    /// Citation count comparison.
    CitationCount {
        /// Operator.
        op: Comparison,
        /// Right-hand side.
        value: u64,
    },

    /// Influential citation count comparison.
    InfluentialCount {
        /// Operator.
        op: Comparison,
        /// Right-hand side.
        value: u64,
    },

    /// Venue matches any of the patterns.
    Venue {
        /// Patterns.
        patterns: Vec<String>,
        /// Match mode.
        #[serde(default)]
        mode: TextMatch,
    },

    /// Any author matches. Ids take precedence over names when both are given.
    Author {
        /// Author names.
        #[serde(default)]
        names: Vec<String>,
        /// Author ids, compared exactly.
        #[serde(default)]
        ids: Vec<String>,
        /// Match mode for names.
        #[serde(default)]
        mode: TextMatch,
    },

    /// Title matches the pattern (or does not, when inverted).
    Title {
        /// Pattern.
        pattern: String,
        /// Match mode.
        #[serde(default)]
        mode: TextMatch,
        /// Keep records whose title does not match.
        #[serde(default)]
        invert: bool,
    },
}

#[derive(Debug, Clone)]
enum Matcher {
    Substring(String),
    Exact(String),
    Regex(Regex),
}

impl Matcher {
    fn compile(pattern: &str, mode: TextMatch) -> CacheResult<Self> {
        Ok(match mode {
            TextMatch::Substring => Self::Substring(pattern.to_lowercase()),
            TextMatch::Exact => Self::Exact(pattern.to_lowercase()),
            TextMatch::Regex => Self::Regex(
                RegexBuilder::new(&format!("^(?:{pattern})"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| CacheError::invalid_filter(format!("bad pattern {pattern:?}: {e}")))?,
            ),
        })
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Substring(needle) => text.to_lowercase().contains(needle.as_str()),
            Self::Exact(expected) => text.to_lowercase() == *expected,
            Self::Regex(re) => re.is_match(text),
        }
    }

    const fn cost(&self) -> u8 {
        match self {
            Self::Substring(_) | Self::Exact(_) => 2,
            Self::Regex(_) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CountField {
    Citations,
    Influential,
}

#[derive(Debug, Clone)]
enum Compiled {
    Year { min: Option<i32>, max: Option<i32> },
    Count { field: CountField, op: Comparison, value: u64 },
    AuthorIds(Vec<String>),
    AuthorNames(Vec<Matcher>),
    Venue(Vec<Matcher>),
    Title { matcher: Matcher, invert: bool },
}

impl Compiled {
    fn compile(predicate: &Predicate) -> CacheResult<Self> {
        Ok(match predicate {
            Predicate::Year { min, max } => {
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(CacheError::invalid_filter(format!("year range {min}..{max} is empty")));
                    }
                }
                Self::Year { min: *min, max: *max }
            }
            Predicate::CitationCount { op, value } => {
                Self::Count { field: CountField::Citations, op: *op, value: *value }
            }
            Predicate::InfluentialCount { op, value } => {
                Self::Count { field: CountField::Influential, op: *op, value: *value }
            }
            Predicate::Venue { patterns, mode } => Self::Venue(compile_all(patterns, *mode)?),
            Predicate::Author { names, ids, mode } => {
                if !ids.is_empty() {
                    Self::AuthorIds(ids.clone())
                } else if !names.is_empty() {
                    Self::AuthorNames(compile_all(names, *mode)?)
                } else {
                    return Err(CacheError::invalid_filter("author predicate needs names or ids"));
                }
            }
            Predicate::Title { pattern, mode, invert } => {
                Self::Title { matcher: Matcher::compile(pattern, *mode)?, invert: *invert }
            }
        })
    }

    fn cost(&self) -> u8 {
        match self {
            Self::Year { .. } | Self::Count { .. } => 0,
            Self::AuthorIds(_) => 1,
            Self::AuthorNames(m) | Self::Venue(m) => m.iter().map(Matcher::cost).max().unwrap_or(0),
            Self::Title { matcher, .. } => matcher.cost(),
        }
    }

    fn matches(&self, record: &PaperRecord) -> bool {
        match self {
            Self::Year { min, max } => record.year.is_some_and(|year| {
                min.is_none_or(|min| year >= min) && max.is_none_or(|max| year <= max)
            }),
            Self::Count { field, op, value } => {
                let count = match field {
                    CountField::Citations => record.citation_count,
                    CountField::Influential => record.influential_citation_count,
                };
                count.is_some_and(|count| op.eval(count, *value))
            }
            Self::AuthorIds(ids) => record
                .authors
                .iter()
                .filter_map(|a| a.author_id.as_deref())
                .any(|id| ids.iter().any(|wanted| wanted == id)),
            Self::AuthorNames(matchers) => record
                .authors
                .iter()
                .filter_map(|a| a.name.as_deref())
                .any(|name| matchers.iter().any(|m| m.is_match(name))),
            Self::Venue(matchers) => record
                .venue
                .as_deref()
                .is_some_and(|venue| matchers.iter().any(|m| m.is_match(venue))),
            Self::Title { matcher, invert } => {
                record.title.as_deref().is_some_and(|title| matcher.is_match(title) != *invert)
            }
        }
    }
}

fn compile_all(patterns: &[String], mode: TextMatch) -> CacheResult<Vec<Matcher>> {
    if patterns.is_empty() {
        return Err(CacheError::invalid_filter("pattern list is empty"));
    }
    patterns.iter().map(|p| Matcher::compile(p, mode)).collect()
}

/// A compiled conjunction of predicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Predicate>", into = "Vec<Predicate>")]
pub struct Filter {
    predicates: Vec<Predicate>,
    compiled: Vec<Compiled>,
}

impl Filter {
    /// Compile predicates into a filter.
    pub fn new(predicates: Vec<Predicate>) -> CacheResult<Self> {
        let mut compiled = predicates.iter().map(Compiled::compile).collect::<CacheResult<Vec<_>>>()?;
        compiled.sort_by_key(Compiled::cost);
        Ok(Self { predicates, compiled })
    }

    /// A filter that matches every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse and compile a JSON filter document.
    pub fn from_json(document: &str) -> CacheResult<Self> {
        let predicates: Vec<Predicate> =
            serde_json::from_str(document).map_err(|e| CacheError::invalid_filter(e.to_string()))?;
        Self::new(predicates)
    }

    /// Predicates as given.
    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// True if the record satisfies every predicate.
    #[must_use]
    pub fn matches(&self, record: &PaperRecord) -> bool {
        self.compiled.iter().all(|p| p.matches(record))
    }
}

impl TryFrom<Vec<Predicate>> for Filter {
    type Error = CacheError;

    fn try_from(predicates: Vec<Predicate>) -> Result<Self, Self::Error> {
        Self::new(predicates)
    }
}

impl From<Filter> for Vec<Predicate> {
    fn from(filter: Filter) -> Self {
        filter.predicates
    }
}

/// Lazily filter `records`.
///
/// The result is restartable whenever the input iterator is `Clone`.
pub fn filter<I>(records: I, filter: &Filter) -> Filtered<'_, I::IntoIter>
where
    I: IntoIterator,
    I::Item: Borrow<PaperRecord>,
{
    Filtered { inner: records.into_iter(), filter }
}

/// Iterator returned by [`filter`].
#[derive(Debug, Clone)]
pub struct Filtered<'f, I> {
    inner: I,
    filter: &'f Filter,
}

impl<I> Iterator for Filtered<'_, I>
where
    I: Iterator,
    I::Item: Borrow<PaperRecord>,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let filter = self.filter;
        self.inner.find(|record| filter.matches(Borrow::<PaperRecord>::borrow(record)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthorRef;

    fn paper(id: &str, year: i32) -> PaperRecord {
        let mut record = PaperRecord::new(id);
        record.year = Some(year);
        record
    }

    #[test]
    fn test_year_range() {
        let records = [paper("a", 2015), paper("b", 2018), paper("c", 2020)];
        let f = Filter::new(vec![Predicate::Year { min: Some(2016), max: Some(2019) }]).unwrap();
        let ids: Vec<_> = filter(&records, &f).map(|r| r.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_open_year_bound() {
        let f = Filter::new(vec![Predicate::Year { min: Some(2018), max: None }]).unwrap();
        assert!(f.matches(&paper("x", 2030)));
        assert!(!f.matches(&paper("x", 2017)));
        assert!(!f.matches(&PaperRecord::new("no-year")));
    }

    #[test]
    fn test_inverted_year_range_rejected() {
        let err = Filter::new(vec![Predicate::Year { min: Some(2020), max: Some(2010) }]).unwrap_err();
        assert!(matches!(err, CacheError::InvalidFilter(_)));
    }

    #[test]
    fn test_author_ids_take_precedence() {
        let mut record = paper("a", 2020);
        record.authors = vec![AuthorRef::new("42", "Grace Hopper")];

        let by_id = Filter::new(vec![Predicate::Author {
            names: vec!["nobody".to_string()],
            ids: vec!["42".to_string()],
            mode: TextMatch::Exact,
        }])
        .unwrap();
        assert!(by_id.matches(&record));

        let by_name = Filter::new(vec![Predicate::Author {
            names: vec!["hopper".to_string()],
            ids: vec![],
            mode: TextMatch::Substring,
        }])
        .unwrap();
        assert!(by_name.matches(&record));
    }

    #[test]
    fn test_regex_is_anchored_and_case_insensitive() {
        let mut record = paper("a", 2020);
        record.venue = Some("Proceedings of NeurIPS".to_string());

        let anchored = Filter::from_json(r#"[{"type": "venue", "patterns": ["neurips"], "mode": "regex"}]"#).unwrap();
        assert!(!anchored.matches(&record));

        let prefix = Filter::from_json(r#"[{"type": "venue", "patterns": ["proc.*neurips"], "mode": "regex"}]"#).unwrap();
        assert!(prefix.matches(&record));
    }

    #[test]
    fn test_title_invert() {
        let mut record = paper("a", 2020);
        record.title = Some("A Survey of Graphs".to_string());
        let f = Filter::from_json(r#"[{"type": "title", "pattern": "survey", "invert": true}]"#).unwrap();
        assert!(!f.matches(&record));
        record.title = Some("Graph Neural Networks".to_string());
        assert!(f.matches(&record));
    }

    #[test]
    fn test_count_operators_from_json() {
        let mut record = paper("a", 2020);
        record.citation_count = Some(100);
        record.influential_citation_count = Some(3);

        let f = Filter::from_json(
            r#"[{"type": "citation_count", "op": ">=", "value": 100},
                {"type": "influential_count", "op": "lt", "value": 5}]"#,
        )
        .unwrap();
        assert!(f.matches(&record));
        record.citation_count = Some(99);
        assert!(!f.matches(&record));
    }

    #[test]
    fn test_bad_regex_is_invalid_filter() {
        let err = Filter::from_json(r#"[{"type": "title", "pattern": "(", "mode": "regex"}]"#).unwrap_err();
        assert!(matches!(err, CacheError::InvalidFilter(_)));
    }

    #[test]
    fn test_cheapest_first_ordering() {
        let f = Filter::new(vec![
            Predicate::Title { pattern: "x".to_string(), mode: TextMatch::Regex, invert: false },
            Predicate::Year { min: None, max: Some(2000) },
        ])
        .unwrap();
        assert!(matches!(f.compiled[0], Compiled::Year { .. }));
        assert_eq!(f.predicates().len(), 2);
    }

    #[test]
    fn test_filter_roundtrips_through_serde() {
        let f = Filter::from_json(r#"[{"type": "year", "min": 2000}]"#).unwrap();
        let json = serde_json::to_string(&f).unwrap();
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predicates(), f.predicates());
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let records = vec![paper("a", 1990), PaperRecord::new("b")];
        assert_eq!(filter(records.iter(), &Filter::all()).count(), 2);
    }
}
