//! Label matchers and their translation into store queries
//!
//! A [`ReadPredicate`] is what arrives on the wire. [`StoreQuery::translate`]
//! turns it into a conjunction of compiled terms plus an inclusive time
//! range, which stores can evaluate directly ([`StoreQuery::matches`]) or
//! render as SQL ([`StoreQuery::to_sql`]).

use crate::schema::{
    LabelSet, StorageRow, TableRef, LABELS_FIELD, LABEL_NAME_FIELD, LABEL_VALUE_FIELD,
    METRIC_NAME_LABEL, NAME_FIELD, TIMESTAMP_FIELD,
};
use crate::{Error, Result};

use regex::Regex;
use std::fmt;

/// Matcher operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNoMatch,
}

impl MatchOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::RegexMatch => "=~",
            MatchOp::RegexNoMatch => "!~",
        }
    }
}

/// A single label constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MatchOp::Equal, value)
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op.as_str(), self.value)
    }
}

/// Matchers plus time range of one remote read query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPredicate {
    pub matchers: Vec<LabelMatcher>,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl ReadPredicate {
    pub fn new(matchers: Vec<LabelMatcher>, start_ms: i64, end_ms: i64) -> Self {
        Self {
            matchers,
            start_ms,
            end_ms,
        }
    }
}

/// Time range in epoch milliseconds, inclusive at both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Column a term applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// The denormalized metric name column
    Name,
    /// Value of the named label; an absent label reads as `""`
    Label(String),
}

#[derive(Debug, Clone)]
enum Condition {
    Equals(String),
    NotEquals(String),
    Matches(Regex),
    NotMatches(Regex),
}

/// One compiled predicate term
#[derive(Debug, Clone)]
pub struct PredicateTerm {
    pub column: Column,
    pub op: MatchOp,
    pub value: String,
    condition: Condition,
}

impl PredicateTerm {
    fn compile(matcher: &LabelMatcher) -> Result<Self> {
        let column = if matcher.name == METRIC_NAME_LABEL {
            Column::Name
        } else {
            Column::Label(matcher.name.clone())
        };

        let condition = match matcher.op {
            MatchOp::Equal => Condition::Equals(matcher.value.clone()),
            MatchOp::NotEqual => Condition::NotEquals(matcher.value.clone()),
            MatchOp::RegexMatch => Condition::Matches(anchored_regex(matcher)?),
            MatchOp::RegexNoMatch => Condition::NotMatches(anchored_regex(matcher)?),
        };

        Ok(Self {
            column,
            op: matcher.op,
            value: matcher.value.clone(),
            condition,
        })
    }

    fn evaluate(&self, name: &str, labels: &LabelSet) -> bool {
        let actual = match &self.column {
            Column::Name => name,
            Column::Label(label) => labels.get(label).unwrap_or(""),
        };

        match &self.condition {
            Condition::Equals(expected) => actual == expected,
            Condition::NotEquals(expected) => actual != expected,
            Condition::Matches(re) => re.is_match(actual),
            Condition::NotMatches(re) => !re.is_match(actual),
        }
    }

    fn to_sql(&self) -> String {
        let column = match &self.column {
            Column::Name => NAME_FIELD.to_string(),
            Column::Label(label) => format!(
                "COALESCE((SELECT l.{value} FROM UNNEST({labels}) AS l WHERE l.{name} = {label} LIMIT 1), '')",
                value = LABEL_VALUE_FIELD,
                labels = LABELS_FIELD,
                name = LABEL_NAME_FIELD,
                label = quote_literal(label),
            ),
        };

        match self.op {
            MatchOp::Equal => format!("{} = {}", column, quote_literal(&self.value)),
            MatchOp::NotEqual => format!("{} != {}", column, quote_literal(&self.value)),
            MatchOp::RegexMatch => format!(
                "REGEXP_CONTAINS({}, {})",
                column,
                quote_literal(&anchor(&self.value))
            ),
            MatchOp::RegexNoMatch => format!(
                "NOT REGEXP_CONTAINS({}, {})",
                column,
                quote_literal(&anchor(&self.value))
            ),
        }
    }
}

/// A read predicate translated for the store
#[derive(Debug, Clone)]
pub struct StoreQuery {
    /// Conjoined terms
    pub terms: Vec<PredicateTerm>,
    pub time_range: TimeRange,
}

impl StoreQuery {
    /// Compile every matcher; any invalid regex fails the whole query
    pub fn translate(predicate: &ReadPredicate) -> Result<Self> {
        let terms = predicate
            .matchers
            .iter()
            .map(PredicateTerm::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            terms,
            time_range: TimeRange::new(predicate.start_ms, predicate.end_ms),
        })
    }

    /// Whether a series with this name and labels satisfies every term
    pub fn matches_series(&self, name: &str, labels: &LabelSet) -> bool {
        self.terms.iter().all(|t| t.evaluate(name, labels))
    }

    /// Whether a stored row satisfies the terms and the time range
    pub fn matches(&self, row: &StorageRow) -> bool {
        self.time_range.contains(row.timestamp_ms()) && self.matches_series(&row.name, &row.labels)
    }

    /// Render as a SQL statement over the given table
    pub fn to_sql(&self, table: &TableRef) -> String {
        let mut clauses = vec![format!(
            "{ts} BETWEEN TIMESTAMP_MILLIS({start}) AND TIMESTAMP_MILLIS({end})",
            ts = TIMESTAMP_FIELD,
            start = self.time_range.start,
            end = self.time_range.end,
        )];
        clauses.extend(self.terms.iter().map(PredicateTerm::to_sql));

        format!(
            "SELECT {name}, {labels}, {value}, {ts} FROM `{table}` WHERE {clauses} ORDER BY {ts}",
            name = NAME_FIELD,
            labels = LABELS_FIELD,
            value = crate::schema::VALUE_FIELD,
            ts = TIMESTAMP_FIELD,
            table = table,
            clauses = clauses.join(" AND "),
        )
    }
}

fn anchor(pattern: &str) -> String {
    format!("^(?:{})$", pattern)
}

fn anchored_regex(matcher: &LabelMatcher) -> Result<Regex> {
    Regex::new(&anchor(&matcher.value))
        .map_err(|e| Error::InvalidMatcher(format!("{}: {}", matcher, e)))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
