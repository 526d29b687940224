//! Query engine over a channel's [`HistoryStore`].
//!
//! Three query modes exist, selected by which parameters a request carries:
//!
//! | Parameters | Request |
//! |---|---|
//! | none | [`QueryRequest::Latest`] |
//! | `count` | [`QueryRequest::Count`] |
//! | `startDate` + `endDate` | [`QueryRequest::Range`] |
//!
//! Anything else, such as `count` mixed with a date or a lone `startDate`, is
//! rejected rather than resolved by picking one of the modes.
//!
//! Raw parameters are turned into a [`QueryRequest`] in two steps. The set of
//! parameter *names* is checked first; the *values* are parsed only after
//! that, and [`QueryEngine::query`] skips value parsing entirely when the
//! store holds no data yet. An empty store therefore answers
//! [`QueryOutcome::Empty`] to `?count=2` and to `?count=abc` alike.
//!
//! # Example Usage
//!
//! ```rust
//! use almanac::history::HistoryStore;
//! use almanac::query::{QueryEngine, QueryOutcome, QueryParams};
//! use almanac::Reading;
//! use chrono::{TimeZone, Utc};
//!
//! let store = HistoryStore::new(2);
//! for secs in 1..=3 {
//!     store.append(Reading::new(Utc.timestamp_opt(secs, 0).unwrap(), [("v", 1.0)]));
//! }
//!
//! let engine = QueryEngine::default();
//! let params = QueryParams::from_iter([("count", "5")]);
//! match engine.query(&store, &params)? {
//!     QueryOutcome::List { readings, partial, note } => {
//!         assert_eq!(readings.len(), 2);
//!         assert!(partial);
//!         assert!(note.unwrap().contains("2 updates"));
//!     }
//!     other => panic!("unexpected outcome {other:?}"),
//! }
//! # Ok::<(), almanac::error::QueryError>(())
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::history::HistoryStore;
use crate::reading::Reading;
use crate::timeparse::{Edge, LocalZone, parse_date};

/// Name of the count parameter.
pub const COUNT_PARAM: &str = "count";
/// Name of the range start parameter.
pub const START_PARAM: &str = "startDate";
/// Name of the range end parameter.
pub const END_PARAM: &str = "endDate";

/// Raw query parameters as received by the API layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Value of a parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Number of distinct parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameter is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameter names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A validated query against one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRequest {
    /// The most recent reading.
    Latest,
    /// The `n` most recent readings.
    Count(usize),
    /// Readings with `start <= timestamp <= end`.
    Range {
        /// Inclusive lower bound.
        start: DateTime<Utc>,
        /// Inclusive upper bound.
        end: DateTime<Utc>,
    },
}

/// Answer to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// The most recent reading.
    Latest(Arc<Reading>),
    /// Readings newest first.
    List {
        /// The matching readings, newest first.
        readings: Vec<Arc<Reading>>,
        /// Whether a count query got fewer readings than it asked for.
        partial: bool,
        /// Shortfall note accompanying a partial result.
        note: Option<String>,
    },
    /// The channel has no readings yet.
    Empty,
}

/// Parameter names classified into a query mode, values still unparsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape<'a> {
    Latest,
    Count(&'a str),
    Range(&'a str, &'a str),
}

impl<'a> Shape<'a> {
    fn of(params: &'a QueryParams) -> Result<Self, QueryError> {
        let count = params.get(COUNT_PARAM);
        let start = params.get(START_PARAM);
        let end = params.get(END_PARAM);

        let recognized = [count, start, end].iter().filter(|p| p.is_some()).count();
        let shape = if recognized == params.len() {
            match (count, start, end) {
                (None, None, None) => Some(Self::Latest),
                (Some(count), None, None) => Some(Self::Count(count)),
                (None, Some(start), Some(end)) => Some(Self::Range(start, end)),
                _ => None,
            }
        } else {
            None
        };

        shape.ok_or_else(|| QueryError::InvalidCombination {
            given: params.names().collect::<Vec<_>>().join(", "),
        })
    }
}

/// Parses a `count` value as a non-negative integer.
///
/// Values beyond `usize::MAX` saturate; they ask for "everything" anyway.
fn parse_count(raw: &str) -> Result<usize, QueryError> {
    let s = raw.trim();
    match s.parse::<i128>() {
        Ok(n) if n < 0 => Err(QueryError::NegativeCount {
            value: raw.to_string(),
        }),
        Ok(n) => Ok(usize::try_from(n).unwrap_or(usize::MAX)),
        Err(_) => Err(QueryError::InvalidCount {
            value: raw.to_string(),
        }),
    }
}

/// Interprets queries against history stores.
///
/// The engine itself is stateless apart from the zone used to read dates
/// without an offset, so one instance can serve every channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryEngine {
    zone: LocalZone,
}

impl QueryEngine {
    /// Creates an engine resolving offset-less dates in `zone`.
    pub fn new(zone: LocalZone) -> Self {
        Self { zone }
    }

    /// The zone offset-less dates are resolved in.
    pub fn zone(&self) -> LocalZone {
        self.zone
    }

    /// Builds a request from raw parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the parameter names match no query mode or
    /// a value fails to parse.
    pub fn parse(&self, params: &QueryParams) -> Result<QueryRequest, QueryError> {
        self.resolve(Shape::of(params)?)
    }

    fn resolve(&self, shape: Shape<'_>) -> Result<QueryRequest, QueryError> {
        match shape {
            Shape::Latest => Ok(QueryRequest::Latest),
            Shape::Count(raw) => parse_count(raw).map(QueryRequest::Count),
            Shape::Range(start, end) => Ok(QueryRequest::Range {
                start: parse_date(START_PARAM, start, self.zone, Edge::Start)?,
                end: parse_date(END_PARAM, end, self.zone, Edge::End)?,
            }),
        }
    }

    /// Answers raw parameters against `store`.
    ///
    /// Parameter names are validated first. If the store is empty the answer
    /// is [`QueryOutcome::Empty`] without looking at the values; otherwise
    /// values are parsed and the request executed.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] for an invalid parameter combination, or for
    /// an unparsable value when the store holds data.
    pub fn query(
        &self,
        store: &HistoryStore,
        params: &QueryParams,
    ) -> Result<QueryOutcome, QueryError> {
        let shape = Shape::of(params)?;
        if store.is_empty() {
            return Ok(QueryOutcome::Empty);
        }
        let request = self.resolve(shape)?;
        Ok(self.execute(store, &request))
    }

    /// Executes an already-validated request against `store`.
    pub fn execute(&self, store: &HistoryStore, request: &QueryRequest) -> QueryOutcome {
        match *request {
            QueryRequest::Latest => store.latest().map_or(QueryOutcome::Empty, QueryOutcome::Latest),
            QueryRequest::Count(n) => store.last_n(n).map_or(QueryOutcome::Empty, |last| {
                QueryOutcome::List {
                    partial: last.is_partial(),
                    note: last.note(),
                    readings: last.readings,
                }
            }),
            QueryRequest::Range { start, end } => {
                store
                    .range(start, end)
                    .map_or(QueryOutcome::Empty, |readings| QueryOutcome::List {
                        readings,
                        partial: false,
                        note: None,
                    })
            }
        }
    }
}
