//! Candidate SQL statements from CSV query exports.
//!
//! The exports carry one statement per row plus a cost column (`total_time`
//! in `pg_stat_statements` dumps). The query column is found by header name;
//! when no header matches, the first column is used.

use snafu::{Location, Snafu};

pub const DEFAULT_RANK_COLUMN: &str = "total_time";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    #[snafu(display("No eligible query: {reason}"))]
    NoEligibleQuery {
        reason: String,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Picks the column holding SQL text from a header row.
pub trait ColumnMatcher: Send + Sync {
    fn find_query_column(&self, headers: &[String]) -> Option<usize>;
}

/// Matches header names against needles, case-insensitively. A header equal to
/// a needle wins over one that merely contains it, so `query` is preferred to
/// `queryid`.
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
    needles: Vec<String>,
}

impl SubstringMatcher {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Default for SubstringMatcher {
    fn default() -> Self {
        Self::new(["query", "sql"])
    }
}

impl ColumnMatcher for SubstringMatcher {
    fn find_query_column(&self, headers: &[String]) -> Option<usize> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        normalized
            .iter()
            .position(|h| self.needles.iter().any(|n| h == n))
            .or_else(|| {
                normalized
                    .iter()
                    .position(|h| self.needles.iter().any(|n| h.contains(n.as_str())))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub text: String,
    pub rank: f64,
}

pub struct CsvQueryExtractor {
    matcher: Box<dyn ColumnMatcher>,
    rank_column: String,
}

impl Default for CsvQueryExtractor {
    fn default() -> Self {
        Self::new(SubstringMatcher::default())
    }
}

impl CsvQueryExtractor {
    pub fn new(matcher: impl ColumnMatcher + 'static) -> Self {
        Self {
            matcher: Box::new(matcher),
            rank_column: DEFAULT_RANK_COLUMN.to_string(),
        }
    }

    pub fn with_rank_column(mut self, rank_column: impl Into<String>) -> Self {
        self.rank_column = rank_column.into();
        self
    }

    /// Every non-empty query cell, in file row order, regardless of statement
    /// type.
    pub fn extract_all(&self, csv_text: &str) -> Vec<String> {
        let mut records = parse_records(csv_text).into_iter();
        let Some(header) = records.next() else {
            tracing::warn!("CSV payload is empty");
            return Vec::new();
        };
        let query_index = self.query_column(&header);

        let queries: Vec<String> = records
            .enumerate()
            .filter_map(|(row, record)| match record.get(query_index) {
                Some(cell) => Some(cell.trim().to_string()),
                None => {
                    tracing::debug!(row = row + 1, "Row has no query column, skipping");
                    None
                }
            })
            .filter(|query| !query.is_empty())
            .collect();

        tracing::info!("Extracted {} queries from CSV", queries.len());
        queries
    }

    /// The highest-ranked row whose text starts with `SELECT` and whose rank
    /// is positive. Ties keep the earliest row.
    pub fn extract_best(&self, csv_text: &str) -> Result<CandidateQuery, ExtractError> {
        let mut records = parse_records(csv_text).into_iter();
        let Some(header) = records.next() else {
            return NoEligibleQuerySnafu {
                reason: "CSV payload is empty",
            }
            .fail();
        };
        let query_index = self.query_column(&header);
        let Some(rank_index) = header
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(&self.rank_column))
        else {
            return NoEligibleQuerySnafu {
                reason: format!("CSV header has no '{}' column", self.rank_column),
            }
            .fail();
        };

        let mut best: Option<CandidateQuery> = None;
        for record in records {
            let (Some(text), Some(rank)) = (record.get(query_index), record.get(rank_index)) else {
                continue;
            };
            let Ok(rank) = rank.trim().parse::<f64>() else {
                continue;
            };
            let text = text.trim();
            if !rank.is_finite() || rank <= 0.0 || !is_select(text) {
                continue;
            }
            if best.as_ref().is_none_or(|b| rank > b.rank) {
                best = Some(CandidateQuery {
                    text: text.to_string(),
                    rank,
                });
            }
        }

        match best {
            Some(best) => {
                tracing::info!(
                    "Selected query with {} {}: {}",
                    self.rank_column,
                    best.rank,
                    preview(&best.text)
                );
                Ok(best)
            }
            None => NoEligibleQuerySnafu {
                reason: "no SELECT statement with a positive rank",
            }
            .fail(),
        }
    }

    fn query_column(&self, header: &[String]) -> usize {
        self.matcher.find_query_column(header).unwrap_or_else(|| {
            tracing::warn!("No query column found in CSV header, using the first column");
            0
        })
    }
}

fn is_select(text: &str) -> bool {
    text.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 100;
    match text.char_indices().nth(LIMIT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

/// Splits CSV text into records. Quoted fields may hold commas, newlines and
/// doubled quotes; records with no content are dropped. A quote opens a quoted
/// field only at the start of the field and is literal anywhere else.
fn parse_records(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                push_record(&mut records, std::mem::take(&mut record));
            }
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        push_record(&mut records, record);
    }
    records
}

fn push_record(records: &mut Vec<Vec<String>>, record: Vec<String>) {
    if record.iter().any(|f| !f.trim().is_empty()) {
        records.push(record);
    }
}
