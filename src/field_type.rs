//! Incremental column type inference.
//!
//! Types form a small lattice and a column's type is the join of the types
//! of all its non-empty cells:
//!
//! ```text
//!            String
//!           /      \
//!       Number     Date
//!         |         |
//!      Integer      |
//!           \      /
//!            Unknown
//! ```
//!
//! Folding with a join means the result only ever widens and does not depend
//! on how the cell stream was chunked, so inference can run while the file is
//! still streaming in.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    /// No non-empty cell seen yet.
    #[default]
    Unknown,
    Integer,
    Number,
    Date,
    String,
}

/// Date layouts recognised during inference, tried in order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];

/// Timestamp layouts recognised during inference. Values matching these are
/// dates; the time part is dropped at encode time.
pub const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

impl FieldType {
    /// Classify a single raw cell. Empty (or all-whitespace) cells are `Unknown`.
    #[must_use]
    pub fn of_value(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() {
            Self::Unknown
        } else if value.parse::<i64>().is_ok() {
            Self::Integer
        } else if parse_number(value).is_some() {
            Self::Number
        } else if parse_date(value).is_some() {
            Self::Date
        } else {
            Self::String
        }
    }

    /// Least upper bound of two types.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        use FieldType::{Date, Integer, Number, String, Unknown};
        match (self, other) {
            (Unknown, t) | (t, Unknown) => t,
            (a, b) if a == b => a,
            (Integer, Number) | (Number, Integer) => Number,
            _ => String,
        }
    }

    /// SQL type name used when declaring the column in a query engine.
    #[must_use]
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "BIGINT",
            Self::Number => "DOUBLE",
            Self::Date => "DATE",
            Self::String | Self::Unknown => "VARCHAR",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "UNKNOWN",
            Self::Integer => "INTEGER",
            Self::Number => "NUMBER",
            Self::Date => "DATE",
            Self::String => "STRING",
        })
    }
}

/// Evolve `current` with one more cell value.
///
/// This is the fold step: `update(update(t, a), b)` equals
/// `update(t, a).join(FieldType::of_value(b))`, so any chunking of the cell
/// sequence yields the same final type.
#[must_use]
pub fn update(current: FieldType, raw: &str) -> FieldType {
    current.join(FieldType::of_value(raw))
}

/// Parse a finite number. `inf` and `NaN` are rejected.
#[must_use]
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a date or timestamp using the allow-listed layouts.
#[must_use]
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Running inference state for one column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldTypeCalculator {
    field_type: FieldType,
    longest_value: usize,
}

impl FieldTypeCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one cell into the running state.
    pub fn observe(&mut self, raw: &str) {
        self.field_type = update(self.field_type, raw);
        self.longest_value = self.longest_value.max(raw.chars().count());
    }

    /// Fold a whole chunk of cells.
    pub fn observe_all<'a>(&mut self, cells: impl IntoIterator<Item = &'a str>) {
        for cell in cells {
            self.observe(cell);
        }
    }

    /// Combine two calculators that saw consecutive parts of the same column.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            field_type: self.field_type.join(other.field_type),
            longest_value: self.longest_value.max(other.longest_value),
        }
    }

    #[must_use]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Longest cell length in characters, reported for `String` columns only.
    ///
    /// The maximum covers every cell, including the ones seen before the
    /// column widened to `String`.
    #[must_use]
    pub fn longest_string_length(&self) -> Option<usize> {
        (self.field_type == FieldType::String).then_some(self.longest_value)
    }
}

/// One column of an ingested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Cleaned, unique column identifier.
    pub name: String,
    /// Header text as it appeared in the file.
    pub raw_name: String,
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longest_string_length: Option<usize>,
    #[serde(skip)]
    calculator: FieldTypeCalculator,
}

impl FieldDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, raw_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_name: raw_name.into(),
            field_type: FieldType::Unknown,
            longest_string_length: None,
            calculator: FieldTypeCalculator::new(),
        }
    }

    /// Fold one cell of this column.
    pub fn observe(&mut self, raw: &str) {
        self.calculator.observe(raw);
        self.field_type = self.calculator.field_type();
        self.longest_string_length = self.calculator.longest_string_length();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_commutative() {
        let all = [
            FieldType::Unknown,
            FieldType::Integer,
            FieldType::Number,
            FieldType::Date,
            FieldType::String,
        ];
        for a in all {
            for b in all {
                assert_eq!(a.join(b), b.join(a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn datetime_counts_as_date() {
        assert!(parse_date("2024-03-01 12:30:00").is_some());
        assert_eq!(FieldType::of_value("2024-03-01T12:30:00"), FieldType::Date);
    }
}
