//! Typed cell values for the in-memory warehouse.

use crate::core::ColumnType;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::cmp::Ordering;
use std::fmt;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Any integer column.
    Int(i64),
    /// `DECIMAL(12,2)`, held rounded to cents.
    Decimal(f64),
    /// Text.
    Text(String),
    /// Boolean.
    Bool(bool),
    /// Calendar date.
    Date(NaiveDate),
    /// Timestamp without time zone.
    Timestamp(NaiveDateTime),
}

/// Parses the textual timestamp forms the warehouse accepts in casts.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

impl Value {
    /// Parses a CSV field into a value of the given column type.
    ///
    /// An empty field is `NULL` for every type except text.
    pub fn parse(raw: &str, ty: ColumnType) -> Result<Self, String> {
        if ty == ColumnType::Varchar {
            return Ok(Self::Text(raw.to_string()));
        }
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::Null);
        }
        let invalid = || format!("invalid input syntax for type {}: \"{raw}\"", ty.sql());
        match ty {
            ColumnType::BigInt => trimmed.parse::<i64>().map(Self::Int).map_err(|_| invalid()),
            ColumnType::Integer => trimmed
                .parse::<i32>()
                .map(|v| Self::Int(i64::from(v)))
                .map_err(|_| invalid()),
            ColumnType::Decimal => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| Self::Decimal(round_cents(v)))
                .ok_or_else(invalid),
            ColumnType::Timestamp => parse_timestamp(trimmed)
                .map(Self::Timestamp)
                .ok_or_else(invalid),
            ColumnType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|_| invalid()),
            ColumnType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "y" | "yes" => Ok(Self::Bool(true)),
                "f" | "false" | "0" | "n" | "no" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            ColumnType::Varchar => Ok(Self::Text(raw.to_string())),
        }
    }

    /// Casts to a timestamp. `NULL` stays `NULL`.
    pub fn to_timestamp(&self) -> Result<Option<NaiveDateTime>, String> {
        match self {
            Self::Null => Ok(None),
            Self::Timestamp(ts) => Ok(Some(*ts)),
            Self::Date(d) => Ok(Some(d.and_time(NaiveTime::MIN))),
            Self::Text(s) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| format!("invalid input syntax for type TIMESTAMP: \"{s}\"")),
            other => Err(format!("cannot cast {other:?} to TIMESTAMP")),
        }
    }

    /// Returns the integer payload.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns whether the value is `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders the value as an unloaded CSV field.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Int(v) => v.to_string(),
            Self::Decimal(v) => format!("{v:.2}"),
            Self::Text(s) => s.clone(),
            Self::Bool(true) => "t".to_string(),
            Self::Bool(false) => "f".to_string(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }

    /// Orders values of the same type; `NULL` sorts last.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Greater,
            (_, Self::Null) => Ordering::Less,
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Decimal(a), Self::Decimal(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            other => f.write_str(&other.render()),
        }
    }
}
