use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ColumnConfig;

/// Published output header, without and with the pass-through column.
pub const OUTPUT_HEADER: [&str; 5] = ["Province", "City/Regency", "District", "Sub-district", "PostalCode"];
pub const CODE_COLUMN: &str = "Code";

/// One data row exactly as read from the input, header excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    fields: Vec<String>,
}

impl RawRecord {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for RawRecord {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// A unit of work on the job queue. `index` is the 0-based data row number.
#[derive(Debug, Clone)]
pub struct Job {
    pub index: u64,
    pub record: RawRecord,
}

/// Parameters of one reverse lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub code: Option<String>,
}

impl GeoQuery {
    /// Extracts the query fields from a row. Fails with `InvalidInput` when a
    /// coordinate column is missing or not a finite number in range.
    pub fn from_record(record: &RawRecord, columns: &ColumnConfig) -> Result<Self, FailureKind> {
        let code = Self::code_of(record, columns);
        let latitude = parse_coordinate(record.field(columns.latitude), 90.0)?;
        let longitude = parse_coordinate(record.field(columns.longitude), 180.0)?;

        Ok(Self {
            latitude,
            longitude,
            code,
        })
    }

    /// The pass-through identifier alone, available even when the
    /// coordinates are unusable.
    pub fn code_of(record: &RawRecord, columns: &ColumnConfig) -> Option<String> {
        columns
            .code
            .map(|index| record.field(index).unwrap_or_default().to_string())
    }
}

fn parse_coordinate(value: Option<&str>, limit: f64) -> Result<f64, FailureKind> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(FailureKind::InvalidInput)?;

    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() && parsed.abs() <= limit => Ok(parsed),
        _ => Err(FailureKind::InvalidInput),
    }
}

/// Administrative location fields resolved for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub province: String,
    pub city: String,
    pub district: String,
    pub sub_district: String,
    pub postal_code: String,
    pub code: Option<String>,
}

impl EnrichedRecord {
    /// Placeholder for a terminal failure: every enrichment field empty.
    pub fn empty(code: Option<String>) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.province.is_empty()
            && self.city.is_empty()
            && self.district.is_empty()
            && self.sub_district.is_empty()
            && self.postal_code.is_empty()
    }

    /// Row in published header order. The code column is written only when
    /// `include_code` is set; a missing code becomes an empty cell.
    pub fn to_row(&self, include_code: bool) -> Vec<&str> {
        let mut row = vec![
            self.province.as_str(),
            self.city.as_str(),
            self.district.as_str(),
            self.sub_district.as_str(),
            self.postal_code.as_str(),
        ];
        if include_code {
            row.push(self.code.as_deref().unwrap_or_default());
        }
        row
    }
}

/// Classification of a per-record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Network error, timeout, HTTP 5xx or 429
    Transient,
    /// Body is not JSON, or lacks an expected element
    MalformedResponse,
    /// Empty `features` list
    NotFound,
    /// Any other non-2xx status
    Rejected,
    /// Row has no usable coordinates
    InvalidInput,
}

impl FailureKind {
    pub const ALL: [FailureKind; 5] = [
        FailureKind::Transient,
        FailureKind::MalformedResponse,
        FailureKind::NotFound,
        FailureKind::Rejected,
        FailureKind::InvalidInput,
    ];

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::NotFound => "not_found",
            FailureKind::Rejected => "rejected",
            FailureKind::InvalidInput => "invalid_input",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Enriched {
        index: u64,
        record: EnrichedRecord,
        attempts: u32,
    },
    Failed {
        index: u64,
        kind: FailureKind,
        placeholder: EnrichedRecord,
        attempts: u32,
    },
}

impl Outcome {
    pub fn failed(index: u64, kind: FailureKind, code: Option<String>, attempts: u32) -> Self {
        Outcome::Failed {
            index,
            kind,
            placeholder: EnrichedRecord::empty(code),
            attempts,
        }
    }

    pub fn index(&self) -> u64 {
        match self {
            Outcome::Enriched { index, .. } | Outcome::Failed { index, .. } => *index,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Enriched { attempts, .. } | Outcome::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Enriched { .. } => None,
            Outcome::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn is_enriched(&self) -> bool {
        matches!(self, Outcome::Enriched { .. })
    }
}
