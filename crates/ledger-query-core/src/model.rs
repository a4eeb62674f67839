use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::StoreError;

/// Category assigned to records appended without one.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Inflow,
    Outflow,
}

impl TransactionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inflow" => Some(Self::Inflow),
            "outflow" => Some(Self::Outflow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub id: i64,
    pub owner_id: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub category: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// A record as supplied by the entry flow, before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTransaction {
    pub owner_id: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub category: Option<String>,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl NewTransaction {
    /// Validates an entry before append.
    ///
    /// # Errors
    /// Returns [`StoreError::Validation`] when the owner is blank or the
    /// amount is not a finite positive number.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.owner_id.trim().is_empty() {
            return Err(StoreError::Validation(
                "owner_id MUST be provided for every record".to_string(),
            ));
        }

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(StoreError::Validation(format!(
                "amount MUST be a finite number > 0, got {}",
                self.amount
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn normalized_category(&self) -> String {
        self.category
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(UNCATEGORIZED)
            .to_string()
    }

    #[must_use]
    pub fn normalized_description(&self) -> Option<String> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    }

    /// UTC timestamp truncated to the microsecond precision the stores keep.
    #[must_use]
    pub fn normalized_timestamp(&self) -> OffsetDateTime {
        let utc = self.timestamp.to_offset(UtcOffset::UTC);
        let sub_micro = utc.nanosecond() % 1_000;
        utc - Duration::nanoseconds(i64::from(sub_micro))
    }

    #[must_use]
    pub fn into_record(self, id: i64) -> TransactionRecord {
        TransactionRecord {
            id,
            category: self.normalized_category(),
            description: self.normalized_description(),
            timestamp: self.normalized_timestamp(),
            owner_id: self.owner_id,
            kind: self.kind,
            amount: self.amount,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Sum,
    Count,
    Average,
    #[default]
    List,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Timestamp,
    Amount,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Fully resolved query. All temporal bounds are concrete UTC instants.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuerySpec {
    pub owner_id: String,
    pub kind_filter: Option<TransactionKind>,
    pub categories: Option<Vec<String>>,
    pub description_terms: Option<Vec<String>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub range_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub range_end: Option<OffsetDateTime>,
    pub operation: Operation,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub limit: Option<usize>,
}

impl QuerySpec {
    #[must_use]
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind_filter: None,
            categories: None,
            description_terms: None,
            range_start: None,
            range_end: None,
            operation: Operation::default(),
            sort_field: SortField::default(),
            sort_direction: SortDirection::default(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum QueryResult {
    Sum { total: f64 },
    Count { count: u64 },
    Average { average: f64 },
    List { rows: Vec<TransactionRecord> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    InvalidPayload,
    UnknownOperation,
    UnknownKind,
    InvalidCategories,
    InvalidDescriptionTerms,
    UnparsableRangeStart,
    UnparsableRangeEnd,
    UnknownSortField,
    UnknownSortDirection,
    InvalidLimit,
}

/// Advisory note about an input field that was downgraded to its default.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct QueryWarning {
    pub code: WarningCode,
    pub message: String,
}

impl QueryWarning {
    #[must_use]
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl Display for QueryWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryOutcome {
    pub result: QueryResult,
    pub warnings: Vec<QueryWarning>,
}
