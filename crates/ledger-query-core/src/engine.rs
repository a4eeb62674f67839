use std::cmp::Ordering;

use serde_json::Value;
use time::OffsetDateTime;

use crate::model::{
    NewTransaction, Operation, QueryOutcome, QueryResult, QuerySpec, SortDirection, SortField,
    TransactionKind, TransactionRecord,
};
use crate::params::QueryParams;
use crate::temporal::{PeriodFallback, TemporalResolver};
use crate::StoreError;

const DEFAULT_RECENT_LIMIT: usize = 10;

/// One conjunctive filter. Text predicates carry lowercased operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Owner(String),
    Kind(TransactionKind),
    CategoryIn(Vec<String>),
    DescriptionContains(String),
    TimestampFrom(OffsetDateTime),
    TimestampUntil(OffsetDateTime),
}

impl Predicate {
    #[must_use]
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        match self {
            Self::Owner(owner_id) => record.owner_id == *owner_id,
            Self::Kind(kind) => record.kind == *kind,
            Self::CategoryIn(categories) => {
                let category = record.category.to_lowercase();
                categories.iter().any(|candidate| *candidate == category)
            }
            Self::DescriptionContains(term) => record
                .description
                .as_deref()
                .is_some_and(|description| description.to_lowercase().contains(term.as_str())),
            Self::TimestampFrom(start) => record.timestamp >= *start,
            Self::TimestampUntil(end) => record.timestamp <= *end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Count,
    Average,
    Rows {
        sort_field: SortField,
        sort_direction: SortDirection,
        limit: Option<usize>,
    },
}

/// Predicate set plus aggregation handed to a [`LedgerStore`].
///
/// Only [`compile`] builds one, so the owner predicate is always first.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    owner_id: String,
    predicates: Vec<Predicate>,
    aggregation: Aggregation,
}

impl CompiledQuery {
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    #[must_use]
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(record))
    }
}

/// Raw answer from a store. Averages are `None` when nothing matched.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutput {
    Total(f64),
    Count(u64),
    Average(Option<f64>),
    Rows(Vec<TransactionRecord>),
}

pub trait LedgerStore {
    /// Persists a new record and returns it with its assigned id.
    ///
    /// # Errors
    /// Returns [`StoreError::Validation`] for entries that violate record
    /// invariants and [`StoreError::Backend`] when persistence fails.
    fn append(&mut self, entry: &NewTransaction) -> Result<TransactionRecord, StoreError>;

    /// Evaluates a compiled query against the current snapshot.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn query(&self, query: &CompiledQuery) -> Result<StoreOutput, StoreError>;
}

#[must_use]
pub fn compile(spec: &QuerySpec) -> CompiledQuery {
    let mut predicates = vec![Predicate::Owner(spec.owner_id.clone())];

    if let Some(kind) = spec.kind_filter {
        predicates.push(Predicate::Kind(kind));
    }

    if let Some(categories) = spec.categories.as_ref().filter(|items| !items.is_empty()) {
        let mut lowered: Vec<String> = categories.iter().map(|item| item.to_lowercase()).collect();
        lowered.sort();
        lowered.dedup();
        predicates.push(Predicate::CategoryIn(lowered));
    }

    for term in spec.description_terms.iter().flatten() {
        predicates.push(Predicate::DescriptionContains(term.to_lowercase()));
    }

    if let Some(start) = spec.range_start {
        predicates.push(Predicate::TimestampFrom(start));
    }

    if let Some(end) = spec.range_end {
        predicates.push(Predicate::TimestampUntil(end));
    }

    let aggregation = match spec.operation {
        Operation::Sum => Aggregation::Sum,
        Operation::Count => Aggregation::Count,
        Operation::Average => Aggregation::Average,
        Operation::List => Aggregation::Rows {
            sort_field: spec.sort_field,
            sort_direction: spec.sort_direction,
            limit: spec.limit,
        },
    };

    CompiledQuery {
        owner_id: spec.owner_id.clone(),
        predicates,
        aggregation,
    }
}

/// Runs a resolved query and packages the typed result.
///
/// # Errors
/// Propagates store failures unchanged, and returns [`StoreError::Corrupt`]
/// if the store answers with a shape that does not fit the operation.
pub fn execute<S: LedgerStore + ?Sized>(
    store: &S,
    spec: &QuerySpec,
) -> Result<QueryResult, StoreError> {
    let compiled = compile(spec);
    tracing::debug!(
        owner_id = %spec.owner_id,
        operation = ?spec.operation,
        predicates = compiled.predicates().len(),
        "executing ledger query"
    );

    match (spec.operation, store.query(&compiled)?) {
        (Operation::Sum, StoreOutput::Total(total)) => Ok(QueryResult::Sum { total }),
        (Operation::Count, StoreOutput::Count(count)) => Ok(QueryResult::Count { count }),
        (Operation::Average, StoreOutput::Average(average)) => Ok(QueryResult::Average {
            average: average.unwrap_or(0.0),
        }),
        (Operation::List, StoreOutput::Rows(rows)) => Ok(QueryResult::List { rows }),
        (operation, _) => Err(StoreError::Corrupt(format!(
            "store answered a {operation:?} query with a mismatched result shape"
        ))),
    }
}

/// Normalizes an upstream payload and executes it, collecting every warning.
///
/// # Errors
/// Only store failures are returned; malformed parameters become warnings.
pub fn run_query<S, F>(
    store: &S,
    owner_id: &str,
    payload: Value,
    resolver: &TemporalResolver<F>,
    reference: OffsetDateTime,
) -> Result<QueryOutcome, StoreError>
where
    S: LedgerStore + ?Sized,
    F: PeriodFallback,
{
    let (params, mut warnings) = QueryParams::from_value(payload);
    let normalized = params.normalize(owner_id, resolver, reference);
    warnings.extend(normalized.warnings);

    let result = execute(store, &normalized.spec)?;
    Ok(QueryOutcome { result, warnings })
}

/// Inflow total minus outflow total for `owner_id`.
///
/// # Errors
/// Propagates store failures.
pub fn balance<S: LedgerStore + ?Sized>(store: &S, owner_id: &str) -> Result<f64, StoreError> {
    let kind_total = |kind: TransactionKind| -> Result<f64, StoreError> {
        let mut spec = QuerySpec::for_owner(owner_id);
        spec.kind_filter = Some(kind);
        spec.operation = Operation::Sum;
        match execute(store, &spec)? {
            QueryResult::Sum { total } => Ok(total),
            _ => Err(StoreError::Corrupt("sum query returned no total".to_string())),
        }
    };

    Ok(kind_total(TransactionKind::Inflow)? - kind_total(TransactionKind::Outflow)?)
}

/// Most recent records of one kind, newest first.
///
/// # Errors
/// Propagates store failures.
pub fn recent<S: LedgerStore + ?Sized>(
    store: &S,
    owner_id: &str,
    kind: TransactionKind,
    limit: Option<usize>,
) -> Result<Vec<TransactionRecord>, StoreError> {
    let mut spec = QuerySpec::for_owner(owner_id);
    spec.kind_filter = Some(kind);
    spec.limit = Some(limit.filter(|value| *value > 0).unwrap_or(DEFAULT_RECENT_LIMIT));

    match execute(store, &spec)? {
        QueryResult::List { rows } => Ok(rows),
        _ => Err(StoreError::Corrupt("list query returned no rows".to_string())),
    }
}

/// Orders rows by field and direction; equal keys keep ascending `id` order.
pub fn sort_records(rows: &mut [TransactionRecord], field: SortField, direction: SortDirection) {
    rows.sort_by(|lhs, rhs| {
        let primary = match field {
            SortField::Timestamp => lhs.timestamp.cmp(&rhs.timestamp),
            SortField::Amount => lhs.amount.total_cmp(&rhs.amount),
        };
        let primary = match direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };
        match primary {
            Ordering::Equal => lhs.id.cmp(&rhs.id),
            other => other,
        }
    });
}
