//! Dynamic transaction queries over an append-only ledger.
//!
//! Upstream parameter mappings are normalized by [`QueryParams`] with the help
//! of a [`TemporalResolver`], compiled into a conjunctive predicate set, and
//! evaluated by any [`LedgerStore`].

pub mod engine;
pub mod memory;
pub mod model;
pub mod params;
pub mod temporal;

pub use engine::{
    balance, compile, execute, recent, run_query, sort_records, Aggregation, CompiledQuery,
    LedgerStore, Predicate, StoreOutput,
};
pub use memory::InMemoryLedgerStore;
pub use model::{
    NewTransaction, Operation, QueryOutcome, QueryResult, QuerySpec, QueryWarning, SortDirection,
    SortField, TransactionKind, TransactionRecord, WarningCode, UNCATEGORIZED,
};
pub use params::{NormalizedQuery, QueryParams};
pub use temporal::{
    named_period, parse_explicit_instant, CalendarMonthFallback, Interval, NoFallback,
    PeriodFallback, TemporalResolver,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupt ledger data: {0}")]
    Corrupt(String),
}
