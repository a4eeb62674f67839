#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;

use anyhow::{Context, Result};
use ledger_query_core::{
    Aggregation, CompiledQuery, LedgerStore, NewTransaction, Predicate, SortDirection, SortField,
    StoreError, StoreOutput, TransactionKind, TransactionRecord,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

const LEDGER_MIGRATION_VERSION: i64 = 1;

const SCHEMA_LEDGER_V1: &str = r"
CREATE TABLE IF NOT EXISTS ledger_transactions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  owner_id TEXT NOT NULL CHECK (length(owner_id) > 0),
  kind TEXT NOT NULL CHECK (kind IN ('inflow', 'outflow')),
  amount REAL NOT NULL CHECK (amount > 0),
  category TEXT NOT NULL,
  category_key TEXT NOT NULL,
  description TEXT,
  description_key TEXT,
  occurred_at TEXT NOT NULL,
  occurred_at_us INTEGER NOT NULL,
  recorded_at TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS trg_ledger_transactions_no_update
BEFORE UPDATE ON ledger_transactions
BEGIN
  SELECT RAISE(FAIL, 'ledger_transactions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_ledger_transactions_no_delete
BEFORE DELETE ON ledger_transactions
BEGIN
  SELECT RAISE(FAIL, 'ledger_transactions is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_ledger_transactions_owner_time
  ON ledger_transactions(owner_id, occurred_at_us, id);
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_owner_kind_time
  ON ledger_transactions(owner_id, kind, occurred_at_us);
CREATE INDEX IF NOT EXISTS idx_ledger_transactions_owner_category
  ON ledger_transactions(owner_id, category_key);
";

const RECORD_COLUMNS: &str =
    "id, owner_id, kind, amount, category, description, occurred_at_us";

pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_LEDGER_V1)
            .context("failed to apply ledger schema")?;

        let now = format_rfc3339(OffsetDateTime::now_utc()).context("failed to format clock")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![LEDGER_MIGRATION_VERSION, now],
            )
            .context("failed to register ledger schema migration")?;

        tracing::debug!(version = LEDGER_MIGRATION_VERSION, "ledger schema migrated");
        Ok(())
    }

    pub fn get_transaction(&self, id: i64) -> Result<Option<TransactionRecord>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM ledger_transactions WHERE id = ?1"),
                params![id],
                parse_record_row,
            )
            .optional()
            .map_err(|err| map_sql_error("failed to read transaction", err))
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn append(&mut self, entry: &NewTransaction) -> Result<TransactionRecord, StoreError> {
        entry.validate()?;

        let category = entry.normalized_category();
        let description = entry.normalized_description();
        let occurred_at = entry.normalized_timestamp();
        let occurred_at_us = floor_micros(occurred_at)?;
        let recorded_at = format_rfc3339(OffsetDateTime::now_utc())
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .map_err(|err| map_sql_error("failed to start append transaction", err))?;

        tx.execute(
            "INSERT INTO ledger_transactions(
                owner_id, kind, amount, category, category_key,
                description, description_key, occurred_at, occurred_at_us, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.owner_id,
                entry.kind.as_str(),
                entry.amount,
                category,
                category.to_lowercase(),
                description,
                description.as_deref().map(str::to_lowercase),
                format_rfc3339(occurred_at).map_err(|err| StoreError::Backend(err.to_string()))?,
                occurred_at_us,
                recorded_at,
            ],
        )
        .map_err(|err| map_sql_error("failed to append transaction", err))?;

        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|err| map_sql_error("failed to commit append transaction", err))?;

        tracing::debug!(id, owner_id = %entry.owner_id, kind = entry.kind.as_str(), "appended transaction");

        Ok(TransactionRecord {
            id,
            owner_id: entry.owner_id.clone(),
            kind: entry.kind,
            amount: entry.amount,
            category,
            description,
            timestamp: occurred_at,
        })
    }

    fn query(&self, query: &CompiledQuery) -> Result<StoreOutput, StoreError> {
        let (where_clause, mut values) = build_where(query)?;

        match query.aggregation() {
            Aggregation::Sum => {
                let total: f64 = self
                    .conn
                    .query_row(
                        &format!("SELECT TOTAL(amount) FROM ledger_transactions WHERE {where_clause}"),
                        params_from_iter(values.iter()),
                        |row| row.get(0),
                    )
                    .map_err(|err| map_sql_error("failed to sum transactions", err))?;
                Ok(StoreOutput::Total(total))
            }
            Aggregation::Count => {
                let count: i64 = self
                    .conn
                    .query_row(
                        &format!("SELECT COUNT(*) FROM ledger_transactions WHERE {where_clause}"),
                        params_from_iter(values.iter()),
                        |row| row.get(0),
                    )
                    .map_err(|err| map_sql_error("failed to count transactions", err))?;
                let count = u64::try_from(count).map_err(|_| {
                    StoreError::Corrupt(format!("negative transaction count: {count}"))
                })?;
                Ok(StoreOutput::Count(count))
            }
            Aggregation::Average => {
                let average: Option<f64> = self
                    .conn
                    .query_row(
                        &format!("SELECT AVG(amount) FROM ledger_transactions WHERE {where_clause}"),
                        params_from_iter(values.iter()),
                        |row| row.get(0),
                    )
                    .map_err(|err| map_sql_error("failed to average transactions", err))?;
                Ok(StoreOutput::Average(average))
            }
            Aggregation::Rows {
                sort_field,
                sort_direction,
                limit,
            } => {
                let mut sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM ledger_transactions WHERE {where_clause}
                     ORDER BY {} {}, id ASC",
                    sort_column(sort_field),
                    sort_keyword(sort_direction)
                );

                if let Some(raw_limit) = limit {
                    sql.push_str(" LIMIT ?");
                    values.push(SqlValue::Integer(
                        i64::try_from(raw_limit).unwrap_or(i64::MAX),
                    ));
                }

                let mut stmt = self
                    .conn
                    .prepare(&sql)
                    .map_err(|err| map_sql_error("failed to prepare transaction listing", err))?;
                let rows = stmt
                    .query_map(params_from_iter(values.iter()), parse_record_row)
                    .map_err(|err| map_sql_error("failed to list transactions", err))?;

                let mut records = Vec::new();
                for row in rows {
                    records.push(row.map_err(|err| map_sql_error("failed to decode row", err))?);
                }
                Ok(StoreOutput::Rows(records))
            }
        }
    }
}

fn build_where(query: &CompiledQuery) -> Result<(String, Vec<SqlValue>), StoreError> {
    let mut clauses = Vec::with_capacity(query.predicates().len());
    let mut values = Vec::new();

    for predicate in query.predicates() {
        match predicate {
            Predicate::Owner(owner_id) => {
                clauses.push("owner_id = ?".to_string());
                values.push(SqlValue::Text(owner_id.clone()));
            }
            Predicate::Kind(kind) => {
                clauses.push("kind = ?".to_string());
                values.push(SqlValue::Text(kind.as_str().to_string()));
            }
            Predicate::CategoryIn(categories) => {
                let placeholders = vec!["?"; categories.len()].join(", ");
                clauses.push(format!("category_key IN ({placeholders})"));
                values.extend(categories.iter().cloned().map(SqlValue::Text));
            }
            Predicate::DescriptionContains(term) => {
                clauses.push("instr(description_key, ?) > 0".to_string());
                values.push(SqlValue::Text(term.clone()));
            }
            Predicate::TimestampFrom(start) => {
                clauses.push("occurred_at_us >= ?".to_string());
                values.push(SqlValue::Integer(ceil_micros(*start)?));
            }
            Predicate::TimestampUntil(end) => {
                clauses.push("occurred_at_us <= ?".to_string());
                values.push(SqlValue::Integer(floor_micros(*end)?));
            }
        }
    }

    Ok((clauses.join(" AND "), values))
}

fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::Timestamp => "occurred_at_us",
        SortField::Amount => "amount",
    }
}

fn sort_keyword(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    }
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
    let kind_raw: String = row.get(2)?;
    let occurred_at_us: i64 = row.get(6)?;

    let kind = TransactionKind::parse(&kind_raw).ok_or_else(|| {
        invalid_column(
            2,
            rusqlite::types::Type::Text,
            format!("invalid kind: {kind_raw}"),
        )
    })?;

    let timestamp = OffsetDateTime::from_unix_timestamp_nanos(i128::from(occurred_at_us) * 1_000)
        .map_err(|err| {
            invalid_column(
                6,
                rusqlite::types::Type::Integer,
                format!("invalid occurred_at_us {occurred_at_us}: {err}"),
            )
        })?;

    Ok(TransactionRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        kind,
        amount: row.get(3)?,
        category: row.get(4)?,
        description: row.get(5)?,
        timestamp,
    })
}

fn invalid_column(index: usize, kind: rusqlite::types::Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn map_sql_error(context: &str, err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            StoreError::Corrupt(format!("{context}: {err}"))
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Validation(format!("{context}: {err}"))
        }
        _ => StoreError::Backend(format!("{context}: {err}")),
    }
}

fn floor_micros(value: OffsetDateTime) -> Result<i64, StoreError> {
    i64::try_from(value.unix_timestamp_nanos().div_euclid(1_000))
        .map_err(|_| StoreError::Validation(format!("timestamp out of range: {value}")))
}

fn ceil_micros(value: OffsetDateTime) -> Result<i64, StoreError> {
    let nanos = value.unix_timestamp_nanos();
    i64::try_from(-(-nanos).div_euclid(1_000))
        .map_err(|_| StoreError::Validation(format!("timestamp out of range: {value}")))
}

fn format_rfc3339(value: OffsetDateTime) -> Result<String, time::error::Format> {
    value.to_offset(UtcOffset::UTC).format(&Rfc3339)
}

#[cfg(test)]
fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table_name],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to inspect table {table_name}"))?;
    Ok(exists.is_some())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp, clippy::too_many_lines)]

    use super::*;
    use ledger_query_core::{
        compile, execute, InMemoryLedgerStore, Operation, QueryResult, QuerySpec,
    };
    use proptest::prelude::*;
    use ulid::Ulid;

    fn must<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn must_utc(value: &str) -> OffsetDateTime {
        must(OffsetDateTime::parse(value, &Rfc3339))
    }

    fn fixture_store() -> SqliteLedgerStore {
        let store = must(SqliteLedgerStore::open_in_memory());
        must(store.migrate());
        store
    }

    fn fixture_entry(owner_id: &str, amount: f64, at: &str) -> NewTransaction {
        NewTransaction {
            owner_id: owner_id.to_string(),
            kind: TransactionKind::Outflow,
            amount,
            category: None,
            description: None,
            timestamp: must_utc(at),
        }
    }

    fn list_ids(result: &QueryResult) -> Vec<i64> {
        match result {
            QueryResult::List { rows } => rows.iter().map(|row| row.id).collect(),
            other => panic!("expected list result, got {other:?}"),
        }
    }

    #[test]
    fn append_round_trips_fields_with_utc_timestamp() {
        let mut store = fixture_store();
        let mut entry = fixture_entry("u1", 42.5, "2024-04-01T09:00:00-03:00");
        entry.kind = TransactionKind::Inflow;
        entry.category = Some("Salary".to_string());
        entry.description = Some("April payroll".to_string());

        let appended = must(store.append(&entry));
        let rows = list_ids(&must(execute(&store, &QuerySpec::for_owner("u1"))));
        assert_eq!(rows, vec![appended.id]);

        let stored = match must(store.get_transaction(appended.id)) {
            Some(value) => value,
            None => panic!("expected stored transaction"),
        };
        assert_eq!(stored, appended);
        assert_eq!(stored.kind, TransactionKind::Inflow);
        assert_eq!(stored.category, "Salary");
        assert_eq!(stored.description.as_deref(), Some("April payroll"));
        assert_eq!(stored.timestamp, must_utc("2024-04-01T12:00:00Z"));
        assert_eq!(stored.timestamp.offset(), UtcOffset::UTC);
    }

    #[test]
    fn naive_and_explicit_utc_inputs_store_identically() {
        let mut store = fixture_store();
        let naive = match ledger_query_core::parse_explicit_instant("2024-04-01T10:00:00") {
            Some(value) => value,
            None => panic!("naive timestamp should parse"),
        };

        let mut first = fixture_entry("u1", 1.0, "2024-04-01T10:00:00Z");
        first.timestamp = naive;
        let second = fixture_entry("u1", 1.0, "2024-04-01T10:00:00Z");

        let first = must(store.append(&first));
        let second = must(store.append(&second));

        let first = must(store.get_transaction(first.id));
        let second = must(store.get_transaction(second.id));
        match (first, second) {
            (Some(lhs), Some(rhs)) => assert_eq!(lhs.timestamp, rhs.timestamp),
            other => panic!("expected both rows, got {other:?}"),
        }
    }

    #[test]
    fn append_only_triggers_block_updates_and_deletes() {
        let mut store = fixture_store();
        let record = must(store.append(&fixture_entry("u1", 5.0, "2024-04-01T00:00:00Z")));

        let update_result = store.connection().execute(
            "UPDATE ledger_transactions SET amount = 1.0 WHERE id = ?1",
            params![record.id],
        );
        assert!(update_result.is_err());

        let delete_result = store
            .connection()
            .execute("DELETE FROM ledger_transactions WHERE id = ?1", params![record.id]);
        assert!(delete_result.is_err());
    }

    #[test]
    fn invalid_entries_are_rejected_before_and_at_the_database() {
        let mut store = fixture_store();
        let result = store.append(&fixture_entry("u1", -3.0, "2024-04-01T00:00:00Z"));
        assert!(matches!(result, Err(StoreError::Validation(_))));

        let raw_insert = store.connection().execute(
            "INSERT INTO ledger_transactions(
                owner_id, kind, amount, category, category_key,
                occurred_at, occurred_at_us, recorded_at
             ) VALUES ('u1', 'transfer', 1.0, 'x', 'x', 'now', 0, 'now')",
            [],
        );
        assert!(raw_insert.is_err());

        let raw_insert = store.connection().execute(
            "INSERT INTO ledger_transactions(
                owner_id, kind, amount, category, category_key,
                occurred_at, occurred_at_us, recorded_at
             ) VALUES ('u1', 'inflow', 0.0, 'x', 'x', 'now', 0, 'now')",
            [],
        );
        assert!(raw_insert.is_err());
    }

    #[test]
    fn april_sum_scenario_totals_thirty() {
        let mut store = fixture_store();
        for (amount, at) in [
            (10.0, "2024-04-01T00:00:00Z"),
            (20.0, "2024-04-10T00:00:00Z"),
            (30.0, "2024-05-01T00:00:00Z"),
        ] {
            must(store.append(&fixture_entry("u1", amount, at)));
        }

        let mut spec = QuerySpec::for_owner("u1");
        spec.operation = Operation::Sum;
        spec.range_start = Some(must_utc("2024-04-01T00:00:00Z"));
        spec.range_end = Some(must_utc("2024-04-30T23:59:59Z"));
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 30.0 });
    }

    #[test]
    fn empty_matches_aggregate_to_zero() {
        let store = fixture_store();
        let mut spec = QuerySpec::for_owner("ghost");

        spec.operation = Operation::Sum;
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 0.0 });
        spec.operation = Operation::Count;
        assert_eq!(must(execute(&store, &spec)), QueryResult::Count { count: 0 });
        spec.operation = Operation::Average;
        assert_eq!(
            must(execute(&store, &spec)),
            QueryResult::Average { average: 0.0 }
        );
        spec.operation = Operation::List;
        assert_eq!(
            must(execute(&store, &spec)),
            QueryResult::List { rows: Vec::new() }
        );
    }

    #[test]
    fn category_and_description_filters_ignore_case() {
        let mut store = fixture_store();
        let mut food = fixture_entry("u1", 18.0, "2024-04-02T19:00:00Z");
        food.category = Some("Alimentação".to_string());
        food.description = Some("Uber Eats order".to_string());
        must(store.append(&food));

        let mut taxi = fixture_entry("u1", 25.0, "2024-04-03T08:00:00Z");
        taxi.category = Some("Transport".to_string());
        taxi.description = Some("uber taxi to airport".to_string());
        must(store.append(&taxi));

        let mut spec = QuerySpec::for_owner("u1");
        spec.operation = Operation::Sum;
        spec.categories = Some(vec!["ALIMENTAÇÃO".to_string()]);
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 18.0 });

        spec.categories = None;
        spec.description_terms = Some(vec!["UBER".to_string(), "eats".to_string()]);
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 18.0 });

        spec.description_terms = Some(vec!["uber".to_string(), "taxi".to_string()]);
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 25.0 });

        spec.description_terms = Some(vec!["100%".to_string()]);
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 0.0 });
    }

    #[test]
    fn missing_category_is_stored_as_uncategorized() {
        let mut store = fixture_store();
        must(store.append(&fixture_entry("u1", 3.0, "2024-04-02T19:00:00Z")));

        let mut spec = QuerySpec::for_owner("u1");
        spec.operation = Operation::Count;
        spec.categories = Some(vec!["Uncategorized".to_string()]);
        assert_eq!(must(execute(&store, &spec)), QueryResult::Count { count: 1 });
    }

    #[test]
    fn list_ties_fall_back_to_ascending_id() {
        let mut store = fixture_store();
        for amount in [7.0, 7.0, 3.0, 7.0] {
            must(store.append(&fixture_entry("u1", amount, "2024-04-02T19:00:00Z")));
        }

        let mut spec = QuerySpec::for_owner("u1");
        assert_eq!(list_ids(&must(execute(&store, &spec))), vec![1, 2, 3, 4]);

        spec.sort_field = SortField::Amount;
        assert_eq!(list_ids(&must(execute(&store, &spec))), vec![1, 2, 4, 3]);

        spec.limit = Some(2);
        assert_eq!(list_ids(&must(execute(&store, &spec))), vec![1, 2]);
    }

    #[test]
    fn limits_beyond_sqlite_integer_range_return_every_row() {
        let mut store = fixture_store();
        for amount in [4.0, 5.0, 6.0] {
            must(store.append(&fixture_entry("u1", amount, "2024-04-02T19:00:00Z")));
        }

        let mut spec = QuerySpec::for_owner("u1");
        spec.limit = Some(usize::MAX);
        assert_eq!(list_ids(&must(execute(&store, &spec))), vec![1, 2, 3]);

        let mut memory = InMemoryLedgerStore::new();
        for amount in [4.0, 5.0, 6.0] {
            must(memory.append(&fixture_entry("u1", amount, "2024-04-02T19:00:00Z")));
        }
        assert_eq!(
            must(execute(&store, &spec)),
            must(execute(&memory, &spec))
        );
    }

    #[test]
    fn range_bounds_are_inclusive_at_microsecond_precision() {
        let mut store = fixture_store();
        must(store.append(&fixture_entry("u1", 1.0, "2024-04-30T23:59:59.999999Z")));
        must(store.append(&fixture_entry("u1", 2.0, "2024-05-01T00:00:00Z")));

        let mut spec = QuerySpec::for_owner("u1");
        spec.operation = Operation::Sum;
        spec.range_start = Some(must_utc("2024-04-30T23:59:59.999999Z"));
        spec.range_end = Some(must_utc("2024-04-30T23:59:59.999999Z"));
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 1.0 });
    }

    #[test]
    fn schema_contract_contains_expected_tables_and_triggers() {
        let store = fixture_store();
        assert!(must(table_exists(store.connection(), "ledger_transactions")));
        assert!(must(table_exists(store.connection(), "schema_migrations")));

        let trigger_count = match store.connection().query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type='trigger'
               AND name IN ('trg_ledger_transactions_no_update', 'trg_ledger_transactions_no_delete')",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to query trigger contract: {err}"),
        };
        assert_eq!(trigger_count, 2);
    }

    #[test]
    fn migration_is_idempotent_and_preserves_existing_data() {
        let db_path =
            std::env::temp_dir().join(format!("ledger-migrate-test-{}.sqlite3", Ulid::new()));

        {
            let mut store = must(SqliteLedgerStore::open(&db_path));
            must(store.migrate());
            must(store.append(&fixture_entry("u1", 12.0, "2024-04-02T19:00:00Z")));
        }

        let store = must(SqliteLedgerStore::open(&db_path));
        must(store.migrate());
        must(store.migrate());

        let mut spec = QuerySpec::for_owner("u1");
        spec.operation = Operation::Sum;
        assert_eq!(must(execute(&store, &spec)), QueryResult::Sum { total: 12.0 });

        drop(store);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite3-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite3-shm"));
    }

    #[test]
    fn compiled_where_clause_follows_predicate_order() {
        let mut spec = QuerySpec::for_owner("u1");
        spec.kind_filter = Some(TransactionKind::Outflow);
        spec.categories = Some(vec!["a".to_string(), "b".to_string()]);
        spec.description_terms = Some(vec!["x".to_string()]);
        spec.range_start = Some(must_utc("2024-01-01T00:00:00Z"));

        let (clause, values) = must(build_where(&compile(&spec)));
        assert_eq!(
            clause,
            "owner_id = ? AND kind = ? AND category_key IN (?, ?) AND instr(description_key, ?) > 0 AND occurred_at_us >= ?"
        );
        assert_eq!(values.len(), 6);
    }

    fn spec_from_codes(
        operation: u8,
        kind: u8,
        sort_amount: bool,
        ascending: bool,
        limit: Option<usize>,
    ) -> QuerySpec {
        let mut spec = QuerySpec::for_owner("u1");
        spec.operation = match operation {
            0 => Operation::Sum,
            1 => Operation::Count,
            2 => Operation::Average,
            _ => Operation::List,
        };
        spec.kind_filter = match kind {
            0 => Some(TransactionKind::Inflow),
            1 => Some(TransactionKind::Outflow),
            _ => None,
        };
        spec.sort_field = if sort_amount {
            SortField::Amount
        } else {
            SortField::Timestamp
        };
        spec.sort_direction = if ascending {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        };
        spec.limit = limit;
        spec.range_start = Some(must_utc("2024-04-05T00:00:00Z"));
        spec
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_sqlite_agrees_with_in_memory_store(
            entries in prop::collection::vec((any::<bool>(), 1u32..500, 0u8..20, 0u8..3), 0..40),
            operation in 0u8..4,
            kind in 0u8..3,
            sort_amount in any::<bool>(),
            ascending in any::<bool>(),
            limit in prop::option::of(1usize..8),
        ) {
            let mut sqlite = fixture_store();
            let mut memory = InMemoryLedgerStore::new();
            let base = must_utc("2024-04-01T00:00:00Z");

            for (inflow, amount, day, category) in entries {
                let entry = NewTransaction {
                    owner_id: if category == 2 { "u2".to_string() } else { "u1".to_string() },
                    kind: if inflow { TransactionKind::Inflow } else { TransactionKind::Outflow },
                    amount: f64::from(amount),
                    category: Some(format!("cat-{category}")),
                    description: None,
                    timestamp: base + time::Duration::days(i64::from(day)),
                };
                must(sqlite.append(&entry));
                must(memory.append(&entry));
            }

            let spec = spec_from_codes(operation, kind, sort_amount, ascending, limit);
            let from_sqlite = must(execute(&sqlite, &spec));
            let from_memory = must(execute(&memory, &spec));

            match (from_sqlite, from_memory) {
                (QueryResult::Sum { total: lhs }, QueryResult::Sum { total: rhs })
                | (QueryResult::Average { average: lhs }, QueryResult::Average { average: rhs }) => {
                    prop_assert!((lhs - rhs).abs() < 1e-9);
                }
                (lhs, rhs) => {
                    prop_assert_eq!(lhs, rhs);
                }
            }
        }
    }
}
