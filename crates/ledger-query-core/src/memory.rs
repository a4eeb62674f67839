use crate::engine::{sort_records, Aggregation, CompiledQuery, LedgerStore, StoreOutput};
use crate::model::{NewTransaction, TransactionRecord};
use crate::StoreError;

/// Vector-backed ledger for tests and embedding without a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    records: Vec<TransactionRecord>,
}

impl InMemoryLedgerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(&mut self, entry: &NewTransaction) -> Result<TransactionRecord, StoreError> {
        entry.validate()?;

        let id = self.records.last().map_or(1, |last| last.id + 1);
        let record = entry.clone().into_record(id);
        self.records.push(record.clone());
        Ok(record)
    }

    #[allow(clippy::cast_precision_loss)]
    fn query(&self, query: &CompiledQuery) -> Result<StoreOutput, StoreError> {
        let matching = self.records.iter().filter(|record| query.matches(record));

        let output = match query.aggregation() {
            Aggregation::Sum => StoreOutput::Total(matching.map(|record| record.amount).sum()),
            Aggregation::Count => StoreOutput::Count(matching.count() as u64),
            Aggregation::Average => {
                let (count, total) = matching.fold((0_usize, 0.0_f64), |(count, total), record| {
                    (count + 1, total + record.amount)
                });
                StoreOutput::Average((count > 0).then_some(total / count as f64))
            }
            Aggregation::Rows {
                sort_field,
                sort_direction,
                limit,
            } => {
                let mut rows: Vec<TransactionRecord> = matching.cloned().collect();
                sort_records(&mut rows, sort_field, sort_direction);
                if let Some(limit) = limit {
                    rows.truncate(limit);
                }
                StoreOutput::Rows(rows)
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionKind;
    use time::OffsetDateTime;

    #[test]
    fn ids_increase_monotonically_and_invalid_entries_are_rejected() {
        let mut store = InMemoryLedgerStore::new();
        let mut entry = NewTransaction {
            owner_id: "u1".to_string(),
            kind: TransactionKind::Inflow,
            amount: 1.0,
            category: Some("Gift".to_string()),
            description: None,
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };

        let first = match store.append(&entry) {
            Ok(record) => record,
            Err(err) => panic!("append failed: {err}"),
        };
        let second = match store.append(&entry) {
            Ok(record) => record,
            Err(err) => panic!("append failed: {err}"),
        };
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(second.category, "Gift");

        entry.amount = 0.0;
        assert!(store.append(&entry).is_err());
        assert_eq!(store.len(), 2);
    }
}
