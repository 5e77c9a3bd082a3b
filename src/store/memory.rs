use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{FieldSet, Filter, Record, Select, Store, StoreError, Transaction};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Record>,
    last_id: i64,
}

#[derive(Debug, Clone, Default)]
struct Tables(HashMap<String, Table>);

impl Tables {
    fn select(&self, table: &str, select: &Select) -> Vec<Record> {
        let Some(t) = self.0.get(table) else {
            return Vec::new();
        };
        let mut rows: Vec<Record> = t
            .rows
            .iter()
            .filter(|row| select.filter.matches(row))
            .cloned()
            .collect();
        if let Some(sort) = &select.sort {
            rows.sort_by(|a, b| sort.compare(a, b));
        }
        let offset = select.offset.unwrap_or(0).max(0) as usize;
        let rows = rows.into_iter().skip(offset);
        match select.limit {
            Some(limit) => rows.take(limit.max(0) as usize).collect(),
            None => rows.collect(),
        }
    }

    fn count(&self, table: &str, filter: &Filter) -> i64 {
        self.0
            .get(table)
            .map(|t| t.rows.iter().filter(|row| filter.matches(row)).count() as i64)
            .unwrap_or(0)
    }

    fn insert(&mut self, table: &str, mut record: Record) -> Record {
        let t = self.0.entry(table.to_string()).or_default();
        let id = match record.get("id").and_then(Value::as_i64) {
            Some(id) if id > 0 => id,
            _ => t.last_id + 1,
        };
        t.last_id = t.last_id.max(id);
        record.insert("id".to_string(), Value::from(id));
        t.rows.push(record.clone());
        record
    }

    fn update(&mut self, table: &str, filter: &Filter, fields: &FieldSet) -> u64 {
        let Some(t) = self.0.get_mut(table) else {
            return 0;
        };
        let mut affected = 0;
        for row in t.rows.iter_mut().filter(|row| filter.matches(row)) {
            for (column, value) in fields.iter() {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        affected
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> u64 {
        let Some(t) = self.0.get_mut(table) else {
            return 0;
        };
        let before = t.rows.len();
        t.rows.retain(|row| !filter.matches(row));
        (before - t.rows.len()) as u64
    }
}

/// MemoryStore
///
/// An in-process store. Committed data sits behind a reader/writer lock so reads
/// never wait on an open transaction; transactions are serialized by a writer
/// mutex, work on a private copy, and publish it on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Tables {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let guard = self.writer.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            working: self.snapshot(),
            committed: self.committed.clone(),
            _guard: guard,
        }))
    }

    async fn find(&self, table: &str, select: &Select) -> Result<Vec<Record>, StoreError> {
        let tables = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.select(table, select))
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<i64, StoreError> {
        let tables = self.committed.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.count(table, filter))
    }
}

pub struct MemoryTransaction {
    working: Tables,
    committed: Arc<RwLock<Tables>>,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find(&mut self, table: &str, select: &Select) -> Result<Vec<Record>, StoreError> {
        Ok(self.working.select(table, select))
    }

    async fn insert(&mut self, table: &str, record: Record) -> Result<Record, StoreError> {
        Ok(self.working.insert(table, record))
    }

    async fn update(&mut self, table: &str, filter: &Filter, fields: &FieldSet) -> Result<u64, StoreError> {
        Ok(self.working.update(table, filter, fields))
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(self.working.delete(table, filter))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction {
            working, committed, ..
        } = *self;
        *committed.write().unwrap_or_else(PoisonError::into_inner) = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Sort, int_column};
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let first = tx.insert("widgets", record(json!({"name": "a"}))).await.unwrap();
        let second = tx.insert("widgets", record(json!({"name": "b"}))).await.unwrap();
        assert_eq!(int_column(&first, "id"), Some(1));
        assert_eq!(int_column(&second, "id"), Some(2));

        // Not visible until commit.
        assert_eq!(store.count("widgets", &Filter::new()).await.unwrap(), 0);
        tx.commit().await.unwrap();
        assert_eq!(store.count("widgets", &Filter::new()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rollback_and_drop_discard_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert("widgets", record(json!({"name": "a"}))).await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert("widgets", record(json!({"name": "b"}))).await.unwrap();
        }
        assert_eq!(store.count("widgets", &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_and_delete_report_rows_affected() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for name in ["a", "b", "c"] {
            tx.insert("widgets", record(json!({"name": name, "enabled": true})))
                .await
                .unwrap();
        }
        let fields = FieldSet::new().with("enabled", false);
        assert_eq!(tx.update("widgets", &Filter::by_ids(&[1, 2]), &fields).await.unwrap(), 2);
        assert_eq!(tx.delete("widgets", &Filter::by_id(3)).await.unwrap(), 1);
        assert_eq!(tx.delete("widgets", &Filter::by_id(3)).await.unwrap(), 0);
        tx.commit().await.unwrap();

        let select = Select::new(Filter::new().eq("enabled", false)).sorted(Sort::desc("id"));
        let rows = store.find("widgets", &select).await.unwrap();
        let ids: Vec<_> = rows.iter().filter_map(|r| int_column(r, "id")).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_open_transactions() {
        let store = MemoryStore::new();
        let _tx = store.begin().await.unwrap();
        assert!(store.find_one("widgets", &Filter::by_id(1)).await.unwrap().is_none());
    }
}
