use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;

pub mod memory;
pub mod postgres;
pub mod query;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use query::{Condition, Direction, Filter, Pagination, Select, Sort};

/// A stored row, keyed by column name.
pub type Record = serde_json::Map<String, Value>;

/// StoreError
///
/// Failures raised by a data store. `RecordNotFound` is the sentinel the CRUD
/// engine translates into a 404; every other variant is an unexpected failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("record for table `{0}` is not a JSON object")]
    NotAnObject(String),
    #[error("record encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::RecordNotFound,
            other => StoreError::Database(other),
        }
    }
}

/// Entity
///
/// A row type the CRUD engine can persist. Entities travel through the store as
/// JSON records, so any `serde` round-trippable struct with an integer `id` fits.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: &'static str;

    /// Fields that exist on the entity but not as columns (loaded associations).
    /// They are stripped before insert and must be `#[serde(default)]`.
    const VIRTUAL_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> i64;
}

/// FieldSet
///
/// The columns touched by a partial update. An empty set means "no update".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet(Record);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_record(&self) -> &Record {
        &self.0
    }
}

/// Store
///
/// The data store the engine and the account directory run against. Reads may
/// run outside a transaction; every write goes through [`Transaction`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;
    async fn find(&self, table: &str, select: &Select) -> Result<Vec<Record>, StoreError>;
    async fn count(&self, table: &str, filter: &Filter) -> Result<i64, StoreError>;

    async fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Record>, StoreError> {
        let select = Select {
            filter: filter.clone(),
            limit: Some(1),
            ..Select::default()
        };
        Ok(self.find(table, &select).await?.into_iter().next())
    }

    async fn exists(&self, table: &str, filter: &Filter) -> Result<bool, StoreError> {
        Ok(self.count(table, filter).await? > 0)
    }
}

/// Transaction
///
/// A transaction-scoped handle. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait Transaction: Send {
    async fn find(&mut self, table: &str, select: &Select) -> Result<Vec<Record>, StoreError>;

    /// Inserts a record and returns it as stored, including the generated `id`.
    async fn insert(&mut self, table: &str, record: Record) -> Result<Record, StoreError>;

    /// Applies `fields` to every matching row and returns the number of rows affected.
    async fn update(&mut self, table: &str, filter: &Filter, fields: &FieldSet) -> Result<u64, StoreError>;

    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;

    async fn find_one(&mut self, table: &str, filter: &Filter) -> Result<Option<Record>, StoreError> {
        let select = Select {
            filter: filter.clone(),
            limit: Some(1),
            ..Select::default()
        };
        Ok(self.find(table, &select).await?.into_iter().next())
    }
}

/// StoreState
///
/// The shared handle to the configured store.
pub type StoreState = Arc<dyn Store>;

pub fn to_record<T: Serialize>(table: &str, item: &T) -> Result<Record, StoreError> {
    match serde_json::to_value(item)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject(table.to_string())),
    }
}

pub fn from_record<T: DeserializeOwned>(record: Record) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

pub fn from_records<T: DeserializeOwned>(records: Vec<Record>) -> Result<Vec<T>, StoreError> {
    records.into_iter().map(from_record).collect()
}

/// Reads an integer column, used for association tables.
pub fn int_column(record: &Record, column: &str) -> Option<i64> {
    record.get(column).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_row_not_found_is_the_not_found_sentinel() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::RecordNotFound
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Database(_)
        ));
    }

    #[test]
    fn field_set_tracks_columns() {
        let fields = FieldSet::new().with("name", "ops").with("enabled", false);
        assert_eq!(fields.len(), 2);
        assert!(fields.contains("enabled"));
        assert!(FieldSet::new().is_empty());
    }
}
