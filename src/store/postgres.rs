use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, types::Json};

use super::{
    Condition, Direction, FieldSet, Filter, Record, Select, Store, StoreError, Transaction,
    query::is_valid_sort_field,
};

/// Schema for the built-in admin modules, applied by `ensure_schema` in local runs.
pub const SCHEMA: &str = include_str!("../../schema.sql");

/// PgStore
///
/// The Postgres implementation of [`Store`]. Rows are read as `to_jsonb(row)` and
/// written through `jsonb_populate_record`, so column types always come from the
/// table definition and the store needs no per-entity SQL.
///
/// All statements are assembled with `QueryBuilder`; values are always bound and
/// identifiers are validated before being quoted into the statement.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the admin tables when missing. Local-only convenience.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn find(&self, table: &str, select: &Select) -> Result<Vec<Record>, StoreError> {
        run_select(&self.pool, table, select).await
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<i64, StoreError> {
        let mut builder = count_sql(table, filter)?;
        Ok(builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?)
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn find(&mut self, table: &str, select: &Select) -> Result<Vec<Record>, StoreError> {
        run_select(&mut *self.tx, table, select).await
    }

    async fn insert(&mut self, table: &str, record: Record) -> Result<Record, StoreError> {
        let mut builder = insert_sql(table, record)?;
        let Json(stored) = builder
            .build_query_scalar::<Json<Record>>()
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(stored)
    }

    async fn update(&mut self, table: &str, filter: &Filter, fields: &FieldSet) -> Result<u64, StoreError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut builder = update_sql(table, filter, fields)?;
        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&mut self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut builder = delete_sql(table, filter)?;
        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn run_select<'c, E>(executor: E, table: &str, select: &Select) -> Result<Vec<Record>, StoreError>
where
    E: Executor<'c, Database = Postgres>,
{
    let mut builder = select_sql(table, select)?;
    let rows = builder
        .build_query_scalar::<Json<Record>>()
        .fetch_all(executor)
        .await?;
    Ok(rows.into_iter().map(|Json(record)| record).collect())
}

fn quote_ident(name: &str) -> Result<String, StoreError> {
    if !name.contains('.') && is_valid_sort_field(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn single(column: &str, value: &Value) -> Value {
    let mut map = Record::new();
    map.insert(column.to_string(), value.clone());
    Value::Object(map)
}

fn push_filter(
    builder: &mut QueryBuilder<'static, Postgres>,
    table: &str,
    filter: &Filter,
) -> Result<(), StoreError> {
    builder.push(" WHERE TRUE");
    for condition in filter.conditions() {
        let column = quote_ident(condition.column())?;
        match condition {
            Condition::Eq(_, Value::Null) => {
                builder.push(format!(" AND r.{column} IS NULL"));
            }
            Condition::Ne(_, Value::Null) => {
                builder.push(format!(" AND r.{column} IS NOT NULL"));
            }
            Condition::Eq(name, value) => {
                builder.push(format!(" AND r.{column} = (jsonb_populate_record(NULL::{table}, "));
                builder.push_bind(Json(single(name, value)));
                builder.push(format!(")).{column}"));
            }
            Condition::Ne(name, value) => {
                builder.push(format!(
                    " AND r.{column} IS DISTINCT FROM (jsonb_populate_record(NULL::{table}, "
                ));
                builder.push_bind(Json(single(name, value)));
                builder.push(format!(")).{column}"));
            }
            Condition::Like(_, needle) => {
                builder.push(format!(" AND r.{column}::text ILIKE "));
                builder.push_bind(format!("%{}%", escape_like(needle)));
            }
            Condition::In(_, values) if values.is_empty() => {
                builder.push(" AND FALSE");
            }
            Condition::In(name, values) => {
                let rows: Vec<Value> = values.iter().map(|v| single(name, v)).collect();
                builder.push(format!(
                    " AND r.{column} = ANY(ARRAY(SELECT v.{column} FROM jsonb_populate_recordset(NULL::{table}, "
                ));
                builder.push_bind(Json(Value::Array(rows)));
                builder.push(") AS v))");
            }
        }
    }
    Ok(())
}

fn select_sql(table: &str, select: &Select) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quote_ident(table)?;
    let mut builder = QueryBuilder::new(format!("SELECT to_jsonb(r) AS record FROM {table} AS r"));
    push_filter(&mut builder, &table, &select.filter)?;
    if let Some(sort) = &select.sort {
        let column = quote_ident(sort.column())?;
        let direction = match sort.direction {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        };
        builder.push(format!(" ORDER BY r.{column} {direction}"));
    }
    if let Some(limit) = select.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }
    if let Some(offset) = select.offset {
        builder.push(" OFFSET ");
        builder.push_bind(offset);
    }
    Ok(builder)
}

fn count_sql(table: &str, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quote_ident(table)?;
    let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {table} AS r"));
    push_filter(&mut builder, &table, filter)?;
    Ok(builder)
}

fn insert_sql(table: &str, record: Record) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quote_ident(table)?;
    if record.is_empty() {
        return Ok(QueryBuilder::new(format!(
            "INSERT INTO {table} AS r DEFAULT VALUES RETURNING to_jsonb(r)"
        )));
    }
    let columns = record
        .keys()
        .map(|k| quote_ident(k))
        .collect::<Result<Vec<_>, _>>()?;
    let targets = columns.join(", ");
    let sources = columns
        .iter()
        .map(|c| format!("p.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {table} AS r ({targets}) SELECT {sources} FROM jsonb_populate_record(NULL::{table}, "
    ));
    builder.push_bind(Json(Value::Object(record)));
    builder.push(") AS p RETURNING to_jsonb(r)");
    Ok(builder)
}

fn update_sql(table: &str, filter: &Filter, fields: &FieldSet) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quote_ident(table)?;
    let assignments = fields
        .iter()
        .map(|(k, _)| quote_ident(k).map(|c| format!("{c} = p.{c}")))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");
    let mut builder = QueryBuilder::new(format!("UPDATE {table} AS r SET {assignments} FROM jsonb_populate_record(NULL::{table}, "));
    builder.push_bind(Json(Value::Object(fields.as_record().clone())));
    builder.push(") AS p");
    push_filter(&mut builder, &table, filter)?;
    Ok(builder)
}

fn delete_sql(table: &str, filter: &Filter) -> Result<QueryBuilder<'static, Postgres>, StoreError> {
    let table = quote_ident(table)?;
    let mut builder = QueryBuilder::new(format!("DELETE FROM {table} AS r"));
    push_filter(&mut builder, &table, filter)?;
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Pagination, Sort};
    use serde_json::json;

    #[test]
    fn select_renders_filter_sort_and_window() {
        let select = Select::new(Filter::new().eq("enabled", true).like("name", "ad"))
            .sorted(Sort::desc("created_at"))
            .paged(&Pagination::new(2, 10));
        let builder = select_sql("admin_users", &select).unwrap();
        assert_eq!(
            builder.sql(),
            "SELECT to_jsonb(r) AS record FROM \"admin_users\" AS r WHERE TRUE \
             AND r.\"enabled\" = (jsonb_populate_record(NULL::\"admin_users\", $1)).\"enabled\" \
             AND r.\"name\"::text ILIKE $2 ORDER BY r.\"created_at\" DESC LIMIT $3 OFFSET $4"
        );
    }

    #[test]
    fn id_set_renders_as_any_over_recordset() {
        let builder = delete_sql("admin_roles", &Filter::by_ids(&[1, 2])).unwrap();
        assert_eq!(
            builder.sql(),
            "DELETE FROM \"admin_roles\" AS r WHERE TRUE AND r.\"id\" = ANY(ARRAY(SELECT v.\"id\" \
             FROM jsonb_populate_recordset(NULL::\"admin_roles\", $1) AS v))"
        );
        let empty = delete_sql("admin_roles", &Filter::by_ids(&[])).unwrap();
        assert_eq!(empty.sql(), "DELETE FROM \"admin_roles\" AS r WHERE TRUE AND FALSE");
    }

    #[test]
    fn update_assigns_only_listed_columns() {
        let fields = FieldSet::new().with("name", "ops");
        let builder = update_sql("admin_roles", &Filter::by_id(3), &fields).unwrap();
        assert_eq!(
            builder.sql(),
            "UPDATE \"admin_roles\" AS r SET \"name\" = p.\"name\" FROM \
             jsonb_populate_record(NULL::\"admin_roles\", $1) AS p WHERE TRUE \
             AND r.\"id\" = (jsonb_populate_record(NULL::\"admin_roles\", $2)).\"id\""
        );
    }

    #[test]
    fn insert_lists_record_columns() {
        let record = match json!({"code": "ops", "name": "Ops"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let builder = insert_sql("admin_roles", record).unwrap();
        assert_eq!(
            builder.sql(),
            "INSERT INTO \"admin_roles\" AS r (\"code\", \"name\") SELECT p.\"code\", p.\"name\" \
             FROM jsonb_populate_record(NULL::\"admin_roles\", $1) AS p RETURNING to_jsonb(r)"
        );
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(matches!(
            select_sql("users; drop", &Select::default()),
            Err(StoreError::InvalidIdentifier(_))
        ));
        let filter = Filter::new().eq("name\"--", 1);
        assert!(count_sql("users", &filter).is_err());
        assert_eq!(escape_like("50%_a\\"), "50\\%\\_a\\\\");
    }
}
