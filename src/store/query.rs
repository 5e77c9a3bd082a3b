use std::cmp::Ordering;

use axum::{extract::Query, http::Uri};
use serde::Deserialize;
use serde_json::Value;

use super::Record;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Condition
///
/// A single predicate on one column. Values are plain JSON so that the same
/// filter can be evaluated by the in-memory store and rendered to SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    /// Case-insensitive substring match on the textual value of the column.
    Like(String, String),
    In(String, Vec<Value>),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(column, _)
            | Condition::Ne(column, _)
            | Condition::Like(column, _)
            | Condition::In(column, _) => column,
        }
    }

    /// Evaluates the predicate against a stored record. A missing column reads as `null`.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Condition::Eq(_, expected) => values_equal(actual, expected),
            Condition::Ne(_, expected) => !values_equal(actual, expected),
            Condition::Like(_, needle) => text_of(actual)
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Condition::In(_, candidates) => candidates.iter().any(|c| values_equal(actual, c)),
        }
    }
}

/// Filter
///
/// A conjunction of conditions. An empty filter selects every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: i64) -> Self {
        Self::new().eq("id", id)
    }

    pub fn by_ids(ids: &[i64]) -> Self {
        Self::new().any_of("id", ids.iter().copied())
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(column.to_string(), value.into()));
        self
    }

    pub fn ne(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Ne(column.to_string(), value.into()));
        self
    }

    /// Adds a substring match. Empty needles are ignored so optional search
    /// fields can be passed straight through.
    pub fn like(mut self, column: &str, needle: &str) -> Self {
        if !needle.is_empty() {
            self.conditions
                .push(Condition::Like(column.to_string(), needle.to_string()));
        }
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.conditions.push(Condition::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Adds an equality condition only when a value is present.
    pub fn eq_opt(self, column: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub direction: Direction,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Desc,
        }
    }

    /// The column the sort applies to, with any `table.` qualifier removed.
    pub fn column(&self) -> &str {
        self.field.rsplit('.').next().unwrap_or(&self.field)
    }

    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let column = self.column();
        let left = a.get(column).unwrap_or(&Value::Null);
        let right = b.get(column).unwrap_or(&Value::Null);
        let ordering = compare_values(left, right);
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

/// Accepts `field` or `table.field`, each part `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_sort_field(field: &str) -> bool {
    let mut parts = field.split('.');
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    };
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), None, _) => valid_part(a),
        (Some(a), Some(b), None) => valid_part(a) && valid_part(b),
        _ => false,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPagination {
    page: Option<String>,
    page_size: Option<String>,
    sort_field: Option<String>,
    sort_order: Option<String>,
}

/// Pagination
///
/// Page/size/sort parameters bound from `?page=&pageSize=&sortField=&sortOrder=`.
/// Unparseable numbers fall back to the defaults, oversized pages are capped,
/// and sort fields that are not plain identifiers are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    page: i64,
    page_size: i64,
    sort: Option<Sort>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: if page < 1 { DEFAULT_PAGE } else { page },
            page_size: if page_size < 1 {
                DEFAULT_PAGE_SIZE
            } else {
                page_size.min(MAX_PAGE_SIZE)
            },
            sort: None,
        }
    }

    pub fn with_sort(mut self, field: &str, order: &str) -> Self {
        if is_valid_sort_field(field) {
            self.sort = Some(if order == "ascend" {
                Sort::asc(field)
            } else {
                Sort::desc(field)
            });
        }
        self
    }

    pub fn from_uri(uri: &Uri) -> Self {
        let raw = Query::<RawPagination>::try_from_uri(uri)
            .map(|q| q.0)
            .unwrap_or_default();
        let parse = |value: Option<String>| value.and_then(|v| v.trim().parse::<i64>().ok());
        let pagination = Self::new(
            parse(raw.page).unwrap_or(DEFAULT_PAGE),
            parse(raw.page_size).unwrap_or(DEFAULT_PAGE_SIZE),
        );
        match raw.sort_field {
            Some(field) => pagination.with_sort(&field, raw.sort_order.as_deref().unwrap_or("")),
            None => pagination,
        }
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// Saturates instead of overflowing; an absurd page simply reads past the end.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }
}

/// Select
///
/// A full read request: filter, optional ordering, optional window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Select {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Select {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn paged(mut self, pagination: &Pagination) -> Self {
        self.limit = Some(pagination.page_size());
        self.offset = Some(pagination.offset());
        self
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => text_of(a).cmp(&text_of(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn pagination_defaults_and_caps() {
        let uri: Uri = "/users?page=0&pageSize=500".parse().unwrap();
        let p = Pagination::from_uri(&uri);
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let uri: Uri = "/users?page=abc&pageSize=".parse().unwrap();
        let p = Pagination::from_uri(&uri);
        assert_eq!((p.page(), p.page_size()), (1, 10));
    }

    #[test]
    fn pagination_offset_is_page_minus_one_times_size() {
        let uri: Uri = "/users?page=3&pageSize=20".parse().unwrap();
        assert_eq!(Pagination::from_uri(&uri).offset(), 40);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow_the_offset() {
        let uri: Uri = "/users?page=9223372036854775807&pageSize=100".parse().unwrap();
        let p = Pagination::from_uri(&uri);
        assert_eq!(p.page(), i64::MAX);
        assert_eq!(p.offset(), i64::MAX);
        assert!(p.offset() >= 0);
    }

    #[test]
    fn sort_field_is_validated() {
        let uri: Uri = "/users?sortField=name&sortOrder=ascend".parse().unwrap();
        assert_eq!(Pagination::from_uri(&uri).sort(), Some(&Sort::asc("name")));

        let uri: Uri = "/users?sortField=users.created_at".parse().unwrap();
        let p = Pagination::from_uri(&uri);
        assert_eq!(p.sort(), Some(&Sort::desc("users.created_at")));
        assert_eq!(p.sort().unwrap().column(), "created_at");

        let uri: Uri = "/users?sortField=name%3Bdrop".parse().unwrap();
        assert_eq!(Pagination::from_uri(&uri).sort(), None);
        assert!(!is_valid_sort_field("a.b.c"));
        assert!(!is_valid_sort_field("1abc"));
    }

    #[test]
    fn filter_evaluates_conditions() {
        let row = record(json!({"id": 7, "name": "Alice Admin", "enabled": true}));
        assert!(Filter::by_id(7).matches(&row));
        assert!(!Filter::by_id(8).matches(&row));
        assert!(Filter::new().like("name", "admin").matches(&row));
        assert!(Filter::new().like("name", "").matches(&row));
        assert!(Filter::by_ids(&[1, 7]).matches(&row));
        assert!(Filter::new().ne("enabled", false).matches(&row));
        assert!(!Filter::new().eq("missing", 1).matches(&row));
        assert!(!Filter::new().any_of("id", Vec::<i64>::new()).matches(&row));
    }
}
