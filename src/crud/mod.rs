//! The generic CRUD engine: List, Get, Create, Update, Delete, BatchDelete and
//! ToggleEnabled for any [`Entity`], customized per resource through [`CrudHooks`].
//!
//! Every mutating operation runs in exactly one store transaction. Steps run in
//! order inside it; the first failing step rolls the whole transaction back and
//! its error is returned as-is. Only the store's own not-found sentinel is
//! rewritten, into a `NotFound` carrying the engine's configured message.

use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{collections::HashSet, marker::PhantomData, sync::Arc};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{
    error::{AppError, RECORD_NOT_FOUND},
    module::{OperationTable, RequestContext, bind},
    response::ApiResponse,
    store::{
        Entity, FieldSet, Filter, Pagination, Record, Select, Sort, StoreError, StoreState, from_record,
        from_records, to_record,
    },
};

pub mod hooks;
pub mod perms;

pub use hooks::{CrudHooks, HookResult, Tx};
pub use perms::CrudPerms;

/// CrudOptions
///
/// Messages and conventions of one engine instance.
#[derive(Debug, Clone)]
pub struct CrudOptions {
    pub not_found_msg: String,
    pub created_msg: String,
    pub updated_msg: String,
    pub deleted_msg: String,
    pub enabled_msg: String,
    /// Boolean column ToggleEnabled writes.
    pub enabled_field: String,
    /// Applied to List when the caller gives no valid sort field.
    pub default_sort: Sort,
    /// Stamp `created_at` / `updated_at` on writes when the entity has them.
    pub timestamps: bool,
}

impl Default for CrudOptions {
    fn default() -> Self {
        Self {
            not_found_msg: RECORD_NOT_FOUND.to_string(),
            created_msg: "created successfully".to_string(),
            updated_msg: "updated successfully".to_string(),
            deleted_msg: "deleted successfully".to_string(),
            enabled_msg: "updated successfully".to_string(),
            enabled_field: "enabled".to_string(),
            default_sort: Sort::desc("created_at"),
            timestamps: true,
        }
    }
}

/// Page
///
/// One page of a List result plus the total number of matching rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Body of BatchDelete.
#[derive(Debug, Clone, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct IdsRequest {
    pub ids: Vec<i64>,
}

/// Body of ToggleEnabled.
#[derive(Debug, Clone, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct EnabledRequest {
    pub enabled: bool,
}

/// De-duplicates ids, keeping the first occurrence of each.
pub fn unique_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Commits `tx` when `result` is Ok, rolls it back otherwise.
pub async fn finish<R>(tx: Tx, result: Result<R, AppError>) -> Result<R, AppError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!("transaction rollback failed: {:?}", rollback);
            }
            Err(err)
        }
    }
}

fn now_value() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

fn missing(hook: &str) -> AppError {
    AppError::Configuration(format!("crud hook `{hook}` is not configured"))
}

/// CrudEngine
///
/// One instance per resource type, created at startup and shared by every
/// request for that resource.
pub struct CrudEngine<T, L, C, U> {
    store: StoreState,
    hooks: CrudHooks<T, L, C, U>,
    options: CrudOptions,
    _types: PhantomData<fn() -> (T, L, C, U)>,
}

impl<T, L, C, U> CrudEngine<T, L, C, U>
where
    T: Entity,
    L: DeserializeOwned + Default + Send + Sync + 'static,
    C: DeserializeOwned + Send + Sync + 'static,
    U: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(store: StoreState, hooks: CrudHooks<T, L, C, U>) -> Self {
        Self {
            store,
            hooks,
            options: CrudOptions::default(),
            _types: PhantomData,
        }
    }

    pub fn with_options(mut self, options: CrudOptions) -> Self {
        self.options = options;
        self
    }

    pub fn not_found_msg(mut self, msg: &str) -> Self {
        self.options.not_found_msg = msg.to_string();
        self
    }

    pub fn options(&self) -> &CrudOptions {
        &self.options
    }

    pub fn store(&self) -> &StoreState {
        &self.store
    }

    fn not_found(&self) -> AppError {
        AppError::NotFound(self.options.not_found_msg.clone())
    }

    /// Store failures, with the not-found sentinel carrying this resource's
    /// message. Applied only to store calls; hook errors pass through untouched.
    fn store_err(&self, err: StoreError) -> AppError {
        match err {
            StoreError::RecordNotFound => self.not_found(),
            other => AppError::from(other),
        }
    }

    fn get_filter(&self, id: i64) -> Filter {
        let base = self.hooks.build_get_query.as_ref().map(|f| f()).unwrap_or_default();
        base.eq("id", id)
    }

    fn update_filter(&self, id: i64) -> Filter {
        let base = self.hooks.build_update_query.as_ref().map(|f| f()).unwrap_or_default();
        base.eq("id", id)
    }

    fn stamp_update(&self, existing: &Record, fields: &mut FieldSet) {
        if self.options.timestamps && existing.contains_key("updated_at") && !fields.contains("updated_at") {
            fields.set("updated_at", now_value());
        }
    }

    /// List: filter from the mandatory hook, caller sort or the default sort,
    /// one page of rows plus the total count.
    pub async fn list(&self, query: &L, pagination: &Pagination) -> Result<Page<T>, AppError> {
        let build = self.hooks.build_list.as_ref().ok_or_else(|| missing("build_list"))?;
        let filter = build(query);
        let sort = pagination
            .sort()
            .cloned()
            .unwrap_or_else(|| self.options.default_sort.clone());

        let total = self.store.count(T::TABLE, &filter).await.map_err(|e| self.store_err(e))?;
        let select = Select::new(filter).sorted(sort).paged(pagination);
        let records = self.store.find(T::TABLE, &select).await.map_err(|e| self.store_err(e))?;
        let mut items: Vec<T> = from_records(records).map_err(|e| self.store_err(e))?;

        if let Some(after) = &self.hooks.after_list {
            after(&mut items).await?;
        }
        Ok(Page { items, total })
    }

    pub async fn get(&self, id: i64) -> Result<T, AppError> {
        let record = self
            .store
            .find_one(T::TABLE, &self.get_filter(id))
            .await.map_err(|e| self.store_err(e))?
            .ok_or_else(|| self.not_found())?;
        let mut item: T = from_record(record).map_err(|e| self.store_err(e))?;
        if let Some(after) = &self.hooks.after_get {
            after(&mut item).await?;
        }
        Ok(item)
    }

    /// Create: the entity is built (and validated) before the transaction opens.
    pub async fn create(&self, request: &C) -> Result<T, AppError> {
        let new_from_create = self
            .hooks
            .new_from_create
            .as_ref()
            .ok_or_else(|| missing("new_from_create"))?;
        let item = new_from_create(request).await?;

        let mut tx = self.store.begin().await.map_err(|e| self.store_err(e))?;
        let result = self.create_steps(&mut tx, item, request).await;
        finish(tx, result).await
    }

    async fn create_steps(&self, tx: &mut Tx, item: T, request: &C) -> Result<T, AppError> {
        let mut record = to_record(T::TABLE, &item).map_err(|e| self.store_err(e))?;
        let mut virtuals = Record::new();
        for field in T::VIRTUAL_FIELDS {
            if let Some(value) = record.remove(*field) {
                virtuals.insert(field.to_string(), value);
            }
        }
        if self.options.timestamps {
            let now = now_value();
            for column in ["created_at", "updated_at"] {
                if matches!(record.get(column), Some(Value::Null)) {
                    record.insert(column.to_string(), now.clone());
                }
            }
        }
        // Nulls (including an unset id) are left to column defaults.
        record.retain(|column, value| !value.is_null() && !(column == "id" && value.as_i64() == Some(0)));

        let mut stored = tx.insert(T::TABLE, record).await.map_err(|e| self.store_err(e))?;
        stored.extend(virtuals);
        let mut item: T = from_record(stored).map_err(|e| self.store_err(e))?;

        if let Some(hook) = &self.hooks.create_in_tx {
            hook(&mut *tx, &mut item, request).await?;
        }
        if let Some(reload) = &self.hooks.reload_after_create {
            let id = item.id();
            reload(&mut *tx, id, &mut item).await?;
        }
        Ok(item)
    }

    /// Update: load, build the field set, apply it when non-empty, then the
    /// optional hooks, all in one transaction.
    pub async fn update(&self, id: i64, request: &U) -> Result<T, AppError> {
        if self.hooks.build_updates.is_none() {
            return Err(missing("build_updates"));
        }
        let mut tx = self.store.begin().await.map_err(|e| self.store_err(e))?;
        let result = self.update_steps(&mut tx, id, request).await;
        finish(tx, result).await
    }

    async fn update_steps(&self, tx: &mut Tx, id: i64, request: &U) -> Result<T, AppError> {
        let build_updates = self.hooks.build_updates.as_ref().ok_or_else(|| missing("build_updates"))?;
        let record = tx
            .find_one(T::TABLE, &self.update_filter(id))
            .await.map_err(|e| self.store_err(e))?
            .ok_or_else(|| self.not_found())?;
        let mut existing: T = from_record(record.clone()).map_err(|e| self.store_err(e))?;

        let mut fields = build_updates(request, &existing).await?;
        if !fields.is_empty() {
            self.stamp_update(&record, &mut fields);
            tx.update(T::TABLE, &Filter::by_id(id), &fields).await.map_err(|e| self.store_err(e))?;
            existing = Self::apply(&existing, &fields)?;
        }

        if let Some(hook) = &self.hooks.update_in_tx {
            hook(&mut *tx, id, &mut existing, request).await?;
        }
        if let Some(reload) = &self.hooks.reload_after_update {
            reload(&mut *tx, id, &mut existing).await?;
        }
        Ok(existing)
    }

    fn apply(existing: &T, fields: &FieldSet) -> Result<T, AppError> {
        let mut record = to_record(T::TABLE, existing)?;
        for (column, value) in fields.iter() {
            record.insert(column.clone(), value.clone());
        }
        Ok(from_record(record)?)
    }

    /// Delete: zero rows affected is a not-found, not a silent success.
    pub async fn delete(&self, id: i64) -> Result<(), AppError> {
        let mut tx = self.store.begin().await.map_err(|e| self.store_err(e))?;
        let result = self.delete_steps(&mut tx, id).await;
        finish(tx, result).await
    }

    async fn delete_steps(&self, tx: &mut Tx, id: i64) -> Result<(), AppError> {
        if let Some(hook) = &self.hooks.delete_in_tx {
            hook(&mut *tx, id).await?;
        }
        let affected = tx.delete(T::TABLE, &Filter::by_id(id)).await.map_err(|e| self.store_err(e))?;
        if affected == 0 {
            return Err(self.not_found());
        }
        Ok(())
    }

    /// BatchDelete: ids are de-duplicated; absent ids are ignored. Returns the
    /// number of rows removed.
    pub async fn delete_batch(&self, ids: &[i64]) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Err(AppError::BadRequest("ids must not be empty".to_string()));
        }
        let ids = unique_ids(ids);
        let mut tx = self.store.begin().await.map_err(|e| self.store_err(e))?;
        let result = self.delete_batch_steps(&mut tx, &ids).await;
        finish(tx, result).await
    }

    async fn delete_batch_steps(&self, tx: &mut Tx, ids: &[i64]) -> Result<u64, AppError> {
        if let Some(hook) = &self.hooks.delete_batch_in_tx {
            hook(&mut *tx, ids).await?;
        }
        tx.delete(T::TABLE, &Filter::by_ids(ids)).await.map_err(|e| self.store_err(e))
    }

    /// ToggleEnabled: writes the configured boolean column.
    pub async fn set_enabled(&self, id: i64, enabled: bool) -> Result<T, AppError> {
        let mut tx = self.store.begin().await.map_err(|e| self.store_err(e))?;
        let result = self.set_enabled_steps(&mut tx, id, enabled).await;
        finish(tx, result).await
    }

    async fn set_enabled_steps(&self, tx: &mut Tx, id: i64, enabled: bool) -> Result<T, AppError> {
        let record = tx
            .find_one(T::TABLE, &self.update_filter(id))
            .await.map_err(|e| self.store_err(e))?
            .ok_or_else(|| self.not_found())?;
        let existing: T = from_record(record.clone()).map_err(|e| self.store_err(e))?;

        let mut fields = FieldSet::new().with(&self.options.enabled_field, enabled);
        self.stamp_update(&record, &mut fields);
        tx.update(T::TABLE, &Filter::by_id(id), &fields).await.map_err(|e| self.store_err(e))?;
        let mut updated = Self::apply(&existing, &fields)?;

        if let Some(reload) = &self.hooks.reload_after_update {
            reload(&mut *tx, id, &mut updated).await?;
        }
        Ok(updated)
    }

    async fn handle_list(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let query: L = ctx.query().unwrap_or_else(|e| {
            tracing::debug!("list query ignored: {}", e);
            L::default()
        });
        let page = self.list(&query, &ctx.pagination()).await?;
        Ok(ApiResponse::page(page.items, page.total).into_response())
    }

    async fn handle_get(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let item = self.get(ctx.id()?).await?;
        Ok(ApiResponse::success(item).into_response())
    }

    async fn handle_create(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let request: C = ctx.json()?;
        let item = self.create(&request).await?;
        Ok(ApiResponse::with_message(&self.options.created_msg, item).into_response())
    }

    async fn handle_update(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let id = ctx.id()?;
        let request: U = ctx.json()?;
        let item = self.update(id, &request).await?;
        Ok(ApiResponse::with_message(&self.options.updated_msg, item).into_response())
    }

    async fn handle_delete(&self, ctx: RequestContext) -> Result<Response, AppError> {
        self.delete(ctx.id()?).await?;
        Ok(ApiResponse::message(&self.options.deleted_msg).into_response())
    }

    async fn handle_delete_batch(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let request: IdsRequest = ctx.json()?;
        self.delete_batch(&request.ids).await?;
        Ok(ApiResponse::message(&self.options.deleted_msg).into_response())
    }

    async fn handle_set_enabled(&self, ctx: RequestContext) -> Result<Response, AppError> {
        let id = ctx.id()?;
        let request: EnabledRequest = ctx.json()?;
        let item = self.set_enabled(id, request.enabled).await?;
        Ok(ApiResponse::with_message(&self.options.enabled_msg, item).into_response())
    }

    /// The seven standard operations under their route names.
    pub fn operations(self: Arc<Self>) -> OperationTable {
        OperationTable::new()
            .with("List", bind(&self, |e, ctx| async move { e.handle_list(ctx).await }))
            .with("Get", bind(&self, |e, ctx| async move { e.handle_get(ctx).await }))
            .with("Create", bind(&self, |e, ctx| async move { e.handle_create(ctx).await }))
            .with("Update", bind(&self, |e, ctx| async move { e.handle_update(ctx).await }))
            .with("Delete", bind(&self, |e, ctx| async move { e.handle_delete(ctx).await }))
            .with(
                "BatchDelete",
                bind(&self, |e, ctx| async move { e.handle_delete_batch(ctx).await }),
            )
            .with(
                "ToggleEnabled",
                bind(&self, |e, ctx| async move { e.handle_set_enabled(ctx).await }),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_keep_first_occurrence() {
        assert_eq!(unique_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
        assert!(unique_ids(&[]).is_empty());
    }

    #[test]
    fn default_options() {
        let options = CrudOptions::default();
        assert_eq!(options.enabled_field, "enabled");
        assert_eq!(options.not_found_msg, "record not found");
        assert_eq!(options.default_sort, Sort::desc("created_at"));
    }
}
