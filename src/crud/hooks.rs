use std::sync::Arc;

use crate::{
    error::AppError,
    module::BoxFuture,
    store::{FieldSet, Filter, Transaction},
};

/// The transaction handle hooks receive. Hooks must do their writes through it
/// and never open a transaction of their own.
pub type Tx = Box<dyn Transaction>;

pub type HookResult<'a> = BoxFuture<'a, Result<(), AppError>>;

pub(crate) type BuildListFn<L> = Arc<dyn Fn(&L) -> Filter + Send + Sync>;
pub(crate) type BaseQueryFn = Arc<dyn Fn() -> Filter + Send + Sync>;
pub(crate) type AfterListFn<T> = Arc<dyn for<'a> Fn(&'a mut Vec<T>) -> HookResult<'a> + Send + Sync>;
pub(crate) type AfterGetFn<T> = Arc<dyn for<'a> Fn(&'a mut T) -> HookResult<'a> + Send + Sync>;
pub(crate) type NewFromCreateFn<T, C> =
    Arc<dyn for<'a> Fn(&'a C) -> BoxFuture<'a, Result<T, AppError>> + Send + Sync>;
pub(crate) type CreateInTxFn<T, C> =
    Arc<dyn for<'a> Fn(&'a mut Tx, &'a mut T, &'a C) -> HookResult<'a> + Send + Sync>;
pub(crate) type ReloadFn<T> = Arc<dyn for<'a> Fn(&'a mut Tx, i64, &'a mut T) -> HookResult<'a> + Send + Sync>;
pub(crate) type BuildUpdatesFn<T, U> =
    Arc<dyn for<'a> Fn(&'a U, &'a T) -> BoxFuture<'a, Result<FieldSet, AppError>> + Send + Sync>;
pub(crate) type UpdateInTxFn<T, U> =
    Arc<dyn for<'a> Fn(&'a mut Tx, i64, &'a mut T, &'a U) -> HookResult<'a> + Send + Sync>;
pub(crate) type DeleteInTxFn = Arc<dyn for<'a> Fn(&'a mut Tx, i64) -> HookResult<'a> + Send + Sync>;
pub(crate) type DeleteBatchInTxFn = Arc<dyn for<'a> Fn(&'a mut Tx, &'a [i64]) -> HookResult<'a> + Send + Sync>;

/// CrudHooks
///
/// The per-resource customization points of the CRUD engine. `build_list`,
/// `new_from_create` and `build_updates` are mandatory for the operations that
/// use them; every other hook is optional.
///
/// Asynchronous hooks return boxed futures borrowing their arguments:
///
/// ```ignore
/// CrudHooks::new().after_get(|user: &mut AdminUser| Box::pin(async move {
///     user.role_ids = load_roles(user.id).await?;
///     Ok(())
/// }))
/// ```
pub struct CrudHooks<T, L, C, U> {
    pub(crate) build_list: Option<BuildListFn<L>>,
    pub(crate) after_list: Option<AfterListFn<T>>,
    pub(crate) build_get_query: Option<BaseQueryFn>,
    pub(crate) after_get: Option<AfterGetFn<T>>,
    pub(crate) new_from_create: Option<NewFromCreateFn<T, C>>,
    pub(crate) create_in_tx: Option<CreateInTxFn<T, C>>,
    pub(crate) reload_after_create: Option<ReloadFn<T>>,
    pub(crate) build_update_query: Option<BaseQueryFn>,
    pub(crate) build_updates: Option<BuildUpdatesFn<T, U>>,
    pub(crate) update_in_tx: Option<UpdateInTxFn<T, U>>,
    pub(crate) reload_after_update: Option<ReloadFn<T>>,
    pub(crate) delete_in_tx: Option<DeleteInTxFn>,
    pub(crate) delete_batch_in_tx: Option<DeleteBatchInTxFn>,
}

impl<T, L, C, U> Default for CrudHooks<T, L, C, U> {
    fn default() -> Self {
        Self {
            build_list: None,
            after_list: None,
            build_get_query: None,
            after_get: None,
            new_from_create: None,
            create_in_tx: None,
            reload_after_create: None,
            build_update_query: None,
            build_updates: None,
            update_in_tx: None,
            reload_after_update: None,
            delete_in_tx: None,
            delete_batch_in_tx: None,
        }
    }
}

impl<T, L, C, U> CrudHooks<T, L, C, U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns the bound list query into a filter. Mandatory for List.
    pub fn build_list<F>(mut self, f: F) -> Self
    where
        F: Fn(&L) -> Filter + Send + Sync + 'static,
    {
        self.build_list = Some(Arc::new(f));
        self
    }

    pub fn after_list<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Vec<T>) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.after_list = Some(Arc::new(f));
        self
    }

    /// Base filter for Get; the engine adds the id condition.
    pub fn build_get_query<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Filter + Send + Sync + 'static,
    {
        self.build_get_query = Some(Arc::new(f));
        self
    }

    pub fn after_get<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut T) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.after_get = Some(Arc::new(f));
        self
    }

    /// Builds the entity to insert. Runs before any transaction is opened, so a
    /// validation error here never touches the store. Mandatory for Create.
    pub fn new_from_create<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a C) -> BoxFuture<'a, Result<T, AppError>> + Send + Sync + 'static,
    {
        self.new_from_create = Some(Arc::new(f));
        self
    }

    pub fn create_in_tx<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Tx, &'a mut T, &'a C) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.create_in_tx = Some(Arc::new(f));
        self
    }

    pub fn reload_after_create<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Tx, i64, &'a mut T) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.reload_after_create = Some(Arc::new(f));
        self
    }

    /// Base filter used to load the existing row for Update and ToggleEnabled.
    pub fn build_update_query<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Filter + Send + Sync + 'static,
    {
        self.build_update_query = Some(Arc::new(f));
        self
    }

    /// Builds the partial update from the request and the loaded row. An empty
    /// field set skips the update statement. Mandatory for Update.
    pub fn build_updates<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a U, &'a T) -> BoxFuture<'a, Result<FieldSet, AppError>> + Send + Sync + 'static,
    {
        self.build_updates = Some(Arc::new(f));
        self
    }

    pub fn update_in_tx<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Tx, i64, &'a mut T, &'a U) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.update_in_tx = Some(Arc::new(f));
        self
    }

    /// Also runs after ToggleEnabled.
    pub fn reload_after_update<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Tx, i64, &'a mut T) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.reload_after_update = Some(Arc::new(f));
        self
    }

    /// Runs before the row is deleted, inside the same transaction.
    pub fn delete_in_tx<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Tx, i64) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.delete_in_tx = Some(Arc::new(f));
        self
    }

    pub fn delete_batch_in_tx<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Tx, &'a [i64]) -> HookResult<'a> + Send + Sync + 'static,
    {
        self.delete_batch_in_tx = Some(Arc::new(f));
        self
    }
}
