use admin_engine::{
    AppConfig, AppState, MemoryStore, PermissionRegistry, StoreState,
    auth::{Principal, PrincipalKind},
    create_router_with_modules,
    crud::{CrudEngine, CrudHooks, CrudPerms},
    error::AppError,
    models::{AdminRole, AdminRolePermission, AdminUser, AdminUserRole},
    module::{Module, ModuleDescriptor, OperationTable},
    permission::{PermissionNode, enforce::require_permission, matches},
    store::{Entity, FieldSet, Filter, Store, Transaction, to_record},
};
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tower::ServiceExt;

// --- PROPERTIES OF THE PERMISSION PRIMITIVES ---

#[test]
fn path_patterns_match_segment_by_segment() {
    assert!(matches("/admin-api/users/:id", "/admin-api/users/42"));
    assert!(!matches("/admin-api/users/:id", "/admin-api/users/42/roles"));
    assert!(!matches("/admin-api/users/:id", "/admin-api/users/"));
    assert!(!matches("/admin-api/users", "/admin-api/users/"));
    assert!(matches("/admin-api/users/:id/roles/:role", "/admin-api/users/1/roles/2"));
    assert!(!matches("/admin-api/users/:id", "/admin-api/roles/42"));
}

#[test]
fn subtrees_merge_in_pre_order() {
    let registry = PermissionRegistry::new();
    registry.set_base(vec![PermissionNode::new("system", "System")]).unwrap();
    registry
        .add_subtree("system", vec![PermissionNode::new("system:user:menu", "Users")])
        .unwrap();
    registry
        .add_subtree("system:user:menu", vec![PermissionNode::new("system:user:list", "List")])
        .unwrap();
    assert_eq!(registry.flatten(), vec!["system", "system:user:menu", "system:user:list"]);
}

#[test]
fn duplicate_keys_under_different_parents_are_both_listed() {
    let registry = PermissionRegistry::new();
    registry
        .set_base(vec![PermissionNode::new("a", "A"), PermissionNode::new("b", "B")])
        .unwrap();
    registry.add_subtree("a", vec![PermissionNode::new("shared", "Shared")]).unwrap();
    registry.add_subtree("b", vec![PermissionNode::new("shared", "Shared")]).unwrap();
    assert_eq!(registry.flatten(), vec!["a", "shared", "b", "shared"]);
}

#[test]
fn super_admins_pass_any_permission_check() {
    let principal = Principal {
        user_id: 1,
        username: "root".into(),
        kind: PrincipalKind::Admin,
        is_super_admin: true,
        permissions: BTreeSet::new(),
    };
    assert!(require_permission(&principal, "anything:at:all").is_ok());

    let regular = Principal {
        is_super_admin: false,
        ..principal
    };
    assert!(matches!(
        require_permission(&regular, "anything:at:all"),
        Err(AppError::Forbidden(_))
    ));
}

// --- END-TO-END: A THIRD-PARTY MODULE BEHIND THE FULL ROUTER ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Member {
    id: i64,
    name: String,
}

impl Entity for Member {
    const TABLE: &'static str = "members";

    fn id(&self) -> i64 {
        self.id
    }
}

#[derive(Debug, Default, Deserialize)]
struct MemberQuery {}

#[derive(Debug, Deserialize)]
struct CreateMember {
    name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateMember {}

type MemberHooks = CrudHooks<Member, MemberQuery, CreateMember, UpdateMember>;

struct MemberModule {
    engine: Arc<CrudEngine<Member, MemberQuery, CreateMember, UpdateMember>>,
    perms: CrudPerms,
}

impl MemberModule {
    fn new(store: StoreState) -> Self {
        let hooks = MemberHooks::new()
            .build_list(|_query| Filter::new())
            .new_from_create(|request| {
                Box::pin(async move {
                    Ok(Member {
                        name: request.name.clone(),
                        ..Member::default()
                    })
                })
            })
            .build_updates(|_request, _existing| Box::pin(async move { Ok(FieldSet::new()) }));
        Self {
            engine: Arc::new(CrudEngine::new(store, hooks)),
            perms: CrudPerms::new("system", "user", "Users"),
        }
    }
}

impl Module for MemberModule {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            name: "user".into(),
            group: "/users".into(),
            routes: self.perms.routes(),
            permission_parent: Some("system:manage".into()),
            permissions: self.perms.tree.clone(),
        }
    }

    fn operations(self: Arc<Self>) -> OperationTable {
        self.engine.clone().operations()
    }
}

async fn seed(store: &MemoryStore) {
    let mut tx = store.begin().await.unwrap();

    let reader = AdminUser {
        id: 1,
        username: "reader".into(),
        enabled: true,
        ..Default::default()
    };
    let mut record = to_record(AdminUser::TABLE, &reader).unwrap();
    record.remove("role_ids");
    tx.insert(AdminUser::TABLE, record).await.unwrap();

    let role = AdminRole {
        id: 1,
        name: "Reader".into(),
        code: "reader".into(),
        enabled: true,
        ..Default::default()
    };
    let mut record = to_record(AdminRole::TABLE, &role).unwrap();
    record.remove("permissions");
    tx.insert(AdminRole::TABLE, record).await.unwrap();

    let link = AdminUserRole { id: 1, user_id: 1, role_id: 1 };
    tx.insert(AdminUserRole::TABLE, to_record(AdminUserRole::TABLE, &link).unwrap())
        .await
        .unwrap();
    let grant = AdminRolePermission {
        id: 1,
        role_id: 1,
        permission: "system:user:list".into(),
    };
    tx.insert(AdminRolePermission::TABLE, to_record(AdminRolePermission::TABLE, &grant).unwrap())
        .await
        .unwrap();

    let member = Member { id: 7, name: "Seven".into() };
    tx.insert(Member::TABLE, to_record(Member::TABLE, &member).unwrap())
        .await
        .unwrap();

    tx.commit().await.unwrap();
}

async fn member_app() -> (Router, Arc<PermissionRegistry>) {
    let memory = MemoryStore::new();
    seed(&memory).await;
    let store = Arc::new(memory) as StoreState;
    let state = AppState::new(AppConfig::default(), store.clone());
    let registry = state.registry.clone();
    let modules: Vec<Arc<dyn Module>> = vec![Arc::new(MemberModule::new(store))];
    (create_router_with_modules(state, modules).unwrap(), registry)
}

async fn send(router: &Router, method: Method, uri: &str) -> StatusCode {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "1")
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn listed_permission_authorizes_get_by_id() {
    let (router, _) = member_app().await;
    assert_eq!(send(&router, Method::GET, "/admin-api/users/7").await, StatusCode::OK);
    assert_eq!(send(&router, Method::GET, "/admin-api/users/8").await, StatusCode::NOT_FOUND);
    assert_eq!(send(&router, Method::GET, "/admin-api/users").await, StatusCode::OK);
}

#[tokio::test]
async fn other_actions_need_their_own_permission() {
    let (router, _) = member_app().await;
    assert_eq!(send(&router, Method::DELETE, "/admin-api/users/7").await, StatusCode::FORBIDDEN);
    assert_eq!(send(&router, Method::PUT, "/admin-api/users/7").await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn registration_freezes_the_registry() {
    let (_, registry) = member_app().await;
    assert!(registry.is_frozen());
    assert!(registry.contains("system:user:list"));
    assert_eq!(
        registry.match_action(&Method::DELETE, "/admin-api/users/7").as_deref(),
        Some("system:user:delete")
    );
    assert!(registry.add_subtree("", vec![PermissionNode::new("late", "Late")]).is_err());
}
