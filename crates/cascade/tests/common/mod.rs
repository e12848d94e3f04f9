//! Common fixtures shared across integration tests.

#![allow(dead_code)]

use cascade::config::EngineConfig;
use cascade::domain::{
    DeleteOutcome, GroupId, ObjectKind, ObjectRef, Ownership, PermissionLevel, Principal,
    PrincipalId, Role,
};
use cascade::engine::DeleteEngine;
use cascade::permissions::{PermissionModel, StaticPermissions};
use cascade::report::DeleteReport;
use cascade::storage::GraphStore;
use cascade::storage::in_memory::InMemoryStore;
use std::sync::Arc;

pub const ALICE: PrincipalId = PrincipalId(1);
pub const BOB: PrincipalId = PrincipalId(2);
pub const CAROL: PrincipalId = PrincipalId(3);
pub const ROOT: PrincipalId = PrincipalId(100);

/// The group every fixture object lives in
pub const GROUP: GroupId = GroupId(1);

/// Install a test subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store, a permission model and an engine over both.
///
/// Alice and Bob are ordinary members, Carol owns the group and Root is a
/// system administrator.
pub struct World {
    pub store: Arc<InMemoryStore>,
    pub permissions: Arc<StaticPermissions>,
    pub engine: DeleteEngine,
}

impl World {
    pub async fn new(level: PermissionLevel) -> Self {
        Self::with_config(level, EngineConfig::default()).await
    }

    pub async fn with_config(level: PermissionLevel, config: EngineConfig) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let permissions = Arc::new(StaticPermissions::new());
        permissions.set_group_level(GROUP, level).await;
        permissions.add_principal(ALICE).await;
        permissions.add_principal(BOB).await;
        permissions.add_group_owner(CAROL, GROUP).await;
        permissions.add_admin(ROOT).await;

        let graph: Arc<dyn GraphStore> = store.clone();
        let model: Arc<dyn PermissionModel> = permissions.clone();
        let engine = DeleteEngine::new(graph, model, config).unwrap();
        Self {
            store,
            permissions,
            engine,
        }
    }

    /// Insert a top-level object
    pub async fn object(&self, kind: ObjectKind, id: i64, owner: PrincipalId) -> ObjectRef {
        let object = ObjectRef::new(kind, id);
        self.store
            .insert(object, Ownership::new(owner, GROUP))
            .await
            .unwrap();
        object
    }

    /// Insert an object inside `parent`
    pub async fn child(
        &self,
        parent: ObjectRef,
        kind: ObjectKind,
        id: i64,
        owner: PrincipalId,
    ) -> ObjectRef {
        let object = ObjectRef::new(kind, id);
        self.store
            .insert_contained(parent, object, owner)
            .await
            .unwrap();
        object
    }

    pub async fn image(&self, id: i64, owner: PrincipalId) -> ObjectRef {
        self.object(ObjectKind::Image, id, owner).await
    }

    pub async fn tag(&self, id: i64, owner: PrincipalId) -> ObjectRef {
        self.object(ObjectKind::Annotation, id, owner).await
    }

    /// Link a tag to an object
    pub async fn link(&self, referrer: ObjectRef, tag: ObjectRef) {
        self.store.add_reference(referrer, tag).await.unwrap();
    }

    /// Image with one pixel set, returned as `(image, pixels)`
    pub async fn image_with_pixels(&self, id: i64, owner: PrincipalId) -> (ObjectRef, ObjectRef) {
        let image = self.image(id, owner).await;
        let pixels = self.child(image, ObjectKind::Pixels, id, owner).await;
        (image, pixels)
    }

    pub async fn exists(&self, object: ObjectRef) -> bool {
        self.store.contains(&object).await
    }
}

/// A group member
pub fn member(id: PrincipalId) -> Principal {
    Principal::new(id).with_membership(GROUP, Role::Member)
}

/// Carol, declaring her group ownership
pub fn group_owner() -> Principal {
    Principal::new(CAROL).with_membership(GROUP, Role::GroupOwner)
}

/// Root, declaring administrator rights
pub fn admin() -> Principal {
    Principal::new(ROOT).as_administrator()
}

/// Outcome of an object that must be in the report
pub fn outcome(report: &DeleteReport, object: ObjectRef) -> DeleteOutcome {
    report
        .outcome(&object)
        .cloned()
        .unwrap_or_else(|| panic!("{object} missing from report"))
}
