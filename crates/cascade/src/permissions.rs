//! Permission model consumed by the authorization evaluator.
//!
//! The engine only reads from the permission model. Group levels, group
//! ownership and administrator rights are maintained by an external
//! administration service; [`StaticPermissions`] is an in-memory
//! implementation for embedding and tests.

use crate::domain::{GroupId, PermissionLevel, PrincipalId};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Read-only view of groups and roles.
#[async_trait]
pub trait PermissionModel: Send + Sync {
    /// Current permission level of a group.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownGroup` if the group has no record.
    async fn group_level(&self, group: GroupId) -> StoreResult<PermissionLevel>;

    /// Returns `true` if `principal` is a designated owner of `group`.
    async fn is_group_owner(&self, principal: PrincipalId, group: GroupId) -> StoreResult<bool>;

    /// Returns `true` if `principal` is a system administrator.
    async fn is_admin(&self, principal: PrincipalId) -> StoreResult<bool>;

    /// Returns `true` if `principal` exists at all.
    async fn is_known_principal(&self, principal: PrincipalId) -> StoreResult<bool>;
}

#[derive(Debug, Default)]
struct PermissionTables {
    levels: HashMap<GroupId, PermissionLevel>,
    group_owners: HashSet<(PrincipalId, GroupId)>,
    admins: HashSet<PrincipalId>,
    principals: HashSet<PrincipalId>,
}

/// In-memory permission model.
#[derive(Debug, Default)]
pub struct StaticPermissions {
    tables: RwLock<PermissionTables>,
}

impl StaticPermissions {
    /// Create an empty permission model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group, or change the level of an existing one
    pub async fn set_group_level(&self, group: GroupId, level: PermissionLevel) {
        self.tables.write().await.levels.insert(group, level);
    }

    /// Register a principal
    pub async fn add_principal(&self, principal: PrincipalId) {
        self.tables.write().await.principals.insert(principal);
    }

    /// Register a principal as owner of a group
    pub async fn add_group_owner(&self, principal: PrincipalId, group: GroupId) {
        let mut tables = self.tables.write().await;
        tables.principals.insert(principal);
        tables.group_owners.insert((principal, group));
    }

    /// Register a principal as system administrator
    pub async fn add_admin(&self, principal: PrincipalId) {
        let mut tables = self.tables.write().await;
        tables.principals.insert(principal);
        tables.admins.insert(principal);
    }
}

#[async_trait]
impl PermissionModel for StaticPermissions {
    async fn group_level(&self, group: GroupId) -> StoreResult<PermissionLevel> {
        self.tables
            .read()
            .await
            .levels
            .get(&group)
            .copied()
            .ok_or(StoreError::UnknownGroup(group))
    }

    async fn is_group_owner(&self, principal: PrincipalId, group: GroupId) -> StoreResult<bool> {
        Ok(self
            .tables
            .read()
            .await
            .group_owners
            .contains(&(principal, group)))
    }

    async fn is_admin(&self, principal: PrincipalId) -> StoreResult<bool> {
        Ok(self.tables.read().await.admins.contains(&principal))
    }

    async fn is_known_principal(&self, principal: PrincipalId) -> StoreResult<bool> {
        Ok(self.tables.read().await.principals.contains(&principal))
    }
}
