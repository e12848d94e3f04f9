//! Authorization of closure members and shared-object retention.
//!
//! Evaluation happens in two passes over the closure:
//!
//! 1. **Rule table**, parents before children. Every object is checked
//!    against its group's permission level and the acting principal's
//!    [`Standing`]. A non-requested object whose in-closure containers are
//!    all denied is denied as blocked by its ancestor; if its containers
//!    could not be evaluated it is retained as a failed dependency.
//!    Objects reached only by reference are judged on their own. Rendering
//!    settings under a pixel set the principal may delete are allowed with
//!    it.
//! 2. **Retention fixpoint**. Shared objects with surviving referrers are
//!    retained unless force-deleted by a principal with force authority,
//!    and containers of retained or denied children are retained. Each
//!    retention can invalidate others, so the pass repeats until stable.
//!
//! | Group level | Owner | Other member | Group-owner | Admin |
//! |---|---|---|---|---|
//! | `rw----` | allow | deny | allow | allow |
//! | `rwr---` | allow | deny | allow | allow |
//! | `rwrw--` | allow | allow | allow | allow |
//! | `rwra--` | allow | deny | allow | allow |
//! | `rwrwr-` | allow | allow | allow | allow |
//!
//! Principals outside the object's group are denied at every level.

use crate::domain::{
    DeleteOutcome, DenyReason, Failure, GroupId, LinkKind, ObjectKind, ObjectRef, Ownership,
    PermissionLevel, Principal, PrincipalId, RetainReason,
};
use crate::error::StoreResult;
use crate::permissions::PermissionModel;
use crate::resolver::{Closure, ordering};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Relationship of the acting principal to one object.
///
/// Variants are ordered from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Standing {
    /// Confirmed system administrator
    Administrator,
    /// Confirmed owner of the object's group
    GroupOwner,
    /// Owner of the object
    Owner,
    /// Another member of the object's group
    Member,
    /// Not a member of the object's group
    Outsider,
}

/// The rule table.
#[must_use]
pub fn may_delete(level: PermissionLevel, standing: Standing) -> bool {
    match standing {
        Standing::Administrator | Standing::GroupOwner | Standing::Owner => true,
        Standing::Member => matches!(
            level,
            PermissionLevel::ReadWriteCollab | PermissionLevel::Public
        ),
        Standing::Outsider => false,
    }
}

/// Who may override retention of a shared object with `force`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceAuthority {
    /// Force was not requested or the principal may not force
    None,
    /// Any surviving referrer may be unlinked
    Any,
    /// Only referrers owned by this principal may be unlinked
    OwnReferrersOnly(PrincipalId),
}

impl ForceAuthority {
    /// Authority granted to a principal with `standing` asking for `force`.
    #[must_use]
    pub fn for_request(force: bool, standing: Standing, principal: PrincipalId) -> Self {
        match (force, standing) {
            (false, _) | (true, Standing::Member | Standing::Outsider) => Self::None,
            (true, Standing::Administrator | Standing::GroupOwner) => Self::Any,
            (true, Standing::Owner) => Self::OwnReferrersOnly(principal),
        }
    }

    /// Returns `true` if every referrer, given by its owner, may be unlinked.
    ///
    /// Referrers of unknown ownership are only covered by [`Self::Any`].
    pub fn covers(&self, referrer_owners: impl IntoIterator<Item = Option<PrincipalId>>) -> bool {
        match self {
            Self::None => false,
            Self::Any => true,
            Self::OwnReferrersOnly(principal) => referrer_owners
                .into_iter()
                .all(|owner| owner == Some(*principal)),
        }
    }
}

/// Permission to delete one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Object whose ownership authorizes the delete: the object itself, or
    /// the pixel set owning a rendering setting
    pub authority: ObjectRef,

    /// Override for surviving referrers
    pub force: ForceAuthority,
}

/// Result of authorizing a closure.
#[derive(Debug, Clone, Default)]
pub struct Authorization {
    /// Objects cleared for deletion
    pub eligible: BTreeMap<ObjectRef, Grant>,

    /// Denied, retained and failed objects
    pub outcomes: BTreeMap<ObjectRef, DeleteOutcome>,
}

impl Authorization {
    /// Set of eligible objects
    #[must_use]
    pub fn eligible_set(&self) -> BTreeSet<ObjectRef> {
        self.eligible.keys().copied().collect()
    }
}

/// Resolves standings against the permission model.
///
/// Group lookups are cached for the lifetime of the authorizer; create a
/// fresh one to observe group changes.
pub struct Authorizer<'a> {
    principal: &'a Principal,
    permissions: &'a dyn PermissionModel,
    admin: Option<bool>,
    groups: HashMap<GroupId, (PermissionLevel, bool)>,
}

impl<'a> Authorizer<'a> {
    /// Create an authorizer for one acting principal
    #[must_use]
    pub fn new(principal: &'a Principal, permissions: &'a dyn PermissionModel) -> Self {
        Self {
            principal,
            permissions,
            admin: None,
            groups: HashMap::new(),
        }
    }

    async fn is_admin(&mut self) -> StoreResult<bool> {
        if let Some(admin) = self.admin {
            return Ok(admin);
        }
        let admin =
            self.principal.administrator && self.permissions.is_admin(self.principal.id).await?;
        self.admin = Some(admin);
        Ok(admin)
    }

    async fn group(&mut self, group: GroupId) -> StoreResult<(PermissionLevel, bool)> {
        if let Some(cached) = self.groups.get(&group) {
            return Ok(*cached);
        }
        let level = self.permissions.group_level(group).await?;
        let owner = self.principal.declares_group_owner(group)
            && self
                .permissions
                .is_group_owner(self.principal.id, group)
                .await?;
        self.groups.insert(group, (level, owner));
        Ok((level, owner))
    }

    /// Standing of the principal towards an object with `ownership`.
    ///
    /// # Errors
    ///
    /// Returns the permission model's error if a lookup fails.
    pub async fn standing(&mut self, ownership: &Ownership) -> StoreResult<Standing> {
        if self.is_admin().await? {
            return Ok(Standing::Administrator);
        }
        let (_, group_owner) = self.group(ownership.group).await?;
        Ok(if group_owner {
            Standing::GroupOwner
        } else if ownership.owner == self.principal.id {
            Standing::Owner
        } else if self.principal.is_member_of(ownership.group) {
            Standing::Member
        } else {
            Standing::Outsider
        })
    }

    /// Apply the rule table to an object with `ownership`.
    ///
    /// # Errors
    ///
    /// Returns the permission model's error if a lookup fails.
    pub async fn may_delete(&mut self, ownership: &Ownership) -> StoreResult<bool> {
        let standing = self.standing(ownership).await?;
        let (level, _) = self.group(ownership.group).await?;
        Ok(may_delete(level, standing))
    }
}

/// First-pass verdict of one object.
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Allowed { authority: ObjectRef },
    Denied(DenyReason),
    Failed,
    DependencyFailed,
}

impl Verdict {
    /// Outcome forced on contents whose containers all carry `verdicts`.
    ///
    /// A denied container blocks its contents; a container that could not
    /// be evaluated leaves them retained.
    fn inherited(verdicts: &[Verdict]) -> Option<DeleteOutcome> {
        let any_allowed = verdicts
            .iter()
            .any(|verdict| matches!(verdict, Verdict::Allowed { .. }));
        if verdicts.is_empty() || any_allowed {
            return None;
        }
        if verdicts
            .iter()
            .any(|verdict| matches!(verdict, Verdict::Denied(_)))
        {
            Some(DeleteOutcome::Denied(DenyReason::BlockedByAncestor))
        } else {
            Some(DeleteOutcome::Retained(RetainReason::DependencyFailed))
        }
    }
}

/// Authorize every closure member and settle shared-object retention.
pub async fn authorize(
    closure: &Closure,
    principal: &Principal,
    permissions: &dyn PermissionModel,
) -> Authorization {
    let mut authorizer = Authorizer::new(principal, permissions);
    let mut authorization = Authorization::default();
    let mut verdicts: HashMap<ObjectRef, Verdict> = HashMap::new();
    let mut standings: HashMap<ObjectRef, Standing> = HashMap::new();

    for object in ordering::parents_first(closure) {
        let Some(entry) = closure.get(&object) else {
            continue;
        };

        let container_verdicts: Vec<Verdict> = entry
            .parents
            .iter()
            .filter(|link| link.kind == LinkKind::Containment)
            .filter_map(|link| verdicts.get(&link.target).copied())
            .collect();
        if !entry.requested {
            match Verdict::inherited(&container_verdicts) {
                Some(DeleteOutcome::Denied(reason)) => {
                    verdicts.insert(object, Verdict::Denied(reason));
                    authorization
                        .outcomes
                        .insert(object, DeleteOutcome::Denied(reason));
                    continue;
                }
                Some(outcome) => {
                    tracing::debug!(%object, "container not evaluated");
                    verdicts.insert(object, Verdict::DependencyFailed);
                    authorization.outcomes.insert(object, outcome);
                    continue;
                }
                None => {}
            }
        }

        let standing = match authorizer.standing(&entry.ownership).await {
            Ok(standing) => standing,
            Err(error) => {
                tracing::warn!(%object, %error, "permission lookup failed");
                verdicts.insert(object, Verdict::Failed);
                authorization.outcomes.insert(
                    object,
                    DeleteOutcome::Failed(Failure::storage(format!(
                        "permission lookup failed: {error}"
                    ))),
                );
                continue;
            }
        };
        standings.insert(object, standing);

        let inherited = (object.kind == ObjectKind::RenderingSettings)
            .then(|| {
                entry.parents.iter().find(|link| {
                    link.target.kind == ObjectKind::Pixels
                        && matches!(verdicts.get(&link.target), Some(Verdict::Allowed { .. }))
                })
            })
            .flatten();

        let verdict = if let Some(pixels) = inherited {
            Verdict::Allowed {
                authority: pixels.target,
            }
        } else {
            match authorizer.may_delete(&entry.ownership).await {
                Ok(true) => Verdict::Allowed { authority: object },
                Ok(false) => Verdict::Denied(DenyReason::PermissionDenied),
                Err(error) => {
                    tracing::warn!(%object, %error, "permission lookup failed");
                    authorization.outcomes.insert(
                        object,
                        DeleteOutcome::Failed(Failure::storage(format!(
                            "permission lookup failed: {error}"
                        ))),
                    );
                    Verdict::Failed
                }
            }
        };

        match verdict {
            Verdict::Allowed { authority } => {
                authorization.eligible.insert(
                    object,
                    Grant {
                        authority,
                        force: ForceAuthority::for_request(entry.force, standing, principal.id),
                    },
                );
            }
            Verdict::Denied(reason) => {
                tracing::debug!(%object, %reason, "delete denied");
                authorization
                    .outcomes
                    .insert(object, DeleteOutcome::Denied(reason));
            }
            Verdict::Failed | Verdict::DependencyFailed => {}
        }
        verdicts.insert(object, verdict);
    }

    settle_retention(closure, &mut authorization);
    authorization
}

/// Why an eligible object cannot be deleted, if it cannot.
fn retention(
    closure: &Closure,
    eligible: &BTreeMap<ObjectRef, Grant>,
    object: &ObjectRef,
    grant: &Grant,
) -> Option<RetainReason> {
    let entry = closure.get(object)?;

    let mut surviving: Vec<Option<PrincipalId>> = entry
        .outside_referrers
        .iter()
        .map(|referrer| referrer.owner)
        .collect();
    surviving.extend(
        entry
            .referrers()
            .filter(|referrer| !eligible.contains_key(referrer))
            .map(|referrer| closure.get(&referrer).map(|parent| parent.ownership.owner)),
    );
    if !surviving.is_empty() && !grant.force.covers(surviving) {
        return Some(RetainReason::StillReferenced);
    }

    if !entry.requested && entry.reached_only_by_reference() {
        let referrer_owners: Vec<Option<PrincipalId>> = entry
            .referrers()
            .map(|referrer| closure.get(&referrer).map(|parent| parent.ownership.owner))
            .collect();
        let shares_owner = referrer_owners
            .iter()
            .any(|owner| *owner == Some(entry.ownership.owner));
        if !shares_owner && !grant.force.covers(referrer_owners) {
            return Some(RetainReason::OwnedByOtherUser);
        }
    }

    if entry.contained().any(|child| !eligible.contains_key(&child)) {
        return Some(RetainReason::BlockedByDescendant);
    }

    None
}

/// Retain eligible objects until no retention invalidates another.
fn settle_retention(closure: &Closure, authorization: &mut Authorization) {
    loop {
        let retained: Vec<(ObjectRef, RetainReason)> = authorization
            .eligible
            .iter()
            .filter_map(|(object, grant)| {
                retention(closure, &authorization.eligible, object, grant)
                    .map(|reason| (*object, reason))
            })
            .collect();

        if retained.is_empty() {
            return;
        }
        for (object, reason) in retained {
            tracing::debug!(%object, %reason, "object retained");
            authorization.eligible.remove(&object);
            authorization
                .outcomes
                .insert(object, DeleteOutcome::Retained(reason));
        }
    }
}
