//! Domain types for the delete engine.
//!
//! Stored objects are not modelled as a class hierarchy. Every object is
//! identified by an [`ObjectRef`], a `(kind, id)` pair whose [`ObjectKind`]
//! is a plain tagged enum, so the resolver and the executor can match on it
//! exhaustively without owning any entity data.

mod outcome;

pub use outcome::{DeleteOutcome, DenyReason, Failure, FailureKind, RetainReason};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identifier of a user of the object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub i64);

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Identifier of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

/// Type of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Top-level container of datasets
    Project,

    /// Container of images
    Dataset,

    /// An image, owning its pixel sets
    Image,

    /// Pixel data of an image
    Pixels,

    /// Top-level container of plates
    Screen,

    /// A plate of wells, each holding images
    Plate,

    /// A tag, comment or other annotation, linked by reference
    Annotation,

    /// Per-viewer rendering settings of a pixel set
    RenderingSettings,
}

impl ObjectKind {
    /// All kinds, in declaration order.
    pub const ALL: [ObjectKind; 8] = [
        ObjectKind::Project,
        ObjectKind::Dataset,
        ObjectKind::Image,
        ObjectKind::Pixels,
        ObjectKind::Screen,
        ObjectKind::Plate,
        ObjectKind::Annotation,
        ObjectKind::RenderingSettings,
    ];

    /// Returns `true` if an object of this kind may own `child` through a
    /// containment edge.
    #[must_use]
    pub fn may_contain(self, child: ObjectKind) -> bool {
        matches!(
            (self, child),
            (ObjectKind::Project, ObjectKind::Dataset)
                | (ObjectKind::Dataset, ObjectKind::Image)
                | (ObjectKind::Image, ObjectKind::Pixels)
                | (ObjectKind::Pixels, ObjectKind::RenderingSettings)
                | (ObjectKind::Screen, ObjectKind::Plate)
                | (ObjectKind::Plate, ObjectKind::Image)
        )
    }

    /// Returns `true` if objects of this kind may be the target of a
    /// reference edge.
    #[must_use]
    pub fn is_shareable(self) -> bool {
        matches!(self, ObjectKind::Annotation)
    }

    /// Stable name, used in displays and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Project => "Project",
            ObjectKind::Dataset => "Dataset",
            ObjectKind::Image => "Image",
            ObjectKind::Pixels => "Pixels",
            ObjectKind::Screen => "Screen",
            ObjectKind::Plate => "Plate",
            ObjectKind::Annotation => "Annotation",
            ObjectKind::RenderingSettings => "RenderingSettings",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform identity of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Object type
    #[serde(rename = "type")]
    pub kind: ObjectKind,

    /// Row id, unique within `kind`
    pub id: i64,
}

impl ObjectRef {
    /// Create a new object reference
    #[must_use]
    pub const fn new(kind: ObjectKind, id: i64) -> Self {
        Self { kind, id }
    }

    /// Shorthand for an image reference
    #[must_use]
    pub const fn image(id: i64) -> Self {
        Self::new(ObjectKind::Image, id)
    }

    /// Shorthand for an annotation reference
    #[must_use]
    pub const fn annotation(id: i64) -> Self {
        Self::new(ObjectKind::Annotation, id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Owner and group of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ownership {
    /// The owning principal
    pub owner: PrincipalId,

    /// The group the object belongs to
    pub group: GroupId,
}

impl Ownership {
    /// Create a new ownership record
    #[must_use]
    pub const fn new(owner: PrincipalId, group: GroupId) -> Self {
        Self { owner, group }
    }
}

/// Kind of edge between two stored objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Parent owns the child; the child is deleted with the parent
    Containment,

    /// Non-owning link; the target may be shared by many referrers
    Reference,
}

/// Outgoing edge of a stored object, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    /// The object at the other end of the edge
    pub target: ObjectRef,

    /// Edge kind
    pub kind: LinkKind,
}

impl Link {
    /// Containment edge to `target`
    #[must_use]
    pub const fn contains(target: ObjectRef) -> Self {
        Self {
            target,
            kind: LinkKind::Containment,
        }
    }

    /// Reference edge to `target`
    #[must_use]
    pub const fn references(target: ObjectRef) -> Self {
        Self {
            target,
            kind: LinkKind::Reference,
        }
    }
}

/// Permission level of a group.
///
/// Six-character permission strings (`rw----`, `rwr---`, ...) parse into
/// these levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    /// Only the owner, the group-owner and administrators see and modify
    Private,

    /// Members read everything and write only their own objects
    ReadOnlyCollab,

    /// Members read and write everything
    ReadWriteCollab,

    /// Members read everything, annotate anything, delete only their own
    ReadAnnotateCollab,

    /// Anyone reads; members write as in [`PermissionLevel::ReadWriteCollab`]
    Public,
}

impl PermissionLevel {
    /// Canonical permission string of the level
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Private => "rw----",
            PermissionLevel::ReadOnlyCollab => "rwr---",
            PermissionLevel::ReadAnnotateCollab => "rwra--",
            PermissionLevel::ReadWriteCollab => "rwrw--",
            PermissionLevel::Public => "rwrwr-",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "rw----" => Ok(PermissionLevel::Private),
            "rwr---" => Ok(PermissionLevel::ReadOnlyCollab),
            "rwra--" => Ok(PermissionLevel::ReadAnnotateCollab),
            "rwrw--" => Ok(PermissionLevel::ReadWriteCollab),
            "rwrwr-" | "rwrwrw" => Ok(PermissionLevel::Public),
            other => Err(format!("unknown permission string: {other:?}")),
        }
    }
}

/// Role of a principal within one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ordinary member
    Member,

    /// Designated owner of the group
    GroupOwner,
}

/// The acting user of a delete call, with the roles it declares.
///
/// Declared elevated roles only take effect when the permission model
/// confirms them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Identity of the user
    pub id: PrincipalId,

    /// Group memberships and the role held in each
    #[serde(default)]
    pub memberships: BTreeMap<GroupId, Role>,

    /// Declares system-administrator rights
    #[serde(default)]
    pub administrator: bool,
}

impl Principal {
    /// Create a principal without memberships
    #[must_use]
    pub fn new(id: PrincipalId) -> Self {
        Self {
            id,
            memberships: BTreeMap::new(),
            administrator: false,
        }
    }

    /// Add a membership
    #[must_use]
    pub fn with_membership(mut self, group: GroupId, role: Role) -> Self {
        self.memberships.insert(group, role);
        self
    }

    /// Declare administrator rights
    #[must_use]
    pub fn as_administrator(mut self) -> Self {
        self.administrator = true;
        self
    }

    /// Returns `true` if the principal belongs to `group`
    #[must_use]
    pub fn is_member_of(&self, group: GroupId) -> bool {
        self.memberships.contains_key(&group)
    }

    /// Returns `true` if the principal declares group-owner rights in `group`
    #[must_use]
    pub fn declares_group_owner(&self, group: GroupId) -> bool {
        self.memberships.get(&group) == Some(&Role::GroupOwner)
    }
}

/// Per-request delete options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Delete shared objects even while still referenced elsewhere
    #[serde(default)]
    pub force: bool,

    /// Ids of descendants to leave out of the closure
    #[serde(default, rename = "excludeChildIds")]
    pub exclude_child_ids: BTreeSet<i64>,
}

/// A request to delete one object and everything it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    /// Root of the delete
    #[serde(flatten)]
    pub target: ObjectRef,

    /// Options for this root
    #[serde(flatten)]
    pub options: DeleteOptions,
}

impl DeleteRequest {
    /// Request without options
    #[must_use]
    pub fn new(target: ObjectRef) -> Self {
        Self {
            target,
            options: DeleteOptions::default(),
        }
    }

    /// Set the force flag
    #[must_use]
    pub fn forced(mut self) -> Self {
        self.options.force = true;
        self
    }

    /// Exclude a descendant id from the closure
    #[must_use]
    pub fn excluding(mut self, child_id: i64) -> Self {
        self.options.exclude_child_ids.insert(child_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::private("rw----", PermissionLevel::Private)]
    #[case::read_only("rwr---", PermissionLevel::ReadOnlyCollab)]
    #[case::read_annotate("rwra--", PermissionLevel::ReadAnnotateCollab)]
    #[case::read_write("rwrw--", PermissionLevel::ReadWriteCollab)]
    #[case::public("rwrwr-", PermissionLevel::Public)]
    #[case::public_write("rwrwrw", PermissionLevel::Public)]
    fn permission_strings_parse(#[case] input: &str, #[case] expected: PermissionLevel) {
        assert_eq!(input.parse::<PermissionLevel>().unwrap(), expected);
    }

    #[test]
    fn unknown_permission_string_is_rejected() {
        assert!("rwx---".parse::<PermissionLevel>().is_err());
    }

    #[test]
    fn containment_follows_the_hierarchy() {
        assert!(ObjectKind::Project.may_contain(ObjectKind::Dataset));
        assert!(ObjectKind::Pixels.may_contain(ObjectKind::RenderingSettings));
        assert!(ObjectKind::Plate.may_contain(ObjectKind::Image));
        assert!(!ObjectKind::Image.may_contain(ObjectKind::Dataset));
        assert!(!ObjectKind::Annotation.may_contain(ObjectKind::Image));
    }

    #[test]
    fn delete_request_deserializes_from_flat_json() {
        let json = r#"{"type":"Dataset","id":7,"force":true,"excludeChildIds":[3,4]}"#;
        let request: DeleteRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.target, ObjectRef::new(ObjectKind::Dataset, 7));
        assert!(request.options.force);
        assert_eq!(
            request.options.exclude_child_ids,
            BTreeSet::from([3_i64, 4])
        );
    }

    #[test]
    fn delete_request_options_default_when_missing() {
        let request: DeleteRequest = serde_json::from_str(r#"{"type":"Image","id":1}"#).unwrap();
        assert_eq!(request, DeleteRequest::new(ObjectRef::image(1)));
    }

    #[test]
    fn object_ref_display() {
        assert_eq!(ObjectRef::image(42).to_string(), "Image:42");
    }
}
