//! Field metadata types.
//!
//! A [`FieldDescriptor`] is the static description of one field of an entity
//! or composite. The query compiler walks dotted paths through these
//! descriptors instead of reflecting over runtime objects.

use serde::{Deserialize, Serialize};

use super::entities;

/// A persisted record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Entity {
    User,
    Person,
    Organization,
    Role,
    UserRole,
    AccessPolicy,
    Permission,
    App,
}

impl Entity {
    /// Every entity, in declaration order.
    pub const ALL: [Entity; 8] = [
        Entity::User,
        Entity::Person,
        Entity::Organization,
        Entity::Role,
        Entity::UserRole,
        Entity::AccessPolicy,
        Entity::Permission,
        Entity::App,
    ];

    /// Model name, used as the collection name in storage.
    pub fn name(self) -> &'static str {
        match self {
            Entity::User => "User",
            Entity::Person => "Person",
            Entity::Organization => "Organization",
            Entity::Role => "Role",
            Entity::UserRole => "UserRole",
            Entity::AccessPolicy => "AccessPolicy",
            Entity::Permission => "Permission",
            Entity::App => "App",
        }
    }

    /// Looks an entity up by its model name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Pluralised key under which list responses carry records.
    pub fn data_key(self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Person => "persons",
            Entity::Organization => "organizations",
            Entity::Role => "roles",
            Entity::UserRole => "userRoles",
            Entity::AccessPolicy => "accessPolicies",
            Entity::Permission => "permissions",
            Entity::App => "apps",
        }
    }

    /// Human readable plural label used in response messages.
    pub fn label(self) -> &'static str {
        match self {
            Entity::User => "Users",
            Entity::Person => "Persons",
            Entity::Organization => "Organizations",
            Entity::Role => "Roles",
            Entity::UserRole => "User roles",
            Entity::AccessPolicy => "Access policies",
            Entity::Permission => "Permissions",
            Entity::App => "Apps",
        }
    }

    /// Field descriptors of this entity.
    pub fn fields(self) -> &'static [FieldDescriptor] {
        match self {
            Entity::User => entities::USER,
            Entity::Person => entities::PERSON,
            Entity::Organization => entities::ORGANIZATION,
            Entity::Role => entities::ROLE,
            Entity::UserRole => entities::USER_ROLE,
            Entity::AccessPolicy => entities::ACCESS_POLICY,
            Entity::Permission => entities::PERMISSION,
            Entity::App => entities::APP,
        }
    }

    /// Looks up a field descriptor by name.
    pub fn field(self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Dotted paths searched by the free-text `query` parameter.
    pub fn searchable_fields(self) -> &'static [&'static str] {
        match self {
            Entity::User => &["username", "email", "person.firstName", "person.lastName"],
            Entity::Person => &["firstName", "lastName", "phone"],
            Entity::Organization => &["name", "description", "email"],
            Entity::Role => &["name", "description"],
            Entity::UserRole => &["role.name", "user.username"],
            Entity::AccessPolicy => &["name", "description"],
            Entity::Permission => &["accessPolicy.name", "role.name"],
            Entity::App => &["name", "description", "url"],
        }
    }

    /// Field sets that must be unique among live (not soft-deleted) rows.
    pub fn unique_keys(self) -> &'static [&'static [&'static str]] {
        match self {
            Entity::User => &[&["username"], &["email"]],
            Entity::Role => &[&["name"]],
            Entity::UserRole => &[&["userId", "roleId"]],
            Entity::Permission => &[&["accessPolicyId", "roleId"]],
            Entity::Person | Entity::Organization | Entity::AccessPolicy | Entity::App => &[],
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Scalar storage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Int,
    Float,
    Boolean,
    DateTime,
    Json,
}

/// Enumerations declared by the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumType {
    UserStatus,
    AuthType,
    Gender,
    OrganizationStatus,
    Resource,
    Action,
}

impl EnumType {
    pub fn name(self) -> &'static str {
        match self {
            EnumType::UserStatus => "UserStatus",
            EnumType::AuthType => "AuthType",
            EnumType::Gender => "Gender",
            EnumType::OrganizationStatus => "OrganizationStatus",
            EnumType::Resource => "Resource",
            EnumType::Action => "Action",
        }
    }

    /// Allowed values, as stored.
    pub fn variants(self) -> &'static [&'static str] {
        match self {
            EnumType::UserStatus => &["active", "pending", "suspended", "inactive"],
            EnumType::AuthType => &["standard", "temporary", "persistent"],
            EnumType::Gender => &["male", "female", "other"],
            EnumType::OrganizationStatus => &["active", "inactive"],
            EnumType::Resource => &["organization", "user", "role", "app", "module"],
            EnumType::Action => &["create", "read", "update", "delete"],
        }
    }
}

/// Embedded value types stored inline within a parent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeType {
    Address,
    GeoPoint,
    RolePermission,
}

impl CompositeType {
    pub fn name(self) -> &'static str {
        match self {
            CompositeType::Address => "Address",
            CompositeType::GeoPoint => "GeoPoint",
            CompositeType::RolePermission => "RolePermission",
        }
    }

    pub fn fields(self) -> &'static [FieldDescriptor] {
        match self {
            CompositeType::Address => entities::ADDRESS,
            CompositeType::GeoPoint => entities::GEO_POINT,
            CompositeType::RolePermission => entities::ROLE_PERMISSION,
        }
    }

    pub fn field(self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }
}

/// How two entities are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// `parent.<field> == child.id`
    LocalId(&'static str),
    /// `parent.<field>` is an id array containing `child.id`
    LocalIds(&'static str),
    /// `child.<field> == parent.id`
    Foreign(&'static str),
    /// `child.<field>` is an id array containing `parent.id`
    ForeignIds(&'static str),
}

/// A true relation to another entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    /// Relation name shared by both sides, e.g. `UserPerson`.
    pub name: &'static str,
    pub target: Entity,
    pub link: Link,
}

/// What a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scalar(ScalarType),
    Enum(EnumType),
    Relation(Relation),
    Composite(CompositeType),
}

/// Static description of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    pub is_list: bool,
    /// Never serialized to clients and never selectable.
    pub hidden: bool,
    /// Maintained by the storage layer; clients cannot write it.
    pub managed: bool,
}

impl FieldDescriptor {
    const fn new(name: &'static str, kind: FieldKind, is_list: bool) -> Self {
        Self {
            name,
            kind,
            is_list,
            hidden: false,
            managed: false,
        }
    }

    pub const fn scalar(name: &'static str, ty: ScalarType) -> Self {
        Self::new(name, FieldKind::Scalar(ty), false)
    }

    pub const fn scalar_list(name: &'static str, ty: ScalarType) -> Self {
        Self::new(name, FieldKind::Scalar(ty), true)
    }

    pub const fn enumeration(name: &'static str, ty: EnumType) -> Self {
        Self::new(name, FieldKind::Enum(ty), false)
    }

    pub const fn enumeration_list(name: &'static str, ty: EnumType) -> Self {
        Self::new(name, FieldKind::Enum(ty), true)
    }

    pub const fn to_one(name: &'static str, relation: &'static str, target: Entity, link: Link) -> Self {
        Self::new(
            name,
            FieldKind::Relation(Relation {
                name: relation,
                target,
                link,
            }),
            false,
        )
    }

    pub const fn to_many(name: &'static str, relation: &'static str, target: Entity, link: Link) -> Self {
        Self::new(
            name,
            FieldKind::Relation(Relation {
                name: relation,
                target,
                link,
            }),
            true,
        )
    }

    pub const fn composite(name: &'static str, ty: CompositeType) -> Self {
        Self::new(name, FieldKind::Composite(ty), false)
    }

    pub const fn composite_list(name: &'static str, ty: CompositeType) -> Self {
        Self::new(name, FieldKind::Composite(ty), true)
    }

    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub const fn managed(mut self) -> Self {
        self.managed = true;
        self
    }

    /// Relation name when this field is a true relation, `None` otherwise.
    pub fn relation_name(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Relation(rel) => Some(rel.name),
            _ => None,
        }
    }

    /// True for scalar and enum fields, the only valid filter terminals.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar(_) | FieldKind::Enum(_))
    }
}

/// Anything that owns a field table: an entity or a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Model {
    Entity(Entity),
    Composite(CompositeType),
}

impl Model {
    pub fn field(self, name: &str) -> Option<&'static FieldDescriptor> {
        match self {
            Model::Entity(e) => e.field(name),
            Model::Composite(c) => c.field(name),
        }
    }

    pub fn fields(self) -> &'static [FieldDescriptor] {
        match self {
            Model::Entity(e) => e.fields(),
            Model::Composite(c) => c.fields(),
        }
    }
}

impl From<Entity> for Model {
    fn from(entity: Entity) -> Self {
        Model::Entity(entity)
    }
}
