//! Static field tables for every entity and composite.

use super::types::{
    CompositeType, EnumType, FieldDescriptor as F, Link, ScalarType::*, Entity,
};

pub(super) static USER: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("username", String),
    F::scalar("email", String),
    F::scalar("password", String).hidden(),
    F::enumeration("status", EnumType::UserStatus),
    F::enumeration("authType", EnumType::AuthType),
    F::scalar("isVerified", Boolean),
    F::scalar_list("tags", String),
    F::scalar("lastLoginAt", DateTime).managed(),
    F::scalar("personId", String),
    F::scalar("organizationId", String),
    F::to_one("person", "UserPerson", Entity::Person, Link::LocalId("personId")),
    F::to_one(
        "organization",
        "OrganizationUsers",
        Entity::Organization,
        Link::LocalId("organizationId"),
    ),
    F::to_many("roles", "UserRoles", Entity::UserRole, Link::Foreign("userId")),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static PERSON: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("firstName", String),
    F::scalar("lastName", String),
    F::scalar("phone", String),
    F::enumeration("gender", EnumType::Gender),
    F::scalar("birthDate", DateTime),
    F::scalar("metadata", Json),
    F::composite("address", CompositeType::Address),
    F::to_one("user", "UserPerson", Entity::User, Link::Foreign("personId")),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static ORGANIZATION: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("name", String),
    F::scalar("description", String),
    F::scalar("email", String),
    F::scalar("website", String),
    F::enumeration("status", EnumType::OrganizationStatus),
    F::composite("address", CompositeType::Address),
    F::scalar_list("appIds", String),
    F::to_many("apps", "OrganizationApps", Entity::App, Link::LocalIds("appIds")),
    F::to_many(
        "users",
        "OrganizationUsers",
        Entity::User,
        Link::Foreign("organizationId"),
    ),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static ROLE: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("name", String),
    F::scalar("description", String),
    F::scalar("isSystem", Boolean),
    F::to_many("users", "RoleUsers", Entity::UserRole, Link::Foreign("roleId")),
    F::to_many(
        "permissions",
        "RolePermissions",
        Entity::Permission,
        Link::Foreign("roleId"),
    ),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static USER_ROLE: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("userId", String),
    F::scalar("roleId", String),
    F::to_one("user", "UserRoles", Entity::User, Link::LocalId("userId")),
    F::to_one("role", "RoleUsers", Entity::Role, Link::LocalId("roleId")),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static ACCESS_POLICY: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("name", String),
    F::scalar("description", String),
    F::to_many(
        "permissions",
        "AccessPolicyPermissions",
        Entity::Permission,
        Link::Foreign("accessPolicyId"),
    ),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static PERMISSION: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("accessPolicyId", String),
    F::scalar("roleId", String),
    F::composite_list("rolePermissions", CompositeType::RolePermission),
    F::to_one(
        "accessPolicy",
        "AccessPolicyPermissions",
        Entity::AccessPolicy,
        Link::LocalId("accessPolicyId"),
    ),
    F::to_one("role", "RolePermissions", Entity::Role, Link::LocalId("roleId")),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static APP: &[F] = &[
    F::scalar("id", String).managed(),
    F::scalar("name", String),
    F::scalar("description", String),
    F::scalar("url", String),
    F::scalar("isActive", Boolean),
    F::to_many(
        "organizations",
        "OrganizationApps",
        Entity::Organization,
        Link::ForeignIds("appIds"),
    ),
    F::scalar("createdAt", DateTime).managed(),
    F::scalar("updatedAt", DateTime).managed(),
    F::scalar("deletedAt", DateTime).managed(),
];

pub(super) static ADDRESS: &[F] = &[
    F::scalar("street", String),
    F::scalar("city", String),
    F::scalar("state", String),
    F::scalar("country", String),
    F::scalar("postalCode", String),
    F::composite("geo", CompositeType::GeoPoint),
];

pub(super) static GEO_POINT: &[F] = &[F::scalar("lat", Float), F::scalar("lng", Float)];

pub(super) static ROLE_PERMISSION: &[F] = &[
    F::enumeration("resource", EnumType::Resource),
    F::enumeration_list("actions", EnumType::Action),
];
