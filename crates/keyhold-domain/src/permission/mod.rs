//! Permission Model.
//!
//! An access policy grants a role a list of `{resource, actions}` entries,
//! stored as one Permission row per `(accessPolicyId, roleId)` pair. A role
//! may hold several rows through different policies; a check passes when any
//! of them grants the action on the resource.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, ValidationErrors};

/// Protected resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Organization,
    User,
    Role,
    App,
    Module,
}

/// Operations on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Organization => "organization",
            Resource::User => "user",
            Resource::Role => "role",
            Resource::App => "app",
            Resource::Module => "module",
        }
    }
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl FromStr for Resource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(Resource::Organization),
            "user" => Ok(Resource::User),
            "role" => Ok(Resource::Role),
            "app" => Ok(Resource::App),
            "module" => Ok(Resource::Module),
            other => Err(DomainError::UnknownVariant {
                kind: "resource",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(DomainError::UnknownVariant {
                kind: "action",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grant entry inside a Permission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub resource: Resource,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl RolePermission {
    pub fn new(resource: Resource, actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            resource,
            actions: actions.into_iter().collect(),
        }
    }

    pub fn allows(&self, resource: Resource, action: Action) -> bool {
        self.resource == resource && self.actions.contains(&action)
    }
}

/// Reads the `rolePermissions` list of a stored Permission document.
///
/// Entries that do not parse are reported under `rolePermissions[i]`.
pub fn parse_role_permissions(value: Option<&Value>) -> Result<Vec<RolePermission>, ValidationErrors> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ValidationErrors::single(
                "rolePermissions",
                "rolePermissions must be an array",
            ))
        }
    };

    let mut errors = ValidationErrors::new();
    let mut grants = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match serde_json::from_value::<RolePermission>(item.clone()) {
            Ok(grant) => grants.push(grant),
            Err(e) => errors.push(format!("rolePermissions[{i}]"), e.to_string()),
        }
    }
    errors.into_result(grants)
}

/// True when any grant in any of `rows` allows `action` on `resource`.
pub fn is_allowed<'a, I>(rows: I, resource: Resource, action: Action) -> bool
where
    I: IntoIterator<Item = &'a [RolePermission]>,
{
    rows.into_iter()
        .any(|grants| grants.iter().any(|g| g.allows(resource, action)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_allows_requires_resource_and_action() {
        let grant = RolePermission::new(Resource::User, [Action::Read, Action::Update]);
        assert!(grant.allows(Resource::User, Action::Read));
        assert!(!grant.allows(Resource::User, Action::Delete));
        assert!(!grant.allows(Resource::Role, Action::Read));
    }

    #[test]
    fn test_any_row_may_grant() {
        let policy_a = vec![RolePermission::new(Resource::App, [Action::Read])];
        let policy_b = vec![RolePermission::new(Resource::Module, [Action::Create])];
        let rows = [policy_a.as_slice(), policy_b.as_slice()];
        assert!(is_allowed(rows, Resource::Module, Action::Create));
        assert!(!is_allowed(rows, Resource::Module, Action::Delete));
        assert!(!is_allowed(std::iter::empty(), Resource::App, Action::Read));
    }

    #[test]
    fn test_parse_role_permissions() {
        let value = json!([
            { "resource": "user", "actions": ["read", "delete"] },
            { "resource": "organization" }
        ]);
        let grants = parse_role_permissions(Some(&value)).unwrap();
        assert_eq!(grants.len(), 2);
        assert!(grants[0].allows(Resource::User, Action::Delete));
        assert!(grants[1].actions.is_empty());
    }

    #[test]
    fn test_parse_role_permissions_rejects_unknown_values() {
        let value = json!([{ "resource": "planet", "actions": ["read"] }, { "resource": "app", "actions": ["fly"] }]);
        let err = parse_role_permissions(Some(&value)).unwrap_err();
        assert!(err.has_field("rolePermissions[0]"));
        assert!(err.has_field("rolePermissions[1]"));

        let err = parse_role_permissions(Some(&json!("user:read"))).unwrap_err();
        assert!(err.has_field("rolePermissions"));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("module".parse::<Resource>().unwrap(), Resource::Module);
        assert_eq!("delete".parse::<Action>().unwrap(), Action::Delete);
        assert!("Module".parse::<Resource>().is_err());
    }
}
