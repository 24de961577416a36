//! Document bookkeeping shared by every backend.

use chrono::{DateTime, Utc};
use serde_json::Value;

use keyhold_domain::query::coerce::format_timestamp;
use keyhold_domain::Entity;

use crate::traits::Document;

pub const ID: &str = "id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const DELETED_AT: &str = "deletedAt";

/// A new document with `id` and timestamps stamped.
pub fn stamp_new(id: &str, mut data: Document, now: DateTime<Utc>) -> Document {
    let ts = Value::String(format_timestamp(now));
    data.insert(ID.to_string(), Value::String(id.to_string()));
    data.insert(CREATED_AT.to_string(), ts.clone());
    data.insert(UPDATED_AT.to_string(), ts);
    data.insert(DELETED_AT.to_string(), Value::Null);
    data
}

/// Merges `patch` into `current`. Bookkeeping fields cannot be patched.
pub fn apply_patch(current: &Document, patch: Document, now: DateTime<Utc>) -> Document {
    let mut next = current.clone();
    for (key, value) in patch {
        if matches!(key.as_str(), ID | CREATED_AT | UPDATED_AT | DELETED_AT) {
            continue;
        }
        next.insert(key, value);
    }
    next.insert(UPDATED_AT.to_string(), Value::String(format_timestamp(now)));
    next
}

/// `current` with `deletedAt` stamped.
pub fn mark_deleted(current: &Document, now: DateTime<Utc>) -> Document {
    let mut next = current.clone();
    let ts = Value::String(format_timestamp(now));
    next.insert(DELETED_AT.to_string(), ts.clone());
    next.insert(UPDATED_AT.to_string(), ts);
    next
}

/// True unless `deletedAt` holds a value.
pub fn is_live(doc: &Document) -> bool {
    doc.get(DELETED_AT).map_or(true, Value::is_null)
}

pub fn id_of(doc: &Document) -> Option<&str> {
    doc.get(ID).and_then(Value::as_str)
}

/// Values of each unique key of `entity` that `doc` fully populates.
pub fn unique_values(entity: Entity, doc: &Document) -> Vec<(&'static [&'static str], Vec<Value>)> {
    entity
        .unique_keys()
        .iter()
        .filter_map(|fields| {
            let values: Option<Vec<Value>> = fields
                .iter()
                .map(|f| doc.get(*f).filter(|v| !v.is_null()).cloned())
                .collect();
            values.map(|v| (*fields, v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_stamp_and_patch() {
        let now = Utc::now();
        let created = stamp_new("r1", doc(json!({ "name": "admin" })), now);
        assert_eq!(id_of(&created), Some("r1"));
        assert!(is_live(&created));

        let patched = apply_patch(
            &created,
            doc(json!({ "name": "root", "id": "other", "deletedAt": "x" })),
            now,
        );
        assert_eq!(patched["name"], json!("root"));
        assert_eq!(id_of(&patched), Some("r1"));
        assert!(is_live(&patched));

        assert!(!is_live(&mark_deleted(&patched, now)));
    }

    #[test]
    fn test_unique_values_skip_missing_parts() {
        let user = doc(json!({ "username": "ada", "email": null }));
        let keys = unique_values(Entity::User, &user);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, &["username"]);

        let perm = doc(json!({ "accessPolicyId": "p", "roleId": "r" }));
        assert_eq!(unique_values(Entity::Permission, &perm)[0].1, vec![json!("p"), json!("r")]);
    }
}
