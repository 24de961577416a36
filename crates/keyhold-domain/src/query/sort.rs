//! Sort normalisation.

use crate::query::params::{SortOrder, SortSpec};
use crate::schema::{Entity, FieldKind};

/// Default sort field.
pub const DEFAULT_SORT_FIELD: &str = "id";

/// One resolved ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: &'static str,
    pub order: SortOrder,
}

impl SortKey {
    pub fn new(field: &'static str, order: SortOrder) -> Self {
        Self { field, order }
    }
}

/// Resolves the requested ordering against `entity`.
///
/// Only non-list scalar and enum fields of the root entity can be sorted on;
/// anything else is dropped. The result always ends with `id` so pages are
/// stable under ties.
pub fn resolve_sort(entity: Entity, sort: Option<&SortSpec>, order: SortOrder) -> Vec<SortKey> {
    let requested: Vec<(&str, SortOrder)> = match sort {
        None => Vec::new(),
        Some(SortSpec::Field(name)) => vec![(name.as_str(), order)],
        Some(SortSpec::Fields(keys)) => keys.iter().map(|(f, o)| (f.as_str(), *o)).collect(),
    };

    let mut keys: Vec<SortKey> = Vec::with_capacity(requested.len() + 1);
    for (name, direction) in requested {
        let Some(field) = entity.field(name) else {
            continue;
        };
        let sortable = matches!(field.kind, FieldKind::Scalar(_) | FieldKind::Enum(_))
            && !field.is_list
            && !field.hidden;
        if sortable && keys.iter().all(|k| k.field != field.name) {
            keys.push(SortKey::new(field.name, direction));
        }
    }

    if keys.iter().all(|k| k.field != DEFAULT_SORT_FIELD) {
        let tiebreak = keys.first().map_or(order, |k| k.order);
        keys.push(SortKey::new(DEFAULT_SORT_FIELD, tiebreak));
    }
    keys
}
