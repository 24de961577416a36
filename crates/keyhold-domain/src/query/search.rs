//! Free-text search over an entity's searchable fields.

use crate::query::condition::{Condition, Operator};
use crate::schema::{resolve_path, Entity};

/// OR of case-insensitive substring matches across the searchable paths of
/// `entity`. A blank term yields the empty condition.
pub fn search_condition(entity: Entity, term: &str) -> Condition {
    let term = term.trim();
    if term.is_empty() {
        return Condition::all();
    }

    let clauses = entity
        .searchable_fields()
        .iter()
        .filter_map(|path| resolve_path(entity, path))
        .filter_map(|chain| {
            let leaf = chain.last()?;
            let condition = Condition::Field {
                field: leaf.name,
                op: Operator::Contains,
                value: term.into(),
            };
            Some(Condition::along(&chain, condition))
        })
        .collect();

    Condition::Any(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_search_reaches_into_person() {
        let cond = search_condition(Entity::User, " ada ");
        let contains = json!({ "contains": "ada", "mode": "insensitive" });
        assert_eq!(
            cond.to_json(),
            json!({ "OR": [
                { "username": contains },
                { "email": contains },
                { "person": { "is": { "firstName": contains } } },
                { "person": { "is": { "lastName": contains } } },
            ]})
        );
    }

    #[test]
    fn test_blank_term_is_empty() {
        assert!(search_condition(Entity::Role, "   ").is_empty());
    }

    #[test]
    fn test_search_is_anded_with_filter() {
        let filter = Condition::equals("status", "active");
        let combined = filter.clone().and(search_condition(Entity::Role, "admin"));
        match combined {
            Condition::All(children) => {
                assert_eq!(children.len(), 2);
                assert_eq!(children[0], filter);
                assert!(matches!(children[1], Condition::Any(_)));
            }
            other => panic!("expected AND, got {other:?}"),
        }
    }
}
