//! Condition-to-SQL compilation for the PostgreSQL backend.
//!
//! Documents live in one `documents(entity, id, data JSONB)` table. Values
//! and field names are bound as parameters. Composite scopes are the one
//! exception: their field name becomes part of a reusable scope expression,
//! so it is spliced in as a quoted literal of a static schema identifier.
//!
//! | Condition | SQL |
//! |-----------|-----|
//! | equals | `COALESCE(s -> f, 'null') = $v` |
//! | has | `COALESCE(s -> f, '[]') @> $[v]` |
//! | contains | `(s ->> f) ILIKE $pattern` |
//! | in | `$values @> jsonb_build_array(s -> f)` |
//! | relation | `EXISTS (SELECT 1 FROM documents dN WHERE <link> AND …)` |
//! | composite | nested scope, or `EXISTS (… jsonb_array_elements …)` for lists |

use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

use keyhold_domain::query::{Condition, Operator, SortKey, SortOrder};
use keyhold_domain::schema::{Link, Relation};
use keyhold_domain::Entity;

use crate::traits::FindQuery;

/// Alias of the root document row.
pub(crate) const ROOT: &str = "d0";

/// Appends conditions to a query builder, numbering nested aliases.
pub(crate) struct SqlCompiler {
    next_alias: usize,
}

impl SqlCompiler {
    pub(crate) fn new() -> Self {
        Self { next_alias: 1 }
    }

    fn alias(&mut self, prefix: char) -> String {
        let alias = format!("{prefix}{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    /// Pushes `condition` evaluated against the JSON expression `scope`.
    pub(crate) fn push_condition(
        &mut self,
        builder: &mut QueryBuilder<'static, Postgres>,
        scope: &str,
        condition: &Condition,
    ) {
        match condition {
            Condition::All(children) => self.push_joined(builder, scope, children, " AND ", "TRUE"),
            Condition::Any(children) => self.push_joined(builder, scope, children, " OR ", "FALSE"),
            Condition::Field { field, op, value } => push_field(builder, scope, *field, *op, value),
            Condition::Relation {
                relation, condition, ..
            } => {
                let alias = self.alias('d');
                builder.push("EXISTS (SELECT 1 FROM documents ");
                builder.push(&alias);
                builder.push(" WHERE ");
                builder.push(&alias);
                builder.push(".entity = ");
                builder.push_bind(relation.target.name());
                builder.push(" AND (");
                builder.push(&alias);
                builder.push(".data ->> 'deletedAt') IS NULL AND ");
                push_link(builder, scope, &alias, relation);
                builder.push(" AND (");
                self.push_condition(builder, &format!("{alias}.data"), condition);
                builder.push("))");
            }
            Condition::Composite {
                field,
                to_many: false,
                condition,
            } => {
                let inner = format!("({scope} -> '{}')", escape_literal(field));
                builder.push(format!("(jsonb_typeof({inner}) = 'object' AND ("));
                self.push_condition(builder, &inner, condition);
                builder.push("))");
            }
            Condition::Composite {
                field,
                to_many: true,
                condition,
            } => {
                let alias = self.alias('e');
                builder.push("EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof(");
                builder.push(scope);
                builder.push(" -> ");
                builder.push_bind(*field);
                builder.push(") = 'array' THEN ");
                builder.push(scope);
                builder.push(" -> ");
                builder.push_bind(*field);
                builder.push(format!(" ELSE '[]'::jsonb END) AS {alias}(value) WHERE "));
                self.push_condition(builder, &format!("{alias}.value"), condition);
                builder.push(")");
            }
        }
    }

    fn push_joined(
        &mut self,
        builder: &mut QueryBuilder<'static, Postgres>,
        scope: &str,
        children: &[Condition],
        separator: &str,
        empty: &str,
    ) {
        if children.is_empty() {
            builder.push(empty);
            return;
        }
        builder.push("(");
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                builder.push(separator);
            }
            self.push_condition(builder, scope, child);
        }
        builder.push(")");
    }
}

fn push_field(builder: &mut QueryBuilder<'static, Postgres>, scope: &str, field: &'static str, op: Operator, value: &Value) {
    match op {
        Operator::Equals => {
            builder.push(format!("COALESCE({scope} -> "));
            builder.push_bind(field);
            builder.push(", 'null'::jsonb) = ");
            builder.push_bind(Json(value.clone()));
        }
        Operator::Has => {
            builder.push(format!("COALESCE({scope} -> "));
            builder.push_bind(field);
            builder.push(", '[]'::jsonb) @> ");
            builder.push_bind(Json(Value::Array(vec![value.clone()])));
        }
        Operator::Contains => {
            let needle = value.as_str().unwrap_or_default();
            builder.push(format!("({scope} ->> "));
            builder.push_bind(field);
            builder.push(") ILIKE ");
            builder.push_bind(format!("%{}%", escape_like(needle)));
            builder.push(" ESCAPE '\\'");
        }
        Operator::In => {
            let options = match value {
                Value::Array(_) => value.clone(),
                other => Value::Array(vec![other.clone()]),
            };
            builder.push_bind(Json(options));
            builder.push(format!(" @> jsonb_build_array({scope} -> "));
            builder.push_bind(field);
            builder.push(")");
        }
    }
}

/// Join predicate between the parent scope and the related row `alias`.
fn push_link(builder: &mut QueryBuilder<'static, Postgres>, parent: &str, alias: &str, relation: &Relation) {
    match relation.link {
        Link::LocalId(field) => {
            builder.push(format!("{alias}.id = ({parent} ->> "));
            builder.push_bind(field);
            builder.push(")");
        }
        Link::LocalIds(field) => {
            builder.push(format!("COALESCE({parent} -> "));
            builder.push_bind(field);
            builder.push(format!(", '[]'::jsonb) @> jsonb_build_array({alias}.id)"));
        }
        Link::Foreign(field) => {
            builder.push(format!("({alias}.data ->> "));
            builder.push_bind(field);
            builder.push(format!(") = ({parent} ->> 'id')"));
        }
        Link::ForeignIds(field) => {
            builder.push(format!("COALESCE({alias}.data -> "));
            builder.push_bind(field);
            builder.push(format!(", '[]'::jsonb) @> jsonb_build_array({parent} ->> 'id')"));
        }
    }
}

/// Escapes `%`, `_` and `\` for an `ILIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_literal(raw: &str) -> String {
    raw.replace('\'', "''")
}

/// `FROM documents d0 WHERE ...` shared by select and count.
fn push_where(builder: &mut QueryBuilder<'static, Postgres>, entity: Entity, query: &FindQuery) {
    builder.push(format!(" FROM documents {ROOT} WHERE {ROOT}.entity = "));
    builder.push_bind(entity.name());
    if !query.include_deleted {
        builder.push(format!(" AND ({ROOT}.data ->> 'deletedAt') IS NULL"));
    }
    if !query.condition.is_empty() {
        builder.push(" AND ");
        SqlCompiler::new().push_condition(builder, &format!("{ROOT}.data"), &query.condition);
    }
}

fn push_order_by(builder: &mut QueryBuilder<'static, Postgres>, keys: &[SortKey]) {
    for (i, key) in keys.iter().enumerate() {
        builder.push(if i == 0 { " ORDER BY " } else { ", " });
        builder.push(format!("{ROOT}.data -> "));
        builder.push_bind(key.field);
        builder.push(match key.order {
            SortOrder::Asc => " ASC NULLS FIRST",
            SortOrder::Desc => " DESC NULLS LAST",
        });
    }
}

/// `SELECT d0.data ...` for `find_many`.
pub(crate) fn select_query(entity: Entity, query: &FindQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {ROOT}.data"));
    push_where(&mut builder, entity, query);
    push_order_by(&mut builder, &query.order_by);
    if query.skip > 0 {
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(query.skip).unwrap_or(i64::MAX));
    }
    if let Some(take) = query.take {
        builder.push(" LIMIT ");
        builder.push_bind(i64::try_from(take).unwrap_or(i64::MAX));
    }
    builder
}

/// `SELECT COUNT(*) ...` for `count`.
pub(crate) fn count_query(entity: Entity, query: &FindQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*)");
    push_where(&mut builder, entity, query);
    builder
}

/// Name of the partial unique index for one unique key.
pub(crate) fn unique_index_name(entity: Entity, fields: &[&str]) -> String {
    format!(
        "uq_{}_{}",
        entity.name().to_ascii_lowercase(),
        fields.join("_").to_ascii_lowercase()
    )
}

/// DDL for every unique key of `entity`, restricted to live rows.
pub(crate) fn unique_index_ddl(entity: Entity) -> Vec<String> {
    entity
        .unique_keys()
        .iter()
        .map(|fields| {
            let columns = fields
                .iter()
                .map(|f| format!("(data ->> '{}')", escape_literal(f)))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON documents ({columns}) \
                 WHERE entity = '{}' AND (data ->> 'deletedAt') IS NULL",
                unique_index_name(entity, fields),
                escape_literal(entity.name()),
            )
        })
        .collect()
}
