//! List pipeline: validate, compile, fetch, include, project, assemble.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use keyhold_domain::query::{
    assemble, strip_hidden, FilterDiagnostic, ListParts, ListPlan, ListResponse, QueryDefaults,
    QueryRequest, RawQuery,
};
use keyhold_domain::Entity;
use keyhold_storage::{DataStore, FindQuery};

use super::include::include_relations;
use crate::error::ServiceResult;

/// Handler for every collection's list endpoint.
///
/// `find_many` runs only when documents are requested and `count` only when
/// the count or pagination block is, so a count-only request never reads
/// documents.
pub struct ListHandler<S: DataStore> {
    storage: Arc<S>,
    defaults: QueryDefaults,
    production: bool,
}

impl<S: DataStore> ListHandler<S> {
    pub fn new(storage: Arc<S>, defaults: QueryDefaults, production: bool) -> Self {
        Self {
            storage,
            defaults,
            production,
        }
    }

    #[instrument(skip(self, raw), fields(entity = %entity))]
    pub async fn list(&self, entity: Entity, raw: &RawQuery) -> ServiceResult<ListResponse> {
        let request = QueryRequest::from_raw_with(raw, &self.defaults)?;
        let plan = ListPlan::compile(entity, &request);
        self.report(entity, &plan.diagnostics);

        let query = FindQuery::new(plan.condition.clone())
            .order_by(plan.order_by.clone())
            .page(plan.skip, plan.take);

        let records = async {
            if !plan.shape.includes_documents() {
                return ServiceResult::Ok(None);
            }
            let mut docs = self.storage.find_many(entity, &query).await?;
            if let Some(tree) = &plan.selection {
                include_relations(&self.storage, entity, tree, &mut docs).await?;
            }
            let projected: Vec<Value> = docs
                .iter()
                .map(|doc| {
                    Value::Object(match &plan.selection {
                        Some(tree) => tree.project(doc),
                        None => strip_hidden(entity, doc),
                    })
                })
                .collect();
            ServiceResult::Ok(Some(projected))
        };

        let total = async {
            if !plan.shape.needs_total() {
                return ServiceResult::Ok(None);
            }
            ServiceResult::Ok(Some(self.storage.count(entity, &query).await?))
        };

        let (records, total) = tokio::try_join!(records, total)?;
        debug!(
            shape = plan.shape.code(),
            returned = records.as_ref().map_or(0, Vec::len),
            total = ?total,
            "list assembled"
        );

        Ok(assemble(
            entity,
            plan.shape,
            ListParts {
                records,
                total,
                page: plan.page,
                limit: plan.limit,
            },
        ))
    }

    /// Dropped filter terms never fail the request; they are surfaced in
    /// the logs, loudly outside production.
    fn report(&self, entity: Entity, diagnostics: &[FilterDiagnostic]) {
        for diagnostic in diagnostics {
            if self.production {
                debug!(entity = %entity, %diagnostic, "filter term dropped");
            } else {
                warn!(entity = %entity, %diagnostic, "filter term dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{doc, CountingStore};
    use crate::error::ServiceError;
    use keyhold_domain::query::OutputShape;
    use keyhold_storage::WriteOp;
    use serde_json::json;

    async fn roles(count: usize) -> Arc<CountingStore> {
        let store = Arc::new(CountingStore::default());
        let ops = (1..=count)
            .map(|i| WriteOp::Insert {
                entity: Entity::Role,
                id: format!("role-{i:02}"),
                data: doc(json!({ "name": format!("role {i:02}"), "isSystem": i % 2 == 0 })),
            })
            .collect();
        store.transaction(ops).await.unwrap();
        store
    }

    fn handler(store: &Arc<CountingStore>) -> ListHandler<CountingStore> {
        ListHandler::new(Arc::clone(store), QueryDefaults::default(), false)
    }

    #[tokio::test]
    async fn test_count_only_skips_find_many() {
        let store = roles(3).await;
        let raw = RawQuery::new().with("count", "true");

        let response = handler(&store).list(Entity::Role, &raw).await.unwrap();

        assert_eq!(response.shape, OutputShape::Count);
        assert_eq!(response.data, Some(json!({ "count": 3 })));
        assert_eq!(store.find_many_calls(), 0);
        assert_eq!(store.count_calls(), 1);
    }

    #[tokio::test]
    async fn test_documents_only_skips_count() {
        let store = roles(3).await;
        let raw = RawQuery::new().with("documents", "yes");

        let response = handler(&store).list(Entity::Role, &raw).await.unwrap();

        assert_eq!(response.shape, OutputShape::Documents);
        assert_eq!(store.find_many_calls(), 1);
        assert_eq!(store.count_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_flags_touches_nothing() {
        let store = roles(3).await;
        let response = handler(&store).list(Entity::Role, &RawQuery::new()).await.unwrap();

        assert_eq!(response.shape, OutputShape::Accessed);
        assert!(response.data.is_none());
        assert!(response.message.contains("Roles accessed successfully"));
        assert_eq!(store.find_many_calls() + store.count_calls(), 0);
    }

    #[tokio::test]
    async fn test_second_page_ascending_with_pagination() {
        let store = roles(12).await;
        let raw = RawQuery::new()
            .with("page", "2")
            .with("limit", "5")
            .with("order", "asc")
            .with("documents", "true")
            .with("pagination", "true");

        let response = handler(&store).list(Entity::Role, &raw).await.unwrap();
        let data = response.data.unwrap();

        let ids: Vec<_> = data["roles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["role-06", "role-07", "role-08", "role-09", "role-10"]);
        assert_eq!(
            data["pagination"],
            json!({
                "total": 12,
                "page": 2,
                "limit": 5,
                "totalPages": 3,
                "hasNext": true,
                "hasPrev": true
            })
        );
    }

    #[tokio::test]
    async fn test_filter_and_field_selection() {
        let store = roles(4).await;
        let raw = RawQuery::new()
            .with("filter", "isSystem:true,unknownField:x")
            .with("fields", "name")
            .with("order", "asc")
            .with("documents", "true");

        let response = handler(&store).list(Entity::Role, &raw).await.unwrap();

        assert_eq!(
            response.data.unwrap()["roles"],
            json!([
                { "id": "role-02", "name": "role 02" },
                { "id": "role-04", "name": "role 04" }
            ])
        );
    }

    #[tokio::test]
    async fn test_validation_errors_reach_the_caller() {
        let store = roles(1).await;
        let raw = RawQuery::new().with("order", "sideways");

        let err = handler(&store).list(Entity::Role, &raw).await.unwrap_err();

        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("order"));
        assert_eq!(store.find_many_calls(), 0);
    }

    #[tokio::test]
    async fn test_hidden_fields_never_listed() {
        let store = Arc::new(CountingStore::default());
        store
            .insert(
                Entity::User,
                "u1".into(),
                doc(json!({ "username": "ada", "password": "$argon2id$..." })),
            )
            .await
            .unwrap();
        let raw = RawQuery::new().with("documents", "true");

        let response = ListHandler::new(Arc::clone(&store), QueryDefaults::default(), true)
            .list(Entity::User, &raw)
            .await
            .unwrap();

        let user = &response.data.unwrap()["users"][0];
        assert_eq!(user["username"], json!("ada"));
        assert!(user.get("password").is_none());
    }
}
