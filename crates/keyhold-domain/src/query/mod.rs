//! The list query engine.
//!
//! Raw query-string parameters flow through four stages:
//!
//! 1. [`params`] validates them into a [`QueryRequest`].
//! 2. [`filter`] and [`search`] compile the filter and free-text search into
//!    one [`Condition`]; [`sort`] resolves the ordering.
//! 3. [`selection`] builds the [`SelectionTree`] used for relation inclusion
//!    and post-fetch projection.
//! 4. [`response`] assembles the flagged output shape.
//!
//! [`ListPlan::compile`] runs stages 2 and 3; fetching is left to the caller.

pub mod coerce;
pub mod condition;
pub mod filter;
pub mod params;
pub mod response;
pub mod search;
pub mod selection;
pub mod sort;

pub use condition::{Condition, Operator};
pub use filter::{compile_filter, CompiledFilter, FilterDiagnostic};
pub use params::{
    FilterInput, OutputFlags, QueryDefaults, QueryRequest, RawQuery, RawValue, SortOrder, SortSpec,
};
pub use response::{assemble, ListParts, ListResponse, OutputShape, PaginationMeta};
pub use search::search_condition;
pub use selection::{strip_hidden, Prune, SelectionNode, SelectionTree};
pub use sort::{resolve_sort, SortKey};

use crate::schema::Entity;

/// Everything needed to execute one validated list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListPlan {
    pub entity: Entity,
    pub condition: Condition,
    pub order_by: Vec<SortKey>,
    pub skip: u64,
    pub take: u64,
    /// `None` returns whole documents minus hidden fields.
    pub selection: Option<SelectionTree>,
    pub shape: OutputShape,
    pub page: u32,
    pub limit: u32,
    pub diagnostics: Vec<FilterDiagnostic>,
}

impl ListPlan {
    pub fn compile(entity: Entity, request: &QueryRequest) -> Self {
        let (mut condition, diagnostics) = match &request.filter {
            Some(input) => {
                let compiled = compile_filter(entity, input);
                (compiled.condition, compiled.diagnostics)
            }
            None => (Condition::all(), Vec::new()),
        };

        if let Some(term) = &request.query {
            let search = search_condition(entity, term);
            if !search.is_empty() {
                condition = condition.and(search);
            }
        }

        Self {
            entity,
            condition,
            order_by: resolve_sort(entity, request.sort.as_ref(), request.order),
            skip: request.skip(),
            take: request.take(),
            selection: request
                .fields
                .as_deref()
                .map(|fields| SelectionTree::build(entity, fields)),
            shape: OutputShape::from_flags(request.output),
            page: request.page,
            limit: request.limit,
            diagnostics,
        }
    }
}
