//! Response Assembler.
//!
//! The three output flags select exactly one of eight shapes. The shape also
//! tells the caller which fetches it may skip: records are only loaded when
//! `documents` is set, and the total is only counted when `count` or
//! `pagination` is set.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::query::params::OutputFlags;
use crate::schema::Entity;

/// Hint returned when no output flag was set.
pub const OUTPUT_FLAGS_HINT: &str =
    "Set documents=true, count=true and/or pagination=true to choose what is returned";

/// Pagination block of a list response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMeta {
    pub fn new(total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit))
        };
        Self {
            total,
            page,
            limit,
            total_pages,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        }
    }
}

/// The eight list response shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputShape {
    /// No flags: placeholder message, no data.
    Accessed,
    Pagination,
    Documents,
    DocumentsPagination,
    Count,
    CountPagination,
    DocumentsCount,
    /// Records, count and pagination.
    Full,
}

impl OutputShape {
    pub const ALL: [OutputShape; 8] = [
        OutputShape::Accessed,
        OutputShape::Pagination,
        OutputShape::Documents,
        OutputShape::DocumentsPagination,
        OutputShape::Count,
        OutputShape::CountPagination,
        OutputShape::DocumentsCount,
        OutputShape::Full,
    ];

    pub fn from_flags(flags: OutputFlags) -> Self {
        match (flags.count, flags.documents, flags.pagination) {
            (false, false, false) => OutputShape::Accessed,
            (false, false, true) => OutputShape::Pagination,
            (false, true, false) => OutputShape::Documents,
            (false, true, true) => OutputShape::DocumentsPagination,
            (true, false, false) => OutputShape::Count,
            (true, false, true) => OutputShape::CountPagination,
            (true, true, false) => OutputShape::DocumentsCount,
            (true, true, true) => OutputShape::Full,
        }
    }

    /// Legacy numeric code: count=4, documents=2, pagination=1.
    pub fn code(self) -> u8 {
        let (count, documents, pagination) = self.parts();
        (u8::from(count) << 2) | (u8::from(documents) << 1) | u8::from(pagination)
    }

    fn parts(self) -> (bool, bool, bool) {
        match self {
            OutputShape::Accessed => (false, false, false),
            OutputShape::Pagination => (false, false, true),
            OutputShape::Documents => (false, true, false),
            OutputShape::DocumentsPagination => (false, true, true),
            OutputShape::Count => (true, false, false),
            OutputShape::CountPagination => (true, false, true),
            OutputShape::DocumentsCount => (true, true, false),
            OutputShape::Full => (true, true, true),
        }
    }

    pub fn includes_documents(self) -> bool {
        self.parts().1
    }

    pub fn includes_count(self) -> bool {
        self.parts().0
    }

    pub fn includes_pagination(self) -> bool {
        self.parts().2
    }

    /// True when the total row count must be computed.
    pub fn needs_total(self) -> bool {
        self.includes_count() || self.includes_pagination()
    }
}

/// Inputs fetched for one list request. Parts the shape does not need may
/// be `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParts {
    pub records: Option<Vec<Value>>,
    pub total: Option<u64>,
    pub page: u32,
    pub limit: u32,
}

/// An assembled list response, ready for the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ListResponse {
    pub shape: OutputShape,
    pub message: String,
    pub data: Option<Value>,
}

/// Builds the response body for `shape`.
pub fn assemble(entity: Entity, shape: OutputShape, parts: ListParts) -> ListResponse {
    if shape == OutputShape::Accessed {
        return ListResponse {
            shape,
            message: format!("{} accessed successfully. {}", entity.label(), OUTPUT_FLAGS_HINT),
            data: None,
        };
    }

    let total = parts.total.unwrap_or(0);
    let mut data = Map::new();

    if shape.includes_pagination() {
        let meta = PaginationMeta::new(total, parts.page, parts.limit);
        data.insert(
            "pagination".to_string(),
            serde_json::to_value(meta).unwrap_or(Value::Null),
        );
    }
    if shape.includes_documents() {
        data.insert(
            entity.data_key().to_string(),
            Value::Array(parts.records.unwrap_or_default()),
        );
    }
    if shape.includes_count() {
        data.insert("count".to_string(), Value::from(total));
    }

    ListResponse {
        shape,
        message: format!("{} retrieved successfully", entity.label()),
        data: Some(Value::Object(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flags(count: bool, documents: bool, pagination: bool) -> OutputFlags {
        OutputFlags {
            documents,
            count,
            pagination,
        }
    }

    #[test]
    fn test_every_flag_combination_maps_to_distinct_shape() {
        let mut seen = std::collections::HashSet::new();
        for bits in 0u8..8 {
            let f = flags(bits & 4 != 0, bits & 2 != 0, bits & 1 != 0);
            let shape = OutputShape::from_flags(f);
            assert_eq!(shape.code(), bits);
            assert_eq!(shape.includes_documents(), f.documents);
            assert!(seen.insert(shape));
        }
        assert_eq!(seen.len(), OutputShape::ALL.len());
    }

    #[test]
    fn test_pagination_meta() {
        let meta = PaginationMeta::new(12, 2, 5);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next);
        assert!(meta.has_prev);

        let meta = PaginationMeta::new(0, 1, 10);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next);
        assert!(!meta.has_prev);

        let meta = PaginationMeta::new(10, 1, 10);
        assert_eq!(meta.total_pages, 1);
        assert!(!meta.has_next);
    }

    #[test]
    fn test_accessed_shape_has_no_data() {
        let out = assemble(Entity::Role, OutputShape::Accessed, ListParts::default());
        assert!(out.data.is_none());
        assert!(out.message.contains("documents=true"));
    }

    #[test]
    fn test_documents_present_iff_flag() {
        for shape in OutputShape::ALL {
            let out = assemble(
                Entity::User,
                shape,
                ListParts {
                    records: Some(vec![json!({ "id": "u1" })]),
                    total: Some(1),
                    page: 1,
                    limit: 10,
                },
            );
            let has_users = out
                .data
                .as_ref()
                .and_then(|d| d.get("users"))
                .is_some();
            assert_eq!(has_users, shape.includes_documents(), "{shape:?}");
            let has_count = out.data.as_ref().and_then(|d| d.get("count")).is_some();
            assert_eq!(has_count, shape.includes_count(), "{shape:?}");
        }
    }

    #[test]
    fn test_full_shape() {
        let out = assemble(
            Entity::User,
            OutputShape::Full,
            ListParts {
                records: Some(vec![json!({ "id": "u6" })]),
                total: Some(12),
                page: 2,
                limit: 5,
            },
        );
        assert_eq!(
            out.data,
            Some(json!({
                "pagination": {
                    "total": 12, "page": 2, "limit": 5,
                    "totalPages": 3, "hasNext": true, "hasPrev": true
                },
                "users": [{ "id": "u6" }],
                "count": 12
            }))
        );
    }
}
