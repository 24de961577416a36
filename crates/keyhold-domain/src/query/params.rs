//! Parameter Validator.
//!
//! Turns untyped query-string input into a bounded [`QueryRequest`]. Every
//! failure is tagged with the offending parameter so the HTTP layer can answer
//! 400 with per-field messages. Malformed `sort`/`filter` JSON is rejected
//! here and never reaches the filter compiler.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::num::IntErrorKind;

use serde_json::{Map, Value};

use crate::error::ValidationErrors;

/// Tokens accepted as `true` for boolean flags. Anything else is `false`.
pub const TRUE_TOKENS: &[&str] = &["true", "1", "yes"];

/// Default page number.
pub const DEFAULT_PAGE: u32 = 1;

/// Default page size.
pub const DEFAULT_LIMIT: u32 = 10;

/// A raw parameter value as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// A single string value.
    Text(String),
    /// A native boolean (structured callers only; query strings carry text).
    Flag(bool),
    /// The same key repeated.
    Many(Vec<String>),
    /// Already-structured JSON (structured callers only).
    Json(Value),
}

/// Untyped list parameters keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuery {
    values: BTreeMap<String, RawValue>,
}

impl RawQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a raw query from decoded `key=value` pairs, folding repeated
    /// keys into [`RawValue::Many`].
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut raw = Self::new();
        for (key, value) in pairs {
            raw.push(key, value);
        }
        raw
    }

    /// Appends a string value, turning a repeated key into a list.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        match self.values.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(RawValue::Text(value));
            }
            Entry::Occupied(mut slot) => {
                let next = match slot.get_mut() {
                    RawValue::Many(list) => {
                        list.push(value);
                        return;
                    }
                    RawValue::Text(first) => RawValue::Many(vec![std::mem::take(first), value]),
                    RawValue::Flag(_) | RawValue::Json(_) => RawValue::Text(value),
                };
                slot.insert(next);
            }
        }
    }

    /// Sets a value, replacing any previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: RawValue) -> &mut Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Chainable string setter, mostly for tests and internal callers.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Requested ordering before schema resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortSpec {
    /// A bare field name, ordered by the request's `order`.
    Field(String),
    /// A JSON object of field to direction, in the order given.
    Fields(Vec<(String, SortOrder)>),
}

/// Structured filter input before compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterInput {
    /// `key:value[,key:value]` with dotted keys.
    Flat(String),
    /// A list of filter objects with dotted keys, or `{key, value}` pairs.
    Entries(Vec<Map<String, Value>>),
}

/// Which parts of a list result the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputFlags {
    pub documents: bool,
    pub count: bool,
    pub pagination: bool,
}

/// Limits applied while validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub page: u32,
    pub limit: u32,
    /// Upper bound for `limit`; larger values are clamped. `None` disables.
    pub max_limit: Option<u32>,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            max_limit: None,
        }
    }
}

/// A validated list request.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub page: u32,
    pub limit: u32,
    pub order: SortOrder,
    pub sort: Option<SortSpec>,
    pub fields: Option<String>,
    pub query: Option<String>,
    pub filter: Option<FilterInput>,
    pub output: OutputFlags,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            order: SortOrder::default(),
            sort: None,
            fields: None,
            query: None,
            filter: None,
            output: OutputFlags::default(),
        }
    }
}

impl QueryRequest {
    /// Validates with the default page/limit.
    pub fn from_raw(raw: &RawQuery) -> Result<Self, ValidationErrors> {
        Self::from_raw_with(raw, &QueryDefaults::default())
    }

    /// Validates every parameter, collecting all failures.
    pub fn from_raw_with(raw: &RawQuery, defaults: &QueryDefaults) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let page = parse_positive(raw, "page", defaults.page, &mut errors);
        let mut limit = parse_positive(raw, "limit", defaults.limit, &mut errors);
        if let Some(max) = defaults.max_limit {
            limit = limit.min(max.max(1));
        }

        let order = match single_text(raw, "order", &mut errors) {
            Some(token) => SortOrder::parse(token).unwrap_or_else(|| {
                errors.push("order", "order must be either 'asc' or 'desc'");
                SortOrder::default()
            }),
            None => SortOrder::default(),
        };

        let fields = single_text(raw, "fields", &mut errors)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);
        let query = single_text(raw, "query", &mut errors)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let sort = parse_sort(raw, &mut errors);
        let filter = parse_filter(raw, &mut errors);

        let output = OutputFlags {
            documents: flag(raw, "document") || flag(raw, "documents"),
            count: flag(raw, "count"),
            pagination: flag(raw, "pagination"),
        };

        errors.into_result(Self {
            page,
            limit,
            order,
            sort,
            fields,
            query,
            filter,
            output,
        })
    }

    /// Number of rows to skip: `(page - 1) * limit`.
    pub fn skip(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Number of rows to take.
    pub fn take(&self) -> u64 {
        u64::from(self.limit)
    }
}

/// Interprets a boolean flag token.
pub fn parse_flag_token(token: &str) -> bool {
    let token = token.trim().to_ascii_lowercase();
    TRUE_TOKENS.contains(&token.as_str())
}

fn flag(raw: &RawQuery, key: &str) -> bool {
    match raw.get(key) {
        Some(RawValue::Flag(b)) => *b,
        Some(RawValue::Text(s)) => parse_flag_token(s),
        Some(RawValue::Many(values)) => values.last().is_some_and(|s| parse_flag_token(s)),
        Some(RawValue::Json(Value::Bool(b))) => *b,
        Some(RawValue::Json(Value::String(s))) => parse_flag_token(s),
        Some(RawValue::Json(_)) | None => false,
    }
}

/// Returns the single text value for `key`; lists and non-text values are
/// reported as a validation failure.
fn single_text<'a>(raw: &'a RawQuery, key: &str, errors: &mut ValidationErrors) -> Option<&'a str> {
    match raw.get(key) {
        None => None,
        Some(RawValue::Text(s)) => Some(s.as_str()),
        Some(RawValue::Json(Value::String(s))) => Some(s.as_str()),
        Some(_) => {
            errors.push(key, format!("{key} must be a string"));
            None
        }
    }
}

fn parse_positive(raw: &RawQuery, key: &str, default: u32, errors: &mut ValidationErrors) -> u32 {
    let text = match raw.get(key) {
        None => return default,
        Some(RawValue::Text(s)) | Some(RawValue::Json(Value::String(s))) => s.trim().to_string(),
        Some(RawValue::Json(Value::Number(n))) => n.to_string(),
        Some(_) => String::new(),
    };

    match text.parse::<u32>() {
        Ok(n) if n >= 1 => n,
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => {
            errors.push(key, format!("{key} is too large (maximum {})", u32::MAX));
            default
        }
        _ => {
            errors.push(key, format!("{key} must be a positive integer"));
            default
        }
    }
}

fn parse_sort(raw: &RawQuery, errors: &mut ValidationErrors) -> Option<SortSpec> {
    let value = match raw.get("sort")? {
        RawValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if !s.starts_with('{') {
                return Some(SortSpec::Field(s.to_string()));
            }
            match serde_json::from_str::<Value>(s) {
                Ok(value) => value,
                Err(e) => {
                    errors.push("sort", format!("sort must be valid JSON: {e}"));
                    return None;
                }
            }
        }
        RawValue::Json(value) => value.clone(),
        RawValue::Flag(_) | RawValue::Many(_) => {
            errors.push("sort", "sort must be a field name or a JSON object");
            return None;
        }
    };

    let Value::Object(map) = value else {
        errors.push("sort", "sort must be a field name or a JSON object");
        return None;
    };

    let mut keys = Vec::with_capacity(map.len());
    for (field, direction) in map {
        match direction.as_str().map(|d| d.to_ascii_lowercase()) {
            Some(d) => match SortOrder::parse(&d) {
                Some(order) => keys.push((field, order)),
                None => {
                    errors.push("sort", format!("sort direction for '{field}' must be 'asc' or 'desc'"));
                }
            },
            None => {
                errors.push("sort", format!("sort direction for '{field}' must be a string"));
            }
        }
    }
    Some(SortSpec::Fields(keys))
}

fn parse_filter(raw: &RawQuery, errors: &mut ValidationErrors) -> Option<FilterInput> {
    match raw.get("filter")? {
        RawValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if s.starts_with('[') {
                match serde_json::from_str::<Value>(s) {
                    Ok(value) => filter_entries(value, errors),
                    Err(e) => {
                        errors.push("filter", format!("filter must be valid JSON: {e}"));
                        None
                    }
                }
            } else if s.starts_with('{') {
                errors.push("filter", "filter JSON must be an array of objects");
                None
            } else {
                Some(FilterInput::Flat(s.to_string()))
            }
        }
        RawValue::Many(values) => {
            let joined = values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
                .join(",");
            (!joined.is_empty()).then_some(FilterInput::Flat(joined))
        }
        RawValue::Json(value) => filter_entries(value.clone(), errors),
        RawValue::Flag(_) => {
            errors.push("filter", "filter must be a string or an array of objects");
            None
        }
    }
}

fn filter_entries(value: Value, errors: &mut ValidationErrors) -> Option<FilterInput> {
    let Value::Array(items) = value else {
        errors.push("filter", "filter JSON must be an array of objects");
        return None;
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(map) => entries.push(map),
            _ => {
                errors.push("filter", "filter JSON must be an array of objects");
                return None;
            }
        }
    }
    Some(FilterInput::Entries(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_when_empty() {
        let req = QueryRequest::from_raw(&RawQuery::new()).unwrap();
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, 10);
        assert_eq!(req.order, SortOrder::Desc);
        assert_eq!(req.output, OutputFlags::default());
        assert_eq!(req.skip(), 0);
    }

    #[test]
    fn test_page_and_limit_must_be_positive_integers() {
        let raw = RawQuery::new().with("page", "0").with("limit", "abc");
        let err = QueryRequest::from_raw(&raw).unwrap_err();
        assert!(err.has_field("page"));
        assert!(err.has_field("limit"));

        let raw = RawQuery::new().with("page", "-2");
        assert!(QueryRequest::from_raw(&raw).unwrap_err().has_field("page"));
    }

    #[test]
    fn test_page_beyond_range_is_reported_as_too_large() {
        let raw = RawQuery::new().with("page", "99999999999");
        let err = QueryRequest::from_raw(&raw).unwrap_err();
        let message = err.to_string();
        assert!(err.has_field("page"));
        assert!(message.contains("too large"), "{message}");
        assert!(!message.contains("positive integer"), "{message}");

        let raw = RawQuery::new().with("limit", "-99999999999");
        let message = QueryRequest::from_raw(&raw).unwrap_err().to_string();
        assert!(message.contains("positive integer"), "{message}");
    }

    #[test]
    fn test_order_rejects_unknown_token() {
        let raw = RawQuery::new().with("order", "ascending");
        let err = QueryRequest::from_raw(&raw).unwrap_err();
        assert_eq!(err.errors().len(), 1);
        assert_eq!(err.errors()[0].field, "order");
    }

    #[test]
    fn test_fields_rejects_repeated_parameter() {
        let raw = RawQuery::new().with("fields", "id").with("fields", "name");
        let err = QueryRequest::from_raw(&raw).unwrap_err();
        assert!(err.has_field("fields"));
    }

    #[test]
    fn test_sort_bare_field_and_json_object() {
        let raw = RawQuery::new().with("sort", "username");
        let req = QueryRequest::from_raw(&raw).unwrap();
        assert_eq!(req.sort, Some(SortSpec::Field("username".into())));

        let raw = RawQuery::new().with("sort", r#"{"name":"asc","createdAt":"DESC"}"#);
        let req = QueryRequest::from_raw(&raw).unwrap();
        let Some(SortSpec::Fields(keys)) = req.sort else {
            panic!("expected JSON sort");
        };
        assert!(keys.contains(&("name".to_string(), SortOrder::Asc)));
        assert!(keys.contains(&("createdAt".to_string(), SortOrder::Desc)));
    }

    #[test]
    fn test_sort_malformed_json_is_rejected() {
        let raw = RawQuery::new().with("sort", r#"{"name":"#);
        assert!(QueryRequest::from_raw(&raw).unwrap_err().has_field("sort"));

        let raw = RawQuery::new().with("sort", r#"{"name":"up"}"#);
        assert!(QueryRequest::from_raw(&raw).unwrap_err().has_field("sort"));
    }

    #[test]
    fn test_filter_forms() {
        let raw = RawQuery::new().with("filter", "status:active");
        let req = QueryRequest::from_raw(&raw).unwrap();
        assert_eq!(req.filter, Some(FilterInput::Flat("status:active".into())));

        let raw = RawQuery::new().with("filter", r#"[{"status":"active"}]"#);
        let req = QueryRequest::from_raw(&raw).unwrap();
        assert!(matches!(req.filter, Some(FilterInput::Entries(ref e)) if e.len() == 1));

        let raw = RawQuery::new()
            .with("filter", "status:active")
            .with("filter", "status:pending");
        let req = QueryRequest::from_raw(&raw).unwrap();
        assert_eq!(
            req.filter,
            Some(FilterInput::Flat("status:active,status:pending".into()))
        );
    }

    #[test]
    fn test_filter_malformed_json_is_rejected() {
        for bad in [r#"[{"status":"#, r#"[1, 2]"#, r#"{"status":"active"}"#] {
            let raw = RawQuery::new().with("filter", bad);
            let err = QueryRequest::from_raw(&raw).unwrap_err();
            assert!(err.has_field("filter"), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_native_json_filter_array_used_as_is() {
        let mut raw = RawQuery::new();
        raw.insert(
            "filter",
            RawValue::Json(serde_json::json!([{ "person.firstName": "Ada" }])),
        );
        let req = QueryRequest::from_raw(&raw).unwrap();
        assert!(matches!(req.filter, Some(FilterInput::Entries(_))));
    }

    #[test]
    fn test_output_flags() {
        let raw = RawQuery::new()
            .with("documents", "yes")
            .with("count", "1")
            .with("pagination", "nope");
        let req = QueryRequest::from_raw(&raw).unwrap();
        assert_eq!(
            req.output,
            OutputFlags {
                documents: true,
                count: true,
                pagination: false
            }
        );

        let mut raw = RawQuery::new();
        raw.insert("document", RawValue::Flag(true));
        assert!(QueryRequest::from_raw(&raw).unwrap().output.documents);
    }

    #[test]
    fn test_max_limit_clamps() {
        let defaults = QueryDefaults {
            max_limit: Some(50),
            ..Default::default()
        };
        let raw = RawQuery::new().with("limit", "500");
        let req = QueryRequest::from_raw_with(&raw, &defaults).unwrap();
        assert_eq!(req.limit, 50);
    }

    #[test]
    fn test_flag_tokens() {
        for t in ["true", "1", "yes", "TRUE", " Yes "] {
            assert!(parse_flag_token(t), "{t}");
        }
        for t in ["false", "0", "no", "", "on"] {
            assert!(!parse_flag_token(t), "{t}");
        }
    }

    proptest! {
        #[test]
        fn prop_skip_is_page_minus_one_times_limit(page in 1u32..=100_000, limit in 1u32..=10_000) {
            let raw = RawQuery::new()
                .with("page", page.to_string())
                .with("limit", limit.to_string());
            let req = QueryRequest::from_raw(&raw).unwrap();
            prop_assert_eq!(req.skip(), (u64::from(page) - 1) * u64::from(limit));
            prop_assert_eq!(req.take(), u64::from(limit));
        }

        #[test]
        fn prop_unknown_order_is_rejected(order in "[a-zA-Z]{1,8}") {
            prop_assume!(order != "asc" && order != "desc");
            let raw = RawQuery::new().with("order", order);
            let err = QueryRequest::from_raw(&raw).unwrap_err();
            prop_assert!(err.has_field("order"));
        }
    }
}
