//! PaginationSpec (spec.md §3/§4.4): extracts limit/skip/sort/order from
//! either the query string or the request body, then slices a filtered
//! array.

use serde_json::Value;

use crate::body::Body;
use crate::http::QueryMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Query,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Per-method pagination configuration. `root` is a dotted path into the
/// body JSON, only meaningful when `source == Body`.
#[derive(Debug, Clone)]
pub struct PaginationSpec {
    pub source: Source,
    pub root: Option<String>,
    pub limit_key: String,
    pub skip_key: String,
    pub sort_key: String,
    pub order_key: String,
}

impl Default for PaginationSpec {
    fn default() -> Self {
        Self {
            source: Source::Query,
            root: None,
            limit_key: "limit".to_string(),
            skip_key: "skip".to_string(),
            sort_key: "sortBy".to_string(),
            order_key: "order".to_string(),
        }
    }
}

/// Per-route override layered on top of the gateway-global pagination
/// configuration (spec.md §4.4): `None` disables overriding, `Inclusive`
/// layers key-by-key, `Exclusive` replaces the global spec entirely.
#[derive(Debug, Clone, Default)]
pub enum PaginationOverride {
    #[default]
    Inherit,
    None,
    Inclusive(PartialPaginationSpec),
    Exclusive(PaginationSpec),
}

#[derive(Debug, Clone, Default)]
pub struct PartialPaginationSpec {
    pub source: Option<Source>,
    pub root: Option<String>,
    pub limit_key: Option<String>,
    pub skip_key: Option<String>,
    pub sort_key: Option<String>,
    pub order_key: Option<String>,
}

impl PaginationOverride {
    /// Resolve the effective spec (if any) for this route, given the
    /// gateway-global spec for the method.
    pub fn resolve(&self, global: Option<&PaginationSpec>) -> Option<PaginationSpec> {
        match self {
            PaginationOverride::Inherit => global.cloned(),
            PaginationOverride::None => None,
            PaginationOverride::Exclusive(spec) => Some(spec.clone()),
            PaginationOverride::Inclusive(partial) => {
                let base = global.cloned().unwrap_or_default();
                Some(PaginationSpec {
                    source: partial.source.unwrap_or(base.source),
                    root: partial.root.clone().or(base.root),
                    limit_key: partial.limit_key.clone().unwrap_or(base.limit_key),
                    skip_key: partial.skip_key.clone().unwrap_or(base.skip_key),
                    sort_key: partial.sort_key.clone().unwrap_or(base.sort_key),
                    order_key: partial.order_key.clone().unwrap_or(base.order_key),
                })
            }
        }
    }
}

struct Params {
    limit: Option<usize>,
    skip: usize,
    sort: Option<String>,
    order: Order,
}

fn parse_non_negative(raw: &str) -> Option<usize> {
    raw.parse::<i64>().ok().map(|v| v.max(0) as usize)
}

fn parse_order(raw: &str) -> Order {
    match raw.to_ascii_uppercase().as_str() {
        "DESC" | "-1" | "FALSE" => Order::Desc,
        _ => Order::Asc,
    }
}

fn extract_params(spec: &PaginationSpec, query: &QueryMap, body: &Body) -> Params {
    let lookup = |key: &str| -> Option<String> {
        match spec.source {
            Source::Query => query.get(key).map(|s| s.to_string()),
            Source::Body => {
                let root = match body.as_json() {
                    Some(v) => match &spec.root {
                        Some(path) => path.split('.').fold(Some(v), |acc, part| acc.and_then(|v| v.get(part))),
                        None => Some(v),
                    },
                    None => None,
                };
                root.and_then(|v| v.get(key)).map(value_to_string)
            }
        }
    };

    Params {
        limit: lookup(&spec.limit_key).and_then(|s| parse_non_negative(&s)),
        skip: lookup(&spec.skip_key).and_then(|s| parse_non_negative(&s)).unwrap_or(0),
        sort: lookup(&spec.sort_key).filter(|s| !s.is_empty()),
        order: lookup(&spec.order_key).map(|s| parse_order(&s)).unwrap_or(Order::Asc),
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Apply sort-then-paginate to an already-filtered array, per the algorithm
/// in spec.md §4.4. Returns the sliced page; the caller is responsible for
/// reporting the pre-slice (but post-filter) length as `X-Total-Elements`.
pub fn paginate(mut items: Vec<Value>, spec: &PaginationSpec, query: &QueryMap, body: &Body) -> Vec<Value> {
    let params = extract_params(spec, query, body);

    if let Some(sort_key) = &params.sort {
        items.sort_by(|a, b| {
            let av = a.get(sort_key);
            let bv = b.get(sort_key);
            // Missing-field placement is direction-independent: only the
            // both-present case flips under DESC, so a missing field never
            // jumps to the front just because the order is reversed.
            match (av, bv) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(a), Some(b)) => {
                    let ordering = compare_json(a, b);
                    match params.order {
                        Order::Asc => ordering,
                        Order::Desc => ordering.reverse(),
                    }
                }
            }
        });
    }

    let start = params.skip.min(items.len());
    let end = match params.limit {
        Some(limit) => (start + limit).min(items.len()),
        None => items.len(),
    };

    items[start..end].to_vec()
}


fn compare_json(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    let a_s = value_to_string(a);
    let b_s = value_to_string(b);
    a_s.cmp(&b_s)
}
