//! FilterSpec (spec.md §3/§4.4): ordered AND-composed predicates applied to
//! a JSON array before pagination.

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

use crate::error::GatewayError;
use crate::http::QueryMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Boolean,
    Number,
    Date,
    /// `valueType: "*[]"` — split the raw query value on commas.
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    In,
    Nin,
    Lt,
    Lte,
    Gt,
    Gte,
    Regex,
}

/// A single filter entry. `field` defaults to `key` when absent.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub key: String,
    pub field: Option<String>,
    pub value_type: ValueType,
    pub comparison: Comparison,
    pub regex_flags: Option<String>,
}

impl FilterSpec {
    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.key)
    }
}

/// Resolve the dotted-path field on `item`; missing paths yield `Value::Null`.
fn resolve_field<'a>(item: &'a Value, field: &str) -> &'a Value {
    let mut current = item;
    for part in field.split('.') {
        current = current.get(part).unwrap_or(&Value::Null);
    }
    current
}

fn coerce_number(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn coerce_date_ms(v: &Value) -> Option<i64> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.timestamp_millis())
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate one filter against `item`, given the raw query-string value(s)
/// bound to `filter.key`.
fn evaluate(filter: &FilterSpec, item: &Value, raw_values: &[String]) -> Result<bool, GatewayError> {
    let field_value = resolve_field(item, filter.field_name());
    let Some(raw) = raw_values.first() else {
        return Ok(true);
    };

    match filter.comparison {
        Comparison::Regex => {
            let mut builder = regex::RegexBuilder::new(raw);
            if let Some(flags) = &filter.regex_flags {
                builder.case_insensitive(flags.contains('i'));
                builder.multi_line(flags.contains('m'));
                builder.dot_matches_new_line(flags.contains('s'));
            }
            let re = builder.build()?;
            Ok(re.is_match(&stringify(field_value)))
        }
        Comparison::In | Comparison::Nin => {
            let candidates: Vec<&str> = raw_values
                .iter()
                .flat_map(|v| v.split(',').map(|s| s.trim()))
                .collect();
            let hay = stringify(field_value);
            let contained = candidates.iter().any(|c| *c == hay);
            Ok(if filter.comparison == Comparison::In { contained } else { !contained })
        }
        _ => match filter.value_type {
            ValueType::String => {
                let hay = stringify(field_value);
                Ok(compare_ord(&hay, raw, filter.comparison))
            }
            ValueType::Boolean => {
                let expected = matches!(raw.as_str(), "true" | "1");
                let actual = field_value.as_bool().unwrap_or(false);
                Ok(compare_eq(actual, expected, filter.comparison))
            }
            ValueType::Number => {
                let expected: f64 = raw
                    .parse()
                    .map_err(|_| GatewayError::MalformedBody(format!("invalid number filter value {raw:?}")))?;
                let actual = coerce_number(field_value).unwrap_or(f64::NAN);
                Ok(compare_num(actual, expected, filter.comparison))
            }
            ValueType::Date => {
                let expected_ms = DateTime::parse_from_rfc3339(raw)
                    .map(|d| d.timestamp_millis())
                    .map_err(|_| GatewayError::MalformedBody(format!("invalid date filter value {raw:?}")))?;
                let actual_ms = coerce_date_ms(field_value).unwrap_or(i64::MIN);
                Ok(compare_num(actual_ms as f64, expected_ms as f64, filter.comparison))
            }
            ValueType::Array => {
                let expected: Vec<&str> = raw.split(',').map(|s| s.trim()).collect();
                let hay = stringify(field_value);
                let contained = expected.contains(&hay.as_str());
                Ok(match filter.comparison {
                    Comparison::Ne => !contained,
                    _ => contained,
                })
            }
        },
    }
}

fn compare_ord(actual: &str, expected: &str, cmp: Comparison) -> bool {
    match cmp {
        Comparison::Eq => actual == expected,
        Comparison::Ne => actual != expected,
        Comparison::Lt => actual < expected,
        Comparison::Lte => actual <= expected,
        Comparison::Gt => actual > expected,
        Comparison::Gte => actual >= expected,
        _ => false,
    }
}

fn compare_eq(actual: bool, expected: bool, cmp: Comparison) -> bool {
    match cmp {
        Comparison::Eq => actual == expected,
        Comparison::Ne => actual != expected,
        _ => false,
    }
}

fn compare_num(actual: f64, expected: f64, cmp: Comparison) -> bool {
    match cmp {
        Comparison::Eq => actual == expected,
        Comparison::Ne => actual != expected,
        Comparison::Lt => actual < expected,
        Comparison::Lte => actual <= expected,
        Comparison::Gt => actual > expected,
        Comparison::Gte => actual >= expected,
        _ => false,
    }
}

/// Apply every filter (AND-composed) to `items`, reading raw values from
/// `query`. Filters whose key is absent from the query are skipped (treated
/// as not configured for this request).
pub fn apply_filters(items: Vec<Value>, filters: &[FilterSpec], query: &QueryMap) -> Result<Vec<Value>, GatewayError> {
    if filters.is_empty() {
        return Ok(items);
    }

    let mut active = Vec::new();
    for f in filters {
        if query.contains_key(&f.key) {
            active.push((f, query.get_all(&f.key).to_vec()));
        }
    }

    if active.is_empty() {
        return Ok(items);
    }

    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        let mut ok = true;
        for (filter, raw_values) in &active {
            if !evaluate(filter, &item, raw_values)? {
                ok = false;
                break;
            }
        }
        if ok {
            kept.push(item);
        }
    }
    Ok(kept)
}
