//! JSON-Patch (RFC 6902) and JSON Merge Patch (RFC 7396) application,
//! used by the PATCH method contract (spec.md §4.4).

use serde_json::{Map, Value};

use crate::error::GatewayError;

/// RFC 7396: recursively merge `patch` into `target`; `null` leaves delete
/// keys. Non-object patches replace the target outright.
pub fn merge_patch(target: &Value, patch: &Value) -> Value {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            let mut result = target_map.clone();
            for (key, value) in patch_map {
                if value.is_null() {
                    result.remove(key);
                } else {
                    let merged = merge_patch(result.get(key).unwrap_or(&Value::Null), value);
                    result.insert(key.clone(), merged);
                }
            }
            Value::Object(result)
        }
        _ => patch.clone(),
    }
}

/// RFC 6902 operation, applied sequentially. Any failure (missing path,
/// failed `test`) aborts the whole patch — the caller is responsible for
/// leaving the on-disk file untouched when this returns `Err`.
pub fn json_patch(target: &Value, ops: &[Value]) -> Result<Value, GatewayError> {
    let mut doc = target.clone();
    for op in ops {
        apply_one(&mut doc, op)?;
    }
    Ok(doc)
}

fn apply_one(doc: &mut Value, op: &Value) -> Result<(), GatewayError> {
    let op_name = op
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::PatchFailed("operation missing \"op\"".into()))?;
    let path = op
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::PatchFailed("operation missing \"path\"".into()))?;

    match op_name {
        "add" => {
            let value = require_value(op)?;
            set_at_path(doc, path, value.clone())
        }
        "replace" => {
            let value = require_value(op)?;
            if get_at_path(doc, path).is_none() {
                return Err(GatewayError::PatchFailed(format!("replace target missing: {path}")));
            }
            set_at_path(doc, path, value.clone())
        }
        "remove" => remove_at_path(doc, path),
        "move" => {
            let from = require_from(op)?;
            let value = get_at_path(doc, &from)
                .cloned()
                .ok_or_else(|| GatewayError::PatchFailed(format!("move source missing: {from}")))?;
            remove_at_path(doc, &from)?;
            set_at_path(doc, path, value)
        }
        "copy" => {
            let from = require_from(op)?;
            let value = get_at_path(doc, &from)
                .cloned()
                .ok_or_else(|| GatewayError::PatchFailed(format!("copy source missing: {from}")))?;
            set_at_path(doc, path, value)
        }
        "test" => {
            let expected = require_value(op)?;
            let actual = get_at_path(doc, path);
            if actual == Some(expected) {
                Ok(())
            } else {
                Err(GatewayError::PatchFailed(format!("test failed at {path}")))
            }
        }
        other => Err(GatewayError::PatchFailed(format!("unknown op {other:?}"))),
    }
}

fn require_value(op: &Value) -> Result<&Value, GatewayError> {
    op.get("value")
        .ok_or_else(|| GatewayError::PatchFailed("operation missing \"value\"".into()))
}

fn require_from(op: &Value) -> Result<String, GatewayError> {
    op.get("from")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::PatchFailed("operation missing \"from\"".into()))
}

fn tokenize(path: &str) -> Result<Vec<String>, GatewayError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    if !path.starts_with('/') {
        return Err(GatewayError::PatchFailed(format!("invalid json-pointer: {path}")));
    }
    Ok(path[1..]
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn get_at_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let tokens = tokenize(path).ok()?;
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(&token)?,
            Value::Array(arr) => {
                let idx: usize = token.parse().ok()?;
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn set_at_path(doc: &mut Value, path: &str, value: Value) -> Result<(), GatewayError> {
    let tokens = tokenize(path)?;
    if tokens.is_empty() {
        *doc = value;
        return Ok(());
    }

    let (last, parents) = tokens.split_last().unwrap();
    let mut current = doc;
    for token in parents {
        current = navigate_mut(current, token)?;
    }

    match current {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if last == "-" {
                arr.push(value);
            } else {
                let idx: usize = last
                    .parse()
                    .map_err(|_| GatewayError::PatchFailed(format!("invalid array index: {last}")))?;
                if idx > arr.len() {
                    return Err(GatewayError::PatchFailed(format!("array index out of bounds: {idx}")));
                }
                arr.insert(idx, value);
            }
            Ok(())
        }
        _ => Err(GatewayError::PatchFailed(format!("cannot set path into scalar: {path}"))),
    }
}

fn remove_at_path(doc: &mut Value, path: &str) -> Result<(), GatewayError> {
    let tokens = tokenize(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        return Err(GatewayError::PatchFailed("cannot remove root".into()));
    };

    let mut current = doc;
    for token in parents {
        current = navigate_mut(current, token)?;
    }

    match current {
        Value::Object(map) => {
            map.remove(last)
                .map(|_| ())
                .ok_or_else(|| GatewayError::PatchFailed(format!("remove target missing: {path}")))
        }
        Value::Array(arr) => {
            let idx: usize = last
                .parse()
                .map_err(|_| GatewayError::PatchFailed(format!("invalid array index: {last}")))?;
            if idx >= arr.len() {
                return Err(GatewayError::PatchFailed(format!("array index out of bounds: {idx}")));
            }
            arr.remove(idx);
            Ok(())
        }
        _ => Err(GatewayError::PatchFailed(format!("cannot remove path into scalar: {path}"))),
    }
}

fn navigate_mut<'a>(current: &'a mut Value, token: &str) -> Result<&'a mut Value, GatewayError> {
    match current {
        Value::Object(map) => map
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .pipe_mut(),
        Value::Array(arr) => {
            let idx: usize = token
                .parse()
                .map_err(|_| GatewayError::PatchFailed(format!("invalid array index: {token}")))?;
            arr.get_mut(idx)
                .ok_or_else(|| GatewayError::PatchFailed(format!("array index out of bounds: {idx}")))
        }
        _ => Err(GatewayError::PatchFailed(format!("cannot navigate into scalar at {token:?}"))),
    }
}

/// Tiny helper so `navigate_mut`'s object arm can return `Result<&mut Value, _>`
/// from an `Entry` without an extra match arm.
trait PipeMut {
    fn pipe_mut(&mut self) -> Result<&mut Value, GatewayError>;
}

impl PipeMut for Value {
    fn pipe_mut(&mut self) -> Result<&mut Value, GatewayError> {
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_deletes_null_keys() {
        let target = json!({"a": 1, "b": 2});
        let patch = json!({"b": null, "c": 3});
        let merged = merge_patch(&target, &patch);
        assert_eq!(merged, json!({"a": 1, "c": 3}));
    }

    #[test]
    fn merge_patch_recurses_into_nested_objects() {
        let target = json!({"a": {"x": 1, "y": 2}});
        let patch = json!({"a": {"y": null, "z": 9}});
        let merged = merge_patch(&target, &patch);
        assert_eq!(merged, json!({"a": {"x": 1, "z": 9}}));
    }

    #[test]
    fn merge_patch_law_holds_for_disjoint_keys() {
        let doc = json!({"a": 1, "b": 2, "c": 3});
        let p1 = json!({"a": null});
        let p2 = json!({"b": 9});

        let sequential = merge_patch(&merge_patch(&doc, &p1), &p2);
        let combined = merge_patch(&doc, &merge_patch(&p1, &p2));
        assert_eq!(sequential, combined);
    }

    #[test]
    fn json_patch_replace_and_test() {
        let doc = json!({"a": 1, "b": [1, 2, 3]});
        let ops = vec![
            json!({"op": "replace", "path": "/a", "value": 9}),
            json!({"op": "test", "path": "/b/0", "value": 1}),
        ];
        let result = json_patch(&doc, &ops).unwrap();
        assert_eq!(result, json!({"a": 9, "b": [1, 2, 3]}));
    }

    #[test]
    fn json_patch_test_mismatch_fails_without_mutating_caller_copy() {
        let doc = json!({"a": 1, "b": [1, 2, 3]});
        let ops = vec![
            json!({"op": "replace", "path": "/a", "value": 9}),
            json!({"op": "test", "path": "/b/0", "value": 99}),
        ];
        let err = json_patch(&doc, &ops).unwrap_err();
        assert!(matches!(err, GatewayError::PatchFailed(_)));
        // `doc` itself (the pre-request state) is untouched; json_patch only
        // mutates its internal clone.
        assert_eq!(doc, json!({"a": 1, "b": [1, 2, 3]}));
    }

    #[test]
    fn json_patch_move_and_copy() {
        let doc = json!({"a": 1});
        let ops = vec![
            json!({"op": "copy", "from": "/a", "path": "/b"}),
            json!({"op": "move", "from": "/a", "path": "/c"}),
        ];
        let result = json_patch(&doc, &ops).unwrap();
        assert_eq!(result, json!({"b": 1, "c": 1}));
    }

    #[test]
    fn json_patch_add_to_array_end() {
        let doc = json!({"items": [1, 2]});
        let ops = vec![json!({"op": "add", "path": "/items/-", "value": 3})];
        let result = json_patch(&doc, &ops).unwrap();
        assert_eq!(result, json!({"items": [1, 2, 3]}));
    }
}
