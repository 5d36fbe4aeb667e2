//! Filesystem Resource Engine (C5): a method × existence × content-type
//! state machine over a mock directory tree, described in spec.md §4.4.
//!
//! Submodules hold the pieces that compose cleanly on their own
//! (pagination, filtering, RFC 6902/7396 patching); this module is the
//! orchestrator that resolves a logical path to a file, decides which of
//! the method contracts applies, and performs the (atomic) write.

pub mod filter;
pub mod pagination;
pub mod patch;

pub use filter::{Comparison, FilterSpec, ValueType};
pub use pagination::{Order, PaginationOverride, PaginationSpec, PartialPaginationSpec, Source};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde_json::Value;
use tokio::fs;

use crate::body::Body;
use crate::error::GatewayError;
use crate::http::{HttpStatus, Method, QueryMap, Request, Response};

/// Method keys used by the pagination/filter configuration maps (spec.md
/// §6): `All` applies to any method not explicitly keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigMethod {
    All,
    Head,
    Get,
    Post,
    Delete,
}

impl ConfigMethod {
    fn for_method(method: Method) -> Option<Self> {
        match method {
            Method::Head => Some(ConfigMethod::Head),
            Method::Get => Some(ConfigMethod::Get),
            Method::Post => Some(ConfigMethod::Post),
            Method::Delete => Some(ConfigMethod::Delete),
            _ => None,
        }
    }
}

/// The known `Content-Type` table from spec.md §6. Extensions outside this
/// table fall back to [`mime_guess`] (an enrichment over the distilled
/// spec, which only names these four) and finally to
/// `application/octet-stream`.
fn content_type_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json".to_string(),
        Some("xml") => "application/xml".to_string(),
        Some("html") => "text/html".to_string(),
        Some("txt") => "text/plain".to_string(),
        Some(ext) => mime_guess::from_ext(ext)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        None => "application/octet-stream".to_string(),
    }
}

const KNOWN_EXTENSIONS: &[&str] = &["json", "xml", "html", "txt"];

enum ResolutionKind {
    File(PathBuf),
    Missing,
}

/// Result of the FS lookup described in spec.md §3 "FS Resolution" and §6
/// "Filesystem layout": exact file → `<P>/index.json` → `<P>.<ext>`.
struct Resolution {
    kind: ResolutionKind,
}

async fn resolve(root: &Path, logical_path: &str) -> Resolution {
    let relative = logical_path.trim_start_matches('/');
    let exact = root.join(relative);

    if fs::metadata(&exact).await.map(|m| m.is_file()).unwrap_or(false) {
        return Resolution { kind: ResolutionKind::File(exact) };
    }

    let index = exact.join("index.json");
    if fs::metadata(&index).await.map(|m| m.is_file()).unwrap_or(false) {
        return Resolution { kind: ResolutionKind::File(index) };
    }

    for ext in KNOWN_EXTENSIONS {
        let candidate = append_extension(&exact, ext);
        if fs::metadata(&candidate).await.map(|m| m.is_file()).unwrap_or(false) {
            return Resolution { kind: ResolutionKind::File(candidate) };
        }
    }

    Resolution { kind: ResolutionKind::Missing }
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Write `bytes` to `path` atomically: a sibling temp file, then
/// `tokio::fs::rename` (spec.md §5 — no cross-request locking,
/// last-writer-wins).
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), GatewayError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = append_extension(path, &format!("tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Config for the FS engine: mock directory root plus the gateway-global
/// pagination/filter tables keyed by method.
pub struct FsEngine {
    root: PathBuf,
    pagination: HashMap<ConfigMethod, PaginationSpec>,
    filters: HashMap<ConfigMethod, Vec<FilterSpec>>,
}

impl FsEngine {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            pagination: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    pub fn with_pagination(mut self, method: ConfigMethod, spec: PaginationSpec) -> Self {
        self.pagination.insert(method, spec);
        self
    }

    pub fn with_filters(mut self, method: ConfigMethod, specs: Vec<FilterSpec>) -> Self {
        self.filters.insert(method, specs);
        self
    }

    fn global_pagination(&self, method: Method) -> Option<&PaginationSpec> {
        ConfigMethod::for_method(method)
            .and_then(|m| self.pagination.get(&m))
            .or_else(|| self.pagination.get(&ConfigMethod::All))
    }

    fn global_filters(&self, method: Method) -> Option<&Vec<FilterSpec>> {
        ConfigMethod::for_method(method)
            .and_then(|m| self.filters.get(&m))
            .or_else(|| self.filters.get(&ConfigMethod::All))
    }

    /// Entry point used by the dispatcher for FS-backed routes.
    /// `pagination_override`/`filters_override` come from the matched
    /// route's config (spec.md §4.4 merge rules); `None` for filters means
    /// inherit the global list unchanged.
    pub async fn handle(
        &self,
        request: &Request,
        pagination_override: &PaginationOverride,
        filters_override: Option<&Vec<FilterSpec>>,
    ) -> Result<Response, GatewayError> {
        let method = request.method();
        let pagination = pagination_override.resolve(self.global_pagination(method));
        let filters = filters_override
            .cloned()
            .or_else(|| self.global_filters(method).cloned())
            .unwrap_or_default();

        match method {
            Method::Get | Method::Head => self.handle_get(request, &pagination, &filters).await,
            Method::Post => self.handle_post(request, &pagination, &filters).await,
            Method::Put => self.handle_put(request).await,
            Method::Patch => self.handle_patch(request).await,
            Method::Delete => self.handle_delete(request, &pagination, &filters).await,
            Method::Options => Err(GatewayError::MethodNotAllowed),
            _ => Err(GatewayError::MethodNotAllowed),
        }
    }

    async fn read_file(&self, path: &Path) -> Result<Vec<u8>, GatewayError> {
        Ok(fs::read(path).await?)
    }

    async fn handle_get(
        &self,
        request: &Request,
        pagination: &Option<PaginationSpec>,
        filters: &[FilterSpec],
    ) -> Result<Response, GatewayError> {
        let resolution = resolve(&self.root, request.path()).await;
        let ResolutionKind::File(path) = resolution.kind else {
            return Err(GatewayError::NotFound);
        };

        let bytes = self.read_file(&path).await?;
        let content_type = content_type_for(&path);

        let mut response = if content_type == "application/json" {
            if let Ok(Value::Array(items)) = serde_json::from_slice::<Value>(&bytes) {
                if pagination.is_some() || !filters.is_empty() {
                    let filtered = filter::apply_filters(items, filters, request.query())?;
                    let total = filtered.len();
                    let paged = match pagination {
                        Some(spec) => pagination::paginate(filtered, spec, request.query(), request.body()),
                        None => filtered,
                    };
                    let body = Value::Array(paged);
                    let mut response = Response::json(HttpStatus::Ok, &body);
                    response.add_header(("X-Total-Elements", &total.to_string()));
                    response
                } else {
                    let mut response = Response::new(HttpStatus::Ok);
                    response.add_header(("Content-Type", &content_type));
                    response.add_body(&bytes);
                    response
                }
            } else {
                let mut response = Response::new(HttpStatus::Ok);
                response.add_header(("Content-Type", &content_type));
                response.add_body(&bytes);
                response
            }
        } else {
            let mut response = Response::new(HttpStatus::Ok);
            response.add_header(("Content-Type", &content_type));
            response.add_body(&bytes);
            response
        };

        if request.method() == Method::Head {
            response.clean_body();
        }

        Ok(response)
    }

    /// True iff every key in a JSON object is a pagination or filter key —
    /// the normative "mutation intent" rule from spec.md §9: any other key
    /// present means the POST should be treated as a write, not a read.
    fn body_is_pagination_only(
        body: &Value,
        pagination: &Option<PaginationSpec>,
        filters: &[FilterSpec],
    ) -> bool {
        let Value::Object(map) = body else {
            return false;
        };
        if map.is_empty() {
            return true;
        }

        let mut reserved: Vec<&str> = Vec::new();
        if let Some(spec) = pagination {
            reserved.push(&spec.limit_key);
            reserved.push(&spec.skip_key);
            reserved.push(&spec.sort_key);
            reserved.push(&spec.order_key);
        }
        for f in filters {
            reserved.push(&f.key);
        }

        map.keys().all(|k| reserved.contains(&k.as_str()))
    }

    async fn handle_post(
        &self,
        request: &Request,
        pagination: &Option<PaginationSpec>,
        filters: &[FilterSpec],
    ) -> Result<Response, GatewayError> {
        let resolution = resolve(&self.root, request.path()).await;

        match resolution.kind {
            ResolutionKind::Missing => self.create_file(request, request.path()).await,
            ResolutionKind::File(path) => {
                let content_type = content_type_for(&path);
                if content_type != "application/json" {
                    return Err(GatewayError::MalformedBody(
                        "POST against a non-JSON existing file".into(),
                    ));
                }

                let has_body = !matches!(request.body(), Body::Null);
                let read_only = match request.body() {
                    Body::Null => true,
                    Body::Json(v) => Self::body_is_pagination_only(v, pagination, filters),
                    _ => false,
                };

                if has_body && !read_only {
                    return Err(GatewayError::Conflict);
                }
                if !has_body && !(pagination.is_some() || !filters.is_empty()) {
                    // No body, no pagination/filter config: still a conflict,
                    // matching the §4.4 "file exists otherwise" fallback.
                    return Err(GatewayError::Conflict);
                }

                self.handle_get(request, pagination, filters).await
            }
        }
    }

    async fn handle_put(&self, request: &Request) -> Result<Response, GatewayError> {
        let resolution = resolve(&self.root, request.path()).await;
        match resolution.kind {
            ResolutionKind::Missing => self.create_file(request, request.path()).await,
            ResolutionKind::File(path) => {
                let bytes = Self::body_bytes_for_write(request)?;
                atomic_write(&path, &bytes).await?;
                let content_type = content_type_for(&path);
                let mut response = Response::new(HttpStatus::Ok);
                response.add_header(("Content-Type", &content_type));
                response.add_body(&bytes);
                Ok(response)
            }
        }
    }

    fn body_bytes_for_write(request: &Request) -> Result<Vec<u8>, GatewayError> {
        let files = request.files().unwrap_or(&[]);
        let has_body = !matches!(request.body(), Body::Null);

        if has_body && !files.is_empty() {
            return Err(GatewayError::MalformedBody(
                "body and files are mutually exclusive".into(),
            ));
        }
        if files.len() > 1 {
            return Err(GatewayError::MalformedBody("only a single file is accepted".into()));
        }

        if let Some(file) = files.first() {
            return Ok(file.bytes.clone());
        }

        match request.body() {
            Body::Json(v) => Ok(v.to_string().into_bytes()),
            Body::Bytes(b) => Ok(b.clone()),
            Body::Form(map) => {
                Ok(serde_json::to_vec(map).unwrap_or_default())
            }
            Body::Null => Ok(Vec::new()),
        }
    }

    async fn create_file(&self, request: &Request, logical_path: &str) -> Result<Response, GatewayError> {
        let bytes = Self::body_bytes_for_write(request)?;
        let relative = logical_path.trim_start_matches('/');
        let mut path = self.root.join(relative);
        if path.extension().is_none() {
            path = append_extension(&path, "json");
        }

        atomic_write(&path, &bytes).await?;
        let content_type = content_type_for(&path);

        let mut response = Response::new(HttpStatus::Created);
        response.add_header(("Content-Type", &content_type));
        response.add_body(&bytes);
        Ok(response)
    }

    async fn handle_patch(&self, request: &Request) -> Result<Response, GatewayError> {
        let resolution = resolve(&self.root, request.path()).await;
        let ResolutionKind::File(path) = resolution.kind else {
            return Err(GatewayError::NotFound);
        };

        let content_type = content_type_for(&path);
        if content_type != "application/json" {
            return Err(GatewayError::MalformedBody("PATCH target is not JSON".into()));
        }

        let bytes = self.read_file(&path).await?;
        let current: Value = serde_json::from_slice(&bytes)?;

        let patch_content_type = request.content_type().unwrap_or("").to_lowercase();
        let patch_content_type = patch_content_type.split(';').next().unwrap_or("").trim();

        let patched = match patch_content_type {
            "application/json" | "application/merge-patch+json" => {
                let patch_body = request
                    .body()
                    .as_json()
                    .ok_or_else(|| GatewayError::MalformedBody("PATCH body is not JSON".into()))?;
                patch::merge_patch(&current, patch_body)
            }
            "application/json-patch+json" => {
                let ops = request
                    .body()
                    .as_json()
                    .and_then(Value::as_array)
                    .ok_or_else(|| GatewayError::MalformedBody("json-patch body must be an array".into()))?;
                patch::json_patch(&current, ops)?
            }
            other => {
                return Err(GatewayError::UnsupportedMediaType(other.to_string()));
            }
        };

        let out_bytes = serde_json::to_vec(&patched)?;
        atomic_write(&path, &out_bytes).await?;

        Ok(Response::json(HttpStatus::Ok, &patched))
    }

    async fn handle_delete(
        &self,
        request: &Request,
        pagination: &Option<PaginationSpec>,
        filters: &[FilterSpec],
    ) -> Result<Response, GatewayError> {
        if !matches!(request.body(), Body::Null) {
            return Err(GatewayError::MalformedBody("DELETE does not accept a body".into()));
        }

        let resolution = resolve(&self.root, request.path()).await;
        let ResolutionKind::File(path) = resolution.kind else {
            return Err(GatewayError::NotFound);
        };

        let content_type = content_type_for(&path);
        let bytes = self.read_file(&path).await?;

        let is_array = content_type == "application/json"
            && matches!(serde_json::from_slice::<Value>(&bytes), Ok(Value::Array(_)));

        if is_array && (pagination.is_some() || !filters.is_empty()) {
            let Value::Array(items) = serde_json::from_slice::<Value>(&bytes)? else {
                unreachable!("checked above");
            };
            let kept = filter::apply_filters(items.clone(), filters, request.query())?;
            let to_remove: std::collections::HashSet<_> = match pagination {
                Some(spec) => pagination::paginate(kept, spec, request.query(), request.body())
                    .into_iter()
                    .map(|v| v.to_string())
                    .collect(),
                None => kept.into_iter().map(|v| v.to_string()).collect(),
            };

            let deleted = items.iter().filter(|v| to_remove.contains(&v.to_string())).count();
            let remaining: Vec<Value> = items
                .into_iter()
                .filter(|v| !to_remove.contains(&v.to_string()))
                .collect();

            if remaining.is_empty() {
                fs::remove_file(&path).await?;
            } else {
                atomic_write(&path, &serde_json::to_vec(&remaining)?).await?;
            }

            let mut response = Response::new(HttpStatus::NoContent);
            response.add_header(("X-Deleted-Elements", &deleted.to_string()));
            Ok(response)
        } else {
            fs::remove_file(&path).await?;
            let mut response = Response::new(HttpStatus::NoContent);
            response.add_header(("X-Deleted-Elements", "1"));
            Ok(response)
        }
    }
}

/// Used by the dispatcher to synthesize an FS route when no custom handler
/// matched and a `fsDir` is configured (spec.md §4.5 step 3).
pub fn endpoint_matches_prefix(path: &str, prefixes: &[String]) -> bool {
    if prefixes.is_empty() {
        return true;
    }
    prefixes.iter().any(|p| path.starts_with(p.as_str()))
}

#[allow(dead_code)]
fn log_unused_query(query: &QueryMap) {
    if query.is_empty() {
        debug!("no query parameters present");
    } else {
        for key in query.keys() {
            warn!("unconsumed query key in fs engine debug probe: {key}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use serde_json::json;
    use tempfile::TempDir;

    async fn write_json(dir: &Path, name: &str, value: &Value) {
        fs::write(dir.join(name), value.to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn get_missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let engine = FsEngine::new(tmp.path());
        let request = Request::for_test(Method::Get, "/missing", "", b"");
        let err = engine
            .handle(&request, &PaginationOverride::Inherit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }

    #[tokio::test]
    async fn get_paginates_and_filters_array_s1() {
        let tmp = TempDir::new().unwrap();
        let users = json!([
            {"id": 1, "status": "a"}, {"id": 2, "status": "a"}, {"id": 3, "status": "b"},
            {"id": 4, "status": "a"}, {"id": 5, "status": "b"}, {"id": 6, "status": "a"}
        ]);
        write_json(tmp.path(), "users.json", &users).await;

        let engine = FsEngine::new(tmp.path())
            .with_pagination(
                ConfigMethod::Get,
                PaginationSpec {
                    source: Source::Query,
                    root: None,
                    limit_key: "limit".into(),
                    skip_key: "skip".into(),
                    sort_key: "sortBy".into(),
                    order_key: "order".into(),
                },
            )
            .with_filters(
                ConfigMethod::Get,
                vec![FilterSpec {
                    key: "status".into(),
                    field: None,
                    value_type: ValueType::String,
                    comparison: Comparison::Eq,
                    regex_flags: None,
                }],
            );

        let request = Request::for_test(
            Method::Get,
            "/users?status=a&limit=2&skip=1&sortBy=id&order=DESC",
            "",
            b"",
        );
        let response = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap();
        assert_eq!(response.header("x-total-elements"), Some("4"));
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!([{"id": 4, "status": "a"}, {"id": 2, "status": "a"}]));
    }

    #[tokio::test]
    async fn post_missing_creates_file_201() {
        let tmp = TempDir::new().unwrap();
        let engine = FsEngine::new(tmp.path());
        let request = Request::for_test(Method::Post, "/items", "application/json", br#"{"a":1}"#);
        let mut request = request;
        request.set_body(Body::Json(json!({"a": 1})));

        let response = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap();
        assert_eq!(response.status(), HttpStatus::Created);
        assert!(tmp.path().join("items.json").exists());
    }

    #[tokio::test]
    async fn post_existing_with_mutating_body_is_conflict_s3_counterexample() {
        let tmp = TempDir::new().unwrap();
        write_json(tmp.path(), "items.json", &json!([{"id": 1}])).await;

        let engine = FsEngine::new(tmp.path());
        let mut request = Request::for_test(Method::Post, "/items", "application/json", b"");
        request.set_body(Body::Json(json!({"name": "new"})));

        let err = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict));
    }

    #[tokio::test]
    async fn post_existing_with_pagination_only_body_is_read_s3() {
        let tmp = TempDir::new().unwrap();
        let items = json!([{"id": 1}, {"id": 2}, {"id": 3}]);
        write_json(tmp.path(), "items.json", &items).await;

        let engine = FsEngine::new(tmp.path()).with_pagination(ConfigMethod::Post, PaginationSpec::default());
        let mut request = Request::for_test(Method::Post, "/items", "application/json", b"");
        request.set_body(Body::Json(json!({"limit": 2, "skip": 0})));

        let response = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap();
        assert_eq!(response.status(), HttpStatus::Ok);
        let on_disk = fs::read_to_string(tmp.path().join("items.json")).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), items);
    }

    #[tokio::test]
    async fn patch_json_patch_conflict_leaves_file_untouched_s2() {
        let tmp = TempDir::new().unwrap();
        let original = json!({"a": 1, "b": [1, 2, 3]});
        write_json(tmp.path(), "obj.json", &original).await;

        let engine = FsEngine::new(tmp.path());
        let mut request = Request::for_test(
            Method::Patch,
            "/obj",
            "application/json-patch+json",
            b"",
        );
        request.set_body(Body::Json(json!([
            {"op": "replace", "path": "/a", "value": 9},
            {"op": "test", "path": "/b/0", "value": 99}
        ])));

        let err = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::PatchFailed(_)));

        let on_disk = fs::read_to_string(tmp.path().join("obj.json")).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), original);
    }

    #[tokio::test]
    async fn patch_merge_patch_deletes_null_keys() {
        let tmp = TempDir::new().unwrap();
        write_json(tmp.path(), "obj.json", &json!({"a": 1, "b": 2})).await;

        let engine = FsEngine::new(tmp.path());
        let mut request = Request::for_test(Method::Patch, "/obj", "application/merge-patch+json", b"");
        request.set_body(Body::Json(json!({"b": null, "c": 3})));

        let response = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap();
        assert_eq!(response.status(), HttpStatus::Ok);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({"a": 1, "c": 3}));
    }

    #[tokio::test]
    async fn patch_unknown_content_type_is_415() {
        let tmp = TempDir::new().unwrap();
        write_json(tmp.path(), "obj.json", &json!({"a": 1})).await;

        let engine = FsEngine::new(tmp.path());
        let request = Request::for_test(Method::Patch, "/obj", "text/plain", b"x");
        let err = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedMediaType(_)));
    }

    #[tokio::test]
    async fn delete_whole_file_when_not_array() {
        let tmp = TempDir::new().unwrap();
        write_json(tmp.path(), "obj.json", &json!({"a": 1})).await;

        let engine = FsEngine::new(tmp.path());
        let request = Request::for_test(Method::Delete, "/obj", "", b"");
        let response = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap();
        assert_eq!(response.status(), HttpStatus::NoContent);
        assert_eq!(response.header("x-deleted-elements"), Some("1"));
        assert!(!tmp.path().join("obj.json").exists());
    }

    #[tokio::test]
    async fn delete_removes_matching_subset_and_keeps_rest() {
        let tmp = TempDir::new().unwrap();
        write_json(tmp.path(), "items.json", &json!([{"id": 1, "s": "a"}, {"id": 2, "s": "b"}])).await;

        let engine = FsEngine::new(tmp.path()).with_filters(
            ConfigMethod::Delete,
            vec![FilterSpec {
                key: "s".into(),
                field: None,
                value_type: ValueType::String,
                comparison: Comparison::Eq,
                regex_flags: None,
            }],
        );
        let request = Request::for_test(Method::Delete, "/items?s=a", "", b"");
        let response = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap();
        assert_eq!(response.header("x-deleted-elements"), Some("1"));
        let on_disk = fs::read_to_string(tmp.path().join("items.json")).await.unwrap();
        assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), json!([{"id": 2, "s": "b"}]));
    }

    #[tokio::test]
    async fn options_is_method_not_allowed() {
        let tmp = TempDir::new().unwrap();
        let engine = FsEngine::new(tmp.path());
        let request = Request::for_test(Method::Options, "/x", "", b"");
        let err = engine.handle(&request, &PaginationOverride::Inherit, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::MethodNotAllowed));
    }
}
