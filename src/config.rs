//! Gateway configuration (spec.md §6): the single record the dispatcher is
//! built from. The scalar fields are `serde`-deserializable straight out of
//! a JSON config file (mirrors the teacher's `serde`/`serde_json` usage
//! elsewhere in the crate); handlers, middlewares and the parser pipeline
//! are trait objects and are therefore always attached programmatically via
//! the builder methods, after the scalar config has been loaded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::body::{ParserPipeline, Transform};
use crate::fs_engine::{ConfigMethod, FilterSpec, PaginationSpec};
use crate::http::HttpHandler;
use crate::middleware::{ErrorMiddleware, Middleware};
use crate::route::{Route, RouteTable};
use crate::ws::connection::WsHandlerConfig;

/// What happens to a request that matched neither a custom route nor an FS
/// route (spec.md §4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoHandledAction {
    #[serde(rename = "404")]
    NotFound,
    Forward,
}

impl Default for NoHandledAction {
    fn default() -> Self {
        NoHandledAction::NotFound
    }
}

/// The JSON-deserializable subset of the gateway configuration: everything
/// that is plain data rather than a trait object. Loaded from a config
/// file, then merged into a [`GatewayConfig`] alongside the programmatic
/// handlers/middlewares/parser.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawGatewayConfig {
    pub disable: bool,
    pub log_level: Option<String>,
    pub gateway_timeout: Option<u64>,
    pub delay: Option<u64>,
    #[serde(deserialize_with = "deserialize_string_or_list")]
    pub endpoint_prefix: Vec<String>,
    pub fs_dir: Option<PathBuf>,
    pub enable_ws: bool,
    pub no_handled_rest_fs_requests_action: NoHandledAction,
}

impl Default for RawGatewayConfig {
    fn default() -> Self {
        Self {
            disable: false,
            log_level: None,
            gateway_timeout: None,
            delay: None,
            endpoint_prefix: Vec::new(),
            fs_dir: None,
            enable_ws: false,
            no_handled_rest_fs_requests_action: NoHandledAction::default(),
        }
    }
}

impl RawGatewayConfig {
    /// Parse a config file's contents (spec.md §6 "Configuration (single
    /// record)").
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// `endpointPrefix` (spec.md §6) is documented as "string or list" — accept
/// either a bare string or a JSON array of strings.
fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => Ok(vec![s]),
        StringOrList::Many(v) => Ok(v),
    }
}

/// The full gateway configuration the dispatcher consumes. Built from a
/// [`RawGatewayConfig`] plus everything that can't cross a serialization
/// boundary.
pub struct GatewayConfig {
    pub disable: bool,
    pub gateway_timeout: Option<Duration>,
    pub delay: Option<Duration>,
    pub endpoint_prefix: Vec<String>,
    pub fs_dir: Option<PathBuf>,
    pub enable_ws: bool,
    pub no_handled_rest_fs_requests_action: NoHandledAction,

    pub parser: ParserPipeline,
    pub handler_middlewares: Vec<Box<dyn Middleware>>,
    pub error_middlewares: Vec<Box<dyn ErrorMiddleware>>,
    pub routes: RouteTable,
    pub ws_handlers: Vec<Arc<WsHandlerConfig>>,

    pub pagination: HashMap<ConfigMethod, PaginationSpec>,
    pub filters: HashMap<ConfigMethod, Vec<FilterSpec>>,

    /// Handler invoked for unmatched REST/FS requests when
    /// `noHandledRestFsRequestsAction` is `forward` (spec.md §4.5 step 3).
    pub fallback: Option<Arc<dyn HttpHandler>>,
}

impl GatewayConfig {
    pub fn from_raw(raw: RawGatewayConfig) -> Self {
        Self {
            disable: raw.disable,
            gateway_timeout: raw.gateway_timeout.map(Duration::from_millis),
            delay: raw.delay.map(Duration::from_millis),
            endpoint_prefix: raw.endpoint_prefix,
            fs_dir: raw.fs_dir,
            enable_ws: raw.enable_ws,
            no_handled_rest_fs_requests_action: raw.no_handled_rest_fs_requests_action,
            parser: ParserPipeline::default(),
            handler_middlewares: Vec::new(),
            error_middlewares: Vec::new(),
            routes: RouteTable::new(),
            ws_handlers: Vec::new(),
            pagination: HashMap::new(),
            filters: HashMap::new(),
            fallback: None,
        }
    }

    pub fn push_route(&mut self, route: Route) -> &mut Self {
        self.routes.push(route);
        self
    }

    /// Set the handler `noHandledRestFsRequestsAction: "forward"` hands
    /// unmatched requests to.
    pub fn with_fallback(mut self, handler: Arc<dyn HttpHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn push_handler_middleware(&mut self, middleware: Box<dyn Middleware>) -> &mut Self {
        self.handler_middlewares.push(middleware);
        self
    }

    pub fn push_error_middleware(&mut self, middleware: Box<dyn ErrorMiddleware>) -> &mut Self {
        self.error_middlewares.push(middleware);
        self
    }

    pub fn push_ws_handler(&mut self, config: WsHandlerConfig) -> &mut Self {
        self.ws_handlers.push(Arc::new(config));
        self
    }

    pub fn with_pagination(mut self, method: ConfigMethod, spec: PaginationSpec) -> Self {
        self.pagination.insert(method, spec);
        self
    }

    pub fn with_filters(mut self, method: ConfigMethod, specs: Vec<FilterSpec>) -> Self {
        self.filters.insert(method, specs);
        self
    }

    pub fn with_parser_transform(mut self, transform: Transform) -> Self {
        self.parser = ParserPipeline::default().with_transform(transform);
        self
    }

    pub fn without_parser(mut self) -> Self {
        self.parser = ParserPipeline::disabled();
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_raw(RawGatewayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_parses_known_fields() {
        let json = r#"{
            "disable": false,
            "gatewayTimeout": 2000,
            "endpointPrefix": ["/api"],
            "fsDir": "mock",
            "enableWs": true,
            "noHandledRestFsRequestsAction": "forward"
        }"#;

        let config = RawGatewayConfig::from_json(json).unwrap();
        assert_eq!(config.gateway_timeout, Some(2000));
        assert_eq!(config.endpoint_prefix, vec!["/api".to_string()]);
        assert_eq!(config.no_handled_rest_fs_requests_action, NoHandledAction::Forward);
    }

    #[test]
    fn endpoint_prefix_accepts_a_bare_string() {
        let json = r#"{"endpointPrefix": "/api"}"#;
        let config = RawGatewayConfig::from_json(json).unwrap();
        assert_eq!(config.endpoint_prefix, vec!["/api".to_string()]);
    }

    #[test]
    fn defaults_are_permissive() {
        let config = GatewayConfig::default();
        assert!(!config.disable);
        assert!(config.endpoint_prefix.is_empty());
        assert_eq!(config.no_handled_rest_fs_requests_action, NoHandledAction::NotFound);
    }
}
