//! REST dispatcher (C6): the accept loop and per-request pipeline that ties
//! route matching, middleware, the body parser, the filesystem engine and
//! the WebSocket upgrade fork into one running gateway (spec.md §4.5).
//! Grounded on the accept loop in `calamarte-httpr`'s `Server::run` — same
//! shape (bind, accept, spawn-per-connection, parse request, write
//! response), generalized to the extra routing/WS fork this spec needs.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::{GatewayConfig, NoHandledAction};
use crate::error::GatewayError;
use crate::fs_engine::{FilterSpec, FsEngine, PaginationOverride};
use crate::http::{read_request, HttpHandler, Request, Response};
use crate::middleware::{run_error_chain, run_handler_chain, ChainOutcome};
use crate::route::RouteKind;
use crate::ws::{self, handshake};

/// A running gateway: an immutable [`GatewayConfig`] plus the filesystem
/// engine derived from its `fsDir`/pagination/filter settings.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    fs_engine: Option<Arc<FsEngine>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let fs_engine = config.fs_dir.as_ref().map(|dir| {
            let mut engine = FsEngine::new(dir.clone());
            for (method, spec) in &config.pagination {
                engine = engine.with_pagination(*method, spec.clone());
            }
            for (method, specs) in &config.filters {
                engine = engine.with_filters(*method, specs.clone());
            }
            Arc::new(engine)
        });
        Self { config: Arc::new(config), fs_engine }
    }

    /// Bind and serve forever (spec.md §4.1/§4.5). Mirrors the teacher's
    /// `Server::run`: one task per accepted connection.
    pub async fn run(self, bind: &str) -> io::Result<()> {
        if self.config.disable {
            info!("gateway disabled, not binding {bind}");
            return Ok(());
        }

        let listener = TcpListener::bind(bind).await?;
        info!("mockhttpr listening on {bind}");
        self.serve(listener).await
    }

    /// Bind without serving, returning the listener and the address it
    /// actually bound to (useful for tests that ask for port 0). Split out
    /// of [`Gateway::run`] so integration tests can discover an ephemeral
    /// port before connecting.
    pub async fn bind(bind: &str) -> io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(bind).await?;
        let addr = listener.local_addr()?;
        Ok((listener, addr))
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("connection from {peer}");

            let config = Arc::clone(&self.config);
            let fs_engine = self.fs_engine.clone();

            tokio::spawn(async move {
                handle_connection(config, fs_engine, stream, peer).await;
            });
        }
    }
}

async fn handle_connection(
    config: Arc<GatewayConfig>,
    fs_engine: Option<Arc<FsEngine>>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let (read_half, mut write_half) = stream.into_split();
    let reader = BufReader::new(read_half);

    let (request, reader) = match read_request(reader).await {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("failed to parse request from {peer}: {e}");
            return;
        }
    };

    if !log::log_enabled!(log::Level::Debug) {
        info!("request -> [{}] {}", request.method(), request.uri());
    }
    debug!("request -> {request:?}");

    if config.enable_ws && handshake::is_upgrade_request(&request) {
        let matched = config.ws_handlers.iter().find(|w| w.pattern.matches(request.path()).is_some()).cloned();

        if let Some(ws_config) = matched {
            match ws::build_upgrade_response(&request, &ws_config).await {
                Ok((response, deflate)) => {
                    if write_half.write_all(&response.as_bytes()).await.is_err() {
                        return;
                    }
                    let id = Uuid::new_v4().to_string();
                    let path = request.path().to_string();
                    crate::ws::connection::run_connection(id, path, reader, write_half, ws_config, deflate).await;
                }
                Err(err) => {
                    let _ = write_half.write_all(&Response::error_json(&err).as_bytes()).await;
                }
            }
            return;
        }
    }

    let response = dispatch(Arc::clone(&config), fs_engine, request).await;
    debug!("response -> {response:?}");
    let _ = write_half.write_all(&response.as_bytes()).await;
}

/// Run the full request pipeline (spec.md §4.5 steps 1, 3-9; step 2's WS
/// fork already happened in [`handle_connection`]).
async fn dispatch(config: Arc<GatewayConfig>, fs_engine: Option<Arc<FsEngine>>, mut request: Request) -> Response {
    if !crate::fs_engine::endpoint_matches_prefix(request.path(), &config.endpoint_prefix) {
        return not_handled(&config, &request).await;
    }

    let found = config
        .routes
        .find(request.method(), request.path())
        .map(|(route, params)| (route.disabled, route.delay, clone_kind(&route.kind), params));

    let (delay, kind, params) = match found {
        Some((disabled, delay, kind, params)) if !disabled => (delay, Some(kind), Some(params)),
        _ => (None, None, None),
    };

    if let Some(params) = params {
        request.set_params(params);
    }

    let delay = delay.or(config.delay);
    let timeout = config.gateway_timeout;

    match kind {
        Some(RouteKind::Function(handler)) => {
            invoke_timed(timeout, run_function(config, handler, request, delay)).await
        }
        Some(RouteKind::Fs) => match fs_engine {
            Some(engine) => {
                invoke_timed(
                    timeout,
                    run_fs(Arc::clone(&config), engine, request, PaginationOverride::Inherit, None, delay),
                )
                .await
            }
            None => error_response(&config, GatewayError::NotFound, &request).await,
        },
        Some(RouteKind::FsWithOverrides { pagination, filters }) => match fs_engine {
            Some(engine) => {
                invoke_timed(timeout, run_fs(Arc::clone(&config), engine, request, pagination, filters, delay)).await
            }
            None => error_response(&config, GatewayError::NotFound, &request).await,
        },
        None => match (&fs_engine, &config.fs_dir) {
            (Some(engine), Some(_)) => {
                invoke_timed(
                    timeout,
                    run_fs(
                        Arc::clone(&config),
                        Arc::clone(engine),
                        request,
                        PaginationOverride::Inherit,
                        None,
                        delay,
                    ),
                )
                .await
            }
            _ => not_handled(&config, &request).await,
        },
    }
}

fn clone_kind(kind: &RouteKind) -> RouteKind {
    match kind {
        RouteKind::Function(handler) => RouteKind::Function(Arc::clone(handler)),
        RouteKind::Fs => RouteKind::Fs,
        RouteKind::FsWithOverrides { pagination, filters } => {
            RouteKind::FsWithOverrides { pagination: pagination.clone(), filters: filters.clone() }
        }
    }
}

async fn not_handled(config: &GatewayConfig, request: &Request) -> Response {
    match config.no_handled_rest_fs_requests_action {
        NoHandledAction::NotFound => error_response(config, GatewayError::NoHandler, request).await,
        NoHandledAction::Forward => match &config.fallback {
            Some(handler) => solve_with_fallback(handler.as_ref(), request, config).await,
            None => error_response(config, GatewayError::NoHandler, request).await,
        },
    }
}

async fn solve_with_fallback(handler: &dyn HttpHandler, request: &Request, config: &GatewayConfig) -> Response {
    let mut scratch = request.clone();
    match handler.solve_request(&mut scratch).await {
        Ok(response) => response,
        Err(err) => error_response(config, err, request).await,
    }
}

async fn run_function(
    config: Arc<GatewayConfig>,
    handler: Arc<dyn HttpHandler>,
    request: Request,
    delay: Option<Duration>,
) -> Response {
    if let Some(delay) = delay {
        sleep(delay).await;
    }

    let outcome = run_handler_chain(&config.handler_middlewares, request, &config.error_middlewares).await;

    let mut request = match outcome {
        ChainOutcome::Finished(response) => return response,
        ChainOutcome::Unhandled(err) => return Response::error_json(&err),
        ChainOutcome::Proceed(request) => request,
    };

    if let Err(err) = config.parser.run(&mut request).await {
        return error_response(&config, err, &request).await;
    }

    match handler.solve_request(&mut request).await {
        Ok(response) => response,
        Err(err) => error_response(&config, err, &request).await,
    }
}

async fn run_fs(
    config: Arc<GatewayConfig>,
    engine: Arc<FsEngine>,
    mut request: Request,
    pagination: PaginationOverride,
    filters: Option<Vec<FilterSpec>>,
    delay: Option<Duration>,
) -> Response {
    if let Some(delay) = delay {
        sleep(delay).await;
    }

    if let Err(err) = config.parser.run(&mut request).await {
        return error_response(&config, err, &request).await;
    }

    match engine.handle(&request, &pagination, filters.as_ref()).await {
        Ok(response) => response,
        Err(err) => error_response(&config, err, &request).await,
    }
}

async fn error_response(config: &GatewayConfig, err: GatewayError, request: &Request) -> Response {
    match run_error_chain(&config.error_middlewares, err, request).await {
        ChainOutcome::Finished(response) => response,
        ChainOutcome::Unhandled(err) => Response::error_json(&err),
        ChainOutcome::Proceed(_) => unreachable!("error chain never proceeds"),
    }
}

/// gatewayTimeout (spec.md §4.5 step 8): the inner future is spawned rather
/// than wrapped in `tokio::time::timeout`, so a slow handler keeps running
/// to completion even after the 504 is written — only the late write is
/// suppressed, the handler itself is never cancelled.
async fn invoke_timed<F>(timeout: Option<Duration>, fut: F) -> Response
where
    F: std::future::Future<Output = Response> + Send + 'static,
{
    match timeout {
        None => fut.await,
        Some(deadline) => {
            let (tx, rx) = oneshot::channel();
            tokio::spawn(async move {
                let response = fut.await;
                let _ = tx.send(response);
            });

            tokio::select! {
                _ = sleep(deadline) => Response::error_json(&GatewayError::Timeout),
                result = rx => result.unwrap_or_else(|_| Response::error_json(&GatewayError::Timeout)),
            }
        }
    }
}
