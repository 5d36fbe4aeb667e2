//! Middleware chain (C4): ordered handler middlewares with an explicit
//! `next` continuation, plus a separate error-middleware chain entered only
//! after a [`GatewayError`] has been raised.
//!
//! Handler middlewares only run for custom-function routes (spec.md §4.3);
//! FS-only matches and WebSocket upgrades skip this chain entirely.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::http::{Request, Response};

/// What a middleware decided to do with the chain.
pub enum Next {
    /// Advance to the next middleware (or the handler, if this was last).
    Continue,
    /// Jump straight to the error-middleware chain with this error.
    Error(GatewayError),
    /// The middleware already finalized `response` itself; stop the chain.
    Done(Response),
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: &mut Request) -> Next;
}

#[async_trait]
pub trait ErrorMiddleware: Send + Sync {
    /// Return `Ok(response)` to resolve the error (chain exits without the
    /// default 500); return `Err(err)` to propagate to the next error
    /// middleware (possibly the same error, possibly a new one).
    async fn handle(&self, err: GatewayError, request: &Request) -> Result<Response, GatewayError>;
}

/// The ordered middleware lists for a gateway instance.
#[derive(Default)]
pub struct MiddlewareChain {
    handlers: Vec<Box<dyn Middleware>>,
    error_handlers: Vec<Box<dyn ErrorMiddleware>>,
}

/// Outcome of running the full chain (handler middlewares, then either the
/// caller's continuation or the error chain on failure).
pub enum ChainOutcome {
    /// No middleware finalized a response; the caller should proceed to run
    /// the parser and handler/FS engine.
    Proceed(Request),
    /// A middleware (or the error chain) produced a final response.
    Finished(Response),
    /// An error propagated through every error middleware unresolved; the
    /// caller should emit the default 500 (or the error's own status if it
    /// reached here with no error middlewares configured at all).
    Unhandled(GatewayError),
}

impl MiddlewareChain {
    pub fn push_handler(&mut self, middleware: Box<dyn Middleware>) -> &mut Self {
        self.handlers.push(middleware);
        self
    }

    pub fn push_error(&mut self, middleware: Box<dyn ErrorMiddleware>) -> &mut Self {
        self.error_handlers.push(middleware);
        self
    }

    /// Run the handler-middleware chain. Only called for custom-function
    /// routes per spec.md §4.3.
    pub async fn run_handlers(&self, request: Request) -> ChainOutcome {
        run_handler_chain(&self.handlers, request, &self.error_handlers).await
    }

    /// Enter the error chain directly, e.g. from the dispatcher when the
    /// handler itself returned `Err`.
    pub async fn run_errors(&self, err: GatewayError, request: &Request) -> ChainOutcome {
        run_error_chain(&self.error_handlers, err, request).await
    }
}

/// Run an ordered handler-middleware slice against `request`, falling into
/// `error_handlers` the moment one middleware raises (spec.md §4.3/§4.5).
/// Free function so the dispatcher can run a [`GatewayConfig`]'s
/// `Vec<Box<dyn Middleware>>` directly without an owned [`MiddlewareChain`].
pub async fn run_handler_chain(
    handlers: &[Box<dyn Middleware>],
    mut request: Request,
    error_handlers: &[Box<dyn ErrorMiddleware>],
) -> ChainOutcome {
    for middleware in handlers {
        match middleware.handle(&mut request).await {
            Next::Continue => continue,
            Next::Done(response) => return ChainOutcome::Finished(response),
            Next::Error(err) => return run_error_chain(error_handlers, err, &request).await,
        }
    }
    ChainOutcome::Proceed(request)
}

/// Run an ordered error-middleware slice against `err`. `ManuallyHandled`
/// short-circuits without entering the chain at all (spec.md §4.5 step 9).
pub async fn run_error_chain(
    error_handlers: &[Box<dyn ErrorMiddleware>],
    err: GatewayError,
    request: &Request,
) -> ChainOutcome {
    if matches!(err, GatewayError::ManuallyHandled) {
        // The response was already sent; the error chain MUST NOT run.
        return ChainOutcome::Unhandled(err);
    }

    let mut current = err;
    for middleware in error_handlers {
        match middleware.handle(current, request).await {
            Ok(response) => return ChainOutcome::Finished(response),
            Err(next_err) => current = next_err,
        }
    }
    ChainOutcome::Unhandled(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpStatus, Method};

    struct StampMiddleware;

    #[async_trait]
    impl Middleware for StampMiddleware {
        async fn handle(&self, request: &mut Request) -> Next {
            request.set_params(Default::default());
            Next::Continue
        }
    }

    struct RejectMiddleware;

    #[async_trait]
    impl Middleware for RejectMiddleware {
        async fn handle(&self, _request: &mut Request) -> Next {
            Next::Error(GatewayError::Conflict)
        }
    }

    struct ResolveAsTeapot;

    #[async_trait]
    impl ErrorMiddleware for ResolveAsTeapot {
        async fn handle(&self, _err: GatewayError, _request: &Request) -> Result<Response, GatewayError> {
            Ok(Response::new(HttpStatus::Ok))
        }
    }

    #[tokio::test]
    async fn chain_proceeds_when_no_middleware_finalizes() {
        let mut chain = MiddlewareChain::default();
        chain.push_handler(Box::new(StampMiddleware));
        let request = Request::for_test(Method::Get, "/x", "", b"");
        match chain.run_handlers(request).await {
            ChainOutcome::Proceed(req) => assert!(req.params().is_some()),
            _ => panic!("expected Proceed"),
        }
    }

    #[tokio::test]
    async fn middleware_error_enters_error_chain() {
        let mut chain = MiddlewareChain::default();
        chain.push_handler(Box::new(RejectMiddleware));
        chain.push_error(Box::new(ResolveAsTeapot));
        let request = Request::for_test(Method::Get, "/x", "", b"");
        match chain.run_handlers(request).await {
            ChainOutcome::Finished(resp) => assert_eq!(resp.status(), HttpStatus::Ok),
            _ => panic!("expected Finished"),
        }
    }

    #[tokio::test]
    async fn unresolved_error_chain_reports_unhandled() {
        let chain = MiddlewareChain::default();
        let request = Request::for_test(Method::Get, "/x", "", b"");
        match chain.run_errors(GatewayError::Conflict, &request).await {
            ChainOutcome::Unhandled(GatewayError::Conflict) => {}
            _ => panic!("expected Unhandled(Conflict)"),
        }
    }

    #[tokio::test]
    async fn manually_handled_never_enters_error_chain() {
        let chain = MiddlewareChain::default();
        let request = Request::for_test(Method::Get, "/x", "", b"");
        match chain.run_errors(GatewayError::ManuallyHandled, &request).await {
            ChainOutcome::Unhandled(GatewayError::ManuallyHandled) => {}
            _ => panic!("expected Unhandled(ManuallyHandled)"),
        }
    }
}
