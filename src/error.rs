//! Error taxonomy shared by the dispatcher, FS engine and WebSocket stack.

use crate::http::HttpStatus;

/// A single gateway-level failure, tagged with the HTTP status it maps to
/// when it escapes to the default error handler.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No route matched the request and no FS fallback was configured.
    #[error("no handler for this request")]
    NoHandler,

    /// The body parser could not make sense of the request body.
    #[error("malformed request body: {0}")]
    MalformedBody(String),

    /// OPTIONS against a pure FS route, or a method otherwise disallowed.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// PATCH with an unrecognized Content-Type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// POST against an existing resource with a mutating body.
    #[error("conflict: resource already exists")]
    Conflict,

    /// FS lookup found nothing for the requested path.
    #[error("not found")]
    NotFound,

    /// gatewayTimeout elapsed before a response was produced.
    #[error("gateway timeout")]
    Timeout,

    /// The handler already finalized the response before raising this error;
    /// the error chain MUST NOT run for it.
    #[error("response already sent")]
    ManuallyHandled,

    /// A WebSocket handler's `authenticate` hook returned `false`.
    #[error("unauthorized")]
    Unauthorized,

    /// Filesystem I/O failed for a reason other than "not found".
    #[error("read/write failure: {0}")]
    ReadFile(#[from] std::io::Error),

    /// A user handler threw/rejected.
    #[error("handler error: {0}")]
    HandlerError(String),

    /// Hand-rolled JSON decoding failed on a body the engine expected to be
    /// valid JSON (e.g. an FS-backed file used as a JSON array).
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A JSON-Patch or Merge-Patch application failed after the file was
    /// confirmed to exist and be valid JSON.
    #[error("patch application failed: {0}")]
    PatchFailed(String),

    /// A filter's regex comparison value failed to compile.
    #[error("invalid filter regex: {0}")]
    InvalidFilterRegex(#[from] regex::Error),
}

impl GatewayError {
    /// HTTP status this error maps to when surfaced without an error
    /// middleware overriding it. `ManuallyHandled` has no status: the
    /// dispatcher never surfaces it, it only suppresses the default chain.
    pub fn status(&self) -> HttpStatus {
        use GatewayError::*;
        match self {
            NoHandler | NotFound => HttpStatus::NotFound,
            MalformedBody(_) => HttpStatus::BadRequest,
            MethodNotAllowed => HttpStatus::MethodNotAllowed,
            UnsupportedMediaType(_) => HttpStatus::UnsupportedMediaType,
            Conflict => HttpStatus::Conflict,
            Timeout => HttpStatus::GatewayTimeout,
            ManuallyHandled => HttpStatus::Ok,
            Unauthorized => HttpStatus::Unauthorized,
            ReadFile(_) | HandlerError(_) | InvalidJson(_) => HttpStatus::InternalServerError,
            PatchFailed(_) => HttpStatus::Conflict,
            InvalidFilterRegex(_) => HttpStatus::BadRequest,
        }
    }

    /// Short machine-ish name used in the `{"error": "<short>"}` body.
    pub fn short(&self) -> &'static str {
        use GatewayError::*;
        match self {
            NoHandler => "Not Found",
            MalformedBody(_) => "Malformed Body",
            MethodNotAllowed => "Method Not Allowed",
            UnsupportedMediaType(_) => "Unsupported Media Type",
            Conflict => "Conflict",
            NotFound => "Not Found",
            Timeout => "Gateway Timeout",
            ManuallyHandled => "",
            Unauthorized => "Unauthorized",
            ReadFile(_) => "Internal Server Error",
            HandlerError(_) => "Internal Server Error",
            InvalidJson(_) => "Malformed Body",
            PatchFailed(_) => "Conflict",
            InvalidFilterRegex(_) => "Bad Request",
        }
    }
}

/// Close codes used by the WebSocket stack (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    Normal = 1000,
    ProtocolError = 1002,
    InvalidPayload = 1007,
    Policy = 1008,
    TooBig = 1009,
    ServerError = 1011,
}

/// WebSocket-specific failures; always resolve to a close handshake rather
/// than an HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("send queue overflow")]
    BufferOverflow,

    #[error("heartbeat lost")]
    HeartbeatLost,
}

impl WsError {
    pub fn close_code(&self) -> CloseCode {
        match self {
            WsError::Protocol(_) => CloseCode::ProtocolError,
            WsError::InvalidPayload(_) => CloseCode::InvalidPayload,
            WsError::BufferOverflow => CloseCode::TooBig,
            WsError::HeartbeatLost => CloseCode::ServerError,
        }
    }
}
