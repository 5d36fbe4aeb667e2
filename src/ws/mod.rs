//! WebSocket stack: handshake (C7), frame codec (C8), connection lifecycle
//! (C9), rooms/broadcast (C10) and the permessage-deflate extension (C11).
//! `dispatcher` is the only other module that reaches into this one — it
//! owns the accept loop and hands off already-validated upgrade requests.

pub mod connection;
pub mod deflate;
pub mod frame;
pub mod handshake;
pub mod rooms;

use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;

pub use connection::{ConnectionHandle, IncomingMessage, OutgoingMessage, ResponseRule, WsHandler, WsHandlerConfig};
pub use deflate::DeflateParams;
pub use rooms::{ConnectionId, Registry};

use crate::error::GatewayError;
use crate::http::{Request, Response};

/// Validate the upgrade request and build the 101 response, negotiating
/// subprotocol and permessage-deflate along the way (spec.md §4.6). Returns
/// the response to write back to the client and the deflate parameters (if
/// any) the connection task should be started with.
pub async fn build_upgrade_response(
    request: &Request,
    config: &WsHandlerConfig,
) -> Result<(Response, Option<DeflateParams>), GatewayError> {
    match config.handler.authenticate(request).await {
        Ok(true) => {}
        Ok(false) => return Err(GatewayError::Unauthorized),
        Err(msg) => return Err(GatewayError::HandlerError(msg)),
    }
    let key = handshake::validate(request)?;
    let accept = handshake::compute_accept(&key);
    let subprotocol =
        handshake::negotiate_subprotocol(&config.subprotocols, request.header("sec-websocket-protocol"));
    let deflate = handshake::negotiate_deflate(
        request.header("sec-websocket-extensions"),
        config.deflate_opt_in,
        config.deflate_strict,
    );
    let response = handshake::build_switching_protocols(&accept, subprotocol.as_deref(), deflate.as_ref());
    Ok((response, deflate))
}

/// Drive one accepted connection to completion. The caller must already
/// have written the 101 response produced by [`build_upgrade_response`] to
/// `socket` before calling this.
pub async fn serve(
    id: ConnectionId,
    path: String,
    socket: TcpStream,
    config: Arc<WsHandlerConfig>,
    deflate: Option<DeflateParams>,
) {
    let (read_half, write_half) = socket.into_split();
    let reader = BufReader::new(read_half);
    connection::run_connection(id, path, reader, write_half, config, deflate).await;
}
