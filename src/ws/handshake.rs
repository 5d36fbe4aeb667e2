//! WebSocket upgrade handshake (C7): header validation, subprotocol and
//! permessage-deflate negotiation, `Sec-WebSocket-Accept` computation
//! (spec.md §4.6).

use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};

use crate::error::GatewayError;
use crate::http::{HttpStatus, Request, Response};
use crate::ws::deflate::DeflateParams;

const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub fn is_upgrade_request(request: &Request) -> bool {
    request
        .header("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Validate the required upgrade headers; returns the client's nonce on
/// success.
pub fn validate(request: &Request) -> Result<String, GatewayError> {
    let upgrade_ok = request
        .header("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(GatewayError::MalformedBody("missing Upgrade: websocket".into()));
    }

    let connection_ok = request
        .header("connection")
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);
    if !connection_ok {
        return Err(GatewayError::MalformedBody("missing Connection: Upgrade".into()));
    }

    if request.header("sec-websocket-version") != Some("13") {
        return Err(GatewayError::MalformedBody("unsupported Sec-WebSocket-Version".into()));
    }

    let key = request
        .header("sec-websocket-key")
        .ok_or_else(|| GatewayError::MalformedBody("missing Sec-WebSocket-Key".into()))?;

    let decoded = STANDARD
        .decode(key)
        .map_err(|_| GatewayError::MalformedBody("Sec-WebSocket-Key is not valid base64".into()))?;
    if decoded.len() != 16 {
        return Err(GatewayError::MalformedBody("Sec-WebSocket-Key must decode to 16 bytes".into()));
    }

    Ok(key.to_string())
}

pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Intersect handler subprotocols with the client's offered list,
/// preserving handler order, and pick the first match (spec.md §4.6).
pub fn negotiate_subprotocol(handler_protocols: &[String], client_header: Option<&str>) -> Option<String> {
    let offered: Vec<&str> = client_header
        .map(|h| h.split(',').map(|s| s.trim()).collect())
        .unwrap_or_default();

    handler_protocols
        .iter()
        .find(|p| offered.contains(&p.as_str()))
        .cloned()
}

fn parse_window_bits(raw: Option<&str>) -> u8 {
    match raw {
        None => 15,
        Some("") => 15,
        Some(n) => match n.parse::<u8>() {
            // N=8 is disallowed by common deflate libraries (spec.md §9);
            // coerce up to the smallest supported window.
            Ok(8) => 9,
            Ok(v) if (8..=15).contains(&v) => v,
            _ => 15,
        },
    }
}

/// One `permessage-deflate` offer parsed from a single
/// `Sec-WebSocket-Extensions` token.
#[derive(Debug, Default)]
struct DeflateOffer {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: Option<u8>,
    client_max_window_bits: Option<u8>,
    client_max_window_bits_present: bool,
    server_max_window_bits_present: bool,
}

fn parse_extensions_header(header: &str) -> Option<DeflateOffer> {
    for candidate in header.split(',') {
        let mut parts = candidate.split(';').map(|s| s.trim());
        let name = parts.next()?;
        if name != "permessage-deflate" {
            continue;
        }

        let mut offer = DeflateOffer::default();
        for param in parts {
            let (key, value) = param.split_once('=').map(|(k, v)| (k.trim(), Some(v.trim()))).unwrap_or((param, None));
            match key {
                "server_no_context_takeover" => offer.server_no_context_takeover = true,
                "client_no_context_takeover" => offer.client_no_context_takeover = true,
                "server_max_window_bits" => {
                    offer.server_max_window_bits_present = true;
                    offer.server_max_window_bits = Some(parse_window_bits(value.map(|v| v.trim_matches('"'))));
                }
                "client_max_window_bits" => {
                    offer.client_max_window_bits_present = true;
                    offer.client_max_window_bits = Some(parse_window_bits(value.map(|v| v.trim_matches('"'))));
                }
                _ => {}
            }
        }
        return Some(offer);
    }
    None
}

/// Negotiate permessage-deflate if the handler opted in. `strict` rejects
/// the extension outright (never the connection) when the client omits a
/// parameter the server would otherwise require — per spec.md §9 this is
/// the deliberate divergence from some other implementations' `strict`
/// semantics.
pub fn negotiate_deflate(client_header: Option<&str>, opt_in: bool, strict: bool) -> Option<DeflateParams> {
    if !opt_in {
        return None;
    }
    let header = client_header?;
    let offer = parse_extensions_header(header)?;

    if strict && !(offer.client_max_window_bits_present && offer.server_max_window_bits_present) {
        return None;
    }

    Some(DeflateParams {
        server_no_context_takeover: offer.server_no_context_takeover,
        client_no_context_takeover: offer.client_no_context_takeover,
        server_max_window_bits: offer.server_max_window_bits.unwrap_or(15),
        client_max_window_bits: offer.client_max_window_bits.unwrap_or(15),
    })
}

fn deflate_extension_header(params: &DeflateParams) -> String {
    let mut tokens = vec!["permessage-deflate".to_string()];
    if params.server_no_context_takeover {
        tokens.push("server_no_context_takeover".to_string());
    }
    if params.client_no_context_takeover {
        tokens.push("client_no_context_takeover".to_string());
    }
    tokens.push(format!("server_max_window_bits={}", params.server_max_window_bits));
    tokens.push(format!("client_max_window_bits={}", params.client_max_window_bits));
    tokens.join("; ")
}

pub fn build_switching_protocols(
    accept: &str,
    subprotocol: Option<&str>,
    deflate: Option<&DeflateParams>,
) -> Response {
    let mut response = Response::new(HttpStatus::SwitchingProtocols);
    response.add_header(("Upgrade", "websocket"));
    response.add_header(("Connection", "Upgrade"));
    response.add_header(("Sec-WebSocket-Accept", accept));
    if let Some(protocol) = subprotocol {
        response.add_header(("Sec-WebSocket-Protocol", protocol));
    }
    if let Some(params) = deflate {
        response.add_header(("Sec-WebSocket-Extensions", &deflate_extension_header(params)));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn upgrade_request() -> Request {
        let mut request = Request::for_test(Method::Get, "/ws/chat", "", b"");
        request.headers_mut().insert("upgrade".into(), "websocket".into());
        request.headers_mut().insert("connection".into(), "Upgrade".into());
        request.headers_mut().insert("sec-websocket-version".into(), "13".into());
        request
            .headers_mut()
            .insert("sec-websocket-key".into(), "dGhlIHNhbXBsZSBub25jZQ==".into());
        request
    }

    #[test]
    fn validates_a_well_formed_upgrade_request() {
        let request = upgrade_request();
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn accept_matches_rfc6455_example() {
        // RFC 6455 §1.3 worked example.
        let accept = compute_accept("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn subprotocol_negotiation_prefers_handler_order() {
        let handler = vec!["v2".to_string(), "v1".to_string()];
        let chosen = negotiate_subprotocol(&handler, Some("v1, v2"));
        assert_eq!(chosen.as_deref(), Some("v2"));
    }

    #[test]
    fn deflate_negotiation_coerces_window_bits_8_to_9() {
        let params = negotiate_deflate(
            Some("permessage-deflate; client_max_window_bits=8; server_max_window_bits=8"),
            true,
            false,
        )
        .unwrap();
        assert_eq!(params.client_max_window_bits, 9);
        assert_eq!(params.server_max_window_bits, 9);
    }

    #[test]
    fn strict_rejects_extension_not_connection_when_param_missing() {
        let result = negotiate_deflate(Some("permessage-deflate"), true, true);
        assert!(result.is_none());
    }
}
