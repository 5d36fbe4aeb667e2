//! Wire-level HTTP primitives: status codes, methods, the raw request parser
//! and the response builder. Everything above this layer (routing, body
//! parsing, the FS engine, WebSockets) is built on top of these types.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::string::FromUtf8Error;

use async_trait::async_trait;
use log::debug;
use strum_macros::{Display, EnumString};
use tokio::io::{self, AsyncBufReadExt, AsyncReadExt, BufReader, Error};
use tokio::net::tcp::OwnedReadHalf;
use url::Url;

use crate::body::Body;

macro_rules! define_status {
    ($($name:ident = ($code:expr, $desc:expr)),*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum HttpStatus {
            $(
                $name,
            )*
        }

        impl HttpStatus {
            pub fn code(&self) -> u16 {
                match *self {
                    $(
                        HttpStatus::$name => $code,
                    )*
                }
            }

            pub fn description(&self) -> &'static str {
                match *self {
                    $(
                        HttpStatus::$name => $desc,
                    )*
                }
            }
        }
    }
}

define_status! {
    SwitchingProtocols = (101, "Switching Protocols"),

    Ok = (200, "OK"),
    Created = (201, "Created"),
    NoContent = (204, "No Content"),

    MovedPermanently = (301, "Moved Permanently"),

    BadRequest = (400, "Bad Request"),
    Unauthorized = (401, "Unauthorized"),
    NotFound = (404, "Not Found"),
    MethodNotAllowed = (405, "Method Not Allowed"),
    Conflict = (409, "Conflict"),
    UnsupportedMediaType = (415, "Unsupported Media Type"),

    InternalServerError = (500, "Internal Server Error"),
    GatewayTimeout = (504, "Gateway Timeout")
}

pub trait Named {
    fn name(&self) -> &str {
        std::any::type_name::<Self>().split("::").last().unwrap()
    }
}

/// A request handler invoked by the REST dispatcher for custom-function
/// routes. FS routes never go through this trait; see `fs_engine`.
#[async_trait]
pub trait HttpHandler: Send + Sync + Named + 'static {
    async fn solve_request(
        &self,
        request: &mut Request,
    ) -> Result<Response, crate::error::GatewayError>;
}

#[async_trait]
pub trait AsyncTryFrom<T>: Sized {
    type Error;

    async fn try_from(value: T) -> Result<Self, Self::Error>;
}

const HTTP_VERSION: &str = "HTTP/1.1";

#[derive(Default, Debug, Clone, Copy, EnumString, Display, Eq, PartialEq, Hash)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

/// An ordered multi-map for query parameters: a key may repeat
/// (`?tag=a&tag=b`), so a plain `HashMap<String, String>` would lose data.
#[derive(Debug, Default, Clone)]
pub struct QueryMap(HashMap<String, Vec<String>>);

impl QueryMap {
    pub fn parse(url: &Url) -> Self {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in url.query_pairs() {
            map.entry(k.into_owned()).or_default().push(v.into_owned());
        }
        Self(map)
    }

    /// First value bound to `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(|s| s.as_str())
    }

    /// All values bound to `key`.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.0.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single uploaded file from a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime: String,
}

#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: String,
    version: String,
    headers: HashMap<String, String>,
    raw_body: Vec<u8>,

    body: Body,
    params: Option<HashMap<String, String>>,
    query: QueryMap,
    files: Option<Vec<UploadedFile>>,
}

impl Request {
    pub fn new(method: Method, uri: String, version: String) -> Self {
        let query = Url::parse(&format!("http://placeholder{uri}"))
            .map(|u| QueryMap::parse(&u))
            .unwrap_or_default();

        Self {
            method,
            uri,
            version,
            headers: HashMap::new(),
            raw_body: Vec::new(),
            body: Body::Null,
            params: None,
            query,
            files: None,
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    pub fn body_string(&self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.raw_body.to_vec())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = body;
    }

    pub fn params(&self) -> Option<&HashMap<String, String>> {
        self.params.as_ref()
    }

    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = Some(params);
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.as_ref().and_then(|p| p.get(name)).map(|s| s.as_str())
    }

    pub fn query(&self) -> &QueryMap {
        &self.query
    }

    pub fn files(&self) -> Option<&[UploadedFile]> {
        self.files.as_deref()
    }

    pub fn set_files(&mut self, files: Vec<UploadedFile>) {
        self.files = Some(files);
    }

    /// Path component of the request URI, with the query string stripped.
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or(&self.uri)
    }

    /// Full URL, resolved against the `Host` header the way the teacher's
    /// original parser already did. Falls back to a placeholder host if
    /// the `Host` header is missing or not a valid URL authority.
    pub fn url(&self) -> Url {
        let host = self.headers.get("host").map(|s| s.as_str()).unwrap_or("localhost");
        Url::parse(&format!("http://{host}{}", self.uri))
            .or_else(|_| Url::parse(&format!("http://placeholder{}", self.uri)))
            .unwrap_or_else(|_| Url::parse("http://placeholder/").expect("static URL is valid"))
    }
}

#[async_trait]
/// Parses one request off `reader` and hands the same reader back
/// afterwards, positioned right after the body — the dispatcher needs it
/// intact to hand a WebSocket upgrade's connection off to the frame reader.
/// The [`AsyncTryFrom`] impl below is a thin wrapper that discards it.
pub async fn read_request(
    reader: BufReader<OwnedReadHalf>,
) -> Result<(Request, BufReader<OwnedReadHalf>), Error> {
    let mut lines = reader.lines();

    let first_line = lines
        .next_line()
        .await?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "empty request"))?;
    let mut parts = first_line.split_whitespace();

    let verb = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing method"))?
        .to_uppercase()
        .parse::<Method>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "unsupported method"))?;
    let uri = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing uri"))?
        .to_string();
    let protocol = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing protocol"))?
        .to_lowercase();

    let mut request = Request::new(verb, uri, protocol);

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(": ") {
            request.headers.insert(key.to_lowercase(), value.into());
        }
    }

    if let Some(len) = request.headers.get("content-length") {
        let len = len.parse().unwrap_or(0usize);
        request.raw_body.resize(len, 0);
        lines.get_mut().read_exact(&mut request.raw_body).await?;
    }

    debug!("parsed request {} {}", request.method, request.uri);

    let reader = lines.into_inner();
    Ok((request, reader))
}

impl AsyncTryFrom<BufReader<OwnedReadHalf>> for Request {
    type Error = Error;

    async fn try_from(value: BufReader<OwnedReadHalf>) -> Result<Self, Self::Error> {
        read_request(value).await.map(|(request, _reader)| request)
    }
}

#[derive(Debug)]
pub struct Response {
    status: HttpStatus,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    /// Set once the response has actually been written to the socket, so the
    /// gatewayTimeout machinery can detect and suppress a late write.
    finalized: bool,
}

impl Response {
    pub fn new(status: HttpStatus) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
            finalized: false,
        }
    }

    pub fn not_found() -> Self {
        Self::new(HttpStatus::NotFound)
    }

    pub fn json(status: HttpStatus, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status);
        response.add_header(("Content-Type", "application/json"));
        response.add_body(value.to_string().as_bytes());
        response
    }

    pub fn error_json(err: &crate::error::GatewayError) -> Self {
        let status = err.status();
        let body = if matches!(status, HttpStatus::InternalServerError) {
            serde_json::json!({ "error": "Internal Server Error" })
        } else {
            serde_json::json!({ "error": err.short(), "detail": err.to_string() })
        };
        Self::json(status, &body)
    }

    pub fn redirect<P: AsRef<Path>>(path: P) -> Self {
        let mut response = Self::new(HttpStatus::MovedPermanently);
        response.headers.insert(
            "Location".to_string(),
            path.as_ref().to_str().unwrap_or_default().to_string(),
        );
        response
    }

    pub fn status(&self) -> HttpStatus {
        self.status
    }

    pub fn set_status(&mut self, status: HttpStatus) {
        self.status = status;
    }

    pub fn add_header(&mut self, (k, value): (&str, &str)) {
        self.headers.insert(k.to_lowercase(), value.to_string());
    }

    pub fn header(&self, k: &str) -> Option<&str> {
        self.headers.get(&k.to_lowercase()).map(|s| s.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn add_body(&mut self, body: &[u8]) {
        self.body = body.to_vec();
    }

    pub fn clean_body(&mut self) {
        self.body.clear();
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        let status_line = format!(
            "{} {} {}\r\n",
            HTTP_VERSION,
            self.status.code(),
            self.status.description()
        );
        bytes.extend_from_slice(status_line.as_bytes());

        for (k, v) in &self.headers {
            let line = format!("{k}: {v}\r\n");
            bytes.extend_from_slice(line.as_bytes());
        }

        let len_line = format!("Content-Length: {}\r\n\r\n", self.body.len());
        bytes.extend_from_slice(len_line.as_bytes());

        bytes.extend_from_slice(&self.body);

        bytes
    }
}

#[cfg(test)]
impl Request {
    /// Build a `Request` directly from its parts, bypassing the wire parser.
    /// Used by unit tests across the crate that need a `Request` without
    /// driving a real `TcpStream`.
    pub fn for_test(method: Method, uri: &str, content_type: &str, body: &[u8]) -> Self {
        let mut request = Request::new(method, uri.to_string(), "http/1.1".to_string());
        if !content_type.is_empty() {
            request.headers.insert("content-type".to_string(), content_type.to_string());
        }
        request.headers.insert("host".to_string(), "localhost".to_string());
        request.raw_body = body.to_vec();
        request
    }

    /// Mutable header access for tests that need to stage headers the
    /// constructor doesn't accept directly (e.g. WebSocket upgrade headers).
    pub fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_map_preserves_repeated_keys() {
        let url = Url::parse("http://host/api/users?status=a&status=b").unwrap();
        let query = QueryMap::parse(&url);
        assert_eq!(query.get_all("status"), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn response_serializes_status_line_and_body() {
        let mut response = Response::new(HttpStatus::Ok);
        response.add_header(("Content-Type", "text/plain"));
        response.add_body(b"hi");

        let bytes = response.as_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

}
