//! Body parser pipeline (C3): turns the raw bytes captured by
//! [`crate::http::Request`] into a tagged [`Body`] value, plus any uploaded
//! files, keyed on `Content-Type`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayError;
use crate::http::{Request, UploadedFile};

/// Parsed request body. Handlers pattern-match on the tag instead of
/// juggling a dynamic `any` the way the source tooling does.
#[derive(Debug, Clone)]
pub enum Body {
    Null,
    Bytes(Vec<u8>),
    Json(Value),
    Form(HashMap<String, Vec<String>>),
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Body::Null)
    }
}

/// Output of a parser: fields left `None` do not overwrite whatever the
/// previous stage (default parser or an earlier pipeline entry) produced.
#[derive(Debug, Default)]
pub struct ParsedBody {
    pub body: Option<Body>,
    pub files: Option<Vec<UploadedFile>>,
    pub query_overrides: Option<HashMap<String, Vec<String>>>,
}

/// A pluggable body parser. The default pipeline always runs first; user
/// parsers registered via [`ParserPipeline::push`] run after it and may
/// override any field the default left set.
#[async_trait]
pub trait BodyParser: Send + Sync {
    async fn parse(&self, request: &Request) -> Result<ParsedBody, GatewayError>;
}

/// The built-in Content-Type dispatch described in spec.md §4.2.
pub struct DefaultParser;

#[async_trait]
impl BodyParser for DefaultParser {
    async fn parse(&self, request: &Request) -> Result<ParsedBody, GatewayError> {
        if request.raw_body().is_empty() {
            return Ok(ParsedBody {
                body: Some(Body::Null),
                files: None,
                query_overrides: None,
            });
        }

        let content_type = request.content_type().unwrap_or("").to_lowercase();

        // `application/json-patch+json` and `application/merge-patch+json`
        // (spec.md §4.4 PATCH content types) carry a JSON payload just like
        // plain `application/json` — the FS engine's PATCH handler expects
        // `Body::Json` regardless of which of the three it is.
        if content_type.starts_with("application/json")
            || content_type.starts_with("application/merge-patch+json")
        {
            let text = request
                .body_string()
                .map_err(|e| GatewayError::MalformedBody(e.to_string()))?;
            let value: Value =
                serde_json::from_str(&text).map_err(|e| GatewayError::MalformedBody(e.to_string()))?;
            return Ok(ParsedBody {
                body: Some(Body::Json(value)),
                files: None,
                query_overrides: None,
            });
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let text = request
                .body_string()
                .map_err(|e| GatewayError::MalformedBody(e.to_string()))?;
            let mut map: HashMap<String, Vec<String>> = HashMap::new();
            for pair in text.split('&').filter(|s| !s.is_empty()) {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                map.entry(decode_form_component(k))
                    .or_default()
                    .push(decode_form_component(v));
            }
            return Ok(ParsedBody {
                body: Some(Body::Form(map)),
                files: None,
                query_overrides: None,
            });
        }

        if content_type.starts_with("multipart/form-data") {
            let boundary = content_type
                .split(';')
                .find_map(|p| p.trim().strip_prefix("boundary="))
                .map(|b| b.trim_matches('"').to_string())
                .ok_or_else(|| GatewayError::MalformedBody("missing multipart boundary".into()))?;

            let (fields, files) = parse_multipart(request.raw_body(), &boundary)?;
            return Ok(ParsedBody {
                body: Some(Body::Form(fields)),
                files: if files.is_empty() { None } else { Some(files) },
                query_overrides: None,
            });
        }

        Ok(ParsedBody {
            body: Some(Body::Bytes(request.raw_body().to_vec())),
            files: None,
            query_overrides: None,
        })
    }
}

/// Split a `multipart/form-data` body into non-file fields and files. This
/// is a minimal, from-scratch parser (no external multipart crate, to match
/// the "hand-rolled wire parsing" texture of the rest of the stack): it
/// splits on `--boundary` markers and reads each part's headers manually.
fn parse_multipart(
    body: &[u8],
    boundary: &str,
) -> Result<(HashMap<String, Vec<String>>, Vec<UploadedFile>), GatewayError> {
    let delimiter = format!("--{boundary}").into_bytes();
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    let mut files = Vec::new();

    for part in split_on(body, &delimiter) {
        if part.is_empty() || part == b"--\r\n" || part == b"--" {
            continue;
        }
        let part = trim_leading_crlf(part);
        if part.is_empty() {
            continue;
        }

        let header_end = find_subslice(part, b"\r\n\r\n")
            .ok_or_else(|| GatewayError::MalformedBody("multipart part missing header terminator".into()))?;
        let header_block = &part[..header_end];
        let mut content = &part[header_end + 4..];
        if content.ends_with(b"\r\n") {
            content = &content[..content.len() - 2];
        }

        let headers = String::from_utf8_lossy(header_block);
        let mut name = None;
        let mut filename = None;
        let mut mime = "application/octet-stream".to_string();

        for line in headers.split("\r\n") {
            let lower = line.to_lowercase();
            if lower.starts_with("content-disposition") {
                for token in line.split(';') {
                    let token = token.trim();
                    if let Some(v) = token.strip_prefix("name=") {
                        name = Some(v.trim_matches('"').to_string());
                    } else if let Some(v) = token.strip_prefix("filename=") {
                        filename = Some(v.trim_matches('"').to_string());
                    }
                }
            } else if lower.starts_with("content-type:") {
                mime = line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string();
            }
        }

        let Some(name) = name else { continue };

        if let Some(filename) = filename {
            files.push(UploadedFile {
                name,
                bytes: content.to_vec(),
                mime,
            });
        } else {
            let value = String::from_utf8_lossy(content).into_owned();
            fields.entry(name).or_default().push(value);
        }
    }

    Ok((fields, files))
}

/// Decode a single `x-www-form-urlencoded` component: `+` means space, the
/// rest is percent-decoded.
fn decode_form_component(s: &str) -> String {
    let with_spaces = s.replace('+', " ");
    percent_encoding::percent_decode_str(&with_spaces)
        .decode_utf8_lossy()
        .into_owned()
}

fn trim_leading_crlf(b: &[u8]) -> &[u8] {
    if let Some(rest) = b.strip_prefix(b"\r\n") {
        rest
    } else {
        b
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut rest = haystack;
    while let Some(pos) = find_subslice(rest, needle) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + needle.len()..];
    }
    parts.push(rest);
    parts
}

/// A transform applied after the default+user parsers, allowed to rewrite
/// `{body, files, query}` as a unit; `None` fields do not overwrite the
/// request defaults (spec.md §4.2).
pub type Transform = Box<dyn Fn(ParsedBody) -> ParsedBody + Send + Sync>;

/// The configured parser pipeline for a gateway instance or a single route
/// override.
pub struct ParserPipeline {
    enabled: bool,
    parsers: Vec<Box<dyn BodyParser>>,
    transform: Option<Transform>,
}

impl Default for ParserPipeline {
    fn default() -> Self {
        Self {
            enabled: true,
            parsers: vec![Box::new(DefaultParser)],
            transform: None,
        }
    }
}

impl ParserPipeline {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            parsers: Vec::new(),
            transform: None,
        }
    }

    pub fn push(&mut self, parser: Box<dyn BodyParser>) -> &mut Self {
        self.parsers.push(parser);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub async fn run(&self, request: &mut Request) -> Result<(), GatewayError> {
        if !self.enabled {
            return Ok(());
        }

        let mut merged = ParsedBody::default();
        for parser in &self.parsers {
            let result = parser.parse(request).await?;
            if result.body.is_some() {
                merged.body = result.body;
            }
            if result.files.is_some() {
                merged.files = result.files;
            }
            if result.query_overrides.is_some() {
                merged.query_overrides = result.query_overrides;
            }
        }

        if let Some(transform) = &self.transform {
            merged = transform(merged);
        }

        if let Some(body) = merged.body {
            request.set_body(body);
        }
        if let Some(files) = merged.files {
            request.set_files(files);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    fn request_with(content_type: &str, body: &[u8]) -> Request {
        Request::for_test(Method::Post, "/api/items", content_type, body)
    }

    #[tokio::test]
    async fn default_parser_parses_json() {
        let request = request_with("application/json", br#"{"a":1}"#);
        let parsed = DefaultParser.parse(&request).await.unwrap();
        assert_eq!(parsed.body.unwrap().as_json().unwrap()["a"], 1);
    }

    #[tokio::test]
    async fn default_parser_rejects_malformed_json() {
        let request = request_with("application/json", b"{not json");
        let err = DefaultParser.parse(&request).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn default_parser_parses_form_urlencoded() {
        let request = request_with("application/x-www-form-urlencoded", b"a=1&b=2&a=3");
        let parsed = DefaultParser.parse(&request).await.unwrap();
        match parsed.body.unwrap() {
            Body::Form(map) => assert_eq!(map.get("a").unwrap().len(), 2),
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn default_parser_extracts_multipart_files_and_fields() {
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nbinarydata\r\n--{boundary}--\r\n"
        );
        let request = request_with(
            &format!("multipart/form-data; boundary={boundary}"),
            body.as_bytes(),
        );
        let parsed = DefaultParser.parse(&request).await.unwrap();
        match parsed.body.unwrap() {
            Body::Form(map) => assert_eq!(map.get("title").unwrap()[0], "hello"),
            other => panic!("expected form body, got {other:?}"),
        }
        let files = parsed.files.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "file");
        assert_eq!(files[0].bytes, b"binarydata");
    }

    #[tokio::test]
    async fn pipeline_transform_can_leave_fields_untouched() {
        let mut request = request_with("application/json", br#"{"a":1}"#);
        let pipeline = ParserPipeline::default().with_transform(Box::new(|mut parsed| {
            parsed.files = None;
            parsed
        }));
        pipeline.run(&mut request).await.unwrap();
        assert!(request.body().as_json().is_some());
    }
}
