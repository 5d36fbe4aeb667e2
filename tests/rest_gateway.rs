//! Black-box integration tests: drive the full [`Gateway`] over a real
//! loopback `TcpStream`, the way `tailhook-rotor-http`'s `todobackend`
//! example exercises its server end-to-end rather than unit-testing pieces
//! in isolation.

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mockhttpr::config::{GatewayConfig, RawGatewayConfig};
use mockhttpr::dispatcher::Gateway;
use mockhttpr::fs_engine::{Comparison, ConfigMethod, FilterSpec, PaginationSpec, Source, ValueType};

/// Spawn a gateway over the given mock directory on an ephemeral port,
/// returning the address it's listening on.
async fn spawn_gateway_over(mock_dir: &std::path::Path) -> std::net::SocketAddr {
    let mut raw = RawGatewayConfig::default();
    raw.fs_dir = Some(mock_dir.to_path_buf());
    let mut config = GatewayConfig::from_raw(raw);
    config.pagination.insert(
        ConfigMethod::Get,
        PaginationSpec {
            source: Source::Query,
            root: None,
            limit_key: "limit".into(),
            skip_key: "skip".into(),
            sort_key: "sortBy".into(),
            order_key: "order".into(),
        },
    );
    // POST's pagination keys arrive in the body itself (the
    // body-only-pagination scenario below), not the query string, so this
    // entry is keyed separately from GET's with `source: Body` — same key
    // names, different source.
    config.pagination.insert(
        ConfigMethod::Post,
        PaginationSpec {
            source: Source::Body,
            root: None,
            limit_key: "limit".into(),
            skip_key: "skip".into(),
            sort_key: "sortBy".into(),
            order_key: "order".into(),
        },
    );
    // Registered under `All` (rather than `Get` specifically) so the same
    // `status` filter also applies to the DELETE scenario below — spec.md
    // §6: "All" covers any method not explicitly keyed.
    config.filters.insert(
        ConfigMethod::All,
        vec![FilterSpec {
            key: "status".into(),
            field: None,
            value_type: ValueType::String,
            comparison: Comparison::Eq,
            regex_flags: None,
        }],
    );

    let (listener, addr) = Gateway::bind("127.0.0.1:0").await.unwrap();
    let gateway = Gateway::new(config);
    tokio::spawn(async move {
        let _ = gateway.serve(listener).await;
    });
    // Give the accept loop a moment to be scheduled.
    tokio::time::sleep(Duration::from_millis(20)).await;
    addr
}

/// Send a raw HTTP/1.1 request and return (status code, headers, body).
async fn send_request(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
    if let Some(ct) = content_type {
        request.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut raw = Vec::new();
    // The server closes neither side explicitly, so read with a short
    // deadline once data has stopped arriving rather than waiting for EOF.
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => raw.extend_from_slice(&buf[..n]),
            _ => break,
        }
    }

    let text = String::from_utf8_lossy(&raw);
    let header_end = text.find("\r\n\r\n").unwrap();
    let mut lines = text[..header_end].split("\r\n");
    let status_line = lines.next().unwrap();
    let status: u16 = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();

    let headers = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(k, v)| (k.to_lowercase(), v.to_string()))
        .collect();

    let body_bytes = raw[header_end + 4..].to_vec();
    (status, headers, body_bytes)
}

#[tokio::test]
async fn s1_get_with_pagination_and_filters() {
    let tmp = TempDir::new().unwrap();
    let users = json!([
        {"id": 1, "status": "a"}, {"id": 2, "status": "a"}, {"id": 3, "status": "b"},
        {"id": 4, "status": "a"}, {"id": 5, "status": "b"}, {"id": 6, "status": "a"}
    ]);
    tokio::fs::write(tmp.path().join("users.json"), users.to_string()).await.unwrap();

    let addr = spawn_gateway_over(tmp.path()).await;
    let (status, headers, body) =
        send_request(addr, "GET", "/users?status=a&limit=2&skip=1&sortBy=id&order=DESC", None, b"").await;

    assert_eq!(status, 200);
    assert_eq!(
        headers.iter().find(|(k, _)| k == "x-total-elements").map(|(_, v)| v.as_str()),
        Some("4")
    );
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed, json!([{"id": 4, "status": "a"}, {"id": 2, "status": "a"}]));
}

#[tokio::test]
async fn get_missing_file_is_404() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_gateway_over(tmp.path()).await;
    let (status, _, _) = send_request(addr, "GET", "/nope", None, b"").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn put_create_then_put_identical_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let addr = spawn_gateway_over(tmp.path()).await;

    let (status1, _, _) = send_request(addr, "PUT", "/widgets", Some("application/json"), br#"{"a":1}"#).await;
    assert_eq!(status1, 201);

    let (status2, _, body2) = send_request(addr, "PUT", "/widgets", Some("application/json"), br#"{"a":1}"#).await;
    assert_eq!(status2, 200);
    assert_eq!(serde_json::from_slice::<Value>(&body2).unwrap(), json!({"a": 1}));
}

#[tokio::test]
async fn s2_json_patch_test_mismatch_is_conflict_and_leaves_file_untouched() {
    let tmp = TempDir::new().unwrap();
    let original = json!({"a": 1, "b": [1, 2, 3]});
    tokio::fs::write(tmp.path().join("obj.json"), original.to_string()).await.unwrap();

    let addr = spawn_gateway_over(tmp.path()).await;
    let patch_body = json!([
        {"op": "replace", "path": "/a", "value": 9},
        {"op": "test", "path": "/b/0", "value": 99}
    ]);
    let (status, _, _) = send_request(
        addr,
        "PATCH",
        "/obj",
        Some("application/json-patch+json"),
        patch_body.to_string().as_bytes(),
    )
    .await;

    assert_eq!(status, 409);
    let on_disk = tokio::fs::read_to_string(tmp.path().join("obj.json")).await.unwrap();
    assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), original);
}

#[tokio::test]
async fn s3_post_to_existing_with_body_only_pagination_is_a_read() {
    let tmp = TempDir::new().unwrap();
    let items = json!([{"id": 1}, {"id": 2}, {"id": 3}]);
    tokio::fs::write(tmp.path().join("items.json"), items.to_string()).await.unwrap();

    let addr = spawn_gateway_over(tmp.path()).await;
    let (status, _, body) =
        send_request(addr, "POST", "/items", Some("application/json"), br#"{"limit":2,"skip":0}"#).await;

    assert_eq!(status, 200);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([{"id": 1}, {"id": 2}]));

    let on_disk = tokio::fs::read_to_string(tmp.path().join("items.json")).await.unwrap();
    assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), items);
}

#[tokio::test]
async fn delete_bulk_removes_matching_subset_and_reports_count() {
    let tmp = TempDir::new().unwrap();
    let items = json!([{"id": 1, "status": "a"}, {"id": 2, "status": "b"}, {"id": 3, "status": "a"}]);
    tokio::fs::write(tmp.path().join("items.json"), items.to_string()).await.unwrap();

    let addr = spawn_gateway_over(tmp.path()).await;
    let (status, headers, _) = send_request(addr, "DELETE", "/items?status=a", None, b"").await;

    assert_eq!(status, 204);
    assert_eq!(
        headers.iter().find(|(k, _)| k == "x-deleted-elements").map(|(_, v)| v.as_str()),
        Some("2")
    );
    let on_disk = tokio::fs::read_to_string(tmp.path().join("items.json")).await.unwrap();
    assert_eq!(serde_json::from_str::<Value>(&on_disk).unwrap(), json!([{"id": 2, "status": "b"}]));
}
