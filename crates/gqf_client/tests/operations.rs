//! Integration tests for queries, mutations and async queries over HTTP.

use gqf_client::{
    AsyncDataOptions, AsyncStatus, ClientConfig, ErrorCode, GqfClient, OperationContext, Schema,
    Variables,
};
use gqf_syntax::TypedDocument;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request seen by the fake server.
#[derive(Debug, Clone)]
struct Seen {
    head: String,
    body: Value,
}

type Respond = Arc<dyn Fn(&Value) -> (u16, Value) + Send + Sync>;

async fn read_request(stream: &mut TcpStream) -> Option<Seen> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_ascii_lowercase();
    let length: usize = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0);
    while data.len() < head_end + length {
        let n = stream.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
    }

    let body = serde_json::from_slice(&data[head_end..head_end + length]).unwrap_or(Value::Null);
    Some(Seen { head, body })
}

/// Serves every connection with `respond`, recording what it saw.
async fn serve(respond: Respond) -> (String, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let respond = Arc::clone(&respond);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let (status, body) = respond(&request.body);
                log.lock().unwrap().push(request);
                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (format!("http://{addr}/graphql"), seen)
}

fn client(endpoint: &str) -> GqfClient {
    GqfClient::new(
        Schema::with_endpoint(endpoint),
        ClientConfig::default().header("x-app", "gqf-tests"),
    )
    .unwrap()
}

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    user: Named,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Named {
    name: String,
}

#[derive(Debug, Clone, Serialize)]
struct ById {
    id: String,
}

const USER_QUERY: &str = "query User($id: ID!) { user(id: $id) { name } }";

/// Test a query round trip, including the wire body and headers.
#[tokio::test]
async fn test_query_round_trip() {
    let (endpoint, seen) = serve(Arc::new(|body: &Value| {
        (200, json!({ "data": { "user": { "name": format!("user-{}", body["variables"]["id"].as_str().unwrap_or("?")) } } }))
    }))
    .await;
    let client = client(&endpoint);
    let query = client
        .define_operation(
            TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(),
            Some(OperationContext::new().header("x-tenant", "acme")),
        )
        .unwrap();
    assert!(seen.lock().unwrap().is_empty());

    let user = query.call(ById { id: "7".into() }, None).await.unwrap();
    assert_eq!(user.user.name, "user-7");

    let request = seen.lock().unwrap()[0].clone();
    assert!(request.head.starts_with("post /graphql "), "{}", request.head);
    assert!(request.head.contains("content-type: application/json"));
    assert!(request.head.contains("x-app: gqf-tests"));
    assert!(request.head.contains("x-tenant: acme"));
    assert_eq!(
        request.body,
        json!({
            "query": "query User($id: ID!) {\n  user(id: $id) {\n    name\n  }\n}",
            "variables": { "id": "7" },
            "operationName": "User",
        })
    );
}

/// Test that a mutation runs once per call.
#[tokio::test]
async fn test_mutation_is_not_cached() {
    let (endpoint, seen) = serve(Arc::new(|_: &Value| (200, json!({ "data": { "ok": true } })))).await;
    let client = client(&endpoint);
    let mutation = client
        .define_operation(
            TypedDocument::<Value, ()>::parse("mutation { ok }").unwrap(),
            None,
        )
        .unwrap();

    mutation.call((), None).await.unwrap();
    mutation.call((), None).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(seen.lock().unwrap()[0].body["variables"], json!({}));
}

/// Test that GraphQL errors become a typed error.
#[tokio::test]
async fn test_graphql_errors() {
    let (endpoint, _) = serve(Arc::new(|_: &Value| {
        (200, json!({ "data": null, "errors": [{ "message": "user not found" }] }))
    }))
    .await;
    let query = client(&endpoint)
        .define_operation(TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(), None)
        .unwrap();

    let err = query.call(ById { id: "0".into() }, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::GraphqlErrors);
    assert_eq!(err.message, "user not found");
}

/// Test that a non-success status becomes an HTTP error.
#[tokio::test]
async fn test_http_status_error() {
    let (endpoint, _) = serve(Arc::new(|_: &Value| (500, json!({})))).await;
    let query = client(&endpoint)
        .define_operation(TypedDocument::<Value, ()>::parse("{ a }").unwrap(), None)
        .unwrap();

    let err = query.call((), None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::HttpError);
    assert_eq!(err.extension("status"), Some(&json!(500)));
}

/// Test that the context timeout bounds a request.
#[tokio::test]
async fn test_context_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    let query = client(&format!("http://{addr}/graphql"))
        .define_operation(TypedDocument::<Value, ()>::parse("{ a }").unwrap(), None)
        .unwrap();

    let err = query
        .call((), Some(OperationContext::new().timeout(Duration::from_millis(100))))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
}

/// Test that an async query caches per key.
#[tokio::test]
async fn test_async_query_caches_per_key() {
    let (endpoint, seen) = serve(Arc::new(|body: &Value| {
        (200, json!({ "data": { "user": { "name": body["variables"]["id"] } } }))
    }))
    .await;
    let client = client(&endpoint);
    let query = client
        .define_async_query(TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(), None)
        .unwrap();

    let first = query
        .call(ById { id: "1".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_eq!(first.status(), AsyncStatus::Success);
    assert_eq!(first.data().unwrap().unwrap().user.name, "1");

    let again = query
        .call(ById { id: "1".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_eq!(again.key(), first.key());
    assert_eq!(seen.lock().unwrap().len(), 1);

    let other = query
        .call(ById { id: "2".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_ne!(other.key(), first.key());
    assert_eq!(client.cache().len(), 2);

    first.refresh().await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3);
}

/// Test that a lazy async query waits for execute.
#[tokio::test]
async fn test_lazy_async_query() {
    let (endpoint, seen) = serve(Arc::new(|_: &Value| {
        (200, json!({ "data": { "user": { "name": "lazy" } } }))
    }))
    .await;
    let query = client(&endpoint)
        .define_lazy_async_query(TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(), None)
        .unwrap();

    let data = query
        .call(ById { id: "1".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_eq!(data.status(), AsyncStatus::Idle);
    assert!(data.data().unwrap().is_none());
    assert!(seen.lock().unwrap().is_empty());

    let user = data.execute().await.unwrap();
    assert_eq!(user.user.name, "lazy");
    assert_eq!(data.status(), AsyncStatus::Success);
}

/// Test that a failed fetch lands in the entry instead of the call.
#[tokio::test]
async fn test_async_query_error_is_state() {
    let (endpoint, _) = serve(Arc::new(|_: &Value| {
        (200, json!({ "errors": [{ "message": "denied" }] }))
    }))
    .await;
    let query = client(&endpoint)
        .define_async_query(TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(), None)
        .unwrap();

    let data = query
        .call(ById { id: "1".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_eq!(data.status(), AsyncStatus::Error);
    assert_eq!(data.error().unwrap().code, ErrorCode::GraphqlErrors);
}

/// Test that a variables getter is read on each fetch.
#[tokio::test]
async fn test_async_query_reads_getter_per_fetch() {
    let (endpoint, seen) = serve(Arc::new(|body: &Value| {
        (200, json!({ "data": { "user": { "name": body["variables"]["id"] } } }))
    }))
    .await;
    let query = client(&endpoint)
        .define_lazy_async_query(TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(), None)
        .unwrap();

    let current = Arc::new(Mutex::new("a".to_string()));
    let source = Arc::clone(&current);
    let data = query
        .call(
            Variables::getter(move || ById {
                id: source.lock().unwrap().clone(),
            }),
            AsyncDataOptions::new(),
        )
        .await
        .unwrap();

    *current.lock().unwrap() = "b".to_string();
    assert_eq!(data.execute().await.unwrap().user.name, "b");
    *current.lock().unwrap() = "c".to_string();
    assert_eq!(data.refresh().await.unwrap().user.name, "c");
    assert_eq!(seen.lock().unwrap().len(), 2);
}

/// Test that a changed getter fetches into the entry of its new variables.
#[tokio::test]
async fn test_async_query_getter_change_keeps_entries_apart() {
    let (endpoint, seen) = serve(Arc::new(|body: &Value| {
        (200, json!({ "data": { "user": { "name": body["variables"]["id"] } } }))
    }))
    .await;
    let client = client(&endpoint);
    let query = client
        .define_async_query(TypedDocument::<User, ById>::parse(USER_QUERY).unwrap(), None)
        .unwrap();

    let current = Arc::new(Mutex::new("1".to_string()));
    let source = Arc::clone(&current);
    let live = query
        .call(
            Variables::getter(move || ById {
                id: source.lock().unwrap().clone(),
            }),
            AsyncDataOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(live.data().unwrap().unwrap().user.name, "1");
    let first_key = live.key();

    *current.lock().unwrap() = "2".to_string();
    assert_eq!(live.refresh().await.unwrap().user.name, "2");
    assert_ne!(live.key(), first_key);
    assert_eq!(client.cache().len(), 2);

    let pinned = query
        .call(ById { id: "1".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_eq!(pinned.key(), first_key);
    assert_eq!(pinned.data().unwrap().unwrap().user.name, "1");

    let second = query
        .call(ById { id: "2".into() }, AsyncDataOptions::new())
        .await
        .unwrap();
    assert_eq!(second.data().unwrap().unwrap().user.name, "2");
    assert_eq!(seen.lock().unwrap().len(), 2);
}
