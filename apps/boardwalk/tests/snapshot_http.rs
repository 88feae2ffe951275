use axum::{http::StatusCode, routing::get, Router};
use boardwalk_client_core::snapshot::{FetchError, HttpSnapshotLoader, SnapshotSource};
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

#[tokio::test]
async fn null_body_is_an_empty_transcript() {
    let addr = serve(Router::new().route("/api/messages", get(|| async { "null" }))).await;
    let loader = HttpSnapshotLoader::new(&addr.to_string());
    assert!(loader.fetch_snapshot().await.expect("fetch").is_empty());
}

#[tokio::test]
async fn records_are_parsed_in_order() {
    let body = r#"[
        {"user":{"id":"u1","username":"alice","imageUrl":""},"message":"one","created_at":"2024-01-01 00:00:00"},
        {"user":"legacy","message":"two"}
    ]"#;
    let addr = serve(Router::new().route("/api/messages", get(move || async move { body }))).await;
    let loader = HttpSnapshotLoader::new(&format!("http://{addr}"));

    let messages = loader.fetch_snapshot().await.expect("fetch");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].author.username.as_deref(), Some("alice"));
    assert!(messages[0].author.image_url.is_none());
    assert_eq!(messages[1].author.username.as_deref(), Some("legacy"));
}

#[tokio::test]
async fn server_error_is_reported_as_status() {
    let addr = serve(Router::new().route(
        "/api/messages",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Error querying messages") }),
    ))
    .await;
    let loader = HttpSnapshotLoader::new(&addr.to_string());
    match loader.fetch_snapshot().await {
        Err(FetchError::Status(status)) => assert_eq!(status.as_u16(), 500),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn garbage_body_is_malformed() {
    let addr = serve(Router::new().route("/api/messages", get(|| async { "<html>" }))).await;
    let loader = HttpSnapshotLoader::new(&addr.to_string());
    assert!(matches!(
        loader.fetch_snapshot().await,
        Err(FetchError::Malformed(_))
    ));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let loader = HttpSnapshotLoader::new(&addr.to_string());
    assert!(matches!(
        loader.fetch_snapshot().await,
        Err(FetchError::Transport(_))
    ));
}
