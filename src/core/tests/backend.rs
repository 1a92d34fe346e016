//! End-to-end tests against a mock chat backend served by axum.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt as _;
use mnemo_core::{
    AuthConfig, BackendClient, BackendConfig, ChatSession, ClientError, SessionUpdate,
    TranscriptItem,
};
use mnemo_protocol::{ChunkType, Role};
use serde_json::{json, Value};

async fn spawn_backend(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr, auth: AuthConfig) -> Arc<BackendClient> {
    let backend = BackendConfig {
        base_url: format!("http://{addr}"),
        ..BackendConfig::default()
    };
    Arc::new(BackendClient::new(&backend, &auth).unwrap())
}

async fn stream_reply() -> impl IntoResponse {
    let body = concat!(
        "data: {\"chunk_id\":\"m1\",\"chunk_type\":\"memory_retrieve\",\"thread_id\":\"t1\",",
        "\"sequence\":1,\"created_at\":100.0,",
        "\"memory\":{\"topic\":\"greetings\",\"question\":\"q\",\"answer\":\"salutations\"}}\n\n",
        "data: {\"chunk_id\":\"d1\",\"chunk_type\":\"ai_delta\",\"thread_id\":\"t1\",",
        "\"content\":\"Hel\",\"sequence\":2,\"created_at\":101.0}\n\n",
        "data: {\"chunk_id\":\"d1\",\"chunk_type\":\"ai_delta\",\"thread_id\":\"t1\",",
        "\"content\":\"lo\",\"sequence\":3,\"created_at\":102.0}\n\n",
        "data: [DONE]\n\n",
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

async fn empty_history() -> Json<Value> {
    Json(json!([]))
}

#[tokio::test]
async fn send_message_streams_a_reply_end_to_end() {
    let app = Router::new()
        .route("/chat/stream", post(stream_reply))
        .route("/chat/history/{thread_id}", get(empty_history));
    let addr = spawn_backend(app).await;
    let client = client_for(addr, AuthConfig::default());

    let (session, _updates) = ChatSession::new(client, "t1", 64);
    session.send_message("hi").await.unwrap();

    let items = session.messages().await;
    let mut saw_user = false;
    let mut saw_reply = false;
    let mut saw_group = false;
    for item in &items {
        match item {
            TranscriptItem::Message(msg) if msg.role == Role::User => {
                assert_eq!(msg.content, "hi");
                saw_user = true;
            }
            TranscriptItem::Message(msg) if msg.role == Role::Assistant => {
                assert_eq!(msg.content, "Hello");
                assert!(msg.is_final);
                saw_reply = true;
            }
            TranscriptItem::Message(_) => {}
            TranscriptItem::Group(group) => {
                assert_eq!(group.chunk_type, ChunkType::MemoryRetrieve);
                assert_eq!(group.items.len(), 1);
                saw_group = true;
            }
        }
    }
    assert!(saw_user && saw_reply && saw_group, "items: {items:?}");
}

/// Two deltas, then the stream hangs without a `[DONE]` sentinel.
async fn stalling_stream() -> impl IntoResponse {
    let head = concat!(
        "data: {\"chunk_id\":\"d1\",\"chunk_type\":\"ai_delta\",\"thread_id\":\"t1\",",
        "\"content\":\"par\",\"created_at\":1.0}\n\n",
        "data: {\"chunk_id\":\"d1\",\"chunk_type\":\"ai_delta\",\"thread_id\":\"t1\",",
        "\"content\":\"tial\",\"created_at\":2.0}\n\n",
    );
    let body = futures::stream::iter([Ok::<_, Infallible>(Bytes::from_static(head.as_bytes()))])
        .chain(futures::stream::pending());
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
}

#[tokio::test]
async fn cancel_mid_stream_keeps_partial_content() {
    let app = Router::new().route("/chat/stream", post(stalling_stream));
    let addr = spawn_backend(app).await;
    let client = client_for(addr, AuthConfig::default());

    let (session, mut updates) = ChatSession::new(client, "t1", 64);
    let session = Arc::new(session);
    let sender = {
        let session = session.clone();
        tokio::spawn(async move { session.send_message("hi").await })
    };

    let mut streamed = String::new();
    while streamed != "partial" {
        let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("stream stalled before both deltas arrived")
            .expect("update channel closed");
        if let SessionUpdate::Delta { text, .. } = update {
            streamed.push_str(&text);
        }
    }

    session.cancel_processing();
    // Cancellation is not an error; the call completes normally.
    sender.await.unwrap().unwrap();

    let items = session.messages().await;
    let reply = items
        .iter()
        .find_map(|item| match item {
            TranscriptItem::Message(msg) if msg.role == Role::Assistant => Some(msg),
            _ => None,
        })
        .expect("truncated reply missing from transcript");
    assert_eq!(reply.content, "partial");
    assert!(reply.is_final);
}

async fn guarded_history(
    Path(_thread_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer fresh");
    if authorized {
        Ok(Json(json!([])))
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn refresh_endpoint(
    State(refreshes): State<Arc<AtomicUsize>>,
    Json(body): Json<Value>,
) -> Json<Value> {
    refreshes.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["refresh_token"], "r1");
    Json(json!({ "access_token": "fresh" }))
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_retried() {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/chat/history/{thread_id}", get(guarded_history))
        .route("/auth/refresh", post(refresh_endpoint))
        .with_state(refreshes.clone());
    let addr = spawn_backend(app).await;
    let client = client_for(
        addr,
        AuthConfig {
            access_token: Some("stale".into()),
            refresh_token: Some("r1".into()),
        },
    );

    client.fetch_history("t1").await.unwrap();
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);

    // The fresh token is reused; no second refresh round trip.
    client.fetch_history("t1").await.unwrap();
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_without_refresh_token_surfaces_unauthorized() {
    let refreshes = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/chat/history/{thread_id}", get(guarded_history))
        .route("/auth/refresh", post(refresh_endpoint))
        .with_state(refreshes);
    let addr = spawn_backend(app).await;
    let client = client_for(
        addr,
        AuthConfig {
            access_token: Some("stale".into()),
            refresh_token: None,
        },
    );

    let err = client.fetch_history("t1").await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized));
}

async fn switching_history(Path(thread_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    match thread_id.as_str() {
        "slow-a" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Json(json!([
                { "chunk_id": "a1", "chunk_type": "user_input",
                  "content": "from a", "sequence": 1, "created_at": 1.0 },
                { "chunk_id": "a2", "chunk_type": "ai_message",
                  "content": "reply in a", "sequence": 2, "created_at": 2.0 },
            ])))
        }
        "fast-b" => Ok(Json(json!([
            { "chunk_id": "b1", "chunk_type": "user_input",
              "content": "from b", "sequence": 1, "created_at": 1.0 },
        ]))),
        "missing" => Err(StatusCode::INTERNAL_SERVER_ERROR),
        _ => Ok(Json(json!([]))),
    }
}

#[tokio::test]
async fn switch_requested_during_pending_switch_is_ignored() {
    let app = Router::new().route("/chat/history/{thread_id}", get(switching_history));
    let addr = spawn_backend(app).await;
    let client = client_for(addr, AuthConfig::default());

    let (session, _updates) = ChatSession::new(client, "start", 64);
    let session = Arc::new(session);

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.switch_thread("slow-a").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Arrives while slow-a's history fetch is still in flight.
    session.switch_thread("fast-b").await.unwrap();
    pending.await.unwrap().unwrap();

    assert_eq!(session.current_thread().await, "slow-a");
    let items = session.messages().await;
    let contents: Vec<&str> = items
        .iter()
        .filter_map(|item| match item {
            TranscriptItem::Message(msg) => Some(msg.content.as_str()),
            TranscriptItem::Group(_) => None,
        })
        .collect();
    assert_eq!(contents, ["from a", "reply in a"]);
}

#[tokio::test]
async fn failed_switch_resets_the_guard_for_retry() {
    let app = Router::new().route("/chat/history/{thread_id}", get(switching_history));
    let addr = spawn_backend(app).await;
    let client = client_for(addr, AuthConfig::default());

    let (session, _updates) = ChatSession::new(client, "start", 64);
    let err = session.switch_thread("missing").await.unwrap_err();
    assert!(matches!(err, ClientError::Status(_)));

    // The failed attempt must not wedge the session.
    session.switch_thread("fast-b").await.unwrap();
    assert_eq!(session.current_thread().await, "fast-b");
    let items = session.messages().await;
    assert!(matches!(
        &items[0],
        TranscriptItem::Message(msg) if msg.content == "from b"
    ));
}

#[tokio::test]
async fn create_and_list_threads_round_trip() {
    async fn create(Json(body): Json<Value>) -> Json<Value> {
        Json(json!({
            "thread_id": "t-new",
            "title": body["title"],
            "created_at": 10.0,
        }))
    }
    async fn list() -> Json<Value> {
        Json(json!([
            { "thread_id": "t-new", "title": "Fresh start",
              "created_at": 10.0, "dialogue_count": 0 },
        ]))
    }
    let app = Router::new().route("/chat/threads", post(create).get(list));
    let addr = spawn_backend(app).await;
    let client = client_for(addr, AuthConfig::default());

    let created = client.create_thread("Fresh start").await.unwrap();
    assert_eq!(created.thread_id, "t-new");
    assert_eq!(created.title, "Fresh start");

    let threads = client.list_threads().await.unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].dialogue_count, Some(0));
}
