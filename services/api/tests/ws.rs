//! End-to-end tests: WebSocket client -> agent -> REST value resource.

use confirm_api::{
    config::{ClassifierKind, Config},
    router::create_router,
    state::AppState,
    ws::TransportStyle,
};
use confirm_core::{
    BusyPolicy, ConversationEngine, ConversationService, KeywordClassifier, RestValueInvoker,
    SessionStore,
};
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::HeaderValue},
};
use tracing::Level;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONFIRM: &str = "Would you like to find your user ID?";
const OFFER: &str = "Would you like to find your user ID?";

fn test_config(addr: SocketAddr, evict_on_close: bool) -> Config {
    Config {
        bind_address: addr,
        classifier: ClassifierKind::Keyword,
        openai_api_key: None,
        gemini_api_key: None,
        chat_model: "gpt-4o".to_string(),
        log_level: Level::INFO,
        prompts_path: PathBuf::from("./prompts"),
        resource_base_url: format!("http://{addr}"),
        resource_value: 5,
        tool_timeout: Duration::from_secs(5),
        session_idle: Duration::from_secs(1800),
        sweep_interval: Duration::from_secs(60),
        busy_policy: BusyPolicy::Queue,
        required_role: "admin".to_string(),
        evict_on_close,
    }
}

/// Starts the full service on an ephemeral port; the tool calls back into it.
async fn spawn_app(evict_on_close: bool) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = test_config(addr, evict_on_close);

    let engine = ConversationEngine::new(
        Arc::new(KeywordClassifier::default()),
        Arc::new(RestValueInvoker::new(config.resource_base_url.clone())),
    )
    .with_tool_timeout(config.tool_timeout);
    let service = ConversationService::new(Arc::new(SessionStore::new()), Arc::new(engine));
    let state = Arc::new(AppState {
        service,
        config: Arc::new(config),
    });

    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

async fn connect(
    addr: SocketAddr,
    style: TransportStyle,
    memory_id: &str,
    user: Option<&'static str>,
    roles: &'static str,
) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
    let mut request = format!("ws://{addr}{}?memory_id={memory_id}", style.path())
        .into_client_request()
        .unwrap();
    if let Some(user) = user {
        request
            .headers_mut()
            .insert("x-user-id", HeaderValue::from_static(user));
    }
    request
        .headers_mut()
        .insert("x-user-roles", HeaderValue::from_static(roles));
    request
        .headers_mut()
        .insert("authorization", HeaderValue::from_static("Bearer test-token"));
    let (ws, _) = connect_async(request).await?;
    Ok(ws)
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn say(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn session_count(addr: SocketAddr) -> usize {
    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["sessions"].as_u64().unwrap() as usize
}

#[tokio::test]
async fn non_reactive_endpoint_runs_full_scenario() {
    let addr = spawn_app(true).await;
    let mut ws = connect(addr, TransportStyle::Blocking, "s1", Some("alice"), "admin,user")
        .await
        .unwrap();

    assert_eq!(next_text(&mut ws).await, "Connection opened in WebSocketNonReactiveEndpoint");

    say(&mut ws, "find my user id").await;
    assert_eq!(next_text(&mut ws).await, CONFIRM);

    say(&mut ws, "yes").await;
    assert_eq!(next_text(&mut ws).await, "Your user ID is 5.");
}

#[tokio::test]
async fn reactive_uni_endpoint_offers_help_on_unrelated_question() {
    let addr = spawn_app(true).await;
    let mut ws = connect(addr, TransportStyle::ReactiveUni, "s2", Some("alice"), "admin")
        .await
        .unwrap();

    assert_eq!(next_text(&mut ws).await, "Connection opened in WebSocketReactiveUniEndpoint");

    say(&mut ws, "what's the weather").await;
    assert_eq!(next_text(&mut ws).await, OFFER);

    say(&mut ws, "no").await;
    assert_eq!(next_text(&mut ws).await, OFFER);
}

#[tokio::test]
async fn reactive_multi_endpoint_streams_reply_in_chunks() {
    let addr = spawn_app(true).await;
    let mut ws = connect(addr, TransportStyle::ReactiveMulti, "s3", Some("alice"), "admin")
        .await
        .unwrap();

    assert_eq!(next_text(&mut ws).await, "Connection opened in WebSocketReactiveMultiEndpoint");

    say(&mut ws, "what is my user id?").await;
    let expected = TransportStyle::ReactiveMulti.frames(CONFIRM);
    let mut received = Vec::new();
    for _ in 0..expected.len() {
        received.push(next_text(&mut ws).await);
    }
    assert_eq!(received, expected);
    assert_eq!(received.concat(), CONFIRM);
}

/// Reads frames until their concatenation is as long as `expected`.
async fn read_stream(ws: &mut Client, expected: &str) -> String {
    let mut stream = String::new();
    while stream.len() < expected.len() {
        stream.push_str(&next_text(ws).await);
    }
    stream
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reactive_endpoints_answer_back_to_back_messages_in_order() {
    let addr = spawn_app(true).await;
    let success = "Your user ID is 5.";

    for (style, memory_id) in [
        (TransportStyle::ReactiveUni, "order-uni"),
        (TransportStyle::ReactiveMulti, "order-multi"),
    ] {
        let mut ws = connect(addr, style, memory_id, Some("alice"), "admin")
            .await
            .unwrap();
        next_text(&mut ws).await;

        say(&mut ws, "find my user id").await;
        say(&mut ws, "yes").await;

        let expected = format!("{CONFIRM}{success}");
        assert_eq!(read_stream(&mut ws, &expected).await, expected, "{style}");
    }
}

#[tokio::test]
async fn closing_one_of_two_connections_keeps_shared_session() {
    let addr = spawn_app(true).await;

    let mut first = connect(addr, TransportStyle::Blocking, "Test", Some("alice"), "admin")
        .await
        .unwrap();
    next_text(&mut first).await;
    say(&mut first, "find my user id").await;
    assert_eq!(next_text(&mut first).await, CONFIRM);

    let mut second = connect(addr, TransportStyle::ReactiveUni, "Test", Some("alice"), "admin")
        .await
        .unwrap();
    next_text(&mut second).await;
    second.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session_count(addr).await, 1);

    say(&mut first, "yes").await;
    assert_eq!(next_text(&mut first).await, "Your user ID is 5.");

    first.close(None).await.unwrap();
    let mut remaining = 1;
    for _ in 0..50 {
        remaining = session_count(addr).await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn caller_without_required_role_is_refused_per_message() {
    let addr = spawn_app(true).await;
    let mut ws = connect(addr, TransportStyle::Blocking, "s4", Some("bob"), "user")
        .await
        .unwrap();
    next_text(&mut ws).await;

    say(&mut ws, "find my user id").await;
    assert_eq!(
        next_text(&mut ws).await,
        "Forbidden: the 'admin' role is required"
    );
}

#[tokio::test]
async fn anonymous_upgrade_is_rejected() {
    let addr = spawn_app(true).await;
    let result = connect(addr, TransportStyle::ReactiveUni, "s5", None, "admin").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn conversation_survives_reconnect_with_same_memory_id() {
    let addr = spawn_app(false).await;

    let mut first = connect(addr, TransportStyle::Blocking, "shared", Some("alice"), "admin")
        .await
        .unwrap();
    next_text(&mut first).await;
    say(&mut first, "find my user id").await;
    assert_eq!(next_text(&mut first).await, CONFIRM);
    first.close(None).await.unwrap();

    let mut second = connect(addr, TransportStyle::ReactiveUni, "shared", Some("alice"), "admin")
        .await
        .unwrap();
    next_text(&mut second).await;
    say(&mut second, "go ahead").await;
    assert_eq!(next_text(&mut second).await, "Your user ID is 5.");
}

#[tokio::test]
async fn closing_connection_evicts_session() {
    let addr = spawn_app(true).await;

    let mut ws = connect(addr, TransportStyle::Blocking, "gone", Some("alice"), "admin")
        .await
        .unwrap();
    next_text(&mut ws).await;
    say(&mut ws, "find my user id").await;
    next_text(&mut ws).await;
    assert_eq!(session_count(addr).await, 1);

    ws.close(None).await.unwrap();
    let mut remaining = 1;
    for _ in 0..50 {
        remaining = session_count(addr).await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn value_resource_enforces_identity_and_roles() {
    let addr = spawn_app(true).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/resource/value");

    let ok = client
        .get(&url)
        .header("x-user-id", "carol")
        .header("x-user-roles", "user")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);
    assert_eq!(ok.json::<i64>().await.unwrap(), 5);

    let anonymous = client.get(&url).send().await.unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let guest = client
        .get(&url)
        .header("x-user-id", "dave")
        .header("x-user-roles", "guest")
        .send()
        .await
        .unwrap();
    assert_eq!(guest.status().as_u16(), 403);
}
