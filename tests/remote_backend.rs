use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use chess_agent::InferenceError;
use chess_agent::config::RemoteSettings;
use chess_agent::inference::{DecodingOptions, GenerationRequest, InferenceBackend, RemoteBackend};
use chess_agent::types::ChatMessage;
use chess_agent::BoardState;
use serde_json::{Value, json};

type Seen = Arc<Mutex<Vec<Value>>>;

/// Minimal OpenAI-compatible server that records request bodies.
async fn fake_server(status: StatusCode, content: &'static str) -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route(
            "/v1/chat/completions",
            post(move |State(seen): State<Seen>, Json(body): Json<Value>| async move {
                seen.lock().unwrap().push(body);
                (
                    status,
                    Json(json!({
                        "id": "chatcmpl-fake",
                        "object": "chat.completion",
                        "choices": [{
                            "index": 0,
                            "message": {"role": "assistant", "content": content},
                            "finish_reason": "stop"
                        }]
                    })),
                )
            }),
        )
        .with_state(Arc::clone(&seen));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, seen)
}

fn backend(base_url: String) -> RemoteBackend {
    RemoteBackend::new(
        "qwen-chess",
        &RemoteSettings {
            base_url,
            request_timeout_ms: 2_000,
        },
    )
    .unwrap()
}

fn request(options: DecodingOptions) -> GenerationRequest {
    GenerationRequest {
        board: BoardState::default(),
        messages: vec![ChatMessage::user("Your move.")],
        options,
    }
}

#[tokio::test]
async fn sends_decoding_parameters_and_returns_content() {
    let (addr, seen) = fake_server(StatusCode::OK, "<uci_move>e2e4</uci_move> trailing").await;
    let remote = backend(format!("http://{addr}/"));
    let options = DecodingOptions {
        temperature: 0.3,
        max_new_tokens: 64,
        stop_sequences: vec![" trailing".to_string()],
    };

    let text = remote.generate(&request(options)).await.unwrap();
    assert_eq!(text, "<uci_move>e2e4</uci_move>");

    let body = seen.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "qwen-chess");
    assert_eq!(body["max_tokens"], 64);
    assert_eq!(body["stop"], json!([" trailing"]));
    assert_eq!(body["messages"][0]["content"], "Your move.");
    assert!((body["temperature"].as_f64().unwrap() - 0.3).abs() < 1e-6);
}

#[tokio::test]
async fn omits_empty_stop_list() {
    let (addr, seen) = fake_server(StatusCode::OK, "e2e4").await;
    backend(format!("http://{addr}"))
        .generate(&request(DecodingOptions::default()))
        .await
        .unwrap();
    assert!(seen.lock().unwrap()[0].get("stop").is_none());
}

#[tokio::test]
async fn server_errors_are_unavailability() {
    let (addr, _) = fake_server(StatusCode::INTERNAL_SERVER_ERROR, "").await;
    let err = backend(format!("http://{addr}"))
        .generate(&request(DecodingOptions::default()))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn unreachable_server_is_unavailability() {
    // bind then drop to get a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let err = backend(format!("http://127.0.0.1:{port}"))
        .generate(&request(DecodingOptions::default()))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn slow_server_is_a_timeout() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"choices": []}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let remote = RemoteBackend::new(
        "qwen-chess",
        &RemoteSettings {
            base_url: format!("http://{addr}"),
            request_timeout_ms: 100,
        },
    )
    .unwrap();
    let err = remote
        .generate(&request(DecodingOptions::default()))
        .await
        .unwrap_err();
    assert!(
        matches!(err, InferenceError::Timeout(budget) if budget == Duration::from_millis(100)),
        "{err}"
    );
}
