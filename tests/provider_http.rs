// OpenAI-compatible provider against a mock HTTP server.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use streamchat::api::{LLMApiProvider, OpenAICompatibleProvider};
use streamchat::conversations::ConversationStore;
use streamchat::models::{ApiConfig, ModelInfo, Role, WireMessage};
use streamchat::session::ChatSession;
use streamchat::storage::MemoryBlobStore;
use streamchat::{stream, ChatError};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: format!("{}/v1/", server.uri()),
        api_key: "sk-test".to_string(),
        model: "test-model".to_string(),
    }
}

fn user(content: &str) -> Vec<WireMessage> {
    vec![WireMessage {
        role: Role::User,
        content: content.to_string(),
    }]
}

const SSE_BODY: &str = concat!(
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n",
    "data: not-json\n\n",
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

#[tokio::test]
async fn streams_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-model",
            "stream": true,
            "messages": [{"role": "user", "content": "Hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAICompatibleProvider::new();
    let deltas = provider
        .send_chat_stream_request(&config_for(&server), &user("Hi"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    let text = stream::accumulate(deltas, |buf| seen.push(buf.to_string()))
        .await
        .unwrap();
    assert_eq!(text, "Hello!");
    assert_eq!(seen, vec!["Hello".to_string(), "Hello!".to_string()]);
}

#[tokio::test]
async fn structured_error_body_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let result = OpenAICompatibleProvider::new()
        .send_chat_stream_request(&config_for(&server), &user("Hi"))
        .await;
    match result {
        Err(ChatError::Transport(message)) => assert_eq!(message, "Incorrect API key provided"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a transport error"),
    }
}

#[tokio::test]
async fn unstructured_error_falls_back_to_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let result = OpenAICompatibleProvider::new()
        .send_chat_stream_request(&config_for(&server), &user("Hi"))
        .await;
    match result {
        Err(ChatError::Transport(message)) => {
            assert_eq!(message, "request failed with status 503")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a transport error"),
    }
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let config = ApiConfig {
        base_url: "http://127.0.0.1:1/v1".to_string(),
        api_key: "sk-test".to_string(),
        model: "m".to_string(),
    };
    let result = OpenAICompatibleProvider::new()
        .send_chat_stream_request(&config, &user("Hi"))
        .await;
    assert!(matches!(result, Err(ChatError::Transport(_))));
}

#[tokio::test]
async fn lists_models_in_both_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [{"id": "gpt-4o", "object": "model"}, {"id": "o3", "name": "o3 (reasoning)"}]
        })))
        .mount(&server)
        .await;

    let models = OpenAICompatibleProvider::new()
        .list_models(&config_for(&server))
        .await
        .unwrap();
    assert_eq!(
        models,
        vec![
            ModelInfo { id: "gpt-4o".into(), name: "gpt-4o".into() },
            ModelInfo { id: "o3".into(), name: "o3 (reasoning)".into() },
        ]
    );

    let other = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": ["llama3", {"id": "mistral"}]
        })))
        .mount(&other)
        .await;
    let ids: Vec<String> = OpenAICompatibleProvider::new()
        .list_models(&config_for(&other))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec!["llama3".to_string(), "mistral".to_string()]);
}

#[tokio::test]
async fn model_listing_failure_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = OpenAICompatibleProvider::new()
        .list_models(&config_for(&server))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to fetch models: 404");
}

#[tokio::test]
async fn session_round_trip_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"[thinking]greet back[/thinking]\"}}]}\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello!\"}}]}\n",
                "data: [DONE]\n",
            ),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let mut store = ConversationStore::new(Arc::new(MemoryBlobStore::new()));
    store.set_api_config(config_for(&server)).await;
    let session = ChatSession::new(store, Arc::new(OpenAICompatibleProvider::new()));

    let reply = session.send_message("Hi").await.unwrap();
    assert_eq!(reply.thinking.as_deref(), Some("greet back"));
    assert_eq!(reply.rendered().response, "Hello!");

    let store = session.store().lock().await;
    assert_eq!(store.chats()[0].title, "Hi");
}
