mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use shoe_shop_api::services::chat::{FALLBACK_REPLY, RATE_LIMITED_REPLY};
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const COMPLETIONS_PATH: &str = "/openai/v1/chat/completions";

async fn app_against(server: &MockServer) -> TestApp {
    let api_url = format!("{}{}", server.uri(), COMPLETIONS_PATH);
    TestApp::with_config(move |cfg| {
        cfg.chat.api_url = api_url;
        cfg.chat.api_key = Some("test-key".to_string());
        cfg.chat.timeout_secs = 5;
    })
    .await
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 18, "total_tokens": 138 }
    })
}

#[tokio::test]
async fn relays_reply_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Hello there!")))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_against(&server).await;
    let (status, body) = app
        .json(
            Method::POST,
            "/api/chatbot/chat",
            Some(json!({
                "message": "What are your opening hours?",
                "conversationHistory": [
                    { "role": "user", "content": "hi" },
                    { "role": "assistant", "content": "Hello!" }
                ]
            })),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["response"], "Hello there!");
    assert_eq!(body["data"]["usage"]["total_tokens"], 138);
}

#[tokio::test]
async fn product_questions_carry_catalog_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(body_string_contains("Pegasus Trail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("We have it!")))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_against(&server).await;
    app.seed_product("Pegasus Trail", 2_500_000, &[(42, 3)]).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/chatbot/chat",
            Some(json!({ "message": "How much are the pegasus shoes?" })),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["response"], "We have it!");
}

#[tokio::test]
async fn upstream_rate_limit_maps_to_429_with_canned_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let app = app_against(&server).await;
    let (status, body) = app
        .json(Method::POST, "/api/chatbot/chat", Some(json!({ "message": "hi" })), None)
        .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["message"], RATE_LIMITED_REPLY);
}

#[tokio::test]
async fn upstream_failure_maps_to_503_with_fallback_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let app = app_against(&server).await;
    let (status, body) = app
        .json(Method::POST, "/api/chatbot/chat", Some(json!({ "message": "hi" })), None)
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], FALLBACK_REPLY);
}

#[tokio::test]
async fn empty_message_is_rejected_before_any_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let app = app_against(&server).await;
    let (status, _) = app
        .json(Method::POST, "/api/chatbot/chat", Some(json!({ "message": "   " })), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_api_key_answers_with_fallback() {
    let app = TestApp::new().await;
    let (status, body) = app
        .json(Method::POST, "/api/chatbot/chat", Some(json!({ "message": "hi" })), None)
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["message"], FALLBACK_REPLY);
}
