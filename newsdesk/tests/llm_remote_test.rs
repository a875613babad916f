use mockito::Matcher;
use newsdesk::llm::remote::RemoteLlmProvider;
use newsdesk::llm::{ChatMessage, LlmProvider, LlmRequest, ToolChoice};
use newsdesk::qa::tool_specs;
use serde_json::json;

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    // Mock successful OpenAI response
    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Presenter"
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 1,
                    "total_tokens": 11
                }
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let request = LlmRequest::new(vec![ChatMessage::user("What's in the news today?")])
        .with_temperature(0.0)
        .with_max_tokens(10);

    let response = provider.generate(request).await.expect("generate");
    assert_eq!(response.content, "Presenter");
    assert!(response.tool_calls.is_empty());
    assert_eq!(response.usage.prompt_tokens, 10);
    assert_eq!(response.usage.total_tokens, 11);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_parses_tool_calls() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"tool_choice": "auto"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {
                                "name": "find_internet_articles",
                                "arguments": "{\"query\": \"EU AI Act\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let request = LlmRequest::new(vec![ChatMessage::user("@ what is the EU AI Act?")])
        .with_tools(tool_specs(), ToolChoice::Auto);

    let response = provider.generate(request).await.expect("generate");
    assert_eq!(response.content, "");
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].id, "call_abc");
    assert_eq!(response.tool_calls[0].name, "find_internet_articles");
    assert_eq!(response.usage.total_tokens, 0);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_sends_json_mode() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "response_format": {"type": "json_object"}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "{\"items\": []}"}}]}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let response = provider
        .generate(LlmRequest::new(vec![ChatMessage::user("summarize")]).json())
        .await
        .expect("generate");
    assert_eq!(response.content, r#"{"items": []}"#);
    // Model name falls back to the configured one when the response omits it
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_error_handling() {
    let mut server = mockito::Server::new_async().await;

    // Mock rate limit error
    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let result = provider
        .generate(LlmRequest::new(vec![ChatMessage::user("Test prompt")]))
        .await;

    let err = result.expect_err("429 must be an error");
    let message = err.to_string();
    assert!(message.contains("429"), "unexpected error: {}", message);
    assert!(message.contains("Rate limit exceeded"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_without_choices_is_an_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"model": "gpt-4o-mini", "choices": []}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let result = provider
        .generate(LlmRequest::new(vec![ChatMessage::user("Test prompt")]))
        .await;
    assert!(result.is_err());
}
