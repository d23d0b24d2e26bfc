//! A full exchange through the bridge with the document index and citation
//! checks wired in.

use std::sync::Arc;

use axum::Router;
use axum::routing::post;
use serde_json::{Value, json};
use toolbridge_agent::test_helpers::{
    SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response,
};
use toolbridge_agent::{Bridge, ExchangeRequest};
use toolbridge_config::BridgeConfig;
use toolbridge_core::message::Role;
use toolbridge_core::tool::ToolOutcome;
use toolbridge_core::{CallContext, ToolAdapter};
use toolbridge_retrieval::{CitationVerifier, RetrievalAdapter};

async fn handbook_server() -> String {
    async fn query(axum::Json(req): axum::Json<Value>) -> axum::Json<Value> {
        if req["query"] == "test" {
            return axum::Json(json!({"result": {"output": "ok", "links": []}}));
        }
        axum::Json(json!({
            "result": {
                "output": "Dogs may come to the office on Fridays.",
                "links": ["file:///srv/index/md_db/pet-policy.md"]
            }
        }))
    }

    let app = Router::new().route("/query", post(query));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn bridge(provider: Arc<SequentialMockProvider>, url: &str) -> Bridge {
    Bridge::new(provider, "mock-model", BridgeConfig::default())
        .with_adapter(Arc::new(RetrievalAdapter::new(url)))
        .with_verifier(Arc::new(CitationVerifier::default()))
}

fn pets_query() -> Vec<toolbridge_core::MessageToolCall> {
    vec![make_tool_call("call_1", "query", json!({"text": "pets"}))]
}

#[tokio::test]
async fn cited_answer_is_accepted() {
    let url = handbook_server().await;
    let provider = Arc::new(SequentialMockProvider::tool_then_answer(
        pets_query(),
        "Dogs are welcome on Fridays. [Source: 1]",
    ));
    let bridge = bridge(provider.clone(), &url);
    assert_eq!(bridge.initialize(false).await, 1);

    let reply = bridge.chat(ExchangeRequest::new("Can I bring my dog?")).await.unwrap();

    assert_eq!(
        reply.content(),
        "Dogs are welcome on Fridays. [Source: handbook.hypha.coop/pet-policy]"
    );
    assert!(!reply.needs_retry);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(reply.tools_used, vec!["📚"]);

    let tool_turn = reply.turns.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_turn.content.contains("handbook.hypha.coop/pet-policy"));

    let system = &provider.requests()[0].messages[0];
    assert!(system.content.contains("[Source: <full path>]"));
}

#[tokio::test]
async fn hallucinated_source_gets_one_correction() {
    let url = handbook_server().await;
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_tool_call_response(pets_query(), ""),
        make_text_response("Cats too. [Source: handbook.hypha.coop/cat-policy]"),
        make_text_response("Only dogs, on Fridays. [Source: handbook.hypha.coop/pet-policy]"),
    ]));
    let bridge = bridge(provider.clone(), &url);
    bridge.initialize(false).await;

    let reply = bridge.chat(ExchangeRequest::new("Pets?")).await.unwrap();

    assert!(!reply.needs_retry);
    assert_eq!(reply.content(), "Only dogs, on Fridays. [Source: handbook.hypha.coop/pet-policy]");
    assert_eq!(provider.call_count(), 3);

    let correction = provider.requests()[2]
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap();
    assert!(correction.contains("handbook.hypha.coop/cat-policy"));
}

#[tokio::test]
async fn persistent_hallucination_is_annotated() {
    let url = handbook_server().await;
    let provider = Arc::new(SequentialMockProvider::new(vec![
        make_tool_call_response(pets_query(), ""),
        make_text_response("Birds are fine. [Source: handbook.hypha.coop/birds]"),
        make_text_response("Birds are fine. [Source: handbook.hypha.coop/birds]"),
    ]));
    let bridge = bridge(provider.clone(), &url);
    bridge.initialize(false).await;

    let reply = bridge.chat(ExchangeRequest::new("Birds?")).await.unwrap();

    assert!(reply.needs_retry);
    assert!(reply.content().contains("HALLUCINATED SOURCES DETECTED"));
    assert!(reply.content().contains("- ❌ [handbook.hypha.coop/birds]"));
    assert_eq!(reply.warnings, vec!["hallucinated source: handbook.hypha.coop/birds"]);
}

#[tokio::test]
async fn exchanges_without_retrieval_are_not_checked() {
    let url = handbook_server().await;
    let provider = Arc::new(SequentialMockProvider::single_text("Hello there!"));
    let bridge = bridge(provider, &url);
    bridge.initialize(false).await;

    let reply = bridge.chat(ExchangeRequest::new("Hi")).await.unwrap();
    assert_eq!(reply.content(), "Hello there!");
    assert!(!reply.needs_retry);
}

#[tokio::test]
async fn adapter_answers_direct_calls() {
    let url = handbook_server().await;
    let adapter = RetrievalAdapter::new(&url);
    adapter.connect(false).await.unwrap();

    let outcome = adapter
        .call_tool("query", json!({"text": "pets"}), &CallContext::new("grace"))
        .await
        .unwrap();
    let ToolOutcome::Success(value) = outcome else {
        panic!("expected success");
    };
    assert_eq!(value["source_paths"], json!(["handbook.hypha.coop/pet-policy"]));
    assert!(adapter.document("handbook.hypha.coop/pet-policy").is_some());
}
