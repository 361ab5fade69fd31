//! End-to-end tests: the real router on a loopback socket with a scripted
//! judge model behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_test::assert_ok;

use judge_adapter::api::{router, AppState};
use judge_adapter::llm::{ChatMessage, ChatResponse, LlmClient, LlmError, SamplingParams};
use judge_adapter::{Config, TemplateStore};

/// Answers with a reply chosen from the rendered user message.
struct ScriptedJudge {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl LlmClient for ScriptedJudge {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _params: &SamplingParams,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LlmError::unavailable("connection refused", None));
        }
        let user = &messages[1].content;
        let content = if user.contains("Text A:") {
            "Text B provides more detail and is therefore better."
        } else if user.contains("Rate the following text") {
            "I would rate this a 4 out of 5 for clarity."
        } else {
            "Based on the content, I judge this to be: positive.\nExplanation: it expresses clear approval."
        };
        Ok(ChatResponse {
            content: content.to_string(),
            finish_reason: Some("stop".to_string()),
            usage: None,
            model: None,
        })
    }
}

struct TestApp {
    base: String,
    http: reqwest::Client,
    judge: Arc<ScriptedJudge>,
}

async fn spawn_app(fail: bool) -> TestApp {
    let vars: HashMap<&str, &str> = [
        ("WORKING_DIR", "/tmp"),
        ("VLLM_RETRY_BACKOFF_MS", "1"),
        ("MAX_CONCURRENT_EVALUATIONS", "4"),
    ]
    .into_iter()
    .collect();
    let config = Config::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

    let judge = Arc::new(ScriptedJudge {
        calls: AtomicU32::new(0),
        fail,
    });
    let templates = Arc::new(TemplateStore::with_builtin().unwrap());
    let state = AppState::new(&config, templates, judge.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestApp {
        base: format!("http://{}", addr),
        http: reqwest::Client::new(),
        judge,
    }
}

impl TestApp {
    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
    }

    async fn submit(&self, path: &str, body: Value) -> String {
        let response = self.post(path, body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "PENDING");
        body["evaluation_id"].as_str().unwrap().to_string()
    }

    async fn wait_terminal(&self, id: &str) -> Value {
        for _ in 0..300 {
            let response = self.get(&format!("/v1/evaluate/status/{}", id)).await;
            assert_eq!(response.status(), StatusCode::OK);
            let view: Value = response.json().await.unwrap();
            if view["status"] == "COMPLETED" || view["status"] == "FAILED" {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("evaluation {} never finished", id);
    }
}

fn toxicity_request() -> Value {
    json!({
        "judge_model_id": "mistralai/Mistral-7B-Instruct-v0.2",
        "text_to_evaluate": "Thanks so much, this fixed my issue!",
        "evaluation_criteria": "Is the sentiment positive or negative?",
        "prompt_template_id": "binary_classification",
        "output_format_instruction": "Answer with 'positive' or 'negative'.",
        "provide_reasoning": true
    })
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app(false).await;
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_single_response_evaluation() {
    let app = spawn_app(false).await;
    let id = app
        .submit("/v1/evaluate/single_response", toxicity_request())
        .await;

    let view = app.wait_terminal(&id).await;
    assert_eq!(view["status"], "COMPLETED");
    assert_eq!(view["evaluation_id"], id.as_str());
    assert!(view["completed_at"].is_string());
    assert_eq!(view["result"]["judgment"]["type"], "binary");
    assert_eq!(view["result"]["judgment"]["label"], "positive");
    assert_eq!(view["result"]["judgment"]["ambiguous"], false);
    assert_eq!(view["result"]["reasoning"], "it expresses clear approval.");
    assert!(view.get("error_kind").is_none());
}

#[tokio::test]
async fn test_likert_and_pairwise_evaluations() {
    let app = spawn_app(false).await;

    let likert = app
        .submit(
            "/v1/evaluate/single_response",
            json!({
                "judge_model_id": "judge",
                "text_to_evaluate": "Rust ownership prevents data races at compile time.",
                "evaluation_criteria": "clarity",
                "prompt_template_id": "likert_scale",
                "output_format_instruction": "Reply with a single number from 1 to 5.",
                "vllm_sampling_params": {"temperature": 0.0, "max_tokens": 64}
            }),
        )
        .await;
    let pairwise = app
        .submit(
            "/v1/evaluate/pairwise_comparison",
            json!({
                "judge_model_id": "judge",
                "text_A": "Short summary.",
                "text_B": "A longer summary that covers every key point.",
                "comparison_criteria": "Which summary is more complete?",
                "prompt_template_id": "pairwise_comparison",
                "output_format_instruction": "Reply with 'Text A', 'Text B' or 'EQUAL'."
            }),
        )
        .await;

    let likert = app.wait_terminal(&likert).await;
    assert_eq!(likert["result"]["judgment"]["score"], 4);

    let pairwise = app.wait_terminal(&pairwise).await;
    assert_eq!(pairwise["kind"], "pairwise_comparison");
    assert_eq!(pairwise["result"]["judgment"]["choice"], "B");
}

#[tokio::test]
async fn test_backend_failure_marks_task_failed() {
    let app = spawn_app(true).await;
    let id = app
        .submit("/v1/evaluate/single_response", toxicity_request())
        .await;

    let view = app.wait_terminal(&id).await;
    assert_eq!(view["status"], "FAILED");
    assert_eq!(view["error_kind"], "unavailable");
    assert!(view["error_message"]
        .as_str()
        .unwrap()
        .contains("after 3 attempts"));
    assert!(view.get("result").is_none());
    assert_eq!(app.judge.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unknown_evaluation_is_not_found() {
    let app = spawn_app(false).await;
    for id in [uuid::Uuid::new_v4().to_string(), "not-a-uuid".to_string()] {
        let response = app.get(&format!("/v1/evaluate/status/{}", id)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains(&id));
    }
}

#[tokio::test]
async fn test_submit_validation_errors() {
    let app = spawn_app(false).await;

    let mut unknown = toxicity_request();
    unknown["prompt_template_id"] = json!("does_not_exist");
    let response = app.post("/v1/evaluate/single_response", unknown).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post(
            "/v1/evaluate/single_response",
            json!({"judge_model_id": "judge", "evaluation_criteria": "x"}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    let response = app
        .post(
            "/v1/evaluate/pairwise_comparison",
            json!({
                "judge_model_id": "judge",
                "text_A": "one",
                "text_B": "two",
                "custom_prompt_segments": {
                    "system_message": "Compare.",
                    "user_instruction_prefix": "Only {text_A} is shown.\n"
                },
                "output_parser_rules": {"type": "preference", "pattern": "(A|B)"}
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("text_B"));

    assert_eq!(app.judge.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_status_stream_ends_with_done() {
    let app = spawn_app(false).await;
    let id = app
        .submit("/v1/evaluate/single_response", toxicity_request())
        .await;

    let response = app
        .get(&format!("/v1/evaluate/status/{}/stream", id))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = tokio::time::timeout(Duration::from_secs(5), response.text())
        .await
        .expect("stream did not finish")
        .unwrap();

    assert!(body.contains("event: done"));
    assert!(body.contains("\"COMPLETED\""));
}

#[tokio::test]
async fn test_template_lifecycle() {
    let app = spawn_app(false).await;

    let template = json!({
        "template_name": "Code Quality Evaluation",
        "description": "Rates code quality from 1 to 10.",
        "prompt_structure": {
            "system_message": "You are a senior code reviewer.",
            "user_instruction_prefix": "Review this code against: {evaluation_criteria}\n\n",
            "user_instruction_suffix": "\n\n{output_format_instruction}"
        },
        "output_parser_rules": {"type": "numeric", "pattern": "(\\d+)/10", "min": 1, "max": 10}
    });

    let response = app.post("/v1/config/judge_templates", template.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["template_id"], "code_quality_evaluation");

    let response = app
        .get("/v1/config/judge_templates/code_quality_evaluation")
        .await;
    let fetched: Value = assert_ok!(response.json::<Value>().await);
    assert_eq!(fetched["prompt_structure"], template["prompt_structure"]);
    assert_eq!(fetched["output_parser_rules"], template["output_parser_rules"]);
    assert_eq!(
        serde_json::to_string(&fetched["output_parser_rules"]).unwrap(),
        serde_json::to_string(&template["output_parser_rules"]).unwrap()
    );

    let response = app.post("/v1/config/judge_templates", template.clone()).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let mut revised = template.clone();
    revised["description"] = json!("Rates code quality.");
    for _ in 0..2 {
        let response = app
            .http
            .put(format!(
                "{}/v1/config/judge_templates/code_quality_evaluation",
                app.base
            ))
            .json(&revised)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let fetched: Value = app
        .get("/v1/config/judge_templates/code_quality_evaluation")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["description"], "Rates code quality.");

    let listing: Value = app.get("/v1/config/judge_templates").await.json().await.unwrap();
    let ids: Vec<&str> = listing
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["template_id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"code_quality_evaluation"));
    assert!(ids.contains(&"binary_classification"));

    let response = app
        .http
        .delete(format!(
            "{}/v1/config/judge_templates/code_quality_evaluation",
            app.base
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .get("/v1/config/judge_templates/code_quality_evaluation")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_template_rejected() {
    let app = spawn_app(false).await;
    let response = app
        .post(
            "/v1/config/judge_templates",
            json!({
                "template_id": "broken",
                "template_name": "Broken",
                "prompt_structure": {
                    "system_message": "Judge.",
                    "user_instruction_prefix": "Text: {unknown_placeholder}"
                },
                "output_parser_rules": {"type": "binary", "positive_patterns": ["(yes"], "negative_patterns": ["no"]}
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}
