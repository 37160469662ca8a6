mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use symptom_classifier::server::router;
use tower::ServiceExt;

fn app() -> Router {
    router(Arc::new(common::keyword_engine()))
}

async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (status, body) = call(app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_diagnose_returns_ranked_diseases() {
    let (status, body) = call(
        app(),
        Method::POST,
        "/ai/diagnose",
        Some(json!({"inputText": "I have a throbbing headache"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let diagnoses = body["diagnoses"].as_array().unwrap();
    assert_eq!(diagnoses.len(), 3);
    assert_eq!(diagnoses[0]["disease"], "Migraine");
    let probabilities: Vec<f64> = diagnoses.iter().map(|d| d["probability"].as_f64().unwrap()).collect();
    assert!(probabilities.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn test_diagnose_respects_k() {
    let (status, body) = call(
        app(),
        Method::POST,
        "/ai/diagnose",
        Some(json!({"inputText": "fever", "k": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["diagnoses"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_empty_input_is_bad_request() {
    for uri in ["/ai/diagnose", "/ai/process-voice"] {
        let (status, body) = call(app(), Method::POST, uri, Some(json!({"inputText": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_voice_symptoms_use_classifier() {
    let (status, body) = call(
        app(),
        Method::POST,
        "/ai/process-voice",
        Some(json!({"inputText": "I'm experiencing burning urination"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response = &body["response"];
    assert_eq!(response["intent"], "symptom_analysis");
    assert!(response["text"].as_str().unwrap().contains("Urinary Tract Infection"));
    assert_eq!(response["actions"]["scheduleAppointment"], false);
    assert_eq!(response["actions"]["connectToProvider"], false);
}

#[tokio::test]
async fn test_voice_scheduling_and_provider() {
    let (_, body) = call(
        app(),
        Method::POST,
        "/ai/process-voice",
        Some(json!({"inputText": "Can I book an appointment?"})),
    )
    .await;
    assert_eq!(body["response"]["intent"], "schedule_appointment");
    assert_eq!(body["response"]["actions"]["scheduleAppointment"], true);

    let (_, body) = call(
        app(),
        Method::POST,
        "/ai/process-voice",
        Some(json!({"inputText": "Please message my doctor"})),
    )
    .await;
    assert_eq!(body["response"]["intent"], "connect_to_provider");
    assert_eq!(body["response"]["actions"]["connectToProvider"], true);

    let (status, body) = call(
        app(),
        Method::POST,
        "/ai/process-voice",
        Some(json!({"inputText": "hello there"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["intent"], "unknown");
    assert_eq!(body["response"]["actions"]["scheduleAppointment"], false);
}

#[tokio::test]
async fn test_serve_binds_and_answers() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app()).await.unwrap();
    });

    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
}
