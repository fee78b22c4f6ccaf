use actix_web::http::{header, StatusCode};
use actix_web::{test, App};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;

use predict_service::inference::{ModelError, ModelFormat};
use predict_service::models::{ModelInfo, PredictionResponse};
use predict_service::schema::{FeatureKind, FeatureSchema, FeatureSpec, Record};
use predict_service::{routes, ModelInference, Predictor};

const JSON_LIMIT: usize = 4096;

/// Label 1 when the first column exceeds the second, so a column swap shows.
struct FirstGreater;

impl Predictor for FirstGreater {
    fn predict(&self, record: &Record) -> Result<i64, ModelError> {
        let v = record.values();
        Ok(i64::from(v[0] > v[1]))
    }
}

struct Broken;

impl Predictor for Broken {
    fn predict(&self, _record: &Record) -> Result<i64, ModelError> {
        Err(ModelError::Inference("graph exploded".into()))
    }
}

fn two_features() -> FeatureSchema {
    FeatureSchema::new(vec![
        FeatureSpec::new("feature1", FeatureKind::Integer),
        FeatureSpec::new("feature2", FeatureKind::Float),
    ])
    .unwrap()
}

fn stub_model(predictor: impl Predictor + 'static) -> Arc<ModelInference> {
    Arc::new(ModelInference::new(
        ModelFormat::Onnx,
        two_features(),
        Box::new(predictor),
    ))
}

macro_rules! service {
    ($model:expr) => {
        test::init_service(App::new().configure(routes::configure($model, JSON_LIMIT))).await
    };
}

#[actix_web::test]
async fn predicts_integer_label() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 5, "feature2": 2.3}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: PredictionResponse = test::read_body_json(resp).await;
    assert_eq!(body, PredictionResponse::new(1));
}

#[actix_web::test]
async fn key_order_does_not_change_prediction() {
    let app = service!(stub_model(FirstGreater));

    let forward = test::TestRequest::post()
        .uri("/")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(r#"{"feature1": 1, "feature2": 2.3}"#)
        .to_request();
    let reversed = test::TestRequest::post()
        .uri("/")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(r#"{"feature2": 2.3, "feature1": 1}"#)
        .to_request();

    let a: Value = test::call_and_read_body_json(&app, forward).await;
    let b: Value = test::call_and_read_body_json(&app, reversed).await;
    assert_eq!(a, json!({"results": {"results": 0}}));
    assert_eq!(a, b);
}

#[actix_web::test]
async fn repeated_requests_are_identical() {
    let app = service!(stub_model(FirstGreater));
    let request = || {
        test::TestRequest::post()
            .uri("/")
            .set_json(json!({"feature1": 9, "feature2": 0.5}))
            .to_request()
    };

    let first = test::call_and_read_body(&app, request()).await;
    let second = test::call_and_read_body(&app, request()).await;
    assert_eq!(first, second);
}

#[actix_web::test]
async fn missing_feature_is_unprocessable_and_service_survives() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 5}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "missing_feature");
    assert_eq!(body["feature"], "feature2");

    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 5, "feature2": 2.3}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

#[actix_web::test]
async fn schema_violations_name_the_feature() {
    let app = service!(stub_model(FirstGreater));

    let cases = [
        (json!({"feature1": 5, "feature2": 2.3, "extra": 1}), "unexpected_feature", "extra"),
        (json!({"feature1": "5", "feature2": 2.3}), "invalid_value", "feature1"),
        (json!({"feature1": 5.5, "feature2": 2.3}), "invalid_value", "feature1"),
    ];
    for (input, kind, feature) in cases {
        let req = test::TestRequest::post().uri("/").set_json(input).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], kind);
        assert_eq!(body["feature"], feature);
    }
}

#[actix_web::test]
async fn malformed_body_is_bad_request() {
    let app = service!(stub_model(FirstGreater));

    for payload in ["{\"feature1\": ", "[5, 2.3]", "42"] {
        let req = test::TestRequest::post()
            .uri("/")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "payload {payload}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid_json");
    }
}

#[actix_web::test]
async fn content_type_is_not_required() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::post()
        .uri("/")
        .insert_header((header::CONTENT_TYPE, "text/plain"))
        .set_payload(r#"{"feature1": 5, "feature2": 2.3}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn inference_failure_is_server_error() {
    let app = service!(stub_model(Broken));

    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 5, "feature2": 2.3}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "inference_failed");
    assert!(body["message"].as_str().unwrap().contains("graph exploded"));
}

#[actix_web::test]
async fn unexpected_keys_are_reported_in_request_order() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::post()
        .uri("/")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload(r#"{"feature1": 5, "feature2": 2.3, "zeta": 1, "alpha": 1}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unexpected_feature");
    assert_eq!(body["feature"], "zeta");
}

#[actix_web::test]
async fn out_of_range_numbers_are_unprocessable() {
    let app = service!(stub_model(FirstGreater));

    for payload in [
        r#"{"feature1": 5, "feature2": 1e300}"#,
        r#"{"feature1": 99999999999, "feature2": 2.3}"#,
    ] {
        let req = test::TestRequest::post()
            .uri("/")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "payload {payload}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "invalid_value");
    }
}

#[actix_web::test]
async fn wrong_method_on_root_is_405() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers().get(header::ALLOW).unwrap(), "POST");
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "method_not_allowed");
}

#[actix_web::test]
async fn oversized_body_is_rejected() {
    let app = service!(stub_model(FirstGreater));

    let padding = "x".repeat(JSON_LIMIT);
    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 5, "feature2": 2.3, "padding": padding}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "payload_too_large");
}

#[actix_web::test]
async fn model_info_lists_schema_in_order() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::get().uri("/model-info").to_request();
    let info: ModelInfo = test::call_and_read_body_json(&app, req).await;
    assert_eq!(info.format, ModelFormat::Onnx);
    let names: Vec<_> = info.features.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["feature1", "feature2"]);
}

#[actix_web::test]
async fn unknown_routes_get_json_404() {
    let app = service!(stub_model(FirstGreater));

    let req = test::TestRequest::post().uri("/predict").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_found");
}

#[actix_web::test]
async fn serves_linear_artifact_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(
        br#"{
            "features": [{"name": "feature1", "kind": "integer"}, {"name": "feature2"}],
            "coefficients": [0.5, -1.0],
            "intercept": 0.0,
            "classes": [10, 20]
        }"#,
    )
    .unwrap();

    let model = Arc::new(ModelInference::load(&path).unwrap());
    let app = service!(model);

    // 2.5 - 2.3 > 0
    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 5, "feature2": 2.3}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"results": {"results": 20}}));

    // 0.5 - 2.3 < 0
    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({"feature1": 1, "feature2": 2.3}))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"results": {"results": 10}}));
}

#[actix_web::test]
async fn serves_onnx_fixture_from_disk() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/first_greater.onnx");
    let app = service!(Arc::new(ModelInference::load(&path).unwrap()));

    let cases = [
        (r#"{"feature1": 5, "feature2": 2.3}"#, 1),
        (r#"{"feature2": 2.3, "feature1": 5}"#, 1),
        (r#"{"feature1": 1, "feature2": 2.3}"#, 0),
        (r#"{"feature1": -3, "feature2": -7.5}"#, 1),
    ];
    for (payload, label) in cases {
        let req = test::TestRequest::post()
            .uri("/")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload(payload)
            .to_request();
        let body: PredictionResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, PredictionResponse::new(label), "payload {payload}");
    }

    let req = test::TestRequest::get().uri("/model-info").to_request();
    let info: ModelInfo = test::call_and_read_body_json(&app, req).await;
    assert_eq!(info.format, ModelFormat::Onnx);
}
