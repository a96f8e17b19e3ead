//! Prediction and Explanation Routes

use axum::{
    extract::{
        rejection::{JsonRejection, StringRejection},
        State,
    },
    Json,
};
use feature_engine::{parse_csv, RawInputRecord};
use inference_engine::{BatchResponse, Envelope, ExplanationResult, ScoredRecord};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::{ApiError, AppState};

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

fn bad_text(rejection: StringRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

fn record_scoring(endpoint: &'static str, rows: usize, failed: usize, started: Instant) {
    counter!("predictions_total", "endpoint" => endpoint).increment(rows as u64);
    if failed > 0 {
        counter!("prediction_failures_total", "endpoint" => endpoint).increment(failed as u64);
    }
    histogram!("request_latency_ms", "endpoint" => endpoint).record(started.elapsed().as_secs_f64() * 1000.0);
}

/// Score one record
pub async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawInputRecord>, JsonRejection>,
) -> Result<Json<Envelope<ScoredRecord>>, ApiError> {
    let Json(raw) = payload.map_err(bad_body)?;
    debug!("Predict request with {} fields", raw.len());

    let started = Instant::now();
    let envelope = state.pipeline.predict_envelope(&raw).await;
    record_scoring("single", 1, usize::from(!envelope.success), started);

    Ok(Json(envelope))
}

/// Score a JSON array of records
pub async fn predict_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<RawInputRecord>>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(records) = payload.map_err(bad_body)?;
    debug!("Batch request with {} records", records.len());

    let started = Instant::now();
    let response = state.batch.predict_records(records).await;
    record_scoring("batch", response.rows_processed, response.failed, started);

    Ok(Json(response))
}

/// Score a CSV upload whose header row names the fields
pub async fn predict_csv(
    State(state): State<Arc<AppState>>,
    body: Result<String, StringRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let body = body.map_err(bad_text)?;
    let rows = parse_csv(body.as_bytes()).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    debug!("CSV request with {} rows", rows.len());

    let started = Instant::now();
    let response = state.batch.predict_rows(rows).await;
    record_scoring("csv", response.rows_processed, response.failed, started);

    Ok(Json(response))
}

/// Explain one record's prediction
pub async fn explain(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawInputRecord>, JsonRejection>,
) -> Result<Json<Envelope<ExplanationResult>>, ApiError> {
    let Json(raw) = payload.map_err(bad_body)?;

    let started = Instant::now();
    let envelope = state.pipeline.explain_envelope(&raw).await;
    counter!("explanations_total", "success" => if envelope.success { "true" } else { "false" }).increment(1);
    histogram!("request_latency_ms", "endpoint" => "explain").record(started.elapsed().as_secs_f64() * 1000.0);

    Ok(Json(envelope))
}

#[cfg(test)]
mod tests {
    use crate::tests::{app, app_with, post_json, send};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use inference_engine::MockBackend;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::json;
    use tower::ServiceExt;

    fn post_csv(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/predict/csv")
            .header("content-type", "text/csv")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_predict_success_envelope() {
        let (status, body) = send(
            app(),
            post_json("/api/v1/predict", json!({"loan_count_30d": 3, "sim_age_days": "400"})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["base_inputs"]["loan_count_30d"], json!(3.0));
        assert_eq!(body["base_inputs"]["sim_age_days"], json!(400.0));
        assert_eq!(body["imputed_fields"].as_array().unwrap().len(), 32);
        assert_eq!(body["top_factors"][0]["feature"], json!("loan_frequency_30d"));

        let p0 = body["prediction"]["probability_class_0"].as_f64().unwrap();
        let p1 = body["prediction"]["probability_class_1"].as_f64().unwrap();
        assert!((p0 + p1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_base_inputs_keep_schema_order() {
        let response = app()
            .oneshot(post_json("/api/v1/predict", json!({})))
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(text.find("\"sim_age_days\"").unwrap() < text.find("\"date_month\"").unwrap());
    }

    #[tokio::test]
    async fn test_backend_failure_is_200_envelope() {
        let (status, body) = send(app_with(MockBackend::failing()), post_json("/api/v1/predict", json!({}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["retryable"], json!(true));
        assert!(body.get("prediction").is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let (status, body) = send(app(), post_json("/api/v1/predict", json!({"sim_age_days": "old"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));

        let (status, _) = send(app(), post_json("/api/v1/predict", json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let records = json!([
            {"loan_count_30d": 0},
            {"loan_count_30d": 5},
            {"loan_count_30d": 10}
        ]);
        let (status, body) = send(app(), post_json("/api/v1/predict/batch", records)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows_processed"], json!(3));
        for (i, expected) in [0.0, 5.0, 10.0].iter().enumerate() {
            assert_eq!(body["results"][i]["index"], json!(i));
            assert_eq!(body["results"][i]["base_inputs"]["loan_count_30d"], json!(expected));
        }
    }

    #[tokio::test]
    async fn test_csv_isolates_bad_rows() {
        let csv = "loan_count_30d,sim_age_days\n1,200\n2,not-a-number\n3,\n";
        let (status, body) = send(app(), post_csv(csv)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows_processed"], json!(3));
        assert_eq!(body["succeeded"], json!(2));
        assert_eq!(body["results"][1]["success"], json!(false));
        assert!(body["results"][1]["error"].as_str().unwrap().contains("row 2"));
        assert_eq!(body["results"][2]["success"], json!(true));
    }

    #[tokio::test]
    async fn test_empty_csv_is_400() {
        let (status, body) = send(app(), post_csv("")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_explain_orders_attributions() {
        let (status, body) = send(app(), post_json("/api/v1/explain", json!({"loan_count_30d": 9}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["base_value"], json!(0.5));

        let explanations = body["explanations"].as_array().unwrap();
        assert_eq!(explanations.len(), 40);
        assert_eq!(explanations[0]["feature"], json!("loan_count_30d"));
        assert_eq!(explanations[0]["display_name"], json!("Loan Count (30d)"));
    }

    #[tokio::test]
    async fn test_non_utf8_csv_is_400_envelope() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/predict/csv")
            .header("content-type", "text/csv")
            .body(Body::from(vec![0x6c, 0x6f, 0xff, 0xfe, 0x0a]))
            .unwrap();
        let (status, body) = send(app(), request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_latency_split_between_backend_and_request() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let (status, _) = send(app(), post_json("/api/v1/predict", json!({}))).await;
        assert_eq!(status, StatusCode::OK);

        let rendered = handle.render();
        assert!(rendered.contains("backend_latency_ms"));
        assert!(rendered.contains("operation=\"predict\""));
        assert!(rendered.contains("request_latency_ms"));
        assert!(rendered.contains("endpoint=\"single\""));
    }
}
