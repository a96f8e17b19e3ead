//! Schema and Importance Routes

use axum::{extract::State, Json};
use feature_engine::{FeatureImportance, FeatureSchema};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Base inputs as `{field: label}` in schema order
pub struct BaseInputLabels(Arc<AppState>);

impl BaseInputLabels {
    fn schema(&self) -> &FeatureSchema {
        self.0.pipeline.registry().schema()
    }
}

impl Serialize for BaseInputLabels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let schema = self.schema();
        let mut map = serializer.serialize_map(Some(schema.base_count()))?;
        for field in schema.base_fields() {
            map.serialize_entry(&field.name, &field.label)?;
        }
        map.end()
    }
}

/// Response for schema endpoint
#[derive(Serialize)]
pub struct SchemaResponse {
    pub base_inputs: BaseInputLabels,
    pub derived_feature_names: Vec<String>,
    pub description: String,
}

/// Response for importance endpoint
#[derive(Debug, Serialize)]
pub struct ImportanceResponse {
    pub success: bool,
    pub feature_importance: Vec<FeatureImportance>,
}

/// Get the input schema
pub async fn get_schema(State(state): State<Arc<AppState>>) -> Json<SchemaResponse> {
    let registry = state.pipeline.registry();
    let derived_feature_names = registry
        .schema()
        .derived_fields()
        .map(|f| f.name.clone())
        .collect();
    let description = registry.description().to_string();

    Json(SchemaResponse {
        base_inputs: BaseInputLabels(Arc::clone(&state)),
        derived_feature_names,
        description,
    })
}

/// Get global feature importance
pub async fn get_importance(State(state): State<Arc<AppState>>) -> Json<ImportanceResponse> {
    Json(ImportanceResponse {
        success: true,
        feature_importance: state.pipeline.importance().entries().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use crate::tests::{app, get, send};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_schema_lists_inputs_in_order() {
        let response = app().oneshot(get("/api/v1/schema")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let first = text.find("\"sim_age_days\"").unwrap();
        let second = text.find("\"date_month\"").unwrap();
        assert!(first < second);

        let body: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["base_inputs"].as_object().unwrap().len(), 34);
        assert_eq!(body["base_inputs"]["sim_age_days"], json!("SIM Age (Days)"));
        assert_eq!(body["derived_feature_names"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_importance_is_labelled() {
        let (status, body) = send(app(), get("/api/v1/features/importance")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["feature_importance"][0]["feature"], json!("loan_frequency_30d"));
        assert!(!body["feature_importance"][0]["display_name"]
            .as_str()
            .unwrap()
            .is_empty());
    }
}
