use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use actix_multipart::Multipart;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, warn};
use serde::Deserialize;
use serde_json::json;
use shared::{DiseaseInfo, InputKind};
use uuid::Uuid;

use crate::config::Settings;
use crate::db::dynamodb_repository::{DynamoDbRepository, RepositoryError};
use crate::db::models::Patient;
use crate::ml::dispatcher::PipelineDispatcher;
use crate::ml::error::PipelineError;
use crate::ml::pipeline::InferencePayload;
use crate::services::diagnosis_service::{DiagnosisService, StatsError};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/api/diseases").route(web::get().to(list_diseases)))
        .service(
            web::resource("/api/diseases/{key}/infer").route(web::post().to(handle_inference)),
        )
        .service(web::resource("/api/diseases/{key}/explain").route(web::post().to(handle_explain)))
        .service(web::resource("/api/patients").route(web::post().to(create_patient)))
        .service(web::resource("/api/patients/{id}").route(web::get().to(get_patient)))
        .service(web::resource("/api/diagnoses/recent").route(web::get().to(recent_diagnoses)))
        .service(web::resource("/api/stats/summary").route(web::get().to(stats_summary)))
        .service(web::resource("/api/status/health").route(web::get().to(status_health)));
}

#[derive(Debug, Deserialize)]
struct InferQuery {
    patient_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

/// Maps the pipeline failure taxonomy onto HTTP statuses. Caller errors
/// echo their detail; server-side failures get an opaque body.
fn pipeline_error_response(err: &PipelineError) -> HttpResponse {
    match err {
        PipelineError::UnknownDisease(_) => {
            HttpResponse::NotFound().json(json!({ "error": err.to_string() }))
        }
        e if e.is_client_error() => {
            HttpResponse::BadRequest().json(json!({ "error": err.to_string() }))
        }
        PipelineError::ModelLoad { .. } => HttpResponse::ServiceUnavailable()
            .json(json!({ "error": "Model unavailable, try again later" })),
        PipelineError::Timeout(_) => {
            HttpResponse::GatewayTimeout().json(json!({ "error": "Inference timed out" }))
        }
        _ => HttpResponse::InternalServerError().json(json!({ "error": "Prediction error" })),
    }
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "service": "healthlens-api", "status": "ok" }))
}

/// The listing is derived from the registry, never from a second disease
/// list that could drift out of sync with it.
async fn list_diseases(dispatcher: web::Data<Arc<PipelineDispatcher>>) -> HttpResponse {
    let items: Vec<DiseaseInfo> = dispatcher
        .registry()
        .descriptors()
        .map(|d| DiseaseInfo {
            key: d.key.to_string(),
            name: d.display_name.to_string(),
            input_kind: d.input_kind,
            version: d.version.to_string(),
            loaded: dispatcher.is_loaded(d.key),
        })
        .collect();
    HttpResponse::Ok().json(json!({ "items": items }))
}

async fn status_health(dispatcher: web::Data<Arc<PipelineDispatcher>>) -> HttpResponse {
    let pipelines: Vec<serde_json::Value> = dispatcher
        .registry()
        .descriptors()
        .map(|d| {
            json!({
                "key": d.key,
                "loaded": dispatcher.is_loaded(d.key),
                "model_version": d.version,
            })
        })
        .collect();
    HttpResponse::Ok().json(json!({ "api": { "ok": true }, "pipelines": pipelines }))
}

/// Drains the single file part of a multipart upload. Only JPEG and PNG
/// are accepted; anything else is a caller error before decoding starts.
async fn read_image_payload(
    req: &HttpRequest,
    payload: web::Payload,
) -> Result<InferencePayload, PipelineError> {
    let mut multipart = Multipart::new(req.headers(), payload);
    let mut image_data = Vec::new();

    while let Ok(Some(mut field)) = multipart.try_next().await {
        if let Some(mime) = field.content_type() {
            let essence = mime.essence_str();
            if essence != "image/jpeg" && essence != "image/png" {
                return Err(PipelineError::UnsupportedFormat(format!(
                    "only JPEG/PNG uploads are supported, got {}",
                    essence
                )));
            }
        }
        while let Some(chunk) = field.next().await {
            let data = chunk
                .map_err(|e| PipelineError::Validation(format!("malformed multipart: {}", e)))?;
            image_data.extend_from_slice(&data);
        }
        if !image_data.is_empty() {
            break;
        }
    }

    if image_data.is_empty() {
        return Err(PipelineError::Validation(
            "multipart payload contains no file".to_string(),
        ));
    }
    Ok(InferencePayload::Image { bytes: image_data })
}

/// Reads a JSON object of named numeric fields. Field-set validation
/// against the scaler happens inside the pipeline; this only rejects
/// bodies that are not an object of numbers.
async fn read_tabular_payload(
    mut payload: web::Payload,
) -> Result<InferencePayload, PipelineError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk
            .map_err(|e| PipelineError::Validation(format!("failed to read body: {}", e)))?;
        body.extend_from_slice(&chunk);
    }

    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&body)
        .map_err(|e| {
            PipelineError::Validation(format!("body must be a JSON object of numbers: {}", e))
        })?;

    let mut features = HashMap::with_capacity(object.len());
    let mut non_numeric = Vec::new();
    for (field, value) in object {
        match value.as_f64() {
            Some(number) => {
                features.insert(field, number);
            }
            None => non_numeric.push(field),
        }
    }
    if !non_numeric.is_empty() {
        non_numeric.sort_unstable();
        return Err(PipelineError::Validation(format!(
            "non-numeric fields: {}",
            non_numeric.join(", ")
        )));
    }
    Ok(InferencePayload::Tabular { features })
}

async fn handle_inference(
    req: HttpRequest,
    payload: web::Payload,
    path: web::Path<String>,
    query: web::Query<InferQuery>,
    dispatcher: web::Data<Arc<PipelineDispatcher>>,
    diagnosis_service: web::Data<DiagnosisService>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, Error> {
    let disease_key = path.into_inner();

    let pipeline = match dispatcher.get(&disease_key) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            warn!("dispatch failed for '{}': {}", disease_key, e);
            return Ok(pipeline_error_response(&e));
        }
    };

    let inference_payload = match pipeline.descriptor().input_kind {
        InputKind::Image => read_image_payload(&req, payload).await,
        InputKind::Tabular => read_tabular_payload(payload).await,
    };
    let inference_payload = match inference_payload {
        Ok(p) => p,
        Err(e) => {
            warn!("rejected payload for '{}': {}", disease_key, e);
            return Ok(pipeline_error_response(&e));
        }
    };

    // The forward pass blocks, so it runs on the blocking pool; the
    // optional deadline races the call without cancelling the computation.
    let worker = pipeline.clone();
    let infer_task = web::block(move || worker.infer(&inference_payload));
    let outcome = match settings.inference_timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), infer_task).await {
            Ok(joined) => joined,
            Err(_) => {
                let e = PipelineError::Timeout(ms);
                error!("inference for '{}' hit the deadline: {}", disease_key, e);
                return Ok(pipeline_error_response(&e));
            }
        },
        None => infer_task.await,
    };

    let mut response = match outcome {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            if e.is_client_error() {
                warn!("inference rejected for '{}': {}", disease_key, e);
            } else {
                error!("inference failed for '{}': {}", disease_key, e);
            }
            return Ok(pipeline_error_response(&e));
        }
        Err(e) => {
            error!("inference worker died for '{}': {:?}", disease_key, e);
            return Ok(
                HttpResponse::InternalServerError().json(json!({ "error": "Prediction error" }))
            );
        }
    };

    if let Some(patient_id) = query.patient_id {
        // The record id is fixed before the write so the client learns it
        // now; the write itself completes in the background.
        let diagnosis_id = Uuid::new_v4();
        response.meta.diagnosis_id = Some(diagnosis_id);

        let service = diagnosis_service.get_ref().clone();
        let persisted = response.clone();
        let key = disease_key.clone();
        actix_web::rt::spawn(async move {
            if let Err(e) = service
                .persist(diagnosis_id, patient_id, &key, &persisted)
                .await
            {
                error!(
                    "failed to persist diagnosis {} for patient {}: {:?}",
                    diagnosis_id, patient_id, e
                );
            }
        });
    }

    Ok(HttpResponse::Ok().json(response))
}

async fn handle_explain(
    req: HttpRequest,
    payload: web::Payload,
    path: web::Path<String>,
    dispatcher: web::Data<Arc<PipelineDispatcher>>,
) -> Result<HttpResponse, Error> {
    let disease_key = path.into_inner();

    let pipeline = match dispatcher.get(&disease_key) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            warn!("dispatch failed for '{}': {}", disease_key, e);
            return Ok(pipeline_error_response(&e));
        }
    };

    let inference_payload = match pipeline.descriptor().input_kind {
        InputKind::Image => read_image_payload(&req, payload).await,
        InputKind::Tabular => read_tabular_payload(payload).await,
    };
    let inference_payload = match inference_payload {
        Ok(p) => p,
        Err(e) => return Ok(pipeline_error_response(&e)),
    };

    match pipeline.explain(&inference_payload) {
        Ok(explanation) => Ok(HttpResponse::Ok().json(explanation)),
        Err(e) => {
            error!("explain failed for '{}': {}", disease_key, e);
            Ok(pipeline_error_response(&e))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatePatientRequest {
    name: String,
    #[serde(default = "default_demographics")]
    demographics: String,
}

fn default_demographics() -> String {
    "{}".to_string()
}

async fn create_patient(
    body: web::Json<CreatePatientRequest>,
    db_repo: web::Data<DynamoDbRepository>,
) -> HttpResponse {
    let req = body.into_inner();
    if req.name.trim().is_empty() {
        return HttpResponse::BadRequest().json(json!({ "error": "Patient name is required" }));
    }
    let patient = Patient::new(req.name, req.demographics);
    match db_repo.create_patient(&patient).await {
        Ok(()) => HttpResponse::Created().json(patient),
        Err(e) => {
            error!("failed to create patient: {:?}", e);
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to create patient" }))
        }
    }
}

async fn get_patient(path: web::Path<Uuid>, db_repo: web::Data<DynamoDbRepository>) -> HttpResponse {
    let patient_id = path.into_inner();
    match db_repo.get_patient(patient_id).await {
        Ok(patient) => HttpResponse::Ok().json(patient),
        Err(RepositoryError::NotFound) => {
            HttpResponse::NotFound().json(json!({ "error": "Patient not found" }))
        }
        Err(e) => {
            error!("failed to fetch patient {}: {:?}", patient_id, e);
            HttpResponse::InternalServerError().json(json!({ "error": "Failed to fetch patient" }))
        }
    }
}

async fn recent_diagnoses(
    query: web::Query<RecentQuery>,
    diagnosis_service: web::Data<DiagnosisService>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    match diagnosis_service.recent(limit).await {
        Ok(records) => HttpResponse::Ok().json(json!({ "items": records })),
        Err(e) => {
            error!("failed to list recent diagnoses: {:?}", e);
            HttpResponse::InternalServerError()
                .json(json!({ "error": "Failed to list diagnoses" }))
        }
    }
}

/// When the store is unreachable the handler substitutes zeroed defaults;
/// `store_ok` tells clients those zeros are not real counts.
async fn stats_summary(diagnosis_service: web::Data<DiagnosisService>) -> HttpResponse {
    match diagnosis_service.summary().await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "new_diagnoses": summary.new_diagnoses,
            "positive_flags": summary.positive_flags,
            "store_ok": true,
        })),
        Err(StatsError::Unavailable(detail)) => {
            warn!("stats degraded, diagnosis store unavailable: {}", detail);
            HttpResponse::Ok().json(json!({
                "new_diagnoses": 0,
                "positive_flags": 0,
                "store_ok": false,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dynamodb_repository::DynamoDbRepository;
    use crate::ml::pipeline::PipelineContext;
    use crate::ml::registry::Registry;
    use actix_web::http::header;
    use actix_web::{test, App};
    use aws_sdk_dynamodb::config::retry::RetryConfig;
    use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials, Region};
    use aws_sdk_dynamodb::Client;
    use std::io::Cursor;
    use std::path::Path;

    /// Repository wired to a dead endpoint: requests fail fast and never
    /// leave the machine.
    fn unreachable_repo() -> DynamoDbRepository {
        let conf = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .endpoint_url("http://127.0.0.1:9")
            .build();
        DynamoDbRepository::new(
            Client::from_conf(conf),
            "users".to_string(),
            "patients".to_string(),
            "diagnoses".to_string(),
        )
    }

    fn test_settings(model_root: &Path) -> Settings {
        Settings {
            port: 0,
            model_root: model_root.to_path_buf(),
            jwt_secret: "test".to_string(),
            users_table: "users".to_string(),
            patients_table: "patients".to_string(),
            diagnoses_table: "diagnoses".to_string(),
            cors_origins: Vec::new(),
            inference_timeout_ms: None,
            preload_models: false,
        }
    }

    fn write_skin_cancer_artifacts(root: &Path) {
        let version_dir = root.join("skin_cancer/model/v1");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(
            version_dir.join("model.json"),
            r#"{"arch": "cnn-scaffold", "output_dim": 9, "seed": 41}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("skin_cancer/labels.json"),
            r#"["Actinic Keratosis", "Basal Cell Carcinoma", "Dermatofibroma", "Melanoma",
                "Nevus", "Pigmented Benign Keratosis", "Seborrheic Keratosis",
                "Squamous Cell Carcinoma", "Vascular Lesion"]"#,
        )
        .unwrap();
    }

    fn write_malnutrition_artifacts(root: &Path) {
        let version_dir = root.join("malnutrition/model/v1");
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(
            version_dir.join("model.json"),
            r#"{"arch": "gbdt-scaffold", "output_dim": 4, "seed": 5}"#,
        )
        .unwrap();
        std::fs::write(
            version_dir.join("scaler.json"),
            r#"{"fields": ["Stunting", "Wasting", "Underweight", "Overweight", "U5_Pop_Thousands"],
                "mean": [20.0, 8.0, 15.0, 5.0, 900.0],
                "scale": [10.0, 4.0, 8.0, 3.0, 450.0]}"#,
        )
        .unwrap();
        std::fs::write(
            root.join("malnutrition/labels.json"),
            r#"["Low", "Moderate", "High", "Very High"]"#,
        )
        .unwrap();
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 200) as u8, (y % 200) as u8, 64])
        });
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    fn multipart_body(boundary: &str, file_bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"upload.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(file_bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    macro_rules! test_app {
        ($root:expr) => {{
            let dispatcher = Arc::new(PipelineDispatcher::new(
                Registry::builtin(),
                PipelineContext::new($root),
            ));
            test::init_service(
                App::new()
                    .app_data(web::Data::new(test_settings($root)))
                    .app_data(web::Data::new(dispatcher))
                    .app_data(web::Data::new(DiagnosisService::new(unreachable_repo())))
                    .configure(configure_routes),
            )
            .await
        }};
    }

    #[actix_web::test]
    async fn listing_mirrors_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path());

        let req = test::TestRequest::get().uri("/api/diseases").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let keys: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["key"].as_str().unwrap())
            .collect();
        let expected: Vec<&str> = Registry::builtin().keys().collect();
        assert_eq!(keys, expected);
    }

    #[actix_web::test]
    async fn unknown_disease_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path());

        let req = test::TestRequest::post()
            .uri("/api/diseases/dengue/infer")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn tabular_missing_field_names_it_in_a_client_error() {
        let dir = tempfile::tempdir().unwrap();
        write_malnutrition_artifacts(dir.path());
        let app = test_app!(dir.path());

        let req = test::TestRequest::post()
            .uri("/api/diseases/malnutrition/infer")
            .set_json(serde_json::json!({
                "Stunting": 23.5,
                "Underweight": 16.1,
                "Overweight": 4.4,
                "U5_Pop_Thousands": 812.0,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("Wasting"));
    }

    #[actix_web::test]
    async fn skin_lesion_upload_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        write_skin_cancer_artifacts(dir.path());
        let app = test_app!(dir.path());

        let boundary = "healthlens-test-boundary";
        let req = test::TestRequest::post()
            .uri("/api/diseases/skin_cancer/infer")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(multipart_body(boundary, &png_bytes(224, 224)))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        let probs = body["probs"].as_object().unwrap();
        assert_eq!(probs.len(), 9);
        let sum: f64 = probs.values().map(|v| v.as_f64().unwrap()).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs.contains_key(body["label"].as_str().unwrap()));
        assert_eq!(body["meta"]["version"], "v1");
    }

    #[actix_web::test]
    async fn unloaded_pipeline_is_unavailable_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        // No artifacts on disk: the load fails and the client sees a 503.
        let app = test_app!(dir.path());

        let boundary = "healthlens-test-boundary";
        let req = test::TestRequest::post()
            .uri("/api/diseases/tb/infer")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            ))
            .set_payload(multipart_body(boundary, &png_bytes(32, 32)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.status(),
            actix_web::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[actix_web::test]
    async fn stats_degrade_explicitly_when_store_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app!(dir.path());

        let req = test::TestRequest::get()
            .uri("/api/stats/summary")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["store_ok"], false);
        assert_eq!(body["new_diagnoses"], 0);
    }

    #[actix_web::test]
    async fn explain_reports_unsupported_by_default() {
        let dir = tempfile::tempdir().unwrap();
        write_malnutrition_artifacts(dir.path());
        let app = test_app!(dir.path());

        let req = test::TestRequest::post()
            .uri("/api/diseases/malnutrition/explain")
            .set_json(serde_json::json!({
                "Stunting": 23.5,
                "Wasting": 7.2,
                "Underweight": 16.1,
                "Overweight": 4.4,
                "U5_Pop_Thousands": 812.0,
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["explainable"], false);
    }
}
