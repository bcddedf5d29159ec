//! Model registration on Vertex AI

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::core::errors::{Result, ServingError};
use crate::core::models::{ImageRef, ModelName};

/// Route the serving container answers predictions on
pub const PREDICT_ROUTE: &str = "/predictions/model";

/// Route the serving container answers health checks on
pub const HEALTH_ROUTE: &str = "/ping";

/// Port the serving container listens on
pub const SERVING_PORT: u16 = 8080;

const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Whether an upload starts a new model or adds a version to an existing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationMode {
    /// No model of this name exists yet
    New,
    /// Add a version under an existing model
    NewVersion {
        /// Resource name of the existing model
        parent: String,
    },
}

/// Everything the registry needs to create a model or model version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUpload {
    /// Display name and, for new models, the model id
    pub model: ModelName,
    /// Serving image
    pub image: ImageRef,
    /// New model or new version
    pub mode: RegistrationMode,
    /// Route answering predictions inside the container
    pub predict_route: String,
    /// Route answering health checks inside the container
    pub health_route: String,
    /// Container port
    pub port: u16,
}

impl ModelUpload {
    /// Upload using the fixed serving routes and port
    pub fn new(model: ModelName, image: ImageRef, mode: RegistrationMode) -> Self {
        Self {
            model,
            image,
            mode,
            predict_route: PREDICT_ROUTE.to_string(),
            health_route: HEALTH_ROUTE.to_string(),
            port: SERVING_PORT,
        }
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    /// Full model resource name
    pub resource_name: String,
    /// Version created by the upload, when reported
    pub version_id: Option<String>,
}

/// Serving platform model registry
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Resource name of an existing model, `NotFound` when there is none
    async fn get_model(&self, model: &ModelName) -> Result<String>;

    /// Upload an image as a model or model version
    async fn upload(&self, upload: &ModelUpload) -> Result<RegisteredModel>;
}

/// Probe the registry; a missing model means a fresh lineage
pub async fn registration_mode(
    registry: &dyn ModelRegistry,
    model: &ModelName,
) -> Result<RegistrationMode> {
    match registry.get_model(model).await {
        Ok(parent) => Ok(RegistrationMode::NewVersion { parent }),
        Err(e) if e.is_not_found() => Ok(RegistrationMode::New),
        Err(e) => Err(e),
    }
}

#[derive(Deserialize)]
struct ModelResource {
    name: String,
}

#[derive(Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<UploadResponse>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    model: String,
    model_version_id: Option<String>,
}

/// Vertex AI model registry client
#[derive(Debug, Clone)]
pub struct VertexRegistry {
    client: reqwest::Client,
    endpoint: String,
    parent: String,
    access_token: String,
    poll_interval: Duration,
}

impl VertexRegistry {
    /// Client for the regional endpoint of `project_id`
    pub fn new(project_id: &str, region: &str, access_token: String) -> Result<Self> {
        if project_id.is_empty() || region.is_empty() {
            return Err(ServingError::ConfigError {
                message: "Vertex AI needs both a project and a region".to_string(),
            });
        }

        Ok(Self {
            client: reqwest::Client::builder().build()?,
            endpoint: format!("https://{}-aiplatform.googleapis.com/v1", region),
            parent: format!("projects/{}/locations/{}", project_id, region),
            access_token,
            poll_interval: OPERATION_POLL_INTERVAL,
        })
    }

    /// Point the client at another endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Delay between polls of a long-running upload
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn upload_body(&self, upload: &ModelUpload) -> serde_json::Value {
        let mut body = json!({
            "model": {
                "displayName": upload.model.as_str(),
                "containerSpec": {
                    "imageUri": upload.image.as_str(),
                    "predictRoute": upload.predict_route,
                    "healthRoute": upload.health_route,
                    "ports": [{ "containerPort": upload.port }],
                },
            },
        });

        match &upload.mode {
            RegistrationMode::New => {
                body["modelId"] = json!(upload.model.as_str());
            }
            RegistrationMode::NewVersion { parent } => {
                body["parentModel"] = json!(parent);
            }
        }
        body
    }

    async fn send(&self, request: reqwest::RequestBuilder, resource: &str) -> Result<reqwest::Response> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| ServingError::NetworkError {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServingError::from_status(status.as_u16(), resource, body))
    }

    async fn wait_for(&self, mut operation: Operation) -> Result<RegisteredModel> {
        loop {
            if let Some(error) = operation.error {
                return Err(ServingError::ApiError {
                    status: u16::try_from(error.code).unwrap_or(500),
                    message: error.message,
                });
            }
            if operation.done {
                let response = operation.response.ok_or_else(|| {
                    ServingError::InvalidResponseError {
                        message: format!("Operation {} finished without a model", operation.name),
                    }
                })?;
                return Ok(RegisteredModel {
                    resource_name: response.model,
                    version_id: response.model_version_id,
                });
            }

            debug!("Waiting for operation {}", operation.name);
            sleep(self.poll_interval).await;

            let url = format!("{}/{}", self.endpoint, operation.name);
            operation = self
                .send(self.client.get(&url), &operation.name)
                .await?
                .json()
                .await?;
        }
    }
}

#[async_trait]
impl ModelRegistry for VertexRegistry {
    async fn get_model(&self, model: &ModelName) -> Result<String> {
        let resource = format!("{}/models/{}", self.parent, model);
        let url = format!("{}/{}", self.endpoint, resource);
        let found: ModelResource = self.send(self.client.get(&url), &resource).await?.json().await?;
        Ok(found.name)
    }

    async fn upload(&self, upload: &ModelUpload) -> Result<RegisteredModel> {
        let url = format!("{}/{}/models:upload", self.endpoint, self.parent);
        info!("Uploading {} to Vertex AI ({:?})", upload.image, upload.mode);

        let operation: Operation = self
            .send(self.client.post(&url).json(&self.upload_body(upload)), &url)
            .await?
            .json()
            .await?;

        self.wait_for(operation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{spawn_router, FakeRegistry};
    use axum::{
        extract::State,
        http::{Method, StatusCode, Uri},
        response::{IntoResponse, Response},
        Json, Router,
    };
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    const PARENT: &str = "projects/proj/locations/europe-west4";
    const OPERATION: &str = "projects/proj/locations/europe-west4/operations/42";

    /// Vertex AI endpoint answering from canned operations
    #[derive(Default)]
    struct FakeVertex {
        existing: Vec<String>,
        forbidden: bool,
        upload_reply: serde_json::Value,
        polls: Mutex<VecDeque<serde_json::Value>>,
        requests: Mutex<Vec<String>>,
        upload_bodies: Mutex<Vec<serde_json::Value>>,
    }

    async fn vertex(
        State(fake): State<Arc<FakeVertex>>,
        method: Method,
        uri: Uri,
        body: String,
    ) -> Response {
        let path = uri.path().trim_start_matches('/').to_string();
        fake.requests.lock().unwrap().push(format!("{} {}", method, path));

        if fake.forbidden {
            return StatusCode::FORBIDDEN.into_response();
        }
        if method == Method::POST && path == format!("{}/models:upload", PARENT) {
            if let Ok(body) = serde_json::from_str(&body) {
                fake.upload_bodies.lock().unwrap().push(body);
            }
            return Json(fake.upload_reply.clone()).into_response();
        }
        if path == OPERATION {
            return match fake.polls.lock().unwrap().pop_front() {
                Some(operation) => Json(operation).into_response(),
                None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            };
        }
        if fake.existing.contains(&path) {
            return Json(json!({ "name": path })).into_response();
        }
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "code": 404, "status": "NOT_FOUND" } })),
        )
            .into_response()
    }

    async fn fake_vertex(fake: FakeVertex) -> (Arc<FakeVertex>, VertexRegistry) {
        let fake = Arc::new(fake);
        let base = spawn_router(Router::new().fallback(vertex).with_state(fake.clone())).await;
        let registry = VertexRegistry::new("proj", "europe-west4", "token".to_string())
            .unwrap()
            .with_endpoint(base)
            .with_poll_interval(Duration::from_millis(1));
        (fake, registry)
    }

    fn pending() -> serde_json::Value {
        json!({ "name": OPERATION, "done": false })
    }

    fn operation_polls(fake: &FakeVertex) -> usize {
        fake.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.ends_with(OPERATION))
            .count()
    }

    fn upload(mode: RegistrationMode) -> ModelUpload {
        let model = ModelName::new("opus-mt-de-en").unwrap();
        let image = ImageRef::new("europe-docker.pkg.dev/proj/serving", &model, "abc");
        ModelUpload::new(model, image, mode)
    }

    #[test]
    fn test_upload_body_for_new_model() {
        let registry = VertexRegistry::new("proj", "europe-west4", "t".to_string()).unwrap();
        let body = registry.upload_body(&upload(RegistrationMode::New));

        assert_eq!(body["modelId"], "opus-mt-de-en");
        assert!(body.get("parentModel").is_none());
        assert_eq!(body["model"]["displayName"], "opus-mt-de-en");
        let spec = &body["model"]["containerSpec"];
        assert_eq!(spec["imageUri"], "europe-docker.pkg.dev/proj/serving/opus-mt-de-en:abc");
        assert_eq!(spec["predictRoute"], "/predictions/model");
        assert_eq!(spec["healthRoute"], "/ping");
        assert_eq!(spec["ports"][0]["containerPort"], 8080);
    }

    #[test]
    fn test_upload_body_for_new_version() {
        let registry = VertexRegistry::new("proj", "europe-west4", "t".to_string()).unwrap();
        let parent = "projects/proj/locations/europe-west4/models/opus-mt-de-en".to_string();
        let body = registry.upload_body(&upload(RegistrationMode::NewVersion {
            parent: parent.clone(),
        }));

        assert_eq!(body["parentModel"], parent.as_str());
        assert!(body.get("modelId").is_none());
    }

    #[tokio::test]
    async fn test_registration_mode_branches() {
        let model = ModelName::new("opus-mt-de-en").unwrap();

        let empty = FakeRegistry::new();
        assert_eq!(
            registration_mode(&empty, &model).await.unwrap(),
            RegistrationMode::New
        );

        let existing = FakeRegistry::with_existing(&["opus-mt-de-en"]);
        assert!(matches!(
            registration_mode(&existing, &model).await.unwrap(),
            RegistrationMode::NewVersion { .. }
        ));

        let broken = FakeRegistry::failing_probe();
        assert!(matches!(
            registration_mode(&broken, &model).await.unwrap_err(),
            ServingError::ApiError { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_model_starts_new_lineage() {
        let model = ModelName::new("opus-mt-de-en").unwrap();
        let (_fake, registry) = fake_vertex(FakeVertex::default()).await;

        assert!(registry.get_model(&model).await.unwrap_err().is_not_found());
        assert_eq!(
            registration_mode(&registry, &model).await.unwrap(),
            RegistrationMode::New
        );
    }

    #[tokio::test]
    async fn test_existing_model_becomes_parent() {
        let model = ModelName::new("opus-mt-de-en").unwrap();
        let resource = format!("{}/models/opus-mt-de-en", PARENT);
        let (_fake, registry) = fake_vertex(FakeVertex {
            existing: vec![resource.clone()],
            ..Default::default()
        })
        .await;

        assert_eq!(
            registration_mode(&registry, &model).await.unwrap(),
            RegistrationMode::NewVersion { parent: resource }
        );
    }

    #[tokio::test]
    async fn test_forbidden_lookup_is_not_a_new_lineage() {
        let model = ModelName::new("opus-mt-de-en").unwrap();
        let (_fake, registry) = fake_vertex(FakeVertex {
            forbidden: true,
            ..Default::default()
        })
        .await;

        assert!(matches!(
            registration_mode(&registry, &model).await.unwrap_err(),
            ServingError::PermissionDenied { .. }
        ));
    }

    #[tokio::test]
    async fn test_upload_polls_until_done() {
        let resource = format!("{}/models/123", PARENT);
        let (fake, registry) = fake_vertex(FakeVertex {
            upload_reply: pending(),
            polls: Mutex::new(VecDeque::from(vec![
                pending(),
                json!({
                    "name": OPERATION,
                    "done": true,
                    "response": { "model": resource, "modelVersionId": "2" },
                }),
            ])),
            ..Default::default()
        })
        .await;

        let registered = registry.upload(&upload(RegistrationMode::New)).await.unwrap();
        assert_eq!(
            registered,
            RegisteredModel {
                resource_name: resource,
                version_id: Some("2".to_string()),
            }
        );
        assert_eq!(operation_polls(&fake), 2);

        let bodies = fake.upload_bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["modelId"], "opus-mt-de-en");
    }

    #[tokio::test]
    async fn test_upload_operation_error() {
        let (fake, registry) = fake_vertex(FakeVertex {
            upload_reply: pending(),
            polls: Mutex::new(VecDeque::from(vec![json!({
                "name": OPERATION,
                "done": true,
                "error": { "code": 5, "message": "image not found" },
            })])),
            ..Default::default()
        })
        .await;

        let err = registry
            .upload(&upload(RegistrationMode::New))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServingError::ApiError { ref message, .. } if message == "image not found"
        ));
        assert_eq!(operation_polls(&fake), 1);
    }

    #[tokio::test]
    async fn test_finished_operation_without_model() {
        let (fake, registry) = fake_vertex(FakeVertex {
            upload_reply: json!({ "name": OPERATION, "done": true }),
            ..Default::default()
        })
        .await;

        let err = registry
            .upload(&upload(RegistrationMode::NewVersion {
                parent: format!("{}/models/opus-mt-de-en", PARENT),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServingError::InvalidResponseError { .. }));
        assert_eq!(operation_polls(&fake), 0);
    }
}
