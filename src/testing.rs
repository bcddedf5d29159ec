//! In-memory collaborators and local HTTP servers for unit tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::core::errors::{Result, ServingError};
use crate::core::models::ModelName;
use crate::core::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::packaging::registry::{ModelRegistry, ModelUpload, RegisteredModel, RegistrationMode};
use crate::storage::ObjectStore;

/// Serve `app` on an ephemeral local port and return its base URL
pub async fn spawn_router(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{}", addr)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    List(String),
    Get(String),
    Put(String),
}

/// Bucket contents keyed by `(bucket, object)`
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    ops: Mutex<Vec<StoreOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, name: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), name.to_string()), data.to_vec());
    }

    pub fn object(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.ops.lock().unwrap().push(StoreOp::List(prefix.to_string()));
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, name)| b == bucket && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>> {
        self.ops.lock().unwrap().push(StoreOp::Get(name.to_string()));
        self.object(bucket, name).ok_or_else(|| ServingError::NotFound {
            resource: format!("gs://{}/{}", bucket, name),
        })
    }

    async fn put(&self, bucket: &str, name: &str, data: Vec<u8>) -> Result<()> {
        self.ops.lock().unwrap().push(StoreOp::Put(name.to_string()));
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), name.to_string()), data);
        Ok(())
    }
}

type FailurePredicate = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

/// Records commands instead of running them
///
/// Archiver invocations write an empty `.mar` into the export path so reruns
/// see the archive.
pub struct RecordingRunner {
    commands: Mutex<Vec<CommandSpec>>,
    fail_when: Option<FailurePredicate>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            fail_when: None,
        }
    }

    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&CommandSpec) -> bool + Send + Sync + 'static,
    {
        Self {
            commands: Mutex::new(Vec::new()),
            fail_when: Some(Box::new(predicate)),
        }
    }

    pub fn failing_on(program: &'static str) -> Self {
        Self::failing_when(move |spec| spec.program == program)
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.program).collect()
    }

    fn flag(spec: &CommandSpec, name: &str) -> Option<String> {
        let prefix = format!("--{}=", name);
        spec.args
            .iter()
            .find_map(|arg| arg.strip_prefix(prefix.as_str()).map(str::to_string))
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.commands.lock().unwrap().push(spec.clone());

        if self.fail_when.as_ref().is_some_and(|fail| fail(spec)) {
            return Ok(CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{} failed", spec.program),
            });
        }

        if spec.program == "torch-model-archiver" {
            if let (Some(export), Some(name)) =
                (Self::flag(spec, "export-path"), Self::flag(spec, "model-name"))
            {
                std::fs::write(PathBuf::from(export).join(format!("{}.mar", name)), b"")?;
            }
        }

        Ok(CommandOutput {
            code: Some(0),
            ..Default::default()
        })
    }
}

/// Registry keeping models in memory
pub struct FakeRegistry {
    existing: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<ModelUpload>>,
    probe_fails: bool,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self {
            existing: Mutex::new(HashSet::new()),
            uploads: Mutex::new(Vec::new()),
            probe_fails: false,
        }
    }

    pub fn with_existing(models: &[&str]) -> Self {
        let registry = Self::new();
        registry
            .existing
            .lock()
            .unwrap()
            .extend(models.iter().map(|m| m.to_string()));
        registry
    }

    pub fn failing_probe() -> Self {
        Self {
            probe_fails: true,
            ..Self::new()
        }
    }

    pub fn uploads(&self) -> Vec<ModelUpload> {
        self.uploads.lock().unwrap().clone()
    }

    fn resource(model: &ModelName) -> String {
        format!("projects/proj/locations/europe-west4/models/{}", model)
    }
}

#[async_trait]
impl ModelRegistry for FakeRegistry {
    async fn get_model(&self, model: &ModelName) -> Result<String> {
        if self.probe_fails {
            return Err(ServingError::ApiError {
                status: 500,
                message: "registry unavailable".to_string(),
            });
        }
        if self.existing.lock().unwrap().contains(model.as_str()) {
            Ok(Self::resource(model))
        } else {
            Err(ServingError::NotFound {
                resource: Self::resource(model),
            })
        }
    }

    async fn upload(&self, upload: &ModelUpload) -> Result<RegisteredModel> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(upload.clone());
        let version = uploads
            .iter()
            .filter(|u| u.model == upload.model)
            .count();
        drop(uploads);

        if upload.mode == RegistrationMode::New {
            self.existing
                .lock()
                .unwrap()
                .insert(upload.model.to_string());
        }

        Ok(RegisteredModel {
            resource_name: Self::resource(&upload.model),
            version_id: Some(version.to_string()),
        })
    }
}
