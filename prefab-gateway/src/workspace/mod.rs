//! Per-job scratch workspaces.
//!
//! In staging mode each call gets a directory under the configured root:
//! `InputFile` references are downloaded into it before invocation and
//! declared `OutputFile` results are uploaded from it afterwards. When no
//! usable root exists the manager runs in pass-through mode for its whole
//! lifetime and file values travel to the unit untouched.

pub mod object_store;

pub use object_store::{
    HttpObjectStore, LocalObjectStore, ObjectRef, ObjectStore, S3Config, SignedHeaders,
};

use prefab_core::{FunctionDescriptor, GatewayError, PrefabResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceMode {
    Staging { root: PathBuf },
    PassThrough,
}

/// One job's scratch area. `dir` is `None` in pass-through mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: String,
    pub dir: Option<PathBuf>,
}

pub struct WorkspaceManager {
    mode: WorkspaceMode,
    store: Arc<dyn ObjectStore>,
}

impl WorkspaceManager {
    /// Staging mode when `root` is given and can be created; pass-through
    /// otherwise.
    pub fn new(root: Option<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        let mode = match root {
            Some(root) => match std::fs::create_dir_all(&root) {
                Ok(()) => {
                    tracing::info!(root = %root.display(), "Workspace staging enabled");
                    WorkspaceMode::Staging { root }
                }
                Err(e) => {
                    tracing::warn!(
                        root = %root.display(),
                        error = %e,
                        "Workspace root unavailable, file staging disabled"
                    );
                    WorkspaceMode::PassThrough
                }
            },
            None => {
                tracing::info!("No workspace root configured, file staging disabled");
                WorkspaceMode::PassThrough
            }
        };
        Self { mode, store }
    }

    pub fn mode(&self) -> &WorkspaceMode {
        &self.mode
    }

    pub fn is_staging(&self) -> bool {
        matches!(self.mode, WorkspaceMode::Staging { .. })
    }

    pub fn root(&self) -> Option<&Path> {
        match &self.mode {
            WorkspaceMode::Staging { root } => Some(root),
            WorkspaceMode::PassThrough => None,
        }
    }

    /// Create a uniquely named workspace, preferring `job_id` as its name.
    pub async fn create(&self, job_id: Option<&str>) -> PrefabResult<Workspace> {
        let id = job_id
            .map(sanitize)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let WorkspaceMode::Staging { root } = &self.mode else {
            return Ok(Workspace { id, dir: None });
        };

        let mut dir = root.join(&id);
        if let Err(e) = tokio::fs::create_dir(&dir).await {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(GatewayError::Unavailable(format!(
                    "failed to create workspace {}: {}",
                    dir.display(),
                    e
                )));
            }
            let unique = format!("{}-{}", id, Uuid::new_v4().simple());
            dir = root.join(&unique);
            tokio::fs::create_dir(&dir).await.map_err(|e| {
                GatewayError::Unavailable(format!(
                    "failed to create workspace {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        tracing::debug!(workspace = %dir.display(), "Created workspace");
        Ok(Workspace { id, dir: Some(dir) })
    }

    /// Download every supplied `InputFile` parameter into the workspace and
    /// replace its value with the local path.
    pub async fn stage_inputs(
        &self,
        workspace: &Workspace,
        function: &FunctionDescriptor,
        inputs: &mut Map<String, Value>,
    ) -> PrefabResult<()> {
        let Some(dir) = &workspace.dir else {
            return Ok(());
        };

        let files: Vec<(String, String)> = function
            .supplied_input_files(inputs)
            .map(|(name, uri)| (name.to_string(), uri.to_string()))
            .collect();

        for (param, uri) in files {
            let object = ObjectRef::parse(&uri)?;
            let local = dir.join(format!("input_{}{}", sanitize(&param), object.extension()));
            let bytes = self.store.download(&object, &local).await?;
            tracing::debug!(param = %param, object = %object, bytes, "Staged input file");
            inputs.insert(param, Value::String(local.to_string_lossy().into_owned()));
        }
        Ok(())
    }

    /// Upload declared `OutputFile` results and replace each value with its
    /// remote reference. Returns the references of every output file
    /// present in `output`.
    pub async fn stage_outputs(
        &self,
        workspace: &Workspace,
        function: &FunctionDescriptor,
        output: &mut Value,
    ) -> PrefabResult<Vec<String>> {
        let Value::Object(fields) = output else {
            return Ok(Vec::new());
        };
        let declared: Vec<String> = function
            .output_file_properties()
            .filter(|name| fields.get(*name).is_some_and(|v| !v.is_null()))
            .map(str::to_string)
            .collect();

        let mut references = Vec::with_capacity(declared.len());
        for name in declared {
            let Some(Value::String(produced)) = fields.get(&name) else {
                return Err(GatewayError::NotFound(format!(
                    "output file '{}' is not a file path",
                    name
                )));
            };
            let Some(dir) = &workspace.dir else {
                references.push(produced.clone());
                continue;
            };

            let local = resolve_output(dir, produced).await.map_err(|e| match e {
                GatewayError::NotFound(_) => GatewayError::NotFound(format!(
                    "output file '{}' was not produced",
                    name
                )),
                other => other,
            })?;
            let ext = local
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| format!(".{}", e))
                .unwrap_or_default();
            let object = ObjectRef::new(
                self.store.output_bucket(),
                format!("outputs/{}/{}{}", workspace.id, Uuid::new_v4(), ext),
            );
            self.store.upload(&local, &object).await?;
            tracing::debug!(property = %name, object = %object, "Uploaded output file");

            let reference = object.to_string();
            fields.insert(name, Value::String(reference.clone()));
            references.push(reference);
        }
        Ok(references)
    }

    /// Best-effort removal. Failures are logged, never returned.
    pub async fn destroy(&self, workspace: Workspace) {
        let Some(dir) = workspace.dir else {
            return;
        };
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(workspace = %dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

/// Locate a produced file inside `dir`. Paths that resolve outside the
/// workspace are refused.
async fn resolve_output(dir: &Path, produced: &str) -> PrefabResult<PathBuf> {
    let candidate = Path::new(produced);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        dir.join(candidate)
    };

    let resolved = match tokio::fs::canonicalize(&candidate).await {
        Ok(p) => p,
        Err(_) => return Err(GatewayError::NotFound(produced.to_string())),
    };
    let root = tokio::fs::canonicalize(dir)
        .await
        .map_err(|e| GatewayError::Internal(format!("workspace vanished: {}", e)))?;
    if !resolved.starts_with(&root) {
        return Err(GatewayError::Authorization(format!(
            "output path {} is outside the workspace",
            produced
        )));
    }
    match tokio::fs::metadata(&resolved).await {
        Ok(meta) if meta.is_file() => Ok(resolved),
        _ => Err(GatewayError::NotFound(produced.to_string())),
    }
}

/// Keep names filesystem-safe.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
