//! Batch call orchestration.
//!
//! Every call of a batch runs the same pipeline, one call after the other:
//!
//! 1. look the spec up through the [`SpecCache`]
//! 2. resolve the named function
//! 3. validate the inputs against its parameters
//! 4. check read access on every `InputFile` reference
//! 5. resolve declared secrets from the [`Vault`]
//! 6. stage input files into a fresh workspace
//! 7. invoke the unit through a [`UnitInvoker`]
//! 8. stage output files and grant the caller ownership of them
//!
//! A failure anywhere in the pipeline, including a panic, turns into a
//! failed [`CallResult`] for that call only. Only a malformed batch fails
//! the whole request.

use async_trait::async_trait;
use prefab_core::{
    BatchStatus, CallRequest, CallResult, ErrorKind, FunctionDescriptor, GatewayError, Identity,
    PrefabResult, RunRequest, RunResponse, SecretKey, SpecKey,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::acl::Acl;
use crate::config::InvokeConfig;
use crate::constants::MAX_BATCH_CALLS;
use crate::spec_cache::SpecCache;
use crate::telemetry::metrics;
use crate::vault::Vault;
use crate::workspace::{Workspace, WorkspaceManager};

/// Secrets resolved for one call, by declared name.
pub type ResolvedSecrets = BTreeMap<String, SecretString>;

// ============================================================================
// INVOKER
// ============================================================================

/// Transport to a deployed unit.
#[async_trait]
pub trait UnitInvoker: Send + Sync {
    /// Invoke `function_name` on `unit_id`. Any failure to get a successful
    /// JSON answer is [`GatewayError::Unavailable`].
    async fn invoke(
        &self,
        unit_id: &str,
        function_name: &str,
        inputs: &Map<String, Value>,
        secrets: &ResolvedSecrets,
    ) -> PrefabResult<Value>;
}

/// POSTs `{"inputs": ..., "_secrets": ...}` to the unit's cluster address.
pub struct HttpUnitInvoker {
    client: reqwest::Client,
    config: InvokeConfig,
}

impl HttpUnitInvoker {
    pub fn new(config: InvokeConfig) -> PrefabResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &InvokeConfig {
        &self.config
    }

    async fn send(&self, url: &str, unit_id: &str, body: &Value) -> PrefabResult<Value> {
        let response = self.client.post(url).json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Unavailable(format!(
                    "unit '{}' did not answer within {}s",
                    unit_id,
                    self.config.timeout.as_secs()
                ))
            } else {
                GatewayError::Unavailable(format!("unit '{}' is unreachable: {}", unit_id, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!(
                "unit '{}' answered with status {}",
                unit_id, status
            )));
        }
        response.json::<Value>().await.map_err(|e| {
            GatewayError::Unavailable(format!("unit '{}' returned an unreadable body: {}", unit_id, e))
        })
    }
}

#[async_trait]
impl UnitInvoker for HttpUnitInvoker {
    async fn invoke(
        &self,
        unit_id: &str,
        function_name: &str,
        inputs: &Map<String, Value>,
        secrets: &ResolvedSecrets,
    ) -> PrefabResult<Value> {
        let url = self.config.invoke_url(unit_id, function_name);
        let secret_values: Map<String, Value> = secrets
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.expose_secret().to_string())))
            .collect();
        let body = json!({ "inputs": inputs, "_secrets": secret_values });

        let started = Instant::now();
        let result = self.send(&url, unit_id, &body).await;
        let elapsed = started.elapsed().as_secs_f64();
        if let Some(m) = metrics() {
            m.record_invoke(result.is_ok(), elapsed);
        }
        match &result {
            Ok(_) => tracing::debug!(%url, elapsed_secs = elapsed, "Unit invocation succeeded"),
            Err(e) => tracing::warn!(%url, elapsed_secs = elapsed, error = %e, "Unit invocation failed"),
        }
        result
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

#[derive(Clone)]
pub struct Orchestrator {
    specs: Arc<SpecCache>,
    acl: Acl,
    vault: Arc<Vault>,
    workspaces: Arc<WorkspaceManager>,
    invoker: Arc<dyn UnitInvoker>,
}

impl Orchestrator {
    pub fn new(
        specs: Arc<SpecCache>,
        acl: Acl,
        vault: Arc<Vault>,
        workspaces: Arc<WorkspaceManager>,
        invoker: Arc<dyn UnitInvoker>,
    ) -> Self {
        Self {
            specs,
            acl,
            vault,
            workspaces,
            invoker,
        }
    }

    /// Execute a batch. Results are index-aligned with `request.calls`.
    pub async fn run(&self, identity: &Identity, request: RunRequest) -> PrefabResult<RunResponse> {
        if request.calls.is_empty() {
            return Err(GatewayError::Validation(
                "batch must contain at least one call".to_string(),
            ));
        }
        if request.calls.len() > MAX_BATCH_CALLS {
            return Err(GatewayError::Validation(format!(
                "batch may contain at most {} calls",
                MAX_BATCH_CALLS
            )));
        }

        let job_id = Uuid::new_v4().to_string();
        tracing::info!(
            job_id = %job_id,
            user_id = %identity.user_id,
            calls = request.calls.len(),
            "Running batch"
        );

        let mut results = Vec::with_capacity(request.calls.len());
        for (index, call) in request.calls.into_iter().enumerate() {
            let result = self
                .run_isolated(identity.clone(), format!("{}-{}", job_id, index), call)
                .await;
            record_outcome(&result);
            results.push(result);
        }

        let status = BatchStatus::from_results(&results);
        tracing::info!(job_id = %job_id, status = ?status, "Batch finished");
        Ok(RunResponse {
            job_id,
            status,
            results,
        })
    }

    /// Run one call on its own task so that a panic degrades to a failed
    /// result instead of tearing down the request.
    async fn run_isolated(&self, identity: Identity, workspace_id: String, call: CallRequest) -> CallResult {
        let this = self.clone();
        let unit_id = call.unit_id.clone();
        let function_name = call.function_name.clone();
        let joined = tokio::spawn(async move { this.execute(&identity, &workspace_id, call).await }).await;

        let outcome = joined.unwrap_or_else(|e| {
            Err(GatewayError::Internal(format!("call task aborted: {}", e)))
        });
        match outcome {
            Ok(output) => CallResult::success(output),
            Err(err) => {
                match err.kind() {
                    ErrorKind::Internal | ErrorKind::Integrity => tracing::error!(
                        unit_id = %unit_id,
                        function = %function_name,
                        error = %err,
                        "Call failed unexpectedly"
                    ),
                    kind => tracing::info!(
                        unit_id = %unit_id,
                        function = %function_name,
                        code = kind.as_code(),
                        error = %err,
                        "Call failed"
                    ),
                }
                CallResult::failed(&err)
            }
        }
    }

    async fn execute(
        &self,
        identity: &Identity,
        workspace_id: &str,
        call: CallRequest,
    ) -> PrefabResult<Value> {
        let key = SpecKey::new(&call.unit_id, &call.version);
        let spec = self
            .specs
            .get(&key)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("prefab {} is not published", key)))?;
        let function = spec
            .find_function(&call.function_name)
            .cloned()
            .ok_or_else(|| {
                GatewayError::NotFound(format!(
                    "function '{}' not found in {}",
                    call.function_name, key
                ))
            })?;

        function.validate_inputs(&call.inputs)?;

        let input_files: Vec<String> = function
            .supplied_input_files(&call.inputs)
            .map(|(_, uri)| uri.to_string())
            .collect();
        for uri in &input_files {
            self.acl.require_read(&identity.user_id, uri).await?;
        }

        let secrets = self
            .resolve_secrets(&identity.user_id, &call.unit_id, &function)
            .await?;

        let workspace = self.workspaces.create(Some(workspace_id)).await?;
        let outcome = self
            .invoke_in(identity, &workspace, &call, &function, &secrets)
            .await;
        self.workspaces.destroy(workspace).await;
        outcome
    }

    async fn resolve_secrets(
        &self,
        user_id: &str,
        unit_id: &str,
        function: &FunctionDescriptor,
    ) -> PrefabResult<ResolvedSecrets> {
        let mut resolved = ResolvedSecrets::new();
        for declared in &function.secrets {
            let key = SecretKey::new(user_id, unit_id, &declared.name);
            match self.vault.get(&key).await? {
                Some(value) => {
                    resolved.insert(declared.name.clone(), value);
                }
                None if declared.required => {
                    return Err(GatewayError::Configuration(format!(
                        "required secret '{}' is not configured for prefab '{}'",
                        declared.name, unit_id
                    )));
                }
                None => {
                    tracing::debug!(secret_name = %declared.name, unit_id, "Optional secret not configured");
                }
            }
        }
        Ok(resolved)
    }

    async fn invoke_in(
        &self,
        identity: &Identity,
        workspace: &Workspace,
        call: &CallRequest,
        function: &FunctionDescriptor,
        secrets: &ResolvedSecrets,
    ) -> PrefabResult<Value> {
        let mut inputs = call.inputs.clone();
        self.workspaces
            .stage_inputs(workspace, function, &mut inputs)
            .await?;

        let mut output = self
            .invoker
            .invoke(&call.unit_id, &call.function_name, &inputs, secrets)
            .await?;

        let produced = self
            .workspaces
            .stage_outputs(workspace, function, &mut output)
            .await?;
        for reference in &produced {
            self.acl
                .grant_ownership(&identity.user_id, reference)
                .await?;
        }
        Ok(output)
    }
}

fn record_outcome(result: &CallResult) {
    let Some(m) = metrics() else {
        return;
    };
    match &result.error {
        None => m.record_call("SUCCESS", "NONE"),
        Some(err) => m.record_call("FAILED", err.code.as_code()),
    }
}
