//! OpenAPI Specification for the Prefab Gateway
//!
//! Generated by utoipa from the route annotations and schema derives.
//! Served at `/openapi.json`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::{ApiError, ErrorCode};
use crate::jobs::WorkspaceReclaimSnapshot;
use crate::routes::{admin, files, health, prefabs, run, secrets, webhooks};
use crate::webhook::WebhookAck;

use prefab_core::{
    AccessGrant, AuditEntry, BatchStatus, CallError, CallRequest, CallResult, CallStatus,
    DeploymentStatus, ErrorKind, FunctionDescriptor, ParamDescriptor, ReturnProperty, ReturnShape,
    RunRequest, RunResponse, SecretDescriptor, SecretSummary, SpecDocument, SpecView, UnitSpec,
    WebhookEvent, WebhookPayload,
};

/// OpenAPI document for the gateway.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Prefab Gateway",
        version = "0.1.0",
        description = "Gateway in front of independently deployed prefab units: batch execution, per-user secrets, unit specs and deployment webhooks",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT"),
        contact(name = "Prefab", url = "https://prefab.run")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Run", description = "Batch execution of unit functions"),
        (name = "Secrets", description = "Per-user, per-unit secret vault"),
        (name = "Prefabs", description = "Unit interface specs"),
        (name = "Files", description = "Resources the caller may read"),
        (name = "Admin", description = "Spec inventory, grants, key rotation and audit"),
        (name = "Webhooks", description = "Deployment lifecycle events from the build pipeline"),
        (name = "Health", description = "Liveness and readiness"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        run::run_batch,
        secrets::store_secret,
        secrets::list_secrets,
        secrets::list_unit_secrets,
        secrets::delete_secret,
        prefabs::get_spec,
        prefabs::publish_spec,
        files::list_files,
        admin::list_prefabs,
        admin::delete_prefab,
        admin::create_grant,
        admin::revoke_grant,
        admin::reencrypt_vault,
        admin::query_audit,
        webhooks::receive_factory_event,
        webhooks::get_event,
        health::service_info,
        health::health,
        health::liveness,
        health::readiness,
        crate::telemetry::metrics::metrics_handler,
    ),
    components(
        schemas(
            ApiError, ErrorCode, ErrorKind,
            RunRequest, RunResponse, CallRequest, CallResult, CallStatus, CallError, BatchStatus,
            SpecDocument, SpecView, UnitSpec, FunctionDescriptor, ParamDescriptor,
            ReturnShape, ReturnProperty, SecretDescriptor, DeploymentStatus,
            SecretSummary, AccessGrant, AuditEntry, WebhookPayload, WebhookEvent, WebhookAck,
            WorkspaceReclaimSnapshot,
            secrets::StoreSecretRequest, secrets::ListSecretsResponse,
            prefabs::PublishSpecRequest,
            files::ListFilesResponse,
            admin::ListPrefabsResponse, admin::GrantRequest, admin::ReencryptResponse,
            admin::AuditResponse,
            health::HealthResponse, health::HealthStatus, health::HealthDetails,
            health::ComponentHealth, health::ServiceInfo,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("JWT Bearer token"))
                        .build(),
                ),
            );
        }
    }
}

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() -> Result<(), String> {
        let openapi = ApiDoc::openapi();
        assert_eq!(openapi.info.title, "Prefab Gateway");

        let components = openapi
            .components
            .as_ref()
            .ok_or_else(|| "OpenAPI components missing".to_string())?;
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.schemas.contains_key("RunResponse"));
        Ok(())
    }

    #[test]
    fn test_openapi_paths_exist() {
        let openapi = ApiDoc::openapi();
        for path in [
            "/v1/run",
            "/v1/secrets",
            "/v1/secrets/{unit_id}/{secret_name}",
            "/v1/prefabs/{unit_id}/{version}/spec",
            "/v1/admin/prefabs",
            "/webhooks/factory",
            "/health/ready",
        ] {
            assert!(openapi.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[test]
    fn test_openapi_json_serialization() -> Result<(), String> {
        let json = ApiDoc::to_json().map_err(|e| format!("Failed to serialize OpenAPI: {}", e))?;
        serde_json::from_str::<serde_json::Value>(&json)
            .map_err(|e| format!("Generated JSON invalid: {}", e))?;
        assert!(json.contains("\"bearer_auth\""));
        Ok(())
    }
}
