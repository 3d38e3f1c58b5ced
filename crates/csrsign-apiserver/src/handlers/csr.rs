use crate::handlers::common::{get_resource, ListResponse};
use crate::response::{status_deleted, ApiResponse};
use crate::validation::{validate_name, validate_resource};
use crate::watch::{watch_resource_stream, WatchParams};
use crate::{ApiError, AppState, Result};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use csrsign_core::csr::{csr_gvk, csr_key, issued_certificate, record_decision};
use csrsign_core::k8s_openapi::ByteString;
use csrsign_core::{ApprovalDecision, CertificateSigningRequest, Resource, ResourceVersion};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

/// GET /apis/certificates.k8s.io/v1/certificatesigningrequests/{name}
pub async fn get_csr(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response> {
    let csr: CertificateSigningRequest = get_resource(&state, &csr_key(name))?;
    Ok(ApiResponse::ok(csr).into_response())
}

/// GET /apis/certificates.k8s.io/v1/certificatesigningrequests
pub async fn list_csrs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WatchParams>,
) -> Result<Response> {
    if params.is_watch() {
        return Ok(watch_resource_stream(&state, csr_gvk()).into_response());
    }

    let csrs: Vec<CertificateSigningRequest> = state.store.list(&csr_gvk(), None)?;
    let response = ListResponse::new(
        "certificates.k8s.io/v1",
        "CertificateSigningRequestList",
        csrs,
    );

    Ok(ApiResponse::ok(response).into_response())
}

/// POST /apis/certificates.k8s.io/v1/certificatesigningrequests
pub async fn create_csr(
    State(state): State<Arc<AppState>>,
    Json(mut csr): Json<CertificateSigningRequest>,
) -> Result<Response> {
    // Status is owned by approvers and the signer, never by the creator
    csr.status = None;
    csr.metadata.resource_version = None;
    validate_resource(&csr)?;

    let created = state.store.create(csr)?;
    info!(
        csr = created.metadata.name.as_deref().unwrap_or_default(),
        signer_name = %created.spec.signer_name,
        "Created CSR"
    );

    Ok(ApiResponse::created(created).into_response())
}

/// DELETE /apis/certificates.k8s.io/v1/certificatesigningrequests/{name}
pub async fn delete_csr(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response> {
    let _: CertificateSigningRequest = state.store.delete(&csr_key(name.clone()))?;
    info!(csr = %name, "Deleted CSR");

    Ok(status_deleted(&name, "CertificateSigningRequest"))
}

/// PATCH /apis/certificates.k8s.io/v1/certificatesigningrequests/{name}/status
///
/// Body is a JSON merge patch. Only `status` is applied; `metadata.resourceVersion`,
/// if present, is used as a precondition. An issued certificate is immutable.
pub async fn patch_csr_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response> {
    validate_name(&name)?;

    let body = body
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Patch body must be a JSON object".to_string()))?;

    let status = body
        .get("status")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::BadRequest("Patch body needs a status object".to_string()))?;

    if status.contains_key("conditions") {
        return Err(ApiError::BadRequest(
            "Conditions are managed through the approval subresource".to_string(),
        ));
    }

    let key = csr_key(name);
    let current: CertificateSigningRequest = get_resource(&state, &key)?;
    if let Some(requested) = status.get("certificate") {
        check_certificate_unchanged(&current, requested)?;
    }

    // Pin the write to the snapshot that was checked above
    let precondition = body
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
        .map(ResourceVersion::from)
        .or_else(|| current.resource_version());

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::Object(status.clone()));

    let patched: CertificateSigningRequest =
        state.store.patch(&key, precondition.as_ref(), &Value::Object(patch))?;

    Ok(ApiResponse::ok(patched).into_response())
}

/// Once issued, `status.certificate` may only be set again to the same bytes
fn check_certificate_unchanged(
    current: &CertificateSigningRequest,
    requested: &Value,
) -> Result<()> {
    let Some(issued) = issued_certificate(current) else {
        return Ok(());
    };

    let requested: Option<ByteString> = serde_json::from_value(requested.clone())?;
    if requested.as_ref().map(|c| c.0.as_slice()) == Some(issued) {
        return Ok(());
    }

    Err(ApiError::ValidationFailed(format!(
        "status.certificate of CSR {} is already issued and immutable",
        current.metadata.name.as_deref().unwrap_or_default()
    )))
}

/// Body of an approval request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub enum Decision {
    Approved,
    Denied,
}

impl From<Decision> for ApprovalDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => ApprovalDecision::Approve,
            Decision::Denied => ApprovalDecision::Deny,
        }
    }
}

/// PUT /apis/certificates.k8s.io/v1/certificatesigningrequests/{name}/approval
pub async fn approve_csr(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Response> {
    let mut csr: CertificateSigningRequest = get_resource(&state, &csr_key(name.clone()))?;

    let decision = ApprovalDecision::from(request.decision);
    let reason = request.reason.unwrap_or_else(|| match decision {
        ApprovalDecision::Approve => "ApprovedViaAPI".to_string(),
        ApprovalDecision::Deny => "DeniedViaAPI".to_string(),
    });
    let message = request.message.unwrap_or_default();

    if !record_decision(&mut csr, decision, &reason, &message)? {
        return Ok(ApiResponse::ok(csr).into_response());
    }

    // The carried resourceVersion guards against a concurrent decision
    let updated = state.store.update(csr)?;
    info!(csr = %name, decision = %decision, "Recorded approval decision");

    Ok(ApiResponse::ok(updated).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ApiServer, Config};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use csrsign_core::csr::is_approved;
    use csrsign_storage::{RedbBackend, ResourceStore};
    use serde_json::json;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BASE: &str = "/apis/certificates.k8s.io/v1/certificatesigningrequests";

    fn setup() -> (tempfile::TempDir, axum::Router) {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::new(dir.path().join("test.redb")).unwrap();
        let state = Arc::new(AppState::new(ResourceStore::new(Arc::new(backend))));
        let router = ApiServer::new(Config::default(), state).router();
        (dir, router)
    }

    async fn send(router: &axum::Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn manifest(name: &str) -> Value {
        json!({
            "apiVersion": "certificates.k8s.io/v1",
            "kind": "CertificateSigningRequest",
            "metadata": {"name": name},
            "spec": {
                "signerName": "example.com/foo",
                // base64("-----BEGIN CERTIFICATE REQUEST-----\n")
                "request": "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURSBSRVFVRVNULS0tLS0K",
                "usages": ["digital signature", "server auth"]
            },
            "status": {
                "conditions": [{"type": "Approved", "status": "True"}]
            }
        })
    }

    #[tokio::test]
    async fn test_create_get_list_delete() {
        let (_dir, router) = setup();

        let (status, created) = send(&router, Method::POST, BASE, manifest("web-tls")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(created["metadata"]["uid"].is_string());
        // Creators cannot smuggle in an approval
        assert!(created["status"].is_null());

        let (status, _) = send(&router, Method::POST, BASE, manifest("web-tls")).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("{}/web-tls", BASE);
        let (status, fetched) = send(&router, Method::GET, &uri, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["spec"]["signerName"], "example.com/foo");

        let (status, list) = send(&router, Method::GET, BASE, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["kind"], "CertificateSigningRequestList");
        assert_eq!(list["items"].as_array().unwrap().len(), 1);

        let (status, _) = send(&router, Method::DELETE, &uri, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&router, Method::GET, &uri, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "Status");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_csr() {
        let (_dir, router) = setup();

        let mut body = manifest("web-tls");
        body["spec"]["request"] = json!("");
        let (status, _) = send(&router, Method::POST, BASE, body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_approval_is_monotonic() {
        let (_dir, router) = setup();
        send(&router, Method::POST, BASE, manifest("web-tls")).await;
        let uri = format!("{}/web-tls/approval", BASE);

        let (status, approved) =
            send(&router, Method::PUT, &uri, json!({"decision": "Approved"})).await;
        assert_eq!(status, StatusCode::OK);
        let csr: CertificateSigningRequest = serde_json::from_value(approved).unwrap();
        assert!(is_approved(&csr));

        // Repeating the same decision is accepted and changes nothing
        let (status, again) =
            send(&router, Method::PUT, &uri, json!({"decision": "Approved"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            again["metadata"]["resourceVersion"],
            json!(csr.metadata.resource_version)
        );

        let (status, _) = send(&router, Method::PUT, &uri, json!({"decision": "Denied"})).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_status_patch_with_precondition() {
        let (_dir, router) = setup();
        let (_, created) = send(&router, Method::POST, BASE, manifest("web-tls")).await;
        let version = created["metadata"]["resourceVersion"].clone();
        let uri = format!("{}/web-tls/status", BASE);

        let patch = json!({
            "metadata": {"resourceVersion": version},
            "status": {"certificate": "Q0VSVC1EQVRB"}
        });
        let (status, patched) = send(&router, Method::PATCH, &uri, patch.clone()).await;
        assert_eq!(status, StatusCode::OK);
        let csr: CertificateSigningRequest = serde_json::from_value(patched).unwrap();
        assert_eq!(issued_certificate(&csr), Some(&b"CERT-DATA"[..]));

        // Same precondition again is now stale
        let (status, body) = send(&router, Method::PATCH, &uri, patch).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["reason"], "Conflict");
    }

    #[tokio::test]
    async fn test_issued_certificate_is_immutable() {
        let (_dir, router) = setup();
        send(&router, Method::POST, BASE, manifest("web-tls")).await;
        let uri = format!("{}/web-tls/status", BASE);

        let issue = json!({"status": {"certificate": "Q0VSVC1EQVRB"}});
        let (status, _) = send(&router, Method::PATCH, &uri, issue.clone()).await;
        assert_eq!(status, StatusCode::OK);

        // Re-sending the same certificate is accepted
        let (status, _) = send(&router, Method::PATCH, &uri, issue).await;
        assert_eq!(status, StatusCode::OK);

        for change in [
            json!({"status": {"certificate": null}}),
            json!({"status": {"certificate": ""}}),
            // base64("OTHER")
            json!({"status": {"certificate": "T1RIRVI="}}),
        ] {
            let (status, body) = send(&router, Method::PATCH, &uri, change).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(body["reason"], "Invalid");
        }

        let (status, _) = send(&router, Method::PATCH, &uri, json!({"status": null})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, fetched) = send(
            &router,
            Method::GET,
            &format!("{}/web-tls", BASE),
            Value::Null,
        )
        .await;
        let csr: CertificateSigningRequest = serde_json::from_value(fetched).unwrap();
        assert_eq!(issued_certificate(&csr), Some(&b"CERT-DATA"[..]));
    }

    #[tokio::test]
    async fn test_status_patch_on_missing_csr_is_not_found() {
        let (_dir, router) = setup();
        let (status, _) = send(
            &router,
            Method::PATCH,
            &format!("{}/nope/status", BASE),
            json!({"status": {"certificate": "Q0VSVC1EQVRB"}}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_patch_cannot_touch_conditions() {
        let (_dir, router) = setup();
        send(&router, Method::POST, BASE, manifest("web-tls")).await;

        let (status, _) = send(
            &router,
            Method::PATCH,
            &format!("{}/web-tls/status", BASE),
            json!({"status": {"conditions": [{"type": "Approved", "status": "True"}]}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
