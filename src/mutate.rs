use std::collections::HashSet;
use std::sync::Arc;

use actix_web::{http::StatusCode, post, web, HttpRequest, HttpResponse, Responder};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    TypeMeta,
};
use kube::Client;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::*;

use crate::{builder, config::Config, metrics, store::KubeTemplateStore, telemetry};

const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

/// Transport-level failures the Admission Gateway can hit before an
/// `AdmissionRequest` is even available to route.
#[derive(Debug, Error)]
enum GatewayError {
    #[error("wrong http verb, got {0}")]
    BadMethod(String),
    #[error("empty body")]
    EmptyBody,
    #[error("wrong content type, expected 'application/json', got '{0}'")]
    BadContentType(String),
    #[error("could not decode body: {0}")]
    Undecodable(#[from] serde_json::Error),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadMethod(_)
            | GatewayError::EmptyBody
            | GatewayError::BadContentType(_) => StatusCode::BAD_REQUEST,
            GatewayError::Undecodable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn type_meta() -> TypeMeta {
    TypeMeta {
        api_version: ADMISSION_API_VERSION.to_string(),
        kind: "AdmissionReview".to_string(),
    }
}

fn wrap(response: AdmissionResponse, request: Option<AdmissionRequest<Pod>>) -> AdmissionReview<Pod> {
    AdmissionReview {
        types: type_meta(),
        request,
        response: Some(response),
    }
}

/// The transport-failure envelope: no uid to echo yet, so `result.code`
/// mirrors the HTTP status that the response itself carries.
fn error_envelope(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    let review: AdmissionReview<Pod> = AdmissionReview {
        types: type_meta(),
        request: None,
        response: Some(AdmissionResponse::invalid(message.into())),
    };
    HttpResponse::build(status).json(review)
}

/// Converts our hand-built [`crate::patch::PatchOperation`] sequence into the
/// `json-patch` crate's `Patch`, the only type `AdmissionResponse::with_patch`
/// accepts. The patch primitives in [`crate::patch`] are built directly against
/// the RFC 6902/6901 contract rather than via `json_patch::diff` (as the
/// original handler did), because the array-first / array-append distinction
/// is not expressible as the output of a generic object diff.
fn to_json_patch(ops: Vec<crate::patch::PatchOperation>) -> json_patch::Patch {
    use json_patch::{AddOperation, PatchOperation as JsonPatchOperation, ReplaceOperation};

    json_patch::Patch(
        ops.into_iter()
            .map(|op| {
                let pointer: jsonptr::PointerBuf = op
                    .path
                    .parse()
                    .expect("patch builder only ever emits valid JSON pointers");
                match op.op {
                    "add" => JsonPatchOperation::Add(AddOperation {
                        path: pointer,
                        value: op.value,
                    }),
                    "replace" => JsonPatchOperation::Replace(ReplaceOperation {
                        path: pointer,
                        value: op.value,
                    }),
                    other => unreachable!("patch builder never emits op {other:?}"),
                }
            })
            .collect(),
    )
}

#[instrument(skip(body, client, config, namespaces), fields(trace_id))]
#[post("/mutate")]
async fn mutate(
    req: HttpRequest,
    body: web::Bytes,
    config: web::Data<Config>,
    namespaces: web::Data<Arc<RwLock<HashSet<String>>>>,
    client: web::Data<Arc<Client>>,
) -> impl Responder {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));

    if let Err(e) = validate_transport(&req, &body) {
        return error_envelope(e.status(), e.to_string());
    }

    let review: AdmissionReview<Pod> = match serde_json::from_slice(&body).map_err(GatewayError::Undecodable) {
        Ok(review) => review,
        Err(e) => return error_envelope(e.status(), e.to_string()),
    };

    let Some(request) = review.request else {
        return error_envelope(StatusCode::INTERNAL_SERVER_ERROR, "expected AdmissionRequest");
    };

    debug!(
        "AdmissionReview for Kind={:?} Namespace={:?} Name={:?} UID={} Operation={:?}",
        request.kind, request.namespace, request.name, request.uid, request.operation
    );

    // Only Pods in a watched namespace are ever considered, mirroring the
    // namespace watcher's original pre-filter.
    let namespace = request.namespace.clone().unwrap_or_default();
    if !namespaces.read().await.contains(&namespace) {
        debug!("namespace {} is not in the watched set", namespace);
        return HttpResponse::Ok().json(wrap(AdmissionResponse::from(&request), Some(request)));
    }
    if !request.kind.group.is_empty() || request.kind.version != "v1" || request.kind.kind != "Pod" {
        debug!(
            "skipping resource group={} version={} kind={}",
            request.kind.group, request.kind.version, request.kind.kind
        );
        return HttpResponse::Ok().json(wrap(AdmissionResponse::from(&request), Some(request)));
    }

    let op_label = format!("{:?}", request.operation);
    let start = std::time::Instant::now();

    let response = match request.operation {
        Operation::Create => handle_create(&config, &client, &request, &namespace).await,
        Operation::Update => {
            let mut response = AdmissionResponse::from(&request);
            response.result.message = "update handled".to_string();
            response
        }
        Operation::Delete => {
            let mut response = AdmissionResponse::from(&request);
            response.result.message = "delete handled".to_string();
            response
        }
        Operation::Connect => {
            let mut response = AdmissionResponse::from(&request);
            response.result.message = "operation not supported".to_string();
            response
        }
    };

    metrics::observe_request_duration(&namespace, &op_label, "Pod", start.elapsed().as_secs_f64());
    metrics::increment_request_counter(
        &namespace,
        &op_label,
        "Pod",
        if response.allowed { "allowed" } else { "denied" },
    );

    HttpResponse::Ok().json(wrap(response, Some(request)))
}

fn validate_transport(req: &HttpRequest, body: &web::Bytes) -> Result<(), GatewayError> {
    if req.method() != actix_web::http::Method::POST {
        return Err(GatewayError::BadMethod(req.method().to_string()));
    }
    if body.is_empty() {
        return Err(GatewayError::EmptyBody);
    }
    let content_type = req
        .headers()
        .get("Content-Type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/json" {
        return Err(GatewayError::BadContentType(content_type.to_string()));
    }
    Ok(())
}

async fn handle_create(
    config: &Config,
    client: &Client,
    request: &AdmissionRequest<Pod>,
    namespace: &str,
) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    let Some(pod) = request.object.as_ref() else {
        return response.deny("expected pod object");
    };

    let store = KubeTemplateStore::new(client.clone());
    match builder::build_patch(config, namespace, pod, &store).await {
        Ok(ops) if ops.is_empty() => response,
        Ok(ops) => {
            for op in &ops {
                if let Some(field) = op.path.trim_start_matches('/').split('/').nth(1) {
                    metrics::increment_patch_ops(namespace, field);
                }
            }
            metrics::increment_mutation_counter(namespace, "Pod", "sidecar_injection");
            match response.with_patch(to_json_patch(ops)) {
                Ok(response) => response,
                Err(e) => {
                    error!("failed to serialize patch: {e}");
                    metrics::increment_error_counter(namespace, "patch_serialize");
                    AdmissionResponse::from(request)
                        .deny(format!("failed to serialize patch: {e}"))
                }
            }
        }
        Err(e) => {
            warn!("denying admission request: {e}");
            metrics::increment_error_counter(namespace, "missing_template");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_meta_is_admission_v1() {
        let tm = type_meta();
        assert_eq!(tm.api_version, "admission.k8s.io/v1");
        assert_eq!(tm.kind, "AdmissionReview");
    }

    #[test]
    fn converts_add_and_replace_ops() {
        let ops = vec![
            crate::patch::PatchOperation {
                op: "add",
                path: "/metadata/labels".to_string(),
                value: serde_json::json!({"a": "b"}),
            },
            crate::patch::PatchOperation {
                op: "replace",
                path: "/metadata/annotations/a".to_string(),
                value: serde_json::json!("c"),
            },
        ];
        let patch = to_json_patch(ops);
        assert_eq!(patch.0.len(), 2);
    }
}
