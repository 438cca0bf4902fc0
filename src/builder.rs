use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;
use tracing::*;

use crate::{
    config::Config,
    patch::{ArrayCursor, ObjectCursor, PatchOperation},
    resolver::{self, Resolution},
    store::{StoreError, TemplateStore},
    template,
};

/// The only way the Patch Builder fails: a requested template's ConfigMap was
/// not found and `skipOnMissingSidecar=false`.
#[derive(Debug, Error)]
#[error("sidecar configmap {namespace}/{name} was not found")]
pub struct MissingTemplateError {
    pub namespace: String,
    pub name: String,
}

/// Computes the ordered JSON-Patch for a pod creation.
///
/// Returns `Ok(vec![])` when the pod has no inject annotation (P9) or when every
/// requested template contributed no operations. Returns `Err` only for the
/// `skipOnMissingSidecar=false` + missing-ConfigMap case; every other failure
/// mode (transport error, YAML decode error, missing data key) is logged and
/// treated as "this template contributes nothing".
pub async fn build_patch(
    config: &Config,
    namespace: &str,
    pod: &Pod,
    store: &dyn TemplateStore,
) -> Result<Vec<PatchOperation>, MissingTemplateError> {
    let annotations = pod.metadata.annotations.as_ref();
    let Resolution {
        template_names,
        skip_on_missing,
    } = resolver::resolve(config, annotations);

    if template_names.is_empty() {
        return Ok(Vec::new());
    }

    let spec = pod.spec.as_ref();
    let mut init_containers =
        ArrayCursor::new(spec.and_then(|s| s.init_containers.as_ref()).map_or(0, Vec::len));
    let mut containers =
        ArrayCursor::new(spec.map_or(0, |s| s.containers.len()));
    let mut volumes = ArrayCursor::new(spec.and_then(|s| s.volumes.as_ref()).map_or(0, Vec::len));
    let mut image_pull_secrets = ArrayCursor::new(
        spec.and_then(|s| s.image_pull_secrets.as_ref())
            .map_or(0, Vec::len),
    );
    let mut annotation_merge = ObjectCursor::new(pod.metadata.annotations.clone());
    let mut label_merge = ObjectCursor::new(pod.metadata.labels.clone());

    let mut ops = Vec::new();

    for name in &template_names {
        let configmap = match store.get_configmap(namespace, name).await {
            Ok(cm) => cm,
            Err(StoreError::NotFound { namespace, name }) => {
                if skip_on_missing {
                    warn!("sidecar configmap {}/{} was not found", namespace, name);
                    continue;
                } else {
                    return Err(MissingTemplateError { namespace, name });
                }
            }
            Err(StoreError::Other {
                namespace,
                name,
                source,
            }) => {
                error!(
                    "error fetching sidecar configmap {}/{} - {}",
                    namespace, name, source
                );
                continue;
            }
        };

        let Some(data) = configmap.data.as_ref() else {
            continue;
        };
        let Some(payload) = data.get(&config.sidecar_data_key) else {
            continue;
        };

        let sidecars = match template::decode_sidecars(payload) {
            Ok(sidecars) => sidecars,
            Err(e) => {
                error!(
                    "error unmarshalling {} from configmap {}/{}: {}",
                    config.sidecar_data_key, namespace, name, e
                );
                continue;
            }
        };

        for sidecar in &sidecars {
            ops.extend(init_containers.append("/spec/initContainers", &sidecar.init_containers));
            ops.extend(containers.append("/spec/containers", &sidecar.containers));
            ops.extend(volumes.append("/spec/volumes", &sidecar.volumes));
            ops.extend(
                image_pull_secrets.append("/spec/imagePullSecrets", &sidecar.image_pull_secrets),
            );
            ops.extend(label_merge.merge(
                "/metadata/labels",
                &sidecar.labels,
                config.allow_label_overrides,
            ));
            ops.extend(annotation_merge.merge(
                "/metadata/annotations",
                &sidecar.annotations,
                config.allow_annotation_overrides,
            ));
        }
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FixtureTemplateStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config() -> Config {
        Config {
            inject_prefix: "sidecar-injector.example.com".to_string(),
            inject_name: "inject".to_string(),
            sidecar_data_key: "sidecars.yaml".to_string(),
            allow_annotation_overrides: false,
            allow_label_overrides: false,
            skip_on_missing_sidecar_default: true,
            namespace_label: "watch".to_string(),
            server_host: "0.0.0.0".to_string(),
            server_port: 8443,
            tls_cert: "".to_string(),
            tls_key: "".to_string(),
            log_level: "info".to_string(),
        }
    }

    fn pod_with_annotations(annotations: BTreeMap<String, String>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn s1_pod_with_no_annotations_produces_no_patch() {
        let pod = Pod::default();
        let store = FixtureTemplateStore::new();
        let ops = build_patch(&config(), "default", &pod, &store).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn s2_missing_configmap_skip_on_missing_true_produces_no_patch() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sidecar-injector.example.com/inject".to_string(),
            "non-sidecar".to_string(),
        );
        let pod = pod_with_annotations(annotations);
        let store = FixtureTemplateStore::new();
        let ops = build_patch(&config(), "default", &pod, &store).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn missing_configmap_skip_on_missing_false_denies() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sidecar-injector.example.com/inject".to_string(),
            "non-sidecar".to_string(),
        );
        annotations.insert(
            "sidecar-injector.example.com/skipOnMissingSidecar".to_string(),
            "false".to_string(),
        );
        let pod = pod_with_annotations(annotations);
        let store = FixtureTemplateStore::new();
        let err = build_patch(&config(), "default", &pod, &store)
            .await
            .unwrap_err();
        assert_eq!(err.name, "non-sidecar");
    }

    #[tokio::test]
    async fn s3_wrong_data_key_produces_no_patch() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sidecar-injector.example.com/inject".to_string(),
            "my-sidecar".to_string(),
        );
        let pod = pod_with_annotations(annotations);
        let mut data = BTreeMap::new();
        data.insert("wrongKey.yaml".to_string(), "whatever".to_string());
        let store = FixtureTemplateStore::new().with_configmap("default", "my-sidecar", data);
        let ops = build_patch(&config(), "default", &pod, &store).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn s4_empty_string_payload_produces_no_patch() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sidecar-injector.example.com/inject".to_string(),
            "my-sidecar".to_string(),
        );
        let pod = pod_with_annotations(annotations);
        let mut data = BTreeMap::new();
        data.insert("sidecars.yaml".to_string(), "".to_string());
        let store = FixtureTemplateStore::new().with_configmap("default", "my-sidecar", data);
        let ops = build_patch(&config(), "default", &pod, &store).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn s5_labels_absent_annotations_present_empty() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sidecar-injector.example.com/inject".to_string(),
            "my-sidecar".to_string(),
        );
        let mut pod = pod_with_annotations(annotations);
        pod.metadata.annotations.as_mut().unwrap();
        // pod has an (empty) annotations map and no labels map, matching S5.
        let mut data = BTreeMap::new();
        data.insert(
            "sidecars.yaml".to_string(),
            "- annotations:\n    my: annotation\n  labels:\n    my: label\n".to_string(),
        );
        let store = FixtureTemplateStore::new().with_configmap("default", "my-sidecar", data);
        let ops = build_patch(&config(), "default", &pod, &store).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, "/metadata/labels");
        assert_eq!(ops[1].op, "add");
        assert_eq!(ops[1].path, "/metadata/annotations/my");
        assert_eq!(ops[1].value, serde_json::json!("annotation"));
    }

    #[tokio::test]
    async fn s6_multi_template_container_concatenation() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "sidecar-injector.example.com/inject".to_string(),
            "a,b".to_string(),
        );
        let pod = pod_with_annotations(annotations);

        let mut data_a = BTreeMap::new();
        data_a.insert(
            "sidecars.yaml".to_string(),
            "- containers:\n  - name: c1\n    image: img1\n".to_string(),
        );
        let mut data_b = BTreeMap::new();
        data_b.insert(
            "sidecars.yaml".to_string(),
            "- containers:\n  - name: c2\n    image: img2\n".to_string(),
        );
        let store = FixtureTemplateStore::new()
            .with_configmap("default", "a", data_a)
            .with_configmap("default", "b", data_b);

        let ops = build_patch(&config(), "default", &pod, &store).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path, "/spec/containers");
        assert_eq!(ops[0].value[0]["name"], "c1");
        assert_eq!(ops[1].path, "/spec/containers/-");
        assert_eq!(ops[1].value["name"], "c2");
    }
}
