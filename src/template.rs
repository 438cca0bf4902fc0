use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, LocalObjectReference, Volume};
use serde::Deserialize;

/// A single sidecar template, as authored by operators under a ConfigMap's data
/// key. All fields are optional; a missing field contributes no patch operations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sidecar {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "initContainers")]
    pub init_containers: Vec<Container>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default, rename = "imagePullSecrets")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Decodes a ConfigMap data value into the ordered sequence of sidecar templates
/// it carries. A `null`/empty payload decodes to an empty sequence rather than an
/// error: both are treated as "contribute no operations".
pub fn decode_sidecars(payload: &str) -> Result<Vec<Sidecar>, serde_yaml::Error> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }
    let sidecars: Option<Vec<Sidecar>> = serde_yaml::from_str(payload)?;
    Ok(sidecars.unwrap_or_default())
}
