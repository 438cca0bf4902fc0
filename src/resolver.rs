use std::collections::BTreeMap;

use crate::config::Config;

/// The list of named templates a pod asked for, plus the resolved
/// skip-on-missing policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub template_names: Vec<String>,
    pub skip_on_missing: bool,
}

/// Reads the inject annotation and the auxiliary skip-on-missing annotation off
/// a pod's annotation map and returns the resolved policy. Returns `None`
/// template_names (empty vec) when the inject annotation is absent — callers
/// short-circuit to an empty patch in that case.
pub fn resolve(config: &Config, annotations: Option<&BTreeMap<String, String>>) -> Resolution {
    let empty = BTreeMap::new();
    let annotations = annotations.unwrap_or(&empty);

    let template_names = match annotations.get(&config.inject_annotation()) {
        Some(value) => split_template_names(value),
        None => Vec::new(),
    };

    let skip_on_missing = match annotations.get(&config.skip_on_missing_annotation()) {
        Some(value) => value
            .parse()
            .unwrap_or(config.skip_on_missing_sidecar_default),
        None => config.skip_on_missing_sidecar_default,
    };

    Resolution {
        template_names,
        skip_on_missing,
    }
}

/// Splits a comma-separated annotation value into trimmed template names.
/// Empty components (e.g. from `"a,,b"` or a trailing comma) are kept, not
/// dropped, matching `configmapSidecarNames` in the original implementation.
fn split_template_names(value: &str) -> Vec<String> {
    value.split(',').map(|part| part.trim().to_string()).collect()
}
