use std::env;

/// Process-wide configuration, captured once at startup and passed by value into
/// request handlers. No globals: every handler that needs configuration receives
/// it as `web::Data<Config>`.
#[derive(Clone, Debug)]
pub struct Config {
    pub inject_prefix: String,
    pub inject_name: String,
    pub sidecar_data_key: String,
    pub allow_annotation_overrides: bool,
    pub allow_label_overrides: bool,
    pub skip_on_missing_sidecar_default: bool,
    pub namespace_label: String,
    pub server_host: String,
    pub server_port: u16,
    pub tls_cert: String,
    pub tls_key: String,
    pub log_level: String,
}

impl Config {
    /// The full annotation key pods use to request sidecar injection:
    /// `<InjectPrefix>/<InjectName>`.
    pub fn inject_annotation(&self) -> String {
        format!("{}/{}", self.inject_prefix, self.inject_name)
    }

    /// The auxiliary annotation key controlling whether a missing ConfigMap is
    /// fatal.
    pub fn skip_on_missing_annotation(&self) -> String {
        format!("{}/skipOnMissingSidecar", self.inject_prefix)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inject_prefix: from_env_or_default("INJECT_PREFIX", "sidecar-injector.example.com"),
            inject_name: from_env_or_default("INJECT_NAME", "inject"),
            sidecar_data_key: from_env_or_default("SIDECAR_DATA_KEY", "sidecars.yaml"),
            allow_annotation_overrides: bool_from_env("ALLOW_ANNOTATION_OVERRIDES", false),
            allow_label_overrides: bool_from_env("ALLOW_LABEL_OVERRIDES", false),
            skip_on_missing_sidecar_default: bool_from_env("SKIP_ON_MISSING_SIDECAR", true),
            namespace_label: from_env_or_default(
                "NAMESPACE_LABEL",
                "sidecar-injector.example.com/watch",
            ),
            server_host: from_env_or_default("SERVER_HOST", "0.0.0.0"),
            server_port: from_env_or_default("SERVER_PORT", "8443").parse().unwrap(),
            tls_cert: from_env_or_default("TLS_CERT", "/certs/tls.crt"),
            tls_key: from_env_or_default("TLS_KEY", "/certs/tls.key"),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

// Source the variable from the env - use default if not set
fn from_env_or_default(var: &str, default: &str) -> String {
    let value = env::var(var).unwrap_or_else(|_| default.to_owned());
    if value.is_empty() {
        panic!("{} must be set", var);
    }
    value
}

// Strict boolean parse: "true"/"false" only, anything else is a startup error.
fn bool_from_env(var: &str, default: bool) -> bool {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|_| panic!("{var} must be \"true\" or \"false\", got {value:?}")),
        Err(_) => default,
    }
}
