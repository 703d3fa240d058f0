//! Helm values layering.
//!
//! Final values for a release are built by deep-merging, in order:
//! chart defaults, inline service values, the external values file,
//! local-build or registry image overrides, and runtime overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::{Environment, ResolvedService};

pub type Values = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ValuesError {
    #[error("Failed to read values file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse values file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid values for service '{service}': {}", .problems.join("; "))]
    Invalid {
        service: String,
        problems: Vec<String>,
    },
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Merge `source` into `target`. Maps merge recursively; anything else in
/// `source` replaces what `target` had, including type mismatches.
pub fn deep_merge(target: &mut Values, source: Values) {
    for (key, incoming) in source {
        match incoming {
            Value::Object(incoming) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => deep_merge(existing, incoming),
                _ => {
                    target.insert(key, Value::Object(incoming));
                }
            },
            other => {
                target.insert(key, other);
            }
        }
    }
}

fn object(value: Value) -> Values {
    match value {
        Value::Object(map) => map,
        _ => Values::new(),
    }
}

/// Built-in defaults for the charts plat knows about. A repository prefix
/// (`bitnami/postgresql`) is ignored; unknown charts get nothing.
pub fn chart_defaults(chart: &str) -> Values {
    let kind = chart.rsplit('/').next().unwrap_or(chart);
    match kind {
        "microservice" => object(json!({
            "replicaCount": 1,
            "image": {"pullPolicy": "IfNotPresent"},
            "service": {"type": "ClusterIP", "port": 80},
            "ingress": {"enabled": true, "className": "nginx"},
            "resources": {
                "limits": {"cpu": "500m", "memory": "512Mi"},
                "requests": {"cpu": "100m", "memory": "128Mi"}
            },
            "autoscaling": {"enabled": false}
        })),
        "postgresql" => object(json!({
            "auth": {"postgresPassword": "development", "database": "app"},
            "primary": {"persistence": {"enabled": false}}
        })),
        _ => Values::new(),
    }
}

/// Image settings for a locally built service
pub fn local_overrides(service: &ResolvedService) -> Values {
    let mut overrides = object(json!({
        "image": {"repository": service.name, "tag": "dev", "pullPolicy": "Never"},
        "fullnameOverride": service.name,
        "resources": {"limits": {}, "requests": {}}
    }));

    if let Some(source) = &service.local_source {
        overrides.insert(
            "podAnnotations".to_string(),
            json!({
                "dev.plat.io/local-source": source.path.display().to_string(),
                "dev.plat.io/dockerfile": source.dockerfile,
            }),
        );
    }
    overrides
}

/// Image settings for a service pulled from the registry
pub fn registry_overrides(service: &ResolvedService, env: &Environment) -> Values {
    object(json!({
        "image": {
            "repository": format!("{}/{}", env.defaults.registry, service.name),
            "tag": service.version,
            "pullPolicy": "IfNotPresent"
        }
    }))
}

/// Ingress host, env vars and ports derived from the environment
pub fn runtime_overrides(service: &ResolvedService, env: &Environment) -> Values {
    let mut overrides = Values::new();

    if !env.defaults.domain.is_empty() {
        let host = format!("{}.{}", service.name, env.defaults.domain);
        overrides.insert(
            "ingress".to_string(),
            json!({
                "enabled": true,
                "hosts": [{"host": host, "paths": [{"path": "/", "pathType": "Prefix"}]}]
            }),
        );
    }

    if !service.environment.is_empty() {
        let vars: Vec<Value> = service
            .environment
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        overrides.insert("env".to_string(), Value::Array(vars));
    }

    if let Some(primary) = service.ports.first() {
        overrides.insert("service".to_string(), json!({"port": primary}));

        if service.ports.len() > 1 {
            let ports: Vec<Value> = service
                .ports
                .iter()
                .enumerate()
                .map(|(i, port)| {
                    json!({"name": format!("port-{}", i), "containerPort": port, "protocol": "TCP"})
                })
                .collect();
            overrides.insert("containerPorts".to_string(), Value::Array(ports));
        }
    }

    overrides
}

/// Layer everything except the values file, which the caller has already loaded
pub fn layer_values(
    service: &ResolvedService,
    env: &Environment,
    file_values: Option<Values>,
) -> Values {
    let mut values = chart_defaults(&service.chart.name);
    deep_merge(&mut values, service.values.clone());

    if let Some(file_values) = file_values {
        deep_merge(&mut values, file_values);
    }

    if service.is_local {
        deep_merge(&mut values, local_overrides(service));
        // Merging an empty map cannot remove keys, so clear limits explicitly
        if let Some(Value::Object(resources)) = values.get_mut("resources") {
            resources.insert("limits".to_string(), json!({}));
            resources.insert("requests".to_string(), json!({}));
        }
    } else {
        deep_merge(&mut values, registry_overrides(service, env));
    }

    deep_merge(&mut values, runtime_overrides(service, env));
    values
}

pub fn parse_values_file(content: &str, path: &Path) -> Result<Values, ValuesError> {
    if content.trim().is_empty() {
        return Ok(Values::new());
    }
    let value: Value = serde_yaml::from_str(content).map_err(|e| ValuesError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Values::new()),
        _ => Err(ValuesError::Parse {
            path: path.to_path_buf(),
            message: "top level must be a mapping".to_string(),
        }),
    }
}

/// Sanity-check resolved values. Returns advisory warnings; fails only when
/// the image cannot be determined at all.
pub fn validate_values(
    service: &ResolvedService,
    values: &Values,
) -> Result<Vec<String>, ValuesError> {
    let invalid = |problem: &str| ValuesError::Invalid {
        service: service.name.clone(),
        problems: vec![problem.to_string()],
    };

    match values.get("image") {
        None => return Err(invalid("missing image configuration")),
        Some(Value::Object(image)) => {
            if !image.contains_key("repository") && !image.contains_key("tag") {
                return Err(invalid("image has neither repository nor tag"));
            }
        }
        Some(_) => return Err(invalid("image configuration must be a mapping")),
    }

    let mut warnings = Vec::new();

    if service.is_local
        && values
            .get("ingress")
            .and_then(|i| i.get("enabled"))
            .and_then(Value::as_bool)
            == Some(false)
    {
        warnings.push(format!(
            "local service {} has ingress disabled and may not be reachable",
            service.name
        ));
    }

    if !service.is_local {
        let has_limits = values
            .get("resources")
            .and_then(|r| r.get("limits"))
            .and_then(Value::as_object)
            .map(|limits| !limits.is_empty())
            .unwrap_or(false);
        if !has_limits {
            warnings.push(format!("service {} has no resource limits", service.name));
        }
    }

    if let Some(port) = values
        .get("service")
        .and_then(|s| s.get("port"))
        .and_then(Value::as_i64)
    {
        if !(1..=65535).contains(&port) {
            warnings.push(format!(
                "service {} has invalid port {} (must be 1-65535)",
                service.name, port
            ));
        }
    }

    Ok(warnings)
}

// ============================================================================
// SBIO: I/O wrapper
// ============================================================================

/// Produce the final values for one service's release
pub async fn resolve_values(
    service: &ResolvedService,
    env: &Environment,
) -> Result<Values, ValuesError> {
    let file_values = match &service.values_file {
        Some(file) => {
            let path = env.resolve_path(file);
            let content =
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|source| ValuesError::Io {
                        path: path.clone(),
                        source,
                    })?;
            Some(parse_values_file(&content, &path)?)
        }
        None => None,
    };

    Ok(layer_values(service, env, file_values))
}

/// Resolve and validate every service, collecting problems per service.
/// Services without problems are omitted.
pub async fn validation_report(env: &Environment) -> BTreeMap<String, Vec<String>> {
    let mut report = BTreeMap::new();

    for service in env.services.values() {
        let mut issues = Vec::new();
        match resolve_values(service, env).await {
            Ok(values) => match validate_values(service, &values) {
                Ok(warnings) => issues.extend(warnings),
                Err(e) => issues.push(e.to_string()),
            },
            Err(e) => issues.push(e.to_string()),
        }

        if service.is_local && service.local_source.is_none() {
            issues.push("marked as local but no local source is configured".to_string());
        }

        if !issues.is_empty() {
            for issue in &issues {
                warn!("{}: {}", service.name, issue);
            }
            report.insert(service.name.clone(), issues);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, ExecutionMode, LocalSource};

    fn env() -> Environment {
        Environment::new("shop", ExecutionMode::Artifact, Defaults::default())
    }

    fn map(value: Value) -> Values {
        object(value)
    }

    #[test]
    fn test_deep_merge_nested_maps() {
        let mut target = map(json!({"a": {"x": 1}}));
        deep_merge(&mut target, map(json!({"a": {"y": 2}})));
        assert_eq!(Value::Object(target), json!({"a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn test_deep_merge_type_mismatch_overwrites() {
        let mut target = map(json!({"a": 1}));
        deep_merge(&mut target, map(json!({"a": {"y": 2}})));
        assert_eq!(Value::Object(target), json!({"a": {"y": 2}}));

        let mut target = map(json!({"a": {"y": 2}, "list": [1, 2]}));
        deep_merge(&mut target, map(json!({"a": "flat", "list": [3]})));
        assert_eq!(Value::Object(target), json!({"a": "flat", "list": [3]}));
    }

    #[test]
    fn test_chart_defaults() {
        assert_eq!(chart_defaults("microservice")["replicaCount"], json!(1));
        assert_eq!(
            chart_defaults("bitnami/postgresql")["auth"]["database"],
            json!("app")
        );
        assert!(chart_defaults("redis").is_empty());
    }

    #[test]
    fn test_registry_service_values() {
        let mut service = ResolvedService::new("api", "microservice");
        service.version = "1.4.2".to_string();
        service.values = map(json!({"replicaCount": 3, "image": {"pullPolicy": "Always"}}));
        service.environment = BTreeMap::from([
            ("ZED".to_string(), "z".to_string()),
            ("ALPHA".to_string(), "a".to_string()),
        ]);
        service.ports = vec![8080];

        let values = Value::Object(layer_values(&service, &env(), None));
        assert_eq!(values["replicaCount"], json!(3));
        assert_eq!(
            values["image"],
            json!({"repository": "registry.local/api", "tag": "1.4.2", "pullPolicy": "IfNotPresent"})
        );
        assert_eq!(values["service"], json!({"type": "ClusterIP", "port": 8080}));
        assert_eq!(values["ingress"]["hosts"][0]["host"], json!("api.platform.local"));
        assert_eq!(values["ingress"]["className"], json!("nginx"));
        assert_eq!(values["env"][0]["name"], json!("ALPHA"));
        assert_eq!(values["resources"]["limits"]["cpu"], json!("500m"));
        assert!(values.get("containerPorts").is_none());
    }

    #[test]
    fn test_local_service_values() {
        let mut service = ResolvedService::new("api", "microservice");
        service.is_local = true;
        service.local_source = Some(LocalSource {
            path: PathBuf::from("/src/api"),
            dockerfile: "Dockerfile".to_string(),
            context: ".".to_string(),
            chart: "chart".to_string(),
        });
        service.ports = vec![8080, 9090];

        let values = Value::Object(layer_values(&service, &env(), None));
        assert_eq!(
            values["image"],
            json!({"repository": "api", "tag": "dev", "pullPolicy": "Never"})
        );
        assert_eq!(values["fullnameOverride"], json!("api"));
        assert_eq!(values["resources"], json!({"limits": {}, "requests": {}}));
        assert_eq!(
            values["podAnnotations"]["dev.plat.io/local-source"],
            json!("/src/api")
        );
        assert_eq!(
            values["containerPorts"][1],
            json!({"name": "port-1", "containerPort": 9090, "protocol": "TCP"})
        );
    }

    #[test]
    fn test_no_domain_no_ingress_host() {
        let mut env = env();
        env.defaults.domain = String::new();
        let service = ResolvedService::new("api", "redis");
        let values = layer_values(&service, &env, None);
        assert!(values.get("ingress").is_none());
    }

    #[test]
    fn test_values_file_layer_sits_between_inline_and_image() {
        let mut service = ResolvedService::new("api", "microservice");
        service.values = map(json!({"replicaCount": 2, "image": {"tag": "inline"}}));
        let file = map(json!({"replicaCount": 5, "image": {"tag": "from-file"}}));

        let values = layer_values(&service, &env(), Some(file));
        assert_eq!(values["replicaCount"], json!(5));
        assert_eq!(values["image"]["tag"], json!("latest"));
    }

    #[test]
    fn test_validate_values() {
        let service = ResolvedService::new("api", "redis");

        let warnings = validate_values(&service, &map(json!({"image": {"tag": "1"}}))).unwrap();
        assert_eq!(warnings, vec!["service api has no resource limits"]);

        assert!(matches!(
            validate_values(&service, &map(json!({"image": {"pullPolicy": "Always"}}))),
            Err(ValuesError::Invalid { .. })
        ));
        assert!(validate_values(&service, &Values::new()).is_err());

        let values = map(json!({
            "image": {"repository": "api"},
            "resources": {"limits": {"cpu": "1"}},
            "service": {"port": 70000}
        }));
        let warnings = validate_values(&service, &values).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("invalid port 70000"));
    }

    #[test]
    fn test_validate_local_ingress_disabled() {
        let mut service = ResolvedService::new("api", "microservice");
        service.is_local = true;
        let values = map(json!({"image": {"repository": "api"}, "ingress": {"enabled": false}}));
        let warnings = validate_values(&service, &values).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("ingress disabled"));
    }

    #[tokio::test]
    async fn test_resolve_values_reads_relative_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("api.yml"), "replicaCount: 4\n").unwrap();

        let mut env = env();
        env.config_dir = dir.path().to_path_buf();
        let mut service = ResolvedService::new("api", "microservice");
        service.values_file = Some(PathBuf::from("api.yml"));

        let values = resolve_values(&service, &env).await.unwrap();
        assert_eq!(values["replicaCount"], json!(4));

        service.values_file = Some(PathBuf::from("missing.yml"));
        assert!(matches!(
            resolve_values(&service, &env).await,
            Err(ValuesError::Io { .. })
        ));
    }

    #[test]
    fn test_parse_values_file_rejects_scalars() {
        assert!(parse_values_file("", Path::new("v.yml")).unwrap().is_empty());
        assert!(parse_values_file("- a\n- b\n", Path::new("v.yml")).is_err());
    }
}
