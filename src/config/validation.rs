//! Pre-deployment validation of the config files.
//!
//! Every problem is collected so the user sees them all at once.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::environment::{EnvironmentConfig, LocalConfig, ServiceSpec, API_VERSION, KIND};

/// One problem found in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub value: Option<String>,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
            message: message.into(),
        }
    }

    fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} ({}): {}", self.field, value, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// All problems found in one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => Ok(()),
            [single] => write!(f, "{}", single),
            many => {
                writeln!(f, "{} validation errors:", many.len())?;
                for (i, error) in many.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, error)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Lowercase alphanumerics and hyphens, starting and ending alphanumeric, at most 63 chars
pub fn is_kubernetes_safe_name(name: &str) -> bool {
    name.len() <= 63
        && Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
            .map(|re| re.is_match(name))
            .unwrap_or(false)
}

pub fn is_valid_env_var_name(name: &str) -> bool {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Find one dependency cycle, returned as the path that closes it
/// (e.g. `["a", "b", "a"]`). Unknown dependency names are ignored.
pub fn find_cycle(graph: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        graph: &BTreeMap<String, Vec<String>>,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node.to_string(), Mark::Visiting);
        path.push(node.to_string());
        for dep in graph.get(node).into_iter().flatten() {
            if graph.contains_key(dep) {
                if let Some(cycle) = visit(dep, graph, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(node.to_string(), Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for node in graph.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, graph, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Validate `.plat/config.yml`. Relative values files are checked against `config_dir`.
pub fn validate_config(
    config: &EnvironmentConfig,
    config_dir: &Path,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if config.api_version.is_empty() {
        errors.push(ValidationError::new("apiVersion", "apiVersion is required"));
    } else if config.api_version != API_VERSION {
        errors.push(
            ValidationError::new(
                "apiVersion",
                format!("unsupported apiVersion, expected '{}'", API_VERSION),
            )
            .with_value(&config.api_version),
        );
    }

    if config.kind.is_empty() {
        errors.push(ValidationError::new("kind", "kind is required"));
    } else if config.kind != KIND {
        errors.push(
            ValidationError::new("kind", format!("unsupported kind, expected '{}'", KIND))
                .with_value(&config.kind),
        );
    }

    if config.name.is_empty() {
        errors.push(ValidationError::new("name", "name is required"));
    } else if !is_kubernetes_safe_name(&config.name) {
        errors.push(
            ValidationError::new(
                "name",
                "must be a valid Kubernetes name (lowercase alphanumerics and hyphens)",
            )
            .with_value(&config.name),
        );
    }

    if let Some(namespace) = config.defaults.namespace.as_deref() {
        if !namespace.is_empty() && !is_kubernetes_safe_name(namespace) {
            errors.push(
                ValidationError::new("defaults.namespace", "invalid namespace").with_value(namespace),
            );
        }
    }

    if config.services.is_empty() {
        errors.push(ValidationError::new(
            "services",
            "at least one service is required",
        ));
    }

    let names: HashSet<&str> = config.services.iter().map(ServiceSpec::name).collect();
    let mut seen = HashSet::new();
    for (i, spec) in config.services.iter().enumerate() {
        let prefix = format!("services[{}]", i);
        let name = spec.name();

        if name.is_empty() {
            errors.push(ValidationError::new(
                format!("{}.name", prefix),
                "service name cannot be empty",
            ));
        } else if !is_kubernetes_safe_name(name) {
            errors.push(
                ValidationError::new(format!("{}.name", prefix), "invalid service name")
                    .with_value(name),
            );
        }

        if !name.is_empty() && !seen.insert(name) {
            errors.push(ValidationError::new(prefix.clone(), "duplicate service name").with_value(name));
        }

        let ServiceSpec::Detailed(def) = spec else {
            continue;
        };

        for (j, port) in def.ports.iter().enumerate() {
            if !(1..=65535).contains(port) {
                errors.push(
                    ValidationError::new(
                        format!("{}.ports[{}]", prefix, j),
                        "port must be between 1 and 65535",
                    )
                    .with_value(port.to_string()),
                );
            }
        }

        for key in def.environment.keys() {
            if !is_valid_env_var_name(key) {
                errors.push(
                    ValidationError::new(
                        format!("{}.environment", prefix),
                        "invalid environment variable name",
                    )
                    .with_value(key),
                );
            }
        }

        for dep in &def.dependencies {
            if dep == name {
                errors.push(
                    ValidationError::new(
                        format!("{}.dependencies", prefix),
                        "service cannot depend on itself",
                    )
                    .with_value(dep),
                );
            } else if !names.contains(dep.as_str()) {
                errors.push(
                    ValidationError::new(
                        format!("{}.dependencies", prefix),
                        "depends on an undefined service",
                    )
                    .with_value(dep),
                );
            }
        }

        if let Some(file) = def.values_file.as_deref().filter(|f| !f.is_empty()) {
            let path = super::environment::expand_path(file);
            let path = if path.is_absolute() {
                path
            } else {
                config_dir.join(path)
            };
            if !path.exists() {
                errors.push(
                    ValidationError::new(
                        format!("{}.values_file", prefix),
                        "values file does not exist",
                    )
                    .with_value(file),
                );
            }
        }
    }

    let graph: BTreeMap<String, Vec<String>> = config
        .services
        .iter()
        .map(|spec| {
            let deps = match spec {
                ServiceSpec::Detailed(def) => def
                    .dependencies
                    .iter()
                    .filter(|d| d.as_str() != def.name)
                    .cloned()
                    .collect(),
                ServiceSpec::Simple(_) => Vec::new(),
            };
            (spec.name().to_string(), deps)
        })
        .collect();
    if let Some(cycle) = find_cycle(&graph) {
        errors.push(
            ValidationError::new("services", "dependency cycle detected").with_value(cycle.join(" -> ")),
        );
    }

    errors.into_result()
}

/// Validate `.plat/local.yml`
pub fn validate_local(local: &LocalConfig) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    for (name, source) in &local.local_sources {
        let prefix = format!("local_sources[{}]", name);
        if !is_kubernetes_safe_name(name) {
            errors.push(ValidationError::new(prefix.clone(), "invalid service name").with_value(name));
        }
        if source.path().trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.path", prefix), "path is required"));
        }
    }

    errors.into_result()
}

/// Local sources naming services the environment does not define
pub fn unused_local_sources(config: &EnvironmentConfig, local: &LocalConfig) -> Vec<String> {
    let names: BTreeSet<&str> = config.services.iter().map(ServiceSpec::name).collect();
    local
        .local_sources
        .keys()
        .filter(|name| !names.contains(name.as_str()))
        .cloned()
        .collect()
}
