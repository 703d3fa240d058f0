//! Environment model: the on-disk config shapes and the resolved form the
//! orchestrator consumes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const API_VERSION: &str = "plat/v1";
pub const KIND: &str = "Environment";

pub const DEFAULT_REGISTRY: &str = "registry.local";
pub const DEFAULT_DOMAIN: &str = "platform.local";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_CHART: &str = "microservice";
pub const DEFAULT_VERSION: &str = "latest";

/// Whether services are built from local source or pulled as published artifacts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    #[default]
    Artifact,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Artifact => write!(f, "artifact"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "artifact" => Ok(Self::Artifact),
            other => Err(format!(
                "invalid mode '{}', must be 'local' or 'artifact'",
                other
            )),
        }
    }
}

// ============================================================================
// On-disk shapes (.plat/config.yml, .plat/local.yml)
// ============================================================================

/// `.plat/config.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
}

/// A service entry: either just a name or a full definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceSpec {
    Simple(String),
    Detailed(ServiceDefinition),
}

impl ServiceSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(name) => name,
            Self::Detailed(def) => &def.name,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Detailed(ServiceDefinition {
                version: Some(version),
                ..
            }) if !version.is_empty() => version,
            _ => DEFAULT_VERSION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<ChartRef>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub values: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u32>,
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Which chart a service is deployed with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ChartRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// `.plat/local.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub local_sources: BTreeMap<String, LocalSourceSpec>,
}

/// A local checkout: either a bare path or a full definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalSourceSpec {
    Simple(String),
    Detailed {
        #[serde(default)]
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        dockerfile: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        chart: Option<String>,
    },
}

impl LocalSourceSpec {
    pub fn path(&self) -> &str {
        match self {
            Self::Simple(path) => path,
            Self::Detailed { path, .. } => path,
        }
    }

    /// Apply the conventions (Dockerfile, build context `.`, chart dir `chart`)
    pub fn resolve(&self) -> LocalSource {
        let (dockerfile, context, chart) = match self {
            Self::Simple(_) => (None, None, None),
            Self::Detailed {
                dockerfile,
                context,
                chart,
                ..
            } => (dockerfile.clone(), context.clone(), chart.clone()),
        };
        let non_empty = |v: Option<String>, fallback: &str| {
            v.filter(|s| !s.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        LocalSource {
            path: expand_path(self.path()),
            dockerfile: non_empty(dockerfile, "Dockerfile"),
            context: non_empty(context, "."),
            chart: non_empty(chart, "chart"),
        }
    }
}

/// Accept `KEY: 8080` and `KEY: true` as well as strings
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Null => String::new(),
                other => {
                    return Err(<D::Error as serde::de::Error>::custom(format!(
                        "environment variable '{}' must be a scalar, got {:?}",
                        key, other
                    )))
                }
            };
            Ok((key, text))
        })
        .collect()
}

/// Tilde-expand a user supplied path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

// ============================================================================
// Resolved model
// ============================================================================

/// Environment-wide defaults after fallbacks are applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    pub registry: String,
    /// Empty disables ingress host synthesis
    pub domain: String,
    pub namespace: String,
    pub chart: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            chart: DEFAULT_CHART.to_string(),
        }
    }
}

impl From<&DefaultsConfig> for Defaults {
    fn from(config: &DefaultsConfig) -> Self {
        let pick = |v: &Option<String>, fallback: &str| {
            v.as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(fallback)
                .to_string()
        };
        Self {
            registry: pick(&config.registry, DEFAULT_REGISTRY),
            domain: pick(&config.domain, DEFAULT_DOMAIN),
            namespace: pick(&config.namespace, DEFAULT_NAMESPACE),
            chart: pick(&config.chart, DEFAULT_CHART),
        }
    }
}

/// Build provenance for a locally built service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSource {
    pub path: PathBuf,
    pub dockerfile: String,
    pub context: String,
    pub chart: String,
}

/// A service with config, defaults and local overrides applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedService {
    /// Also the helm release name
    pub name: String,
    pub version: String,
    pub is_local: bool,
    pub local_source: Option<LocalSource>,
    pub chart: ChartRef,
    pub values: Map<String, Value>,
    pub values_file: Option<PathBuf>,
    pub ports: Vec<u32>,
    pub environment: BTreeMap<String, String>,
    pub dependencies: Vec<String>,
}

impl ResolvedService {
    /// A published service on the given chart with no extra settings
    pub fn new(name: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: DEFAULT_VERSION.to_string(),
            chart: ChartRef::named(chart),
            ..Default::default()
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn release_name(&self) -> &str {
        &self.name
    }
}

/// One local development stack, immutable for the duration of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub mode: ExecutionMode,
    pub defaults: Defaults,
    pub services: BTreeMap<String, ResolvedService>,
    pub loaded_at: DateTime<Utc>,
    /// Directory of the config file; relative values files resolve against it
    pub config_dir: PathBuf,
}

impl Environment {
    pub fn new(name: impl Into<String>, mode: ExecutionMode, defaults: Defaults) -> Self {
        Self {
            name: name.into(),
            mode,
            defaults,
            services: BTreeMap::new(),
            loaded_at: Utc::now(),
            config_dir: PathBuf::from("."),
        }
    }

    pub fn with_service(mut self, service: ResolvedService) -> Self {
        self.services.insert(service.name.clone(), service);
        self
    }

    pub fn service(&self, name: &str) -> Option<&ResolvedService> {
        self.services.get(name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn namespace(&self) -> &str {
        &self.defaults.namespace
    }

    /// Resolve a possibly relative path against the config directory
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// Restrict to `names` plus everything they transitively depend on.
    /// Returns the unknown names on failure.
    pub fn subset(&self, names: &[String]) -> Result<Environment, Vec<String>> {
        let unknown: Vec<String> = names
            .iter()
            .filter(|n| !self.services.contains_key(n.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }

        let mut keep = BTreeSet::new();
        let mut queue: VecDeque<&str> = names.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !keep.insert(name.to_string()) {
                continue;
            }
            if let Some(service) = self.services.get(name) {
                queue.extend(service.dependencies.iter().map(String::as_str));
            }
        }

        let mut subset = self.clone();
        subset.services.retain(|name, _| keep.contains(name));
        Ok(subset)
    }
}

/// Turn validated config files into an [`Environment`]
pub fn resolve_environment(
    config: &EnvironmentConfig,
    local: &LocalConfig,
    mode: ExecutionMode,
    config_dir: &Path,
) -> Environment {
    let defaults = Defaults::from(&config.defaults);
    let mut env = Environment::new(config.name.clone(), mode, defaults.clone());
    env.config_dir = config_dir.to_path_buf();

    for spec in &config.services {
        let mut service = ResolvedService::new(spec.name(), defaults.chart.clone());
        service.version = spec.version().to_string();

        if let ServiceSpec::Detailed(def) = spec {
            if let Some(chart) = &def.chart {
                service.chart = chart.clone();
                if service.chart.name.is_empty() {
                    service.chart.name = defaults.chart.clone();
                }
            }
            service.values = def.values.clone();
            service.values_file = def.values_file.as_deref().map(expand_path);
            service.ports = def.ports.clone();
            service.environment = def.environment.clone();
            service.dependencies = def.dependencies.clone();
        }

        if mode == ExecutionMode::Local {
            if let Some(source) = local.local_sources.get(spec.name()) {
                service.is_local = true;
                service.local_source = Some(source.resolve());
            }
        }

        env.services.insert(service.name.clone(), service);
    }

    env
}
