//! Project scaffolding for `plat init` and `plat config example`

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::environment::{
    ChartRef, DefaultsConfig, EnvironmentConfig, LocalConfig, LocalSourceSpec, ServiceDefinition,
    ServiceSpec, API_VERSION, DEFAULT_CHART, DEFAULT_DOMAIN, DEFAULT_NAMESPACE, DEFAULT_REGISTRY,
    KIND,
};
use super::{validation, ConfigError};

pub const DEFAULT_PROJECT: &str = "platform-backend";
pub const PLAT_DIR: &str = ".plat";

/// Files whose presence marks a directory as a service checkout
pub const SERVICE_MARKERS: &[&str] = &[
    "Dockerfile",
    "package.json",
    "pom.xml",
    "go.mod",
    "requirements.txt",
];

const GITIGNORE_HEADER: &str = "# Plat local configuration";
const GITIGNORE_ENTRIES: &[&str] = &[".plat/local.yml", ".plat/.platconfig"];

/// Starting service layout for a new project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Template {
    #[default]
    Microservices,
    Fullstack,
    BackendOnly,
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microservices => write!(f, "microservices"),
            Self::Fullstack => write!(f, "fullstack"),
            Self::BackendOnly => write!(f, "backend-only"),
        }
    }
}

impl FromStr for Template {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "microservices" => Ok(Self::Microservices),
            "fullstack" => Ok(Self::Fullstack),
            "backend-only" => Ok(Self::BackendOnly),
            other => Err(format!(
                "unknown template '{}', expected microservices, fullstack or backend-only",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub project: String,
    pub template: Template,
    /// Overwrite an existing `.plat` directory
    pub force: bool,
    /// Register sibling checkouts as local sources
    pub scan_local: bool,
}

/// What `init_project` wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub project: String,
    pub template: Template,
    pub config_path: PathBuf,
    pub local_path: PathBuf,
    /// Names registered in local.yml by the scan
    pub local_sources: Vec<String>,
    /// False when .gitignore already had the entries
    pub gitignore_updated: bool,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

fn postgres() -> ServiceSpec {
    ServiceSpec::Detailed(ServiceDefinition {
        name: "postgres".to_string(),
        chart: Some(ChartRef {
            name: "postgresql".to_string(),
            repository: Some("https://charts.bitnami.com/bitnami".to_string()),
            version: Some("12.1.9".to_string()),
        }),
        ..Default::default()
    })
}

fn defaults() -> DefaultsConfig {
    DefaultsConfig {
        registry: Some(DEFAULT_REGISTRY.to_string()),
        domain: Some(DEFAULT_DOMAIN.to_string()),
        namespace: Some(DEFAULT_NAMESPACE.to_string()),
        chart: Some(DEFAULT_CHART.to_string()),
    }
}

fn simple<'a>(names: &'a [&'a str]) -> impl Iterator<Item = ServiceSpec> + 'a {
    names.iter().map(|name| ServiceSpec::Simple(name.to_string()))
}

/// Config written by `plat init`
pub fn base_config(project: &str, template: Template) -> EnvironmentConfig {
    let names: &[&str] = match template {
        Template::Microservices => &["frontend", "user-api", "payment-api", "order-api"],
        Template::Fullstack => &["frontend", "backend-api"],
        Template::BackendOnly => &["user-api", "payment-api"],
    };

    EnvironmentConfig {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: project.to_string(),
        defaults: defaults(),
        services: simple(names).chain([postgres()]).collect(),
    }
}

/// Annotated sample shown by `plat config example`
pub fn example_config() -> EnvironmentConfig {
    let payment = ServiceSpec::Detailed(ServiceDefinition {
        name: "payment-api".to_string(),
        version: Some("v2.1.0".to_string()),
        ports: vec![3000, 9229],
        environment: BTreeMap::from([
            ("NODE_ENV".to_string(), "development".to_string()),
            ("DEBUG".to_string(), "payment:*".to_string()),
        ]),
        dependencies: vec!["postgres".to_string()],
        values: json!({"replicaCount": 1})
            .as_object()
            .cloned()
            .unwrap_or_default(),
        ..Default::default()
    });

    EnvironmentConfig {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: "my-project".to_string(),
        defaults: defaults(),
        services: simple(&["frontend", "user-api"])
            .chain([payment, postgres()])
            .collect(),
    }
}

pub fn example_local_config() -> LocalConfig {
    LocalConfig {
        local_sources: BTreeMap::from([
            (
                "frontend".to_string(),
                LocalSourceSpec::Simple("../frontend-app".to_string()),
            ),
            (
                "user-api".to_string(),
                LocalSourceSpec::Simple("../user-service".to_string()),
            ),
            (
                "payment-api".to_string(),
                LocalSourceSpec::Detailed {
                    path: "~/dev/payments-monorepo".to_string(),
                    dockerfile: Some("services/api/Dockerfile".to_string()),
                    context: Some("services/api".to_string()),
                    chart: Some("charts/payment-api".to_string()),
                },
            ),
        ]),
    }
}

pub fn to_yaml<T: Serialize>(value: &T) -> Result<String, ConfigError> {
    serde_yaml::to_string(value).map_err(|e| ConfigError::Serialize(e.to_string()))
}

/// `.gitignore` content with the plat entries appended, or `None` when
/// every entry is already listed
pub fn gitignore_with_entries(existing: &str) -> Option<String> {
    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<&str> = GITIGNORE_ENTRIES
        .iter()
        .copied()
        .filter(|entry| !present.contains(entry))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let mut content = existing.to_string();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    if !content.is_empty() {
        content.push('\n');
    }
    content.push_str(GITIGNORE_HEADER);
    content.push('\n');
    for entry in missing {
        content.push_str(entry);
        content.push('\n');
    }
    Some(content)
}

// ============================================================================
// SBIO: I/O wrapper
// ============================================================================

pub fn is_service_repository(dir: &Path) -> bool {
    SERVICE_MARKERS.iter().any(|marker| dir.join(marker).exists())
}

/// Sibling directories of `root` that look like service checkouts, keyed by
/// directory name. Paths are relative to `root`.
pub fn scan_local_sources(root: &Path) -> BTreeMap<String, LocalSourceSpec> {
    let parent = root.join("..");
    let Ok(entries) = std::fs::read_dir(&parent) else {
        return BTreeMap::new();
    };

    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir() && is_service_repository(&entry.path()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| validation::is_kubernetes_safe_name(name))
        .map(|name| {
            debug!("Found local source ../{}", name);
            let path = format!("../{}", name);
            (name, LocalSourceSpec::Simple(path))
        })
        .collect()
}

fn write(path: &Path, content: &str) -> Result<(), ConfigError> {
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Create `.plat/config.yml` and `.plat/local.yml` under `root` and make
/// sure `.gitignore` keeps local.yml out of version control
pub fn init_project(root: &Path, options: &InitOptions) -> Result<InitReport, ConfigError> {
    let plat_dir = root.join(PLAT_DIR);
    if plat_dir.exists() && !options.force {
        return Err(ConfigError::AlreadyInitialized(plat_dir));
    }

    let config = base_config(&options.project, options.template);
    validation::validate_config(&config, &plat_dir).map_err(|errors| ConfigError::Invalid {
        path: plat_dir.join("config.yml"),
        errors,
    })?;

    std::fs::create_dir_all(&plat_dir).map_err(|source| ConfigError::Io {
        path: plat_dir.clone(),
        source,
    })?;

    let config_path = plat_dir.join("config.yml");
    write(&config_path, &to_yaml(&config)?)?;

    let local = LocalConfig {
        local_sources: if options.scan_local {
            scan_local_sources(root)
        } else {
            BTreeMap::new()
        },
    };
    let local_path = plat_dir.join("local.yml");
    write(&local_path, &to_yaml(&local)?)?;

    let gitignore = root.join(".gitignore");
    let existing = match std::fs::read_to_string(&gitignore) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(ConfigError::Io {
                path: gitignore,
                source,
            })
        }
    };
    let gitignore_updated = match gitignore_with_entries(&existing) {
        Some(content) => {
            write(&gitignore, &content)?;
            true
        }
        None => false,
    };

    info!(
        "Initialized {} ({} template) in {}",
        options.project,
        options.template,
        plat_dir.display()
    );
    Ok(InitReport {
        project: options.project.clone(),
        template: options.template,
        config_path,
        local_path,
        local_sources: local.local_sources.into_keys().collect(),
        gitignore_updated,
    })
}
