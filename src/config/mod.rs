pub mod environment;
pub mod scaffold;
pub mod validation;

pub use environment::{
    resolve_environment, ChartRef, Defaults, Environment, EnvironmentConfig, ExecutionMode,
    LocalConfig, LocalSource, LocalSourceSpec, ResolvedService, ServiceDefinition, ServiceSpec,
};
pub use scaffold::{init_project, InitOptions, InitReport, Template};
pub use validation::{ValidationError, ValidationErrors};

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Standard locations searched when no config path is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[".plat/config.yml", ".plat/config.yaml"];

const LOCAL_CONFIG_FILES: &[&str] = &["local.yml", "local.yaml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No config file found in standard locations: {}", DEFAULT_CONFIG_PATHS.join(", "))]
    NotFound,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration in {path}: {errors}")]
    Invalid {
        path: PathBuf,
        errors: ValidationErrors,
    },

    #[error("Unknown service(s): {}", .0.join(", "))]
    UnknownServices(Vec<String>),

    #[error("{} already exists (use --force to overwrite)", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
}

// ============================================================================
// SBIO: Pure parsing (no I/O)
// ============================================================================

pub fn parse_environment_config(content: &str, path: &Path) -> Result<EnvironmentConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn parse_local_config(content: &str, path: &Path) -> Result<LocalConfig, ConfigError> {
    // An empty local.yml is allowed
    if content.trim().is_empty() {
        return Ok(LocalConfig::default());
    }
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Locate the config file, searching the standard locations under `base`
pub fn find_config_file(base: &Path) -> Result<PathBuf, ConfigError> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(|p| base.join(p))
        .find(|p| p.is_file())
        .ok_or(ConfigError::NotFound)
}

/// Load `local.yml` next to the config file, if there is one
pub fn load_local_config(config_dir: &Path) -> Result<LocalConfig, ConfigError> {
    let Some(path) = LOCAL_CONFIG_FILES
        .iter()
        .map(|f| config_dir.join(f))
        .find(|p| p.is_file())
    else {
        return Ok(LocalConfig::default());
    };

    debug!("Loading local sources from {}", path.display());
    let local = parse_local_config(&read(&path)?, &path)?;
    validation::validate_local(&local).map_err(|errors| ConfigError::Invalid {
        path: path.clone(),
        errors,
    })?;
    Ok(local)
}

/// Load, validate and resolve an environment.
///
/// `path` defaults to the first of [`DEFAULT_CONFIG_PATHS`] that exists in
/// the current directory.
pub fn load_environment(path: Option<&Path>, mode: ExecutionMode) -> Result<Environment, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => find_config_file(Path::new("."))?,
    };
    let config_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    debug!("Loading environment from {}", path.display());
    let config = parse_environment_config(&read(&path)?, &path)?;
    validation::validate_config(&config, &config_dir).map_err(|errors| ConfigError::Invalid {
        path: path.clone(),
        errors,
    })?;

    let local = load_local_config(&config_dir)?;
    for name in validation::unused_local_sources(&config, &local) {
        warn!("Local source '{}' does not match any service", name);
    }

    let env = resolve_environment(&config, &local, mode, &config_dir);
    debug!(
        "Loaded {} services for '{}' in {} mode",
        env.services.len(),
        env.name,
        env.mode
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(config: &str, local: Option<&str>) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let plat = dir.path().join(".plat");
        std::fs::create_dir(&plat).unwrap();
        std::fs::write(plat.join("config.yml"), config).unwrap();
        if let Some(local) = local {
            std::fs::write(plat.join("local.yml"), local).unwrap();
        }
        dir
    }

    const CONFIG: &str = "apiVersion: plat/v1\nkind: Environment\nname: shop\nservices:\n  - db\n  - name: api\n    dependencies: [db]\n";

    #[test]
    fn test_find_config_file() {
        let dir = project(CONFIG, None);
        let found = find_config_file(dir.path()).unwrap();
        assert!(found.ends_with(".plat/config.yml"));

        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_config_file(empty.path()),
            Err(ConfigError::NotFound)
        ));
    }

    #[test]
    fn test_load_environment_with_local_sources() {
        let dir = project(CONFIG, Some("local_sources:\n  api: /src/api\n"));
        let path = dir.path().join(".plat/config.yml");

        let env = load_environment(Some(&path), ExecutionMode::Local).unwrap();
        assert_eq!(env.name, "shop");
        assert_eq!(env.config_dir, dir.path().join(".plat"));
        assert!(env.service("api").unwrap().is_local);

        let env = load_environment(Some(&path), ExecutionMode::Artifact).unwrap();
        assert!(!env.service("api").unwrap().is_local);
    }

    #[test]
    fn test_load_environment_invalid() {
        let dir = project("apiVersion: plat/v1\nkind: Environment\nname: Shop\nservices: []\n", None);
        let result = load_environment(Some(&dir.path().join(".plat/config.yml")), ExecutionMode::Artifact);
        match result {
            Err(ConfigError::Invalid { errors, .. }) => assert_eq!(errors.len(), 2),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_load_environment_parse_error() {
        let dir = project("services: [unclosed", None);
        let result = load_environment(Some(&dir.path().join(".plat/config.yml")), ExecutionMode::Artifact);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_environment(Some(Path::new("/nonexistent/config.yml")), ExecutionMode::Local);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_empty_local_file() {
        let dir = project(CONFIG, Some(""));
        let local = load_local_config(&dir.path().join(".plat")).unwrap();
        assert!(local.local_sources.is_empty());
    }
}
