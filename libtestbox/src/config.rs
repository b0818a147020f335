//! Environment configuration for request compilation.
//!
//! Environment variables:
//! - `DOCKER_AUTH_CONFIG`: inline docker config JSON. When set it is used
//!   instead of the config file.
//! - `DOCKER_CONFIG`: directory holding `config.json`. Defaults to
//!   `$HOME/.docker`.
//! - `TESTBOX_DOCKERFILE_AUTH`: set to `0` to skip credential discovery for
//!   the base images of a Dockerfile. Defaults to `1` (enabled).

use std::path::PathBuf;
use std::sync::LazyLock;

/// File name of the docker client configuration.
pub const DOCKER_CONFIG_FILE: &str = "config.json";

/// Settings read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestboxConfig {
    /// Inline docker config JSON.
    pub docker_auth_config: Option<String>,
    /// Directory holding the docker `config.json`.
    pub docker_config_dir: Option<PathBuf>,
    /// Whether base-image credentials are looked up during build compilation.
    pub dockerfile_auth: bool,
}

/// Globally initialized configuration, read from environment variables at first access.
pub static CONFIG: LazyLock<TestboxConfig> = LazyLock::new(TestboxConfig::from_env);

impl TestboxConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            docker_auth_config: non_empty("DOCKER_AUTH_CONFIG"),
            docker_config_dir: non_empty("DOCKER_CONFIG")
                .map(PathBuf::from)
                .or_else(|| dirs::home_dir().map(|home| home.join(".docker"))),
            dockerfile_auth: lookup("TESTBOX_DOCKERFILE_AUTH")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Location of the docker `config.json`, if a config directory is known.
    pub fn docker_config_file(&self) -> Option<PathBuf> {
        self.docker_config_dir
            .as_ref()
            .map(|dir| dir.join(DOCKER_CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> TestboxConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TestboxConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]);
        assert!(cfg.dockerfile_auth);
        assert!(cfg.docker_auth_config.is_none());
    }

    #[test]
    fn explicit_docker_config_dir() {
        let cfg = config(&[("DOCKER_CONFIG", "/etc/docker-client")]);
        assert_eq!(
            cfg.docker_config_file(),
            Some(PathBuf::from("/etc/docker-client/config.json"))
        );
    }

    #[test]
    fn dockerfile_auth_can_be_disabled() {
        assert!(!config(&[("TESTBOX_DOCKERFILE_AUTH", "0")]).dockerfile_auth);
        assert!(config(&[("TESTBOX_DOCKERFILE_AUTH", "1")]).dockerfile_auth);
    }

    #[test]
    fn blank_auth_config_is_unset() {
        let cfg = config(&[("DOCKER_AUTH_CONFIG", "  ")]);
        assert!(cfg.docker_auth_config.is_none());
    }
}
