//! Registry credential discovery.
//!
//! Credentials come from the docker client configuration: a per-registry
//! credential helper, the default credential store, or a static `auths`
//! entry, in that order. Lookups never touch the network.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TestboxConfig;

/// Key under which Docker Hub credentials are stored and sent.
pub const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Hosts that all mean Docker Hub.
pub(crate) const DOCKER_HUB_HOSTS: [&str; 3] =
    ["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Username a credential helper reports when the secret is an identity token.
const TOKEN_USERNAME: &str = "<token>";

/// Credentials for one registry, with the engine's field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serveraddress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identitytoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrytoken: Option<String>,
}

/// Source of registry credentials.
///
/// `registry` is a registry key as produced by
/// [`registry_key`](crate::image::registry_key). An error means "no usable
/// credentials"; callers skip that registry.
pub trait CredentialProvider: Send + Sync {
    fn credentials_for(&self, registry: &str) -> Result<AuthConfig>;
}

/// Provider that never has credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn credentials_for(&self, registry: &str) -> Result<AuthConfig> {
        bail!("no credentials configured for {registry}")
    }
}

/// The credential-related part of a docker client `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerConfigFile {
    #[serde(default)]
    pub auths: HashMap<String, AuthConfig>,
    #[serde(default)]
    pub creds_store: Option<String>,
    #[serde(default)]
    pub cred_helpers: HashMap<String, String>,
}

/// Reply of `docker-credential-<helper> get`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperCredentials {
    #[serde(rename = "ServerURL", default)]
    server_url: Option<String>,
    username: String,
    secret: String,
}

/// Credentials resolved from a docker client configuration.
#[derive(Debug, Clone)]
pub struct DockerConfigCredentials {
    config: DockerConfigFile,
    helper_prefix: String,
}

impl DockerConfigCredentials {
    pub fn new(config: DockerConfigFile) -> Self {
        Self {
            config,
            helper_prefix: "docker-credential-".to_string(),
        }
    }

    /// Parse the JSON contents of a docker `config.json`.
    pub fn parse(json: &str) -> Result<Self> {
        let config: DockerConfigFile =
            serde_json::from_str(json).context("Failed to parse docker config")?;
        Ok(Self::new(config))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read docker config: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid docker config: {}", path.display()))
    }

    /// Resolve the configuration the environment points at. A missing config
    /// file yields a provider without credentials.
    pub fn from_config(config: &TestboxConfig) -> Result<Self> {
        if let Some(inline) = &config.docker_auth_config {
            return Self::parse(inline).context("Invalid DOCKER_AUTH_CONFIG");
        }
        match config.docker_config_file() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::new(DockerConfigFile::default())),
        }
    }

    /// Program name prefix of credential helpers, `docker-credential-` by
    /// default.
    pub fn with_helper_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.helper_prefix = prefix.into();
        self
    }

    fn run_helper(&self, helper: &str, registry: &str) -> Result<AuthConfig> {
        let program = format!("{}{helper}", self.helper_prefix);
        let mut child = Command::new(&program)
            .arg("get")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run credential helper {program}"))?;
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(registry.as_bytes()),
            None => Err(io::Error::other("stdin unavailable")),
        };
        if let Err(e) = written {
            // Reap the helper before giving up on it.
            let _ = child.kill();
            let _ = child.wait();
            return Err(e)
                .with_context(|| format!("Failed to write to credential helper {program}"));
        }
        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for credential helper {program}"))?;
        if !output.status.success() {
            bail!(
                "credential helper {program} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }

        let reply: HelperCredentials = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Invalid reply from credential helper {program}"))?;
        let serveraddress = reply.server_url.unwrap_or_else(|| registry.to_string());
        if reply.username == TOKEN_USERNAME {
            return Ok(AuthConfig {
                identitytoken: Some(reply.secret),
                serveraddress: Some(serveraddress),
                ..Default::default()
            });
        }
        Ok(AuthConfig {
            username: Some(reply.username),
            password: Some(reply.secret),
            serveraddress: Some(serveraddress),
            ..Default::default()
        })
    }

    fn static_auth(&self, registry: &str) -> Result<AuthConfig> {
        let wanted = normalize_registry(registry);
        let (key, entry) = self
            .config
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .ok_or_else(|| anyhow!("no credentials configured for {registry}"))?;

        let mut entry = entry.clone();
        if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
            let (username, password) = decode_auth(encoded)
                .with_context(|| format!("Invalid auth entry for {key}"))?;
            entry.username = Some(username);
            entry.password = Some(password);
        }
        if entry.serveraddress.is_none() {
            entry.serveraddress = Some(registry.to_string());
        }
        Ok(entry)
    }
}

impl CredentialProvider for DockerConfigCredentials {
    fn credentials_for(&self, registry: &str) -> Result<AuthConfig> {
        let host = normalize_registry(registry);
        let helper = self
            .config
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_registry(key) == host)
            .map(|(_, helper)| helper);
        if let Some(helper) = helper {
            debug!(registry, %helper, "using registry credential helper");
            return self.run_helper(helper, registry);
        }

        if let Some(store) = self.config.creds_store.as_deref().filter(|s| !s.is_empty()) {
            match self.run_helper(store, registry) {
                Ok(auth) => return Ok(auth),
                Err(e) => debug!(registry, store, error = %e, "credential store lookup failed"),
            }
        }

        self.static_auth(registry)
    }
}

/// Reduce a registry key or `auths` key to a comparable host name.
fn normalize_registry(key: &str) -> String {
    let host = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = host.split('/').next().unwrap_or(host).to_lowercase();
    if DOCKER_HUB_HOSTS.iter().any(|hub| *hub == host) {
        "index.docker.io".to_string()
    } else {
        host
    }
}

/// Decode a base64 `user:password` auth string.
pub fn decode_auth(encoded: &str) -> Result<(String, String)> {
    let decoded = STANDARD
        .decode(encoded.trim())
        .context("auth is not valid base64")?;
    let decoded = String::from_utf8(decoded).context("auth is not valid UTF-8")?;
    let (username, password) = decoded
        .split_once(':')
        .context("auth is not of the form user:password")?;
    Ok((username.to_string(), password.to_string()))
}
