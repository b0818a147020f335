//! Declarative container request model.
//!
//! A [`ContainerRequest`] is authored by the caller, validated once and then
//! compiled into a [`BuildOptions`] plan (when it builds from source) and a
//! [`RunPlan`](crate::run::RunPlan). The engine-facing configuration types
//! that callers may mutate through modifiers ([`ContainerConfig`],
//! [`HostConfig`], [`EndpointSettings`]) live here as well.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::build::{BuildOptions, BuildPlanCompiler};
use crate::error::RequestError;

// ---------------------------------------------------------------------------
// Modifiers and hooks
// ---------------------------------------------------------------------------

/// Mutates the assembled build options before mandatory fields are re-applied.
pub type BuildOptionsModifier = Arc<dyn Fn(&mut BuildOptions) + Send + Sync>;

/// Mutates the container configuration before creation.
pub type ConfigModifier = Arc<dyn Fn(&mut ContainerConfig) + Send + Sync>;

/// Mutates the host configuration before creation. Raw bind strings injected
/// here take part in mount validation.
pub type HostConfigModifier = Arc<dyn Fn(&mut HostConfig) + Send + Sync>;

/// Mutates the per-network endpoint settings before creation.
pub type EndpointSettingsModifier =
    Arc<dyn Fn(&mut HashMap<String, EndpointSettings>) + Send + Sync>;

/// Hook invoked with the request itself, before a container exists.
pub type RequestHook = Arc<dyn Fn(&ContainerRequest) -> anyhow::Result<()> + Send + Sync>;

/// Hook invoked with the engine-assigned container id.
pub type ContainerHook = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Ordered hooks for each lifecycle phase.
///
/// The request only carries them; running them is the job of the execution
/// layer that consumes the compiled plans.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub pre_builds: Vec<RequestHook>,
    pub post_builds: Vec<RequestHook>,
    pub pre_creates: Vec<RequestHook>,
    pub post_creates: Vec<ContainerHook>,
    pub pre_starts: Vec<ContainerHook>,
    pub post_starts: Vec<ContainerHook>,
    pub pre_stops: Vec<ContainerHook>,
    pub post_stops: Vec<ContainerHook>,
    pub pre_terminates: Vec<ContainerHook>,
    pub post_terminates: Vec<ContainerHook>,
}

impl LifecycleHooks {
    /// Total number of hooks across all phases.
    pub fn len(&self) -> usize {
        self.pre_builds.len()
            + self.post_builds.len()
            + self.pre_creates.len()
            + self.post_creates.len()
            + self.pre_starts.len()
            + self.post_starts.len()
            + self.pre_stops.len()
            + self.post_stops.len()
            + self.pre_terminates.len()
            + self.post_terminates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("hooks", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Build source
// ---------------------------------------------------------------------------

/// A caller-supplied, already packaged build context (an uncompressed tar).
///
/// The bytes are shared, so handing out a reader never copies them and the
/// request stays cloneable.
#[derive(Clone, PartialEq, Eq)]
pub struct ContextArchive(Arc<[u8]>);

impl ContextArchive {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A fresh reader positioned at the start of the archive.
    pub fn reader(&self) -> Cursor<Arc<[u8]>> {
        Cursor::new(Arc::clone(&self.0))
    }
}

impl From<Vec<u8>> for ContextArchive {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for ContextArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextArchive({} bytes)", self.0.len())
    }
}

/// Parameters for building an image from source rather than pulling one.
///
/// Always embedded in a [`ContainerRequest`]; the default value describes
/// "no build".
#[derive(Clone, Default)]
pub struct FromDockerfile {
    /// Build context directory. Made absolute during compilation.
    pub context: Option<PathBuf>,
    /// Pre-packaged context; takes precedence over `context` when packaging.
    pub context_archive: Option<ContextArchive>,
    /// Dockerfile path relative to the context, defaults to `Dockerfile`.
    pub dockerfile: Option<String>,
    /// Repository label for the built image, defaults to a UUID.
    pub repo: Option<String>,
    /// Tag label for the built image, defaults to a UUID.
    pub tag: Option<String>,
    /// Build-time variables. A `None` value declares the variable without a value.
    pub build_args: HashMap<String, Option<String>>,
    pub print_build_log: bool,
    /// Keep the built image when the container is terminated.
    pub keep_image: bool,
    /// Applied in order to the baseline build options.
    pub build_options_modifiers: Vec<BuildOptionsModifier>,
}

impl FromDockerfile {
    /// The context path, if one was given and is non-empty.
    pub fn context_path(&self) -> Option<&Path> {
        self.context
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

impl fmt::Debug for FromDockerfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromDockerfile")
            .field("context", &self.context)
            .field("context_archive", &self.context_archive)
            .field("dockerfile", &self.dockerfile)
            .field("repo", &self.repo)
            .field("tag", &self.tag)
            .field("build_args", &self.build_args)
            .field("print_build_log", &self.print_build_log)
            .field("keep_image", &self.keep_image)
            .field(
                "build_options_modifiers",
                &self.build_options_modifiers.len(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mounts and files
// ---------------------------------------------------------------------------

/// Where the data behind a declarative mount comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MountSource {
    /// A host directory or file.
    Bind { host_path: PathBuf },
    /// A named engine volume, created on demand.
    Volume { name: String },
    /// A memory-backed filesystem.
    Tmpfs {
        #[serde(default)]
        size_bytes: Option<u64>,
    },
}

/// A declarative mount: a source attached at an in-container target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMount {
    pub source: MountSource,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl ContainerMount {
    pub fn bind(host_path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Bind {
                host_path: host_path.into(),
            },
            target: target.into(),
            read_only: false,
        }
    }

    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Volume { name: name.into() },
            target: target.into(),
            read_only: false,
        }
    }

    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self {
            source: MountSource::Tmpfs { size_bytes: None },
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A host file copied into the container once it has been created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFile {
    pub host_file_path: PathBuf,
    pub container_file_path: String,
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
}

fn default_file_mode() -> u32 {
    0o644
}

// ---------------------------------------------------------------------------
// Engine-facing configuration
// ---------------------------------------------------------------------------

/// Resource constraints applied through the host configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Resources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_swap: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nano_cpus: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<i64>,
}

/// Mount kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

/// A structured mount as sent to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EngineMount {
    #[serde(rename = "Type")]
    pub kind: MountType,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmpfs_size_bytes: Option<u64>,
}

/// Host-side publication of one container port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Low-level host configuration of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HostConfig {
    /// Raw `host:container` bind strings.
    pub binds: Vec<String>,
    pub mounts: Vec<EngineMount>,
    pub tmpfs: HashMap<String, String>,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shm_size: Option<i64>,
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    pub publish_all_ports: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    pub auto_remove: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub extra_hosts: Vec<String>,
    #[serde(flatten)]
    pub resources: Resources,
}

/// Container-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerConfig {
    pub image: String,
    /// `KEY=VALUE` pairs.
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub labels: HashMap<String, String>,
    /// Container-side ports as `port/proto`.
    pub exposed_ports: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Attachment settings for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct EndpointSettings {
    pub aliases: Vec<String>,
}

// ---------------------------------------------------------------------------
// Container request
// ---------------------------------------------------------------------------

/// The caller-authored description of a desired container.
#[derive(Clone, Default)]
pub struct ContainerRequest {
    /// Build-from-source parameters. Mutually exclusive with `image`.
    pub from_dockerfile: FromDockerfile,
    /// Pre-built image reference.
    pub image: Option<String>,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: HashMap<String, String>,
    /// Port specs such as `80`, `80/udp` or `8080:80/tcp`.
    pub exposed_ports: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<ContainerMount>,
    pub tmpfs: HashMap<String, String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub working_dir: Option<String>,
    /// `uid[:gid]` or a user name.
    pub user: Option<String>,
    pub privileged: bool,
    pub networks: Vec<String>,
    pub network_aliases: HashMap<String, Vec<String>>,
    pub resources: Resources,
    /// Copied into the container after creation, in order.
    pub files: Vec<ContainerFile>,
    pub always_pull_image: bool,
    pub image_platform: Option<String>,
    /// Size of `/dev/shm` in bytes.
    pub shm_size: Option<i64>,
    pub config_modifiers: Vec<ConfigModifier>,
    pub host_config_modifiers: Vec<HostConfigModifier>,
    pub endpoint_settings_modifiers: Vec<EndpointSettingsModifier>,
    pub lifecycle_hooks: Vec<LifecycleHooks>,
}

impl ContainerRequest {
    /// The pre-built image reference, if one was given and is non-empty.
    pub fn image_ref(&self) -> Option<&str> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }

    /// Whether an image has to be built from a context before the container
    /// can be created.
    pub fn should_build_image(&self) -> bool {
        self.from_dockerfile.context_path().is_some()
            || self.from_dockerfile.context_archive.is_some()
    }

    pub fn should_keep_built_image(&self) -> bool {
        self.from_dockerfile.keep_image
    }

    pub fn should_print_build_log(&self) -> bool {
        self.from_dockerfile.print_build_log
    }

    /// Run every consistency check, stopping at the first failure.
    pub fn validate(&self) -> Result<(), RequestError> {
        crate::validate::validate(self)
    }

    /// Compile the build plan with the default, environment-configured
    /// compiler. See [`BuildPlanCompiler::build_options`].
    pub fn build_options(&mut self) -> Result<BuildOptions, RequestError> {
        BuildPlanCompiler::default().build_options(self)
    }
}

impl fmt::Debug for ContainerRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRequest")
            .field("from_dockerfile", &self.from_dockerfile)
            .field("image", &self.image)
            .field("entrypoint", &self.entrypoint)
            .field("cmd", &self.cmd)
            .field("env", &self.env)
            .field("exposed_ports", &self.exposed_ports)
            .field("labels", &self.labels)
            .field("mounts", &self.mounts)
            .field("tmpfs", &self.tmpfs)
            .field("name", &self.name)
            .field("networks", &self.networks)
            .field("network_aliases", &self.network_aliases)
            .field("files", &self.files)
            .field("config_modifiers", &self.config_modifiers.len())
            .field("host_config_modifiers", &self.host_config_modifiers.len())
            .field(
                "endpoint_settings_modifiers",
                &self.endpoint_settings_modifiers.len(),
            )
            .field("lifecycle_hooks", &self.lifecycle_hooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn should_build_image_ignores_empty_context() {
        let mut req = ContainerRequest {
            from_dockerfile: FromDockerfile {
                context: Some(PathBuf::new()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!req.should_build_image());

        req.from_dockerfile.context = Some(PathBuf::from("./app"));
        assert!(req.should_build_image());

        req.from_dockerfile.context = None;
        req.from_dockerfile.context_archive = Some(ContextArchive::from(vec![0u8; 16]));
        assert!(req.should_build_image());
    }

    #[test]
    fn build_flags_follow_from_dockerfile() {
        let mut req = ContainerRequest::default();
        assert!(!req.should_keep_built_image());
        assert!(!req.should_print_build_log());

        req.from_dockerfile.keep_image = true;
        assert!(req.should_keep_built_image());
        assert!(!req.should_print_build_log());

        req.from_dockerfile.print_build_log = true;
        assert!(req.should_print_build_log());
    }

    #[test]
    fn image_ref_treats_empty_as_unset() {
        let req = ContainerRequest {
            image: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(req.image_ref(), None);
    }

    #[test]
    fn context_archive_reader_is_repeatable() {
        let archive = ContextArchive::from(b"tar-bytes".to_vec());
        for _ in 0..2 {
            let mut out = Vec::new();
            archive.reader().read_to_end(&mut out).unwrap();
            assert_eq!(out, b"tar-bytes");
        }
    }

    #[test]
    fn lifecycle_hooks_keep_order() {
        let first: RequestHook = Arc::new(|_: &ContainerRequest| -> anyhow::Result<()> { Ok(()) });
        let second: RequestHook =
            Arc::new(|_: &ContainerRequest| -> anyhow::Result<()> { anyhow::bail!("second") });
        let hooks = LifecycleHooks {
            pre_creates: vec![first, second],
            ..Default::default()
        };
        assert_eq!(hooks.len(), 2);

        let req = ContainerRequest::default();
        assert!(hooks.pre_creates[0](&req).is_ok());
        assert!(hooks.pre_creates[1](&req).is_err());
    }

    #[test]
    fn mount_source_serde() {
        let mount: ContainerMount = serde_json::from_str(
            r#"{"source": {"type": "bind", "host_path": "/srv"}, "target": "/data"}"#,
        )
        .unwrap();
        assert_eq!(mount, ContainerMount::bind("/srv", "/data"));
    }
}
