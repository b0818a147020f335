//! Request files: the serializable part of a container request.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use libtestbox::{
    BuildOptions, BuildOptionsModifier, ContainerFile, ContainerMount, ContainerRequest,
    FromDockerfile, HostConfig, HostConfigModifier, Resources,
};
use serde::Deserialize;

/// A container request as written in a YAML or JSON file.
///
/// Callbacks can't be serialized; the two callback-driven features a file
/// commonly needs are expressed as data instead: `build_tags` become a build
/// options modifier and `binds` a host config modifier.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestFile {
    pub image: Option<String>,
    /// Build context, relative to the request file.
    pub context: Option<PathBuf>,
    pub dockerfile: Option<String>,
    pub repo: Option<String>,
    pub tag: Option<String>,
    pub build_args: HashMap<String, Option<String>>,
    /// Extra image names for the built image.
    pub build_tags: Vec<String>,
    pub print_build_log: bool,
    pub keep_image: bool,

    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: HashMap<String, String>,
    pub exposed_ports: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<ContainerMount>,
    pub tmpfs: HashMap<String, String>,
    /// Raw `host:container` binds.
    pub binds: Vec<String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub privileged: bool,
    pub networks: Vec<String>,
    pub network_aliases: HashMap<String, Vec<String>>,
    pub resources: Resources,
    pub files: Vec<ContainerFile>,
    pub always_pull_image: bool,
    pub image_platform: Option<String>,
    pub shm_size: Option<i64>,
}

impl RequestFile {
    /// Load a request file. `.json` files are read as JSON, anything else as
    /// YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse request file: {}", path.display()))
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse request file: {}", path.display()))
        }
    }

    /// Turn the file into a request. A relative context is resolved against
    /// `base_dir`.
    pub fn into_request(self, base_dir: &Path) -> ContainerRequest {
        let context = self
            .context
            .filter(|c| !c.as_os_str().is_empty())
            .map(|c| if c.is_relative() { base_dir.join(c) } else { c });

        let mut build_options_modifiers: Vec<BuildOptionsModifier> = Vec::new();
        if !self.build_tags.is_empty() {
            let tags = self.build_tags;
            build_options_modifiers.push(Arc::new(move |opts: &mut BuildOptions| {
                opts.tags.extend(tags.iter().cloned());
            }));
        }

        let mut host_config_modifiers: Vec<HostConfigModifier> = Vec::new();
        if !self.binds.is_empty() {
            let binds = self.binds;
            host_config_modifiers.push(Arc::new(move |hc: &mut HostConfig| {
                hc.binds.extend(binds.iter().cloned());
            }));
        }

        ContainerRequest {
            from_dockerfile: FromDockerfile {
                context,
                dockerfile: self.dockerfile,
                repo: self.repo,
                tag: self.tag,
                build_args: self.build_args,
                print_build_log: self.print_build_log,
                keep_image: self.keep_image,
                build_options_modifiers,
                ..Default::default()
            },
            image: self.image,
            entrypoint: self.entrypoint,
            cmd: self.cmd,
            env: self.env,
            exposed_ports: self.exposed_ports,
            labels: self.labels,
            mounts: self.mounts,
            tmpfs: self.tmpfs,
            name: self.name,
            hostname: self.hostname,
            working_dir: self.working_dir,
            user: self.user,
            privileged: self.privileged,
            networks: self.networks,
            network_aliases: self.network_aliases,
            resources: self.resources,
            files: self.files,
            always_pull_image: self.always_pull_image,
            image_platform: self.image_platform,
            shm_size: self.shm_size,
            host_config_modifiers,
            ..Default::default()
        }
    }
}
