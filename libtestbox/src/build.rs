//! Build plan compilation.
//!
//! [`BuildPlanCompiler::build_options`] turns a request that builds from
//! source into the [`BuildOptions`] handed to the image builder:
//!
//! 1. start from the baseline (`remove` and `force_remove` set),
//! 2. apply the request's build options modifiers in order,
//! 3. re-apply the request's build args and Dockerfile over whatever the
//!    modifiers set,
//! 4. package the build context,
//! 5. merge credentials discovered for the Dockerfile's base images,
//! 6. put `repo:tag` first among the tags.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{CONFIG, TestboxConfig};
use crate::context::{BuildContext, get_context};
use crate::error::RequestError;
use crate::image::auth::{AuthConfig, CredentialProvider, DockerConfigCredentials, NoCredentials};
use crate::image::{auth_configs_from_dockerfile, dockerfile, repo, tag};
use crate::types::ContainerRequest;

/// Options for one image build.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildOptions {
    /// Remove intermediate containers after a successful build.
    pub remove: bool,
    /// Always remove intermediate containers.
    pub force_remove: bool,
    pub dockerfile: String,
    pub build_args: HashMap<String, Option<String>>,
    /// Image names; the first one is `repo:tag`.
    pub tags: Vec<String>,
    pub labels: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub no_cache: bool,
    pub pull_parent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Registry credentials keyed by registry.
    pub auth_configs: HashMap<String, AuthConfig>,
    /// Packaged build context. Consumed by the builder.
    #[serde(skip)]
    pub context: Option<BuildContext>,
}

impl BuildOptions {
    /// The options every build starts from.
    pub fn baseline() -> Self {
        Self {
            remove: true,
            force_remove: true,
            ..Default::default()
        }
    }
}

/// Compiles requests into build plans.
#[derive(Clone)]
pub struct BuildPlanCompiler {
    credentials: Arc<dyn CredentialProvider>,
    dockerfile_auth: bool,
}

impl Default for BuildPlanCompiler {
    /// A compiler configured from the environment.
    fn default() -> Self {
        Self::from_config(&CONFIG)
    }
}

impl BuildPlanCompiler {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            dockerfile_auth: true,
        }
    }

    /// A compiler whose credentials come from the docker configuration
    /// `config` points at. An unreadable configuration is logged and treated
    /// as having no credentials.
    pub fn from_config(config: &TestboxConfig) -> Self {
        let credentials: Arc<dyn CredentialProvider> =
            match DockerConfigCredentials::from_config(config) {
                Ok(creds) => Arc::new(creds),
                Err(e) => {
                    warn!(error = %e, "ignoring docker credentials configuration");
                    Arc::new(NoCredentials)
                }
            };
        Self::new(credentials).dockerfile_auth(config.dockerfile_auth)
    }

    /// Toggle credential discovery for the Dockerfile's base images.
    pub fn dockerfile_auth(mut self, enabled: bool) -> Self {
        self.dockerfile_auth = enabled;
        self
    }

    /// Compile the build plan of `req`.
    ///
    /// The request's context path is made absolute in place. Fails only when
    /// the build context cannot be packaged; credential discovery never
    /// fails the build.
    pub fn build_options(&self, req: &mut ContainerRequest) -> Result<BuildOptions, RequestError> {
        let mut options = BuildOptions::baseline();
        for modifier in &req.from_dockerfile.build_options_modifiers {
            modifier(&mut options);
        }

        // Mandatory values win over the modifiers.
        options.build_args = req.from_dockerfile.build_args.clone();
        options.dockerfile = dockerfile(&req.from_dockerfile);

        let context = get_context(req)?;
        debug!(size = ?context.size(), "build context ready");
        options.context = Some(context);

        if self.dockerfile_auth {
            let discovered =
                auth_configs_from_dockerfile(&req.from_dockerfile, self.credentials.as_ref());
            options.auth_configs.extend(discovered);
        }

        let image = format!("{}:{}", repo(&req.from_dockerfile), tag(&req.from_dockerfile));
        options.tags.insert(0, image);

        debug!(
            dockerfile = %options.dockerfile,
            tags = ?options.tags,
            registries = options.auth_configs.len(),
            "compiled build options"
        );
        Ok(options)
    }
}
