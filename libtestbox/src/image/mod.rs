//! Image naming and base-image credential discovery for builds.

pub mod auth;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use dockerfile_parser::{Dockerfile, Instruction};
use oci_spec::distribution::Reference;
use regex::{Captures, Regex};
use tracing::debug;
use uuid::Uuid;

use crate::types::FromDockerfile;
use auth::{AuthConfig, CredentialProvider, DOCKER_HUB_AUTH_KEY, DOCKER_HUB_HOSTS};

/// Dockerfile name used when the request names none.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Base image name that refers to no image at all.
const SCRATCH: &str = "scratch";

static ARG_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("variable reference pattern is valid")
});

/// Dockerfile path relative to the context.
pub fn dockerfile(from: &FromDockerfile) -> String {
    match from.dockerfile.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_DOCKERFILE.to_string(),
    }
}

/// Repository label of the built image. A fresh UUID unless one was given.
pub fn repo(from: &FromDockerfile) -> String {
    label_or_uuid(from.repo.as_deref())
}

/// Tag label of the built image. A fresh UUID unless one was given.
pub fn tag(from: &FromDockerfile) -> String {
    label_or_uuid(from.tag.as_deref())
}

fn label_or_uuid(label: Option<&str>) -> String {
    match label {
        Some(label) if !label.is_empty() => label.to_lowercase(),
        _ => Uuid::new_v4().to_string(),
    }
}

fn parse_dockerfile<P: AsRef<Path>>(dockerfile_path: P) -> Result<Dockerfile> {
    let dockerfile_path = dockerfile_path.as_ref();
    let dockerfile_content = fs::read_to_string(dockerfile_path)
        .with_context(|| format!("Failed to read Dockerfile: {}", dockerfile_path.display()))?;
    let dockerfile = Dockerfile::parse(&dockerfile_content)
        .with_context(|| format!("Failed to parse Dockerfile: {}", dockerfile_path.display()))?;
    Ok(dockerfile)
}

fn parse_global_args(dockerfile: &Dockerfile) -> HashMap<String, Option<String>> {
    dockerfile
        .global_args
        .iter()
        .map(|arg| {
            let key = arg.name.content.clone();
            let value = arg.value.as_ref().map(|v| v.content.clone());
            (key, value)
        })
        .collect()
}

/// Substitute `$VAR` and `${VAR}` from the build args, then the global `ARG`
/// defaults. Unknown variables expand to nothing.
fn expand_args(
    raw: &str,
    build_args: &HashMap<String, Option<String>>,
    global_args: &HashMap<String, Option<String>>,
) -> String {
    ARG_REF
        .replace_all(raw, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            build_args
                .get(name)
                .and_then(Option::as_deref)
                .or_else(|| global_args.get(name).and_then(Option::as_deref))
                .unwrap_or("")
                .to_string()
        })
        .into_owned()
}

/// Base images referenced by the `FROM` instructions of a Dockerfile, in
/// order. `scratch` and references to earlier build stages are left out.
pub fn extract_images_from_dockerfile(
    dockerfile_path: &Path,
    build_args: &HashMap<String, Option<String>>,
) -> Result<Vec<String>> {
    let dockerfile = parse_dockerfile(dockerfile_path)?;
    let global_args = parse_global_args(&dockerfile);

    let mut stages = HashSet::new();
    let mut images = Vec::new();
    for instruction in &dockerfile.instructions {
        let Instruction::From(from) = instruction else {
            continue;
        };
        let image = expand_args(&from.image.content, build_args, &global_args);
        let image = image.trim();
        if !image.is_empty()
            && !image.eq_ignore_ascii_case(SCRATCH)
            && !stages.contains(&image.to_lowercase())
        {
            images.push(image.to_string());
        }
        if let Some(alias) = &from.alias {
            stages.insert(alias.content.to_lowercase());
        }
    }
    Ok(images)
}

/// Registry key credentials for `image` are stored under.
///
/// Docker Hub images map to [`DOCKER_HUB_AUTH_KEY`], everything else to the
/// registry host (with its port, if any).
pub fn registry_key(image: &str) -> Result<String> {
    if image.is_empty() {
        bail!("empty image reference");
    }
    let reference = image
        .parse::<Reference>()
        .with_context(|| format!("invalid image reference: `{image}`"))?;
    let registry = reference.registry().to_lowercase();
    if DOCKER_HUB_HOSTS.iter().any(|hub| *hub == registry) {
        Ok(DOCKER_HUB_AUTH_KEY.to_string())
    } else {
        Ok(registry)
    }
}

/// Credentials for the registries of every base image in the request's
/// Dockerfile.
///
/// Best effort: an unreadable Dockerfile yields an empty map, and an image
/// whose reference or credentials cannot be resolved is skipped.
pub fn auth_configs_from_dockerfile(
    from: &FromDockerfile,
    provider: &dyn CredentialProvider,
) -> HashMap<String, AuthConfig> {
    let Some(context) = from.context_path() else {
        return HashMap::new();
    };
    let dockerfile_path = context.join(dockerfile(from));
    let images = match extract_images_from_dockerfile(&dockerfile_path, &from.build_args) {
        Ok(images) => images,
        Err(e) => {
            debug!(path = %dockerfile_path.display(), error = %e, "skipping base image credential discovery");
            return HashMap::new();
        }
    };

    let mut registries = BTreeSet::new();
    for image in &images {
        match registry_key(image) {
            Ok(registry) => {
                registries.insert(registry);
            }
            Err(e) => debug!(%image, error = %e, "skipping base image"),
        }
    }

    let mut auth_configs = HashMap::new();
    for registry in registries {
        match provider.credentials_for(&registry) {
            Ok(auth) => {
                auth_configs.insert(registry, auth);
            }
            Err(e) => debug!(%registry, error = %e, "no credentials for registry"),
        }
    }
    debug!(
        images = images.len(),
        registries = auth_configs.len(),
        "discovered base image credentials"
    );
    auth_configs
}
