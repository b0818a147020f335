//! Mount target conflict detection.
//!
//! Declarative [`ContainerMount`]s and raw `host:container` bind strings are
//! two ways of claiming an in-container path. Both are collected into one
//! set of normalized targets so a path claimed twice is rejected here, with
//! the offending path, instead of failing later inside the engine.

use std::collections::HashSet;

use tracing::debug;

use crate::error::RequestError;
use crate::types::{ContainerMount, HostConfig, HostConfigModifier};
use crate::utils::clean_path;

/// Normalized in-container paths claimed so far.
#[derive(Debug, Default)]
struct MountTargets(HashSet<String>);

impl MountTargets {
    fn with_capacity(capacity: usize) -> Self {
        Self(HashSet::with_capacity(capacity))
    }

    fn insert(&mut self, target: &str) -> Result<(), RequestError> {
        let normalized = clean_path(target);
        if !self.0.insert(normalized.clone()) {
            return Err(RequestError::DuplicateMountTarget(normalized));
        }
        Ok(())
    }
}

/// Split a raw bind string into its host and container parts.
///
/// Exactly one `:` is accepted; anything else, including option suffixes
/// such as `:ro`, is an [`RequestError::InvalidBindMount`].
pub fn parse_bind(bind: &str) -> Result<(&str, &str), RequestError> {
    let mut parts = bind.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(container), None) => Ok((host, container)),
        _ => Err(RequestError::InvalidBindMount(bind.to_string())),
    }
}

/// Ensure no two mounts or binds share a target path.
///
/// Declarative mounts are inserted first, in order. When host config
/// modifiers are present they are applied, in order, to an empty
/// [`HostConfig`] and every bind string they produce is parsed and checked
/// against the same set.
pub fn validate_mounts(
    mounts: &[ContainerMount],
    host_config_modifiers: &[HostConfigModifier],
) -> Result<(), RequestError> {
    let mut targets = MountTargets::with_capacity(mounts.len());
    for mount in mounts {
        targets.insert(&mount.target)?;
    }

    if host_config_modifiers.is_empty() {
        return Ok(());
    }

    let mut host_config = HostConfig::default();
    for modifier in host_config_modifiers {
        modifier(&mut host_config);
    }

    debug!(
        mounts = mounts.len(),
        binds = host_config.binds.len(),
        "checking bind mounts injected by host config modifiers"
    );
    for bind in &host_config.binds {
        let (_, container_path) = parse_bind(bind)?;
        targets.insert(container_path)?;
    }

    Ok(())
}
