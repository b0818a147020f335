//! Request validation.
//!
//! [`validate`] runs a fixed list of independent checks in order and returns
//! the first failure. Nothing is mutated and no filesystem access happens.

use tracing::debug;

use crate::error::RequestError;
use crate::mounts::validate_mounts;
use crate::types::ContainerRequest;

type Check = fn(&ContainerRequest) -> Result<(), RequestError>;

const CHECKS: [(&str, Check); 3] = [
    ("context-and-image", validate_context_and_image),
    ("context-or-image", validate_context_or_image_is_specified),
    ("mounts", validate_request_mounts),
];

/// Validate a request, failing fast on the first violated check.
pub fn validate(req: &ContainerRequest) -> Result<(), RequestError> {
    for (name, check) in CHECKS {
        check(req).inspect_err(|err| debug!(check = name, error = %err, "request rejected"))?;
    }
    Ok(())
}

fn validate_context_and_image(req: &ContainerRequest) -> Result<(), RequestError> {
    if req.from_dockerfile.context_path().is_some() && req.image_ref().is_some() {
        return Err(RequestError::ContextAndImage);
    }
    Ok(())
}

fn validate_context_or_image_is_specified(req: &ContainerRequest) -> Result<(), RequestError> {
    if req.from_dockerfile.context_path().is_none()
        && req.from_dockerfile.context_archive.is_none()
        && req.image_ref().is_none()
    {
        return Err(RequestError::MissingSource);
    }
    Ok(())
}

fn validate_request_mounts(req: &ContainerRequest) -> Result<(), RequestError> {
    validate_mounts(&req.mounts, &req.host_config_modifiers)
}
