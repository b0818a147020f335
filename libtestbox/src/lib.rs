//! # libtestbox: container request compiler for throwaway test containers
//!
//! `libtestbox` takes the declarative description of a container a test
//! needs (a [`ContainerRequest`]), checks it for consistency and compiles it
//! into the plans an engine client executes: the options for building an
//! image from a local context, and the configuration the container is created
//! with. It never talks to an engine itself.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Request model: `ContainerRequest`, `FromDockerfile`, mounts, modifiers, hooks. |
//! | [`error`] | [`RequestError`] enum covering validation and compilation failures. |
//! | [`validate`] | Fail-fast request validation. |
//! | [`mounts`] | Mount target conflict detection over mounts and raw binds. |
//! | [`context`] | Build context resolution, `.dockerignore` handling and tar packaging. |
//! | [`image`] | Image naming defaults, base-image discovery, registry credentials. |
//! | [`build`] | [`BuildPlanCompiler`] producing [`BuildOptions`]. |
//! | [`run`] | [`RunPlan`] assembly and port spec parsing. |
//! | [`config`] | Environment configuration. |

pub mod build;
pub mod config;
pub mod context;
pub mod error;
pub mod image;
pub mod mounts;
pub mod run;
pub mod types;
pub mod validate;

mod utils;

pub use build::{BuildOptions, BuildPlanCompiler};
pub use context::BuildContext;
pub use error::RequestError;
pub use image::auth::{AuthConfig, CredentialProvider};
pub use run::{RunPlan, run_plan};
pub use types::*;
