use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use libtestbox::image::auth::{DOCKER_HUB_AUTH_KEY, NoCredentials};
use libtestbox::{
    AuthConfig, BuildOptions, BuildOptionsModifier, BuildPlanCompiler, ContainerRequest,
    CredentialProvider, FromDockerfile, RequestError, run_plan,
};
use uuid::Uuid;

/// Hands out credentials for every registry except the ones it refuses.
struct FakeCredentials {
    refused: Vec<&'static str>,
}

impl CredentialProvider for FakeCredentials {
    fn credentials_for(&self, registry: &str) -> anyhow::Result<AuthConfig> {
        if self.refused.iter().any(|r| *r == registry) {
            anyhow::bail!("helper failed for {registry}");
        }
        Ok(AuthConfig {
            username: Some(format!("user@{registry}")),
            ..Default::default()
        })
    }
}

fn compiler() -> BuildPlanCompiler {
    BuildPlanCompiler::new(Arc::new(NoCredentials))
}

fn build_request(context: impl Into<PathBuf>) -> ContainerRequest {
    ContainerRequest {
        from_dockerfile: FromDockerfile {
            context: Some(context.into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn relative_context_defaults_dockerfile() {
    // Integration tests run from the package root.
    let mut req = build_request("tests");
    req.image = Some(String::new());
    assert!(req.validate().is_ok());

    let options = compiler().build_options(&mut req).unwrap();
    assert_eq!(options.dockerfile, "Dockerfile");

    let context = req.from_dockerfile.context.unwrap();
    assert!(context.is_absolute());
    assert!(context.ends_with("tests"));
}

#[test]
fn build_args_survive_modifier() {
    let tmp = tempfile::tempdir().unwrap();
    let mut req = build_request(tmp.path());
    req.from_dockerfile.build_args =
        HashMap::from([("VER".to_string(), Some("1.2".to_string()))]);
    let clear: BuildOptionsModifier =
        Arc::new(|opts: &mut BuildOptions| opts.build_args = HashMap::new());
    req.from_dockerfile.build_options_modifiers = vec![clear];

    let options = compiler().build_options(&mut req).unwrap();
    assert_eq!(
        options.build_args,
        HashMap::from([("VER".to_string(), Some("1.2".to_string()))])
    );
}

#[test]
fn canonical_tag_comes_first() {
    let tmp = tempfile::tempdir().unwrap();
    let mut req = build_request(tmp.path());
    req.from_dockerfile.repo = Some("MyRepo".into());
    req.from_dockerfile.tag = Some(String::new());
    let latest: BuildOptionsModifier =
        Arc::new(|opts: &mut BuildOptions| opts.tags.push("latest".into()));
    req.from_dockerfile.build_options_modifiers = vec![latest];

    let options = compiler().build_options(&mut req).unwrap();
    assert_eq!(options.tags.len(), 2);
    assert_eq!(options.tags[1], "latest");
    let (repo, tag) = options.tags[0].split_once(':').unwrap();
    assert_eq!(repo, "myrepo");
    assert!(Uuid::parse_str(tag).is_ok());
}

#[test]
fn generated_labels_are_unique_per_compilation() {
    let tmp = tempfile::tempdir().unwrap();
    let mut req = build_request(tmp.path());

    let first = compiler().build_options(&mut req).unwrap();
    let second = compiler().build_options(&mut req).unwrap();
    assert_ne!(first.tags[0], second.tags[0]);

    let (repo, tag) = first.tags[0].split_once(':').unwrap();
    assert!(Uuid::parse_str(repo).is_ok());
    assert!(Uuid::parse_str(tag).is_ok());
    assert_ne!(repo, tag);
}

#[test]
fn one_bad_image_does_not_block_discovery() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("Dockerfile"),
        "ARG BASE=ghcr.io/acme/base:1\n\
         FROM ${BASE} AS base\n\
         FROM refused.example.com/tools:2 AS tools\n\
         FROM ${UNSET}/library/alpine AS broken\n\
         FROM base\n\
         FROM redis:7\n",
    )
    .unwrap();
    let mut req = build_request(tmp.path());
    let compiler = BuildPlanCompiler::new(Arc::new(FakeCredentials {
        refused: vec!["refused.example.com"],
    }));

    let options = compiler.build_options(&mut req).unwrap();
    let mut registries: Vec<&str> = options.auth_configs.keys().map(String::as_str).collect();
    registries.sort();
    assert_eq!(registries, vec!["ghcr.io", DOCKER_HUB_AUTH_KEY]);
    assert_eq!(
        options.auth_configs["ghcr.io"].username.as_deref(),
        Some("user@ghcr.io")
    );
}

#[test]
fn ignore_rules_shape_the_context() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    fs::write(root.join("Dockerfile"), "FROM scratch\nCOPY . /\n").unwrap();
    fs::write(root.join(".dockerignore"), "*.secret\n").unwrap();
    fs::write(root.join("app.conf"), "ok").unwrap();
    fs::write(root.join("db.secret"), "hunter2").unwrap();

    let mut req = build_request(root);
    let mut options = compiler().build_options(&mut req).unwrap();
    let mut context = options.context.take().unwrap();
    let size = context.size().unwrap();

    let mut bytes = Vec::new();
    context.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes.len() as u64, size);

    let mut archive = tar::Archive::new(bytes.as_slice());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    assert!(names.contains(&"app.conf".to_string()));
    assert!(names.contains(&".dockerignore".to_string()));
    assert!(!names.iter().any(|n| n.ends_with(".secret")));
}

#[test]
fn validation_precedes_compilation() {
    let mut req = build_request("./app");
    req.image = Some("redis:7".into());
    assert!(matches!(req.validate(), Err(RequestError::ContextAndImage)));

    let req = ContainerRequest {
        image: Some("redis:7".into()),
        exposed_ports: vec!["6379".into()],
        ..Default::default()
    };
    req.validate().unwrap();
    let plan = run_plan(&req, "redis:7").unwrap();
    assert!(plan.config.exposed_ports.contains("6379/tcp"));
}
