mod request;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use libtestbox::{BuildOptions, BuildPlanCompiler, ContainerRequest, RunPlan, run_plan};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::request::RequestFile;

/// Validate container requests and print the plans compiled from them.
#[derive(Parser, Debug)]
#[command(name = "testbox", version, about)]
struct Cli {
    /// Turn verbose logging on
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a request file for consistency
    Validate {
        /// Request file (YAML or JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Compile a request file and print the build and run plans as JSON
    Plan {
        /// Request file (YAML or JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Only print the image the container would run
        #[arg(long)]
        image_only: bool,
    },
}

/// Build plan as printed: the engine-facing options plus the packaged
/// context size.
#[derive(Serialize)]
struct BuildPlanOutput<'a> {
    #[serde(flatten)]
    options: &'a BuildOptions,
    context_size: Option<u64>,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    build: Option<BuildPlanOutput<'a>>,
    run: RunPlan,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Validate { file } => {
            load_request(&file)?;
            println!("ok");
        }
        Command::Plan { file, image_only } => plan(&file, image_only)?,
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("libtestbox=debug,testbox=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Load and validate a request file.
fn load_request(file: &Path) -> Result<ContainerRequest> {
    let base_dir = file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let req = RequestFile::load(file)?.into_request(base_dir);
    req.validate()
        .with_context(|| format!("invalid request: {}", file.display()))?;
    info!(file = %file.display(), builds = req.should_build_image(), "request is valid");
    Ok(req)
}

fn plan(file: &Path, image_only: bool) -> Result<()> {
    let mut req = load_request(file)?;

    let build = if req.should_build_image() {
        Some(BuildPlanCompiler::default().build_options(&mut req)?)
    } else {
        None
    };
    let image = match (&build, req.image_ref()) {
        (Some(options), _) => options.tags.first().cloned(),
        (None, image) => image.map(str::to_string),
    };
    let Some(image) = image else {
        bail!("request names no image to run");
    };

    if image_only {
        println!("{image}");
        return Ok(());
    }

    let run = run_plan(&req, &image)?;
    let output = PlanOutput {
        build: build.as_ref().map(|options| BuildPlanOutput {
            options,
            context_size: options.context.as_ref().and_then(|c| c.size()),
        }),
        run,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize plan")?
    );
    info!(%image, "plan compiled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["testbox", "-v", "plan", "req.yaml", "--image-only"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Command::Plan { ref file, image_only: true } if file == Path::new("req.yaml")
        ));
        assert!(Cli::try_parse_from(["testbox"]).is_err());
    }

    #[test]
    fn load_request_resolves_context_and_validates() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("app")).unwrap();
        fs::write(tmp.path().join("app/Dockerfile"), "FROM scratch\n").unwrap();
        let file = tmp.path().join("request.yaml");
        fs::write(&file, "context: app\n").unwrap();

        let mut req = load_request(&file).unwrap();
        assert!(req.should_build_image());
        let options = BuildPlanCompiler::new(std::sync::Arc::new(libtestbox::image::auth::NoCredentials))
            .build_options(&mut req)
            .unwrap();
        assert_eq!(options.dockerfile, "Dockerfile");

        fs::write(&file, "context: app\nimage: redis\n").unwrap();
        let err = load_request(&file).unwrap_err();
        assert!(err.to_string().contains("invalid request"));
    }
}
