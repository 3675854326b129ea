//! Command-line entry point for imagegate.
//!
//! # Commands
//!
//! - `run --config <file>` - Build, validate and boot-test every configured version
//! - `validate <image>` - Run the structural checks on one image
//! - `verify-boot --instance <name> --transcript <file>` - Watch an instance boot
//! - `make-deletable --disk <name>` - Drive a disk into a deletable state
//! - `shrink <image>` - Shrink an image to its last partition and repair the GPT

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imagegate::prelude::*;
use imagegate::shrink::shrink_image;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// Build, validate and boot-test machine images.
#[derive(Parser)]
#[command(name = "imagegate", version)]
#[command(about = "Build, validate and boot-test machine images", long_about = None)]
struct Cli {
    /// Log filter directives (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over every configured version.
    Run {
        /// Pipeline configuration file
        #[arg(long)]
        config: PathBuf,

        /// Only process these versions (repeatable)
        #[arg(long = "version", value_name = "VERSION")]
        versions: Vec<String>,

        /// Validate existing artifacts instead of building
        #[arg(long)]
        skip_build: bool,

        /// Do not boot-test on the remote platform
        #[arg(long, visible_alias = "skip-oxide")]
        skip_remote_test: bool,

        /// Leave remote resources in place
        #[arg(long)]
        no_cleanup: bool,

        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run the structural checks on an image file.
    Validate {
        /// Raw disk image
        image: PathBuf,

        /// Registry hive tool to read the boot configuration with
        #[arg(long)]
        hive_tool: Option<String>,

        /// Directory for the working copy and mount points
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
    },

    /// Poll an existing instance's serial console until it boots.
    #[command(name = "verify-boot")]
    VerifyBoot {
        /// Instance name
        #[arg(long)]
        instance: String,

        /// Where to write the console transcript
        #[arg(long)]
        transcript: PathBuf,

        /// Configuration file for platform and polling settings
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Drive a disk into a state in which it can be deleted.
    #[command(name = "make-deletable")]
    MakeDeletable {
        /// Disk name
        #[arg(long)]
        disk: String,

        /// Delete the disk afterwards
        #[arg(long)]
        delete: bool,

        /// Configuration file for platform settings
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Shrink an image to its last partition and repair the backup GPT.
    Shrink {
        /// Raw disk image
        image: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_pipeline(
    config: &Path,
    versions: Vec<String>,
    overrides: StageConfig,
    json: bool,
) -> Result<ExitCode> {
    let mut config = load_config(Some(config))?;
    if !versions.is_empty() {
        config = config.with_versions(versions);
    }
    let stages = StageConfig {
        skip_build: config.stages.skip_build || overrides.skip_build,
        skip_remote_test: config.stages.skip_remote_test || overrides.skip_remote_test,
        no_cleanup: config.stages.no_cleanup || overrides.no_cleanup,
    };
    let config = config.with_stages(stages);
    config.validate().context("invalid configuration")?;

    let platform: Arc<dyn Platform> = Arc::new(
        OxideCli::from_config(&config.platform).with_scratch_dir(&config.validator.scratch_dir),
    );
    let delegates = ImageDelegates::new(
        BuildTool::new(config.build.clone()),
        ImageValidator::new(config.validator.clone()),
        RemoteTester::new(platform, config.platform.clone(), config.boot.clone()),
    );
    let runner = PipelineRunner::new(Arc::new(delegates), config.stages)
        .with_event_sink(Arc::new(LoggingEventSink::debug()));

    let summary = runner.run(&config.work_items()).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.render_table());
    }
    Ok(exit_code(summary.passed()))
}

async fn validate_image(
    image: &Path,
    hive_tool: Option<String>,
    scratch_dir: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut config = ValidatorConfig {
        hive_tool,
        ..ValidatorConfig::default()
    };
    if let Some(dir) = scratch_dir {
        config.scratch_dir = dir;
    }

    let report = ImageValidator::new(config)
        .validate(image)
        .await
        .with_context(|| format!("validating {}", image.display()))?;
    for record in report.records() {
        println!("{record}");
    }
    println!("{}", report.counts());
    Ok(exit_code(!report.has_failures()))
}

async fn verify_boot(instance: &str, transcript: &Path, config: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config)?;
    let platform: Arc<dyn Platform> = Arc::new(OxideCli::from_config(&config.platform));
    let report = BootVerifier::new(platform, config.boot)
        .verify(instance, transcript)
        .await
        .with_context(|| format!("verifying boot of {instance}"))?;

    println!("{} ({:.0?})", report.outcome, report.elapsed);
    Ok(exit_code(report.outcome.is_passed()))
}

async fn reconcile_disk(disk: &str, delete: bool, config: Option<&Path>) -> Result<ExitCode> {
    let config = load_config(config)?;
    let platform = OxideCli::from_config(&config.platform);
    let report = if delete {
        reconcile_and_delete(&platform, disk).await
    } else {
        make_deletable(&platform, disk).await
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code(!delete || report.deleted))
}

async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run {
            config,
            versions,
            skip_build,
            skip_remote_test,
            no_cleanup,
            json,
        } => {
            let overrides = StageConfig::default()
                .with_skip_build(skip_build)
                .with_skip_remote_test(skip_remote_test)
                .with_no_cleanup(no_cleanup);
            run_pipeline(&config, versions, overrides, json).await
        }
        Commands::Validate {
            image,
            hive_tool,
            scratch_dir,
        } => validate_image(&image, hive_tool, scratch_dir).await,
        Commands::VerifyBoot {
            instance,
            transcript,
            config,
        } => verify_boot(&instance, &transcript, config.as_deref()).await,
        Commands::MakeDeletable {
            disk,
            delete,
            config,
        } => reconcile_disk(&disk, delete, config.as_deref()).await,
        Commands::Shrink { image } => {
            let size = shrink_image(&image)
                .await
                .with_context(|| format!("shrinking {}", image.display()))?;
            println!("{} bytes", size);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(cli.log_filter.as_deref(), format)?;

    // Dropping the in-flight command on Ctrl-C runs its cleanup guards.
    tokio::select! {
        result = dispatch(cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, released in-flight resources");
            info!("Remote resources may remain; rerun with the same versions to clean them up");
            Ok(ExitCode::from(130))
        }
    }
}
