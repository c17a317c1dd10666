//! CLI command definitions for autochecker.
//!
//! The default command tests the project in `--path` against every requested
//! version; `ls` prints the versions tested when none are given.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use crate::config::{sort_versions, RunConfig};
use crate::display::{render_results, render_version_list, LinePrinter, StatusBoard};
use crate::engine::{ContainerEngine, DaemonSettings, DockerEngine};
use crate::pipeline::{
    run_all, AggregateRunReport, NullSink, ProgressSink, RetainPolicy, VersionPipeline,
    VersionRunRequest,
};
use crate::project::{load_template, ProjectInfo, TEMPLATE_FILE_NAME};

/// Run a project's tests against many base image versions in Docker.
#[derive(Parser, Debug)]
#[command(name = "autochecker")]
#[command(about = "Test a project against multiple base image versions in Docker")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
#[command(
    long_about = "autochecker copies the project once per version, builds a test image from a\nDockerfile template with $VERSION substituted, and runs the test command in it.\n\nExample usage:\n  autochecker              # every default version\n  autochecker 4.2.4 5.10.1 # just these\n  autochecker ls           # list the default versions"
)]
pub struct Cli {
    /// Optional subcommand; testing is the default.
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// List the versions tested by default.
    #[command(alias = "list")]
    Ls,
}

/// Arguments for the default test command.
#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Versions to test; every default version when omitted.
    pub versions: Vec<String>,

    /// Maximum number of versions tested at once (overrides TEST_LIMIT).
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Base image pulled as <BASE_IMAGE>:<VERSION>.
    #[arg(long)]
    pub base_image: Option<String>,

    /// Test command run inside the container, split on whitespace.
    #[arg(long)]
    pub test_cmd: Option<String>,

    /// Dockerfile template (default: <PATH>/DockerTemplate, else built-in).
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Project directory.
    #[arg(short, long, default_value = ".")]
    pub path: PathBuf,

    /// Stream engine and test output for every version.
    #[arg(short, long)]
    pub verbose: bool,

    /// Remove staging copies once a version settles.
    #[arg(long)]
    pub clean_staging: bool,

    /// Print the aggregate report as JSON instead of progress output.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// How progress is shown while versions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    /// Append-only lines, with engine output.
    Lines { verbose: bool },
    /// One redrawn status line per version.
    Board,
    /// Nothing until the report.
    Quiet,
}

impl View {
    fn select(versions: usize, verbose: bool, json: bool, terminal: bool) -> Self {
        if json {
            View::Quiet
        } else if versions == 1 || verbose {
            View::Lines { verbose: true }
        } else if terminal {
            View::Board
        } else {
            View::Lines { verbose: false }
        }
    }

    fn streams_output(&self) -> bool {
        matches!(self, View::Lines { verbose: true })
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses the arguments and runs the selected command.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Returns success only when every requested version passed.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Some(Commands::Ls) => {
            run_ls_command();
            Ok(ExitCode::SUCCESS)
        }
        None => run_test_command(cli.run).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn run_ls_command() {
    let mut versions = RunConfig::default_versions();
    sort_versions(&mut versions);
    print!("{}", render_version_list(&versions));
}

async fn run_test_command(args: RunArgs) -> anyhow::Result<ExitCode> {
    let config = resolve_config(&args)?;
    let versions = if args.versions.is_empty() {
        RunConfig::default_versions()
    } else {
        args.versions.clone()
    };

    let project = ProjectInfo::discover(&args.path)
        .await
        .with_context(|| format!("Failed to inspect project at {}", args.path.display()))?;
    let template_path = config
        .template_path
        .clone()
        .unwrap_or_else(|| project.root.join(TEMPLATE_FILE_NAME));
    let dockerfile_template = load_template(&template_path).await?;

    let requests = build_requests(&project, &config, &dockerfile_template, &versions, args.verbose)?;

    let settings = DaemonSettings::from_env();
    info!(daemon = %settings, "Connecting to Docker");
    let engine = DockerEngine::from_docker(settings.connect()?);
    engine
        .ping()
        .await
        .with_context(|| format!("Docker daemon at {settings} is not reachable"))?;
    let engine: Arc<dyn ContainerEngine> = Arc::new(engine);

    let stdout = std::io::stdout();
    let terminal = stdout.is_terminal();
    let view = View::select(requests.len(), args.verbose, args.json, terminal);
    let sink: Arc<dyn ProgressSink> = match view {
        View::Quiet => Arc::new(NullSink),
        View::Lines { .. } => Arc::new(LinePrinter::new(stdout, terminal)),
        View::Board => {
            // Clear the screen; the board draws from the top.
            print!("\x1b[2J");
            Arc::new(StatusBoard::new(stdout, 1, terminal))
        }
    };

    let pipeline = VersionPipeline::new(engine, sink)
        .with_staging_root(&config.staging_root)
        .with_retain_policy(config.retain);

    let started_at = Utc::now();
    let outcomes = run_all(&pipeline, &requests, config.concurrency).await;
    let report = AggregateRunReport::from_outcomes(&outcomes, started_at);
    info!(
        passed = report.successes(),
        failed = report.failures(),
        duration_ms = report.duration().num_milliseconds(),
        "All versions settled"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_results(&report, terminal, view.streams_output()));
    }

    if report.all_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Environment configuration with command-line overrides applied.
fn resolve_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_env()?;

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(base_image) = &args.base_image {
        config.base_image = base_image.trim().to_string();
    }
    if let Some(test_cmd) = &args.test_cmd {
        config.test_command = test_cmd.split_whitespace().map(str::to_string).collect();
    }
    if let Some(template) = &args.template {
        config.template_path = Some(template.clone());
    }
    if args.clean_staging {
        config.retain = RetainPolicy::discard();
    }

    config.validate()?;
    Ok(config)
}

/// One request per version, all sharing the project settings.
fn build_requests(
    project: &ProjectInfo,
    config: &RunConfig,
    dockerfile_template: &str,
    versions: &[String],
    verbose: bool,
) -> anyhow::Result<Vec<VersionRunRequest>> {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<&str> = versions
        .iter()
        .map(String::as_str)
        .filter(|v| {
            let fresh = seen.insert(*v);
            if !fresh {
                warn!(version = %v, "Skipping duplicate version");
            }
            fresh
        })
        .collect();

    let Some(first) = unique.first() else {
        return Ok(Vec::new());
    };

    let template = VersionRunRequest::builder(*first)
        .project_name(project.name.as_str())
        .source_path(project.root.as_path())
        .image_name_template(project.image_name_template())
        .dockerfile_template(dockerfile_template)
        .base_image(config.base_image.as_str())
        .test_command(config.test_command.iter().cloned())
        .verbose(verbose || unique.len() == 1)
        .build()
        .with_context(|| describe_template_source(config, &project.root))?;

    Ok(unique.iter().map(|v| template.for_version(*v)).collect())
}

fn describe_template_source(config: &RunConfig, root: &Path) -> String {
    match &config.template_path {
        Some(path) => format!("Invalid Dockerfile template {}", path.display()),
        None => format!(
            "Invalid Dockerfile template in {}",
            root.join(TEMPLATE_FILE_NAME).display()
        ),
    }
}
