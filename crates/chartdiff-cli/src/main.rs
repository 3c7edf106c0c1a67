//! chartdiff - rendered Helm/Helmfile diffs for pull requests
//!
//! Runs the templating pipeline against a local git repository.
//!
//! ## Commands
//!
//! - `classify`: list the chart roots a change touches
//! - `publish`: render both sides and publish `refs/pull-requests/<id>/<tool>`
//! - `remove-ref`: delete the synthetic refs of a pull request
//! - `versions`: report the configured rendering binaries' versions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chartdiff_core::{
    classify, probe_versions, strategies, strategy_for, synthetic_ref_name, ChartRoot,
    DeploymentConfig, DiffJobRunner, DiffPublisher, EventDispatcher, GitCliHost, HostServices,
    JobOutcome, PullRequestEvent, RefLifecycle, RenderStrategy, ScopedConfig, TemplateOrchestrator,
};
use chartdiff_state::fakes::{
    MemoryPullRequestService, RecordingCommentService, RecordingPrincipal, StaticLinkBuilder,
};
use chartdiff_state::{Author, PullRequest, RefCommands, Repository, RepositoryRef};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, Level};

#[derive(Parser)]
#[command(name = "chartdiff")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rendered Helm/Helmfile diffs for pull requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Deployment configuration file
    #[arg(long, global = true, env = "CHARTDIFF_CONFIG", default_value = "chartdiff.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RepoArgs {
    /// Path to the git repository
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Repository id used for settings lookup
    #[arg(long, default_value_t = 1)]
    repository_id: u64,

    /// Project id used for settings lookup
    #[arg(long, default_value_t = 1)]
    project_id: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// List chart roots touched between the merge base of `--to` and `--from`
    Classify {
        #[command(flatten)]
        repo: RepoArgs,

        /// Source revision (the branch being merged)
        #[arg(long)]
        from: String,

        /// Destination revision
        #[arg(long)]
        to: String,

        /// Only classify for this tool
        #[arg(long)]
        tool: Option<String>,
    },

    /// Render both sides of a change and publish the synthetic refs
    Publish {
        #[command(flatten)]
        repo: RepoArgs,

        /// Pull request id used in the synthetic ref name
        #[arg(long)]
        pr: u64,

        /// Source revision (the branch being merged)
        #[arg(long)]
        from: String,

        /// Destination revision
        #[arg(long)]
        to: String,

        /// Only publish for this tool
        #[arg(long)]
        tool: Option<String>,

        /// Commit author name
        #[arg(long, default_value = "chartdiff")]
        author_name: String,

        /// Commit author email
        #[arg(long, default_value = "chartdiff@localhost")]
        author_email: String,

        /// Base URL for diff links in the generated comment
        #[arg(long, default_value = "http://localhost")]
        link_base: String,
    },

    /// Delete the synthetic refs of a pull request
    RemoveRef {
        #[command(flatten)]
        repo: RepoArgs,

        /// Pull request id
        #[arg(long)]
        pr: u64,

        /// Only remove the ref for this tool
        #[arg(long)]
        tool: Option<String>,
    },

    /// Print the versions of the configured rendering binaries
    Versions,
}

#[derive(Serialize)]
struct PublishReport {
    tool: String,
    directories: Vec<String>,
    outcome: JobOutcome,
}

#[derive(Serialize)]
struct PublishSummary {
    jobs: Vec<PublishReport>,
    comments: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    chartdiff_core::init_tracing(cli.json, level);

    let config = DeploymentConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
        .from_env();

    match cli.command {
        Commands::Classify {
            repo,
            from,
            to,
            tool,
        } => cmd_classify(&repo, &from, &to, tool.as_deref()).await,
        Commands::Publish {
            repo,
            pr,
            from,
            to,
            tool,
            author_name,
            author_email,
            link_base,
        } => {
            let author = Author::new(author_name, author_email);
            cmd_publish(config, &repo, pr, &from, &to, tool.as_deref(), author, &link_base).await
        }
        Commands::RemoveRef { repo, pr, tool } => cmd_remove_ref(&repo, pr, tool.as_deref()).await,
        Commands::Versions => cmd_versions(config).await,
    }
}

fn selected_strategies(tool: Option<&str>) -> Result<Vec<Arc<dyn RenderStrategy>>> {
    match tool {
        Some(tool) => Ok(vec![strategy_for(tool)?]),
        None => Ok(strategies()),
    }
}

fn repository(args: &RepoArgs) -> Repository {
    let slug = args
        .repo
        .canonicalize()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "repository".to_string());
    Repository::new(args.repository_id, args.project_id, slug)
}

async fn open_host(path: &Path) -> Result<GitCliHost> {
    GitCliHost::open(path)
        .await
        .with_context(|| format!("Failed to open git repository at {}", path.display()))
}

async fn resolve(host: &GitCliHost, repository: &Repository, rev: &str) -> Result<String> {
    host.resolve(repository, rev)
        .await?
        .with_context(|| format!("Revision '{rev}' not found"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_classify(args: &RepoArgs, from: &str, to: &str, tool: Option<&str>) -> Result<()> {
    let host = open_host(&args.repo).await?;
    let repository = repository(args);
    let source = RepositoryRef {
        repository: repository.clone(),
        id: from.to_string(),
        latest_commit: resolve(&host, &repository, from).await?,
    };
    let changes = host
        .changes(from, to)
        .await
        .context("Failed to compute changes")?;
    debug!(changes = changes.len(), "computed changes");

    let mut roots: Vec<ChartRoot> = Vec::new();
    for strategy in selected_strategies(tool)? {
        roots.extend(
            classify(
                &host,
                &source,
                &changes,
                strategy.marker_filenames(),
                strategy.tool_name(),
            )
            .await?,
        );
    }
    print_json(&roots)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_publish(
    config: DeploymentConfig,
    args: &RepoArgs,
    pr: u64,
    from: &str,
    to: &str,
    tool: Option<&str>,
    author: Author,
    link_base: &str,
) -> Result<()> {
    let scratch_dir = config.scratch_dir.clone();
    let mut host = open_host(&args.repo).await?;
    if let Some(dir) = &scratch_dir {
        host = host.with_scratch_dir(dir);
    }
    let repository = repository(args);
    let side = |id: &str, commit: String| RepositoryRef {
        repository: repository.clone(),
        id: id.to_string(),
        latest_commit: commit,
    };
    let pull_request = PullRequest {
        id: pr,
        from_ref: side(from, resolve(&host, &repository, from).await?),
        to_ref: side(to, resolve(&host, &repository, to).await?),
        author,
    };
    let changes = host
        .changes(from, to)
        .await
        .context("Failed to compute changes")?;

    let pull_requests = Arc::new(MemoryPullRequestService::new());
    pull_requests.insert(pull_request.clone(), changes);
    let comments = Arc::new(RecordingCommentService::new());
    let host = Arc::new(host);
    let services = HostServices {
        trees: host.clone(),
        working_trees: host.clone(),
        refs: host,
        pull_requests,
        comments: comments.clone(),
        links: Arc::new(StaticLinkBuilder::new(link_base)),
        principal: Arc::new(RecordingPrincipal::new("chartdiff")),
        settings: Arc::new(config),
    };

    let strategies = selected_strategies(tool)?;
    let dispatcher = EventDispatcher::new(services.clone(), strategies.clone());
    let publisher = DiffPublisher::new(services.clone(), TemplateOrchestrator::new(scratch_dir));
    let runner = DiffJobRunner::new(services, publisher, strategies);

    let jobs = dispatcher
        .handle(&PullRequestEvent::Opened(pull_request))
        .await
        .context("Failed to classify pull request")?;
    if jobs.is_empty() {
        info!("no chart roots touched");
    }

    let mut reports = Vec::new();
    for job in jobs {
        let outcome = runner
            .run(&job)
            .await
            .with_context(|| format!("Failed to publish {} diff", job.tool))?;
        reports.push(PublishReport {
            tool: job.tool,
            directories: job.directories.into_iter().collect(),
            outcome,
        });
    }
    print_json(&PublishSummary {
        jobs: reports,
        comments: comments.comments().into_iter().map(|(_, text)| text).collect(),
    })
}

async fn cmd_remove_ref(args: &RepoArgs, pr: u64, tool: Option<&str>) -> Result<()> {
    let lifecycle = RefLifecycle::new(Arc::new(open_host(&args.repo).await?));
    let repository = repository(args);
    for strategy in selected_strategies(tool)? {
        let name = lifecycle
            .remove(&repository, pr, strategy.tool_name())
            .await
            .with_context(|| {
                format!(
                    "Failed to delete {}",
                    synthetic_ref_name(pr, strategy.tool_name())
                )
            })?;
        println!("Removed {name}");
    }
    Ok(())
}

async fn cmd_versions(config: DeploymentConfig) -> Result<()> {
    let binaries = ScopedConfig::new(Arc::new(config)).binaries();
    print_json(&probe_versions(&binaries).await)
}
