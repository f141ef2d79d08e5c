//! fusion - quorum-gated merge request bot for GitLab CI

mod cli;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use cli::context::CiEnv;
use fusion_bot::error::Result;
use fusion_bot::reviewer::{Decision, Operation};
use fusion_bot::types::Sha;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "fusion", version, about = "Quorum-gated merge request automation for GitLab")]
struct Cli {
    /// Bot profile
    #[arg(short, long, global = true, env = "FUSION_CONFIG", default_value = "fusion.toml")]
    config: PathBuf,

    /// Repository checkout to work in
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// GitLab API root
    #[arg(long, global = true, env = "CI_API_V4_URL", hide_env_values = true)]
    api_url: Option<String>,

    /// GitLab project id or path
    #[arg(long, global = true, env = "CI_PROJECT_ID")]
    project: Option<String>,

    /// Job running the bot
    #[arg(long, global = true, env = "CI_JOB_ID")]
    job: Option<u64>,

    /// Merge request the pipeline runs for
    #[arg(long, global = true, env = "CI_MERGE_REQUEST_IID")]
    review: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    /// Approval surviving changes outside your teams
    Advance,
    /// Approval invalidated by any change
    Fragile,
    /// Hold the merge
    Block,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve approvals and queue the merge request once approved
    Enqueue,
    /// Resolve approvals and merge if the merge request heads its queue
    Accept,
    /// Take the merge request out of the queue
    Dequeue,
    /// Record your decision on the current head
    Approve {
        /// Kind of decision
        #[arg(value_enum, default_value = "advance")]
        decision: DecisionArg,
    },
    /// Become a co-author
    Own,
    /// Stop being a co-author
    Unown,
    /// Exclude a commit from ownership resolution
    Skip {
        /// Commit to skip
        sha: String,
    },
    /// Bypass approvals for the current head
    Emergent,
    /// Replicate the pipeline's commit into the replication target
    Replicate,
    /// Integrate a commit from one branch into another
    Integrate {
        /// Branch the commit comes from
        source: String,
        /// Branch to integrate into
        target: String,
        /// Commit to integrate
        fork: String,
    },
    /// Forget finished merge requests
    Clean,
}

impl Commands {
    fn operation(&self) -> Result<Operation> {
        Ok(match self {
            Self::Enqueue => Operation::Enqueue,
            Self::Accept => Operation::Accept,
            Self::Dequeue => Operation::Dequeue,
            Self::Approve { decision } => Operation::Approve(match decision {
                DecisionArg::Advance => Decision::Advance,
                DecisionArg::Fragile => Decision::Fragile,
                DecisionArg::Block => Decision::Block,
            }),
            Self::Own => Operation::Own,
            Self::Unown => Operation::Unown,
            Self::Skip { sha } => Operation::Skip(Sha::new(sha)?),
            Self::Emergent => Operation::Emergent,
            Self::Replicate => Operation::StartReplication,
            Self::Integrate {
                source,
                target,
                fork,
            } => Operation::StartIntegration {
                source: source.clone(),
                target: target.clone(),
                fork: Sha::new(fork)?,
            },
            Self::Clean => Operation::Clean,
        })
    }
}

/// Logs go to stderr; stdout carries reports
fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .ok();
    }
}

async fn run(cli: &Cli) -> Result<bool> {
    let operation = cli.command.operation()?;
    let job = cli.job.ok_or_else(|| {
        fusion_bot::error::Error::Config("CI_JOB_ID not set; run inside a GitLab CI job".to_string())
    })?;
    let env = CiEnv {
        api_url: cli.api_url.clone(),
        project: cli.project.clone(),
        job,
        review: cli.review,
    };
    cli::run(&cli.config, &cli.repo, &env, &operation).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %err, retryable = err.is_retryable(), "operation failed");
            eprintln!("error: {err}");
            ExitCode::from(cli::exit_code(&err))
        }
    }
}
