//! Command execution for the `fusion` binary

pub mod context;

use context::{CiEnv, CommandContext};
use fusion_bot::error::{Error, Result};
use fusion_bot::report::Report;
use fusion_bot::reviewer::{self, Operation, Outcome};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Exit code asking the scheduler to retry (`EX_TEMPFAIL`)
pub const EXIT_RETRY: u8 = 75;

/// Exit code for an error
pub const fn exit_code(err: &Error) -> u8 {
    if err.is_retryable() { EXIT_RETRY } else { 1 }
}

/// Print reports as JSON lines on stdout
fn print_reports<'a>(reports: impl IntoIterator<Item = &'a Report>) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for report in reports {
        serde_json::to_writer(&mut stdout, report)?;
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

async fn dispatch(ctx: &CommandContext, outcome: &Outcome) -> Result<()> {
    print_reports(outcome.reports())?;
    for iid in outcome.triggers() {
        if let Err(err) = ctx.platform.trigger_pipeline(iid).await {
            warn!(review = iid, error = %err, "failed to trigger pipeline");
        }
    }
    Ok(())
}

/// Run one operation and dispatch its effects
pub async fn run(config: &Path, repo: &Path, env: &CiEnv, operation: &Operation) -> Result<bool> {
    let mut ctx = CommandContext::new(config, repo, env).await?;
    match reviewer::run(&mut ctx.reviewer, operation).await {
        Ok(outcome) => {
            dispatch(&ctx, &outcome).await?;
            info!(success = outcome.success, effects = outcome.effects.len(), "done");
            Ok(outcome.success)
        }
        Err(err) => {
            print_reports(&ctx.reviewer.take_reports())?;
            Err(err)
        }
    }
}
