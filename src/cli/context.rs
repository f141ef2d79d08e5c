//! Shared command context for CLI commands
//!
//! Reads the environment once and builds the explicit reviewer context
//! every operation runs with.

use fusion_bot::approval::select::ThreadRandom;
use fusion_bot::auth::get_gitlab_auth;
use fusion_bot::config::{Profile, Rules, load_haters};
use fusion_bot::error::{Error, Result};
use fusion_bot::git::GitCli;
use fusion_bot::platform::{GitLabService, PlatformService};
use fusion_bot::reviewer::{Context, Trigger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Values GitLab CI hands to the job
#[derive(Debug, Clone)]
pub struct CiEnv {
    /// API root
    pub api_url: Option<String>,
    /// Project id or path
    pub project: Option<String>,
    /// Running job
    pub job: u64,
    /// Merge request of a merge request pipeline
    pub review: Option<u64>,
}

/// Everything a command needs
pub struct CommandContext {
    /// Reviewer context handed to operations
    pub reviewer: Context,
    /// GitLab client, used to dispatch pipeline triggers
    pub platform: Arc<dyn PlatformService>,
}

fn relative_to(profile: &Path, path: &Path) -> PathBuf {
    match profile.parent() {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

impl CommandContext {
    /// Create a new command context
    ///
    /// - Load the profile and the rule files it points to
    /// - Resolve the GitLab token and create the client
    /// - Look up the triggering job
    pub async fn new(config: &Path, repo: &Path, env: &CiEnv) -> Result<Self> {
        let profile = Profile::from_file(config)?;
        let rules = Rules::from_file(&relative_to(config, &profile.approval.rules))?;
        let haters_path = profile
            .approval
            .haters
            .as_ref()
            .map(|path| relative_to(config, path));
        let haters = load_haters(haters_path.as_deref())?;

        let api_url = env
            .api_url
            .clone()
            .or_else(|| profile.gitlab.api_url.clone())
            .ok_or_else(|| Error::Config("GitLab API url not set".to_string()))?;
        let project = env
            .project
            .clone()
            .or_else(|| profile.gitlab.project.clone())
            .ok_or_else(|| Error::Config("GitLab project not set".to_string()))?;
        let auth = get_gitlab_auth(&profile.gitlab.token_env, |name| std::env::var(name).ok())?;
        debug!(?auth, %api_url, %project, "authenticated");

        let platform: Arc<dyn PlatformService> =
            Arc::new(GitLabService::new(auth.token, &api_url, &project)?);
        let git = Arc::new(GitCli::new(
            repo,
            &profile.git.remote,
            Duration::from_secs(profile.git.timeout_secs),
        ));
        let job = platform.get_job(env.job).await?;
        debug!(job = job.id, user = %job.user.username, pipeline = job.pipeline.id, "triggered by");

        let reviewer = Context::new(
            profile,
            rules,
            haters,
            git,
            Arc::clone(&platform),
            Trigger {
                job,
                review: env.review,
            },
            Box::new(ThreadRandom),
        );
        Ok(Self { reviewer, platform })
    }
}
