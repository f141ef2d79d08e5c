//! Authentication for GitLab
//!
//! The token comes from the profile's configured variable, falling back to
//! the CI job token. Variables are looked up through a caller-supplied
//! function so the library never touches the process environment.

use crate::error::{Error, Result};

/// Variable GitLab CI sets for every job
pub const CI_JOB_TOKEN: &str = "CI_JOB_TOKEN";

/// Source of authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// Token from the profile's configured variable
    EnvVar,
    /// Token of the running CI job
    JobToken,
}

/// Resolved GitLab credentials
#[derive(Clone)]
pub struct GitLabAuth {
    /// API token
    pub token: String,
    /// Where it came from
    pub source: AuthSource,
}

impl std::fmt::Debug for GitLabAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabAuth")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Resolve the API token
pub fn get_gitlab_auth<F>(token_env: &str, lookup: F) -> Result<GitLabAuth>
where
    F: Fn(&str) -> Option<String>,
{
    let found = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(token) = found(token_env) {
        return Ok(GitLabAuth {
            token,
            source: AuthSource::EnvVar,
        });
    }
    if let Some(token) = found(CI_JOB_TOKEN) {
        return Ok(GitLabAuth {
            token,
            source: AuthSource::JobToken,
        });
    }
    Err(Error::Auth(format!(
        "no GitLab token: set {token_env} or run inside a CI job"
    )))
}
