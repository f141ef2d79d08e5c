//! Explicit dependencies of every operation

use crate::approval::select::RandomSource;
use crate::config::{Haters, Profile, Rules};
use crate::git::GitService;
use crate::platform::PlatformService;
use crate::report::Report;
use crate::types::{Identity, Job};
use std::sync::Arc;

/// What started the invocation
#[derive(Debug, Clone)]
pub struct Trigger {
    /// CI job running the bot
    pub job: Job,
    /// Review the job runs for, if any
    pub review: Option<u64>,
}

impl Trigger {
    /// Login of the user who started the job
    pub fn user(&self) -> &str {
        &self.job.user.username
    }
}

/// Side effect for the caller to dispatch once state is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Re-run a review's pipeline so its resolution runs again
    TriggerPipeline(u64),
    /// Tell participants what happened
    Report(Report),
}

/// Result of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the operation achieved what it was asked
    pub success: bool,
    /// Effects to dispatch
    pub effects: Vec<Effect>,
}

impl Outcome {
    /// Nothing to do
    pub const fn noop() -> Self {
        Self {
            success: true,
            effects: Vec::new(),
        }
    }

    /// Reports among the effects
    pub fn reports(&self) -> impl Iterator<Item = &Report> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Report(report) => Some(report),
            Effect::TriggerPipeline(_) => None,
        })
    }

    /// Reviews whose pipelines should be re-run
    pub fn triggers(&self) -> impl Iterator<Item = u64> + '_ {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::TriggerPipeline(iid) => Some(*iid),
            Effect::Report(_) => None,
        })
    }
}

/// Everything an operation needs, passed explicitly
pub struct Context {
    /// Bot profile
    pub profile: Profile,
    /// Approval rules
    pub rules: Rules,
    /// Haters
    pub haters: Haters,
    /// Repository access
    pub git: Arc<dyn GitService>,
    /// GitLab access
    pub platform: Arc<dyn PlatformService>,
    /// Invocation trigger
    pub trigger: Trigger,
    /// Identity of commits the bot writes
    pub identity: Identity,
    /// Lottery source
    pub random: Box<dyn RandomSource + Send>,
    reports: Vec<Report>,
}

impl Context {
    /// Assemble a context
    pub fn new(
        profile: Profile,
        rules: Rules,
        haters: Haters,
        git: Arc<dyn GitService>,
        platform: Arc<dyn PlatformService>,
        trigger: Trigger,
        random: Box<dyn RandomSource + Send>,
    ) -> Self {
        let identity = profile.git.identity();
        Self {
            profile,
            rules,
            haters,
            git,
            platform,
            trigger,
            identity,
            random,
            reports: Vec::new(),
        }
    }

    /// Login of the bot account
    pub fn bot(&self) -> &str {
        &self.profile.gitlab.bot
    }

    /// Queue a report
    pub fn report(&mut self, report: Report) {
        self.reports.push(report);
    }

    /// Reports queued so far, including those of a failed operation
    pub fn take_reports(&mut self) -> Vec<Report> {
        std::mem::take(&mut self.reports)
    }
}
