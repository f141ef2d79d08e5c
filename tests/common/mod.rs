//! Shared test fixtures

#![allow(dead_code)]

mod mock_git;
mod mock_platform;
mod temp_repo;

pub use mock_git::{MockGit, sha};
pub use mock_platform::{MockGitLab, make_pipeline, make_review};
pub use temp_repo::TempRemote;

use fusion_bot::approval::select::SequenceRandom;
use fusion_bot::config::{Profile, Rules};
use fusion_bot::git::GitService;
use fusion_bot::platform::PlatformService;
use fusion_bot::reviewer::{Context, Trigger};
use fusion_bot::types::{Job, Pipeline, User};
use std::sync::Arc;

pub const BOT: &str = "fusion";

/// Profile with feature propositions, replication and integration
pub fn profile() -> Profile {
    Profile::from_toml(
        r#"
[gitlab]
bot = "fusion"

[approval]
rules = "rules.yaml"
ownage = ".fusion/ownage.yaml"

[[fusion.proposition]]
name = "feature"
source = { include = ["^feature/"] }

[fusion.replication]
prefix = "repl"
target = "main"
source = { include = ["^release/"] }

[fusion.integration]
prefix = "intg"

[[fusion.integration.rules]]
source = { include = ["^release/"] }
target = { include = ["^main$"] }
"#,
    )
    .unwrap()
}

/// One team owning `src/`, reviewed by alice alone
pub fn rules() -> Rules {
    Rules::from_yaml(
        r"
teams:
  core:
    quorum: 1
    labels: [core]
    required: [alice]
",
    )
    .unwrap()
}

pub const OWNAGE: &str = "core:\n  include: ['^src/']\n";

/// Reviewer context for a job run by `user` in `pipeline`
pub fn context(
    git: Arc<dyn GitService>,
    platform: Arc<dyn PlatformService>,
    user: &str,
    pipeline: Pipeline,
    review: Option<u64>,
) -> Context {
    Context::new(
        profile(),
        rules(),
        Default::default(),
        git,
        platform,
        Trigger {
            job: Job {
                id: 1,
                user: User {
                    username: user.to_string(),
                },
                pipeline,
            },
            review,
        },
        Box::new(SequenceRandom::new([0])),
    )
}
