//! Orchestrator entry points
//!
//! Every operation handles one review transition end to end: fetch, load
//! the persisted assets, act, store with compare-and-push. Operations
//! triggered from a stale pipeline end as a clean no-op. Effects on other
//! reviews (re-running their pipelines, notifying participants) are
//! returned to the caller instead of being performed here.

pub mod changes;
mod context;

pub use context::{Context, Effect, Outcome, Trigger};

use crate::approval::engine::{ApprovalResult, Blocker};
use crate::approval::review::{Review, ReviewInput};
use crate::approval::select::RandomSource;
use crate::approval::status::{ApprovalStatus, Resolution};
use crate::config::parse_ownage;
use crate::error::{Error, Result};
use crate::fusion::check::{
    CheckInput, Problem, is_normalized, perform_all, plan_checks, review_blockers, stopper_checks,
};
use crate::fusion::merge::{Kind, Merge};
use crate::fusion::{Mode, UpdateFacts, UpdateTarget, create_update_plan, execute_update};
use crate::git::GitService;
use crate::ownership::Ownage;
use crate::platform::PlatformService;
use crate::report::{Event, Report};
use crate::storage::{Assets, Reason, Storage};
use crate::types::{GitRef, ReviewState, Sha};
use changes::{child_commits, commit_changes, review_changes, review_commits};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decision recorded by [`Operation::Approve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Approval surviving later commits outside the approver's teams
    Advance,
    /// Approval invalidated by any later change
    Fragile,
    /// Hold the merge
    Block,
}

impl Decision {
    const fn resolution(self) -> Resolution {
        match self {
            Self::Advance => Resolution::Approved,
            Self::Fragile => Resolution::Fragile,
            Self::Block => Resolution::Blocked,
        }
    }
}

/// Operations the CI runner can invoke
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Resolve approvals and keep the queue position current
    Enqueue,
    /// Resolve approvals and merge if the review heads its queue
    Accept,
    /// Leave the queue
    Dequeue,
    /// Record the job user's decision
    Approve(Decision),
    /// Add the job user as co-author
    Own,
    /// Remove the job user from the authors
    Unown,
    /// Exclude a commit from ownership resolution
    Skip(Sha),
    /// Operator bypass pinned to the current head
    Emergent,
    /// Open a replication review for the job's commit
    StartReplication,
    /// Open an integration review
    StartIntegration {
        /// Branch the commit comes from
        source: String,
        /// Branch to integrate into
        target: String,
        /// Commit to integrate
        fork: Sha,
    },
    /// Drop state of finished reviews
    Clean,
}

/// What an operation body hands back before effects are assembled
struct Done {
    success: bool,
    triggers: BTreeSet<u64>,
}

impl Done {
    const fn new(success: bool, triggers: BTreeSet<u64>) -> Self {
        Self { success, triggers }
    }

    const fn refused() -> Self {
        Self::new(false, BTreeSet::new())
    }
}

/// Run one operation
pub async fn run(ctx: &mut Context, operation: &Operation) -> Result<Outcome> {
    info!(?operation, review = ?ctx.trigger.review, job = ctx.trigger.job.id, "running operation");
    let done = match operation {
        Operation::Enqueue => update_review(ctx, Mode::Enqueue).await,
        Operation::Accept => update_review(ctx, Mode::Accept).await,
        Operation::Dequeue => dequeue(ctx).await,
        Operation::Approve(decision) => approve(ctx, *decision).await,
        Operation::Own => own(ctx).await,
        Operation::Unown => unown(ctx).await,
        Operation::Skip(sha) => skip_commit(ctx, sha).await,
        Operation::Emergent => emergent(ctx).await,
        Operation::StartReplication => start_replication(ctx).await,
        Operation::StartIntegration {
            source,
            target,
            fork,
        } => start_integration(ctx, source, target, fork).await,
        Operation::Clean => clean(ctx).await,
    };
    match done {
        Ok(done) => {
            let effects = ctx
                .take_reports()
                .into_iter()
                .map(Effect::Report)
                .chain(done.triggers.into_iter().map(Effect::TriggerPipeline))
                .collect();
            Ok(Outcome {
                success: done.success,
                effects,
            })
        }
        Err(err) if err.is_stale() => {
            info!(error = %err, "nothing to do");
            ctx.take_reports();
            Ok(Outcome::noop())
        }
        Err(err) => Err(err),
    }
}

/// Loaded assets plus the handle to write them back
struct Session {
    storage: Storage,
    assets: Assets,
}

impl Session {
    async fn load(ctx: &Context) -> Result<Self> {
        let (storage, assets) = Storage::load(ctx.git.as_ref(), &ctx.profile.storage).await?;
        Ok(Self { storage, assets })
    }

    async fn store(&mut self, ctx: &Context, reason: Reason, review: Option<u64>) -> Result<bool> {
        self.storage
            .store(ctx.git.as_ref(), &self.assets, reason, review, &ctx.identity)
            .await
    }

    /// Reviews to re-run because their queue position changed
    fn triggers(&self, except: Option<u64>) -> BTreeSet<u64> {
        self.assets
            .queue
            .notifiables()
            .iter()
            .copied()
            .filter(|iid| Some(*iid) != except)
            .collect()
    }
}

fn report(ctx: &mut Context, review: &ReviewState, event: Event) {
    ctx.report(Report::new(review.iid, &review.web_url, event));
}

async fn open_review(ctx: &Context, check_pipeline: bool) -> Result<ReviewState> {
    let iid = ctx
        .trigger
        .review
        .ok_or_else(|| Error::Config("operation needs a merge request".to_string()))?;
    ctx.git.fetch().await?;
    let review = ctx.platform.get_review(iid).await?;
    if check_pipeline {
        ensure_current(ctx, &review)?;
    }
    Ok(review)
}

/// The triggering job must belong to the review's head pipeline
fn ensure_current(ctx: &Context, review: &ReviewState) -> Result<()> {
    match &review.head_pipeline {
        Some(pipeline) if pipeline.id != ctx.trigger.job.pipeline.id => {
            debug!(
                review = review.iid,
                head = pipeline.id,
                job = ctx.trigger.job.pipeline.id,
                "pipeline outdated"
            );
            Err(Error::PipelineOutdated)
        }
        _ => Ok(()),
    }
}

/// The target must not have changed files that invalidate the pipeline
async fn ensure_fresh(ctx: &Context, review: &ReviewState, head: &Sha) -> Result<()> {
    let Some(criteria) = &ctx.profile.obsolescence else {
        return Ok(());
    };
    let target = GitRef::Remote(review.target_branch.clone());
    let Some(base) = ctx.git.merge_base(&target, &GitRef::Sha(head.clone())).await? else {
        return Ok(());
    };
    let files = ctx.git.changed_files(&GitRef::Sha(base), &target).await?;
    match files.into_iter().find(|file| criteria.is_met(file)) {
        Some(file) => Err(Error::ReviewObsolete(file)),
        None => Ok(()),
    }
}

/// Forget a finished review
async fn close(ctx: &mut Context, mut session: Session, review: &ReviewState) -> Result<Done> {
    let iid = review.iid;
    let known = session.assets.statuses.remove(&iid).is_some() || session.assets.queue.is_queued(iid);
    if !known {
        return Ok(Done::new(true, BTreeSet::new()));
    }
    session.assets.queue.dequeue(iid);
    info!(review = iid, state = %review.state, "review finished");
    report(ctx, review, Event::ReviewClosed);
    session.store(ctx, Reason::Clean, Some(iid)).await?;
    Ok(Done::new(true, session.triggers(Some(iid))))
}

/// Users whose merged reviews a bot-driven merge carries over
async fn resolve_authors(
    git: &dyn GitService,
    platform: &dyn PlatformService,
    merge: &Merge,
    fallback: &str,
) -> Result<BTreeSet<String>> {
    let commits = git
        .list_commits(
            &[GitRef::Sha(merge.fork.clone())],
            &[GitRef::Remote(merge.target.clone())],
            false,
        )
        .await?;
    let mut authors = BTreeSet::new();
    for sha in &commits {
        for review in platform.list_commit_reviews(sha.as_str()).await? {
            let squashed = review
                .squash_commit_sha
                .as_deref()
                .and_then(|value| Sha::new(value).ok());
            if squashed.as_ref() == Some(sha) {
                authors.insert(review.author.username);
            }
        }
    }
    if authors.is_empty() {
        authors.insert(fallback.to_string());
    }
    debug!(supply = %merge.supply, ?authors, "resolved authors");
    Ok(authors)
}

/// Repository facts a resolution pass needs
struct Gathered {
    ownage: Ownage,
    problems: Vec<Problem>,
    blockers: Vec<Blocker>,
    normalized: bool,
    diff: Vec<String>,
    commits: Vec<(Sha, Vec<String>)>,
    children: Vec<(Sha, Vec<Sha>)>,
    awarded: bool,
}

async fn gather(
    ctx: &Context,
    kind: &Kind,
    review: &ReviewState,
    head: &Sha,
    status: &ApprovalStatus,
) -> Result<Gathered> {
    let git = ctx.git.as_ref();
    let platform = ctx.platform.as_ref();
    let target = review.target_branch.as_str();
    let ownage_path = &ctx.profile.approval.ownage;

    let ownage = match git.show_file(&GitRef::Sha(head.clone()), ownage_path).await? {
        Some(text) => parse_ownage(&text)?,
        None => Ownage::new(),
    };

    let branches = platform.list_branches().await?;
    let (mut problems, checks) = plan_checks(&CheckInput {
        kind,
        review,
        head,
        branches: &branches,
        bot: &ctx.profile.gitlab.bot,
    });
    problems.extend(perform_all(git, &checks).await?);
    if let Some(sanity) = &ctx.rules.sanity {
        if !ownage.get(sanity).is_some_and(|c| c.is_met(ownage_path)) {
            problems.push(Problem::Sanity);
        }
    }
    let normalized = is_normalized(git, kind, target, head).await?;

    let discussions = platform.list_discussions(review.iid).await?;
    let blockers = review_blockers(kind, review, &discussions);

    let diff = review_changes(git, kind, target, head).await?;
    let mut commits = Vec::new();
    for sha in review_commits(git, kind, target, head).await? {
        let files = commit_changes(git, &sha).await?;
        commits.push((sha, files));
    }
    let mut children = Vec::new();
    for approved in status.approved_commits() {
        let childs = child_commits(git, kind, target, &approved, head).await?;
        children.push((approved, childs));
    }

    let awarded = match &ctx.profile.approval.award {
        Some(award) => platform
            .list_awards(review.iid)
            .await?
            .iter()
            .any(|a| &a.name == award && a.user.username == ctx.profile.gitlab.bot),
        None => false,
    };

    Ok(Gathered {
        ownage,
        problems,
        blockers,
        normalized,
        diff,
        commits,
        children,
        awarded,
    })
}

/// Outcome of the pure part of an update
struct Resolved {
    status: ApprovalStatus,
    result: ApprovalResult,
    approved: bool,
    watchers: BTreeSet<String>,
    accepters: BTreeSet<String>,
}

/// References that stop resolution
struct Unknown {
    users: BTreeSet<String>,
    teams: BTreeSet<String>,
    error: Error,
}

fn resolve(
    input: ReviewInput<'_>,
    status: ApprovalStatus,
    gathered: Gathered,
    review: &ReviewState,
    head: &Sha,
    random: &mut dyn RandomSource,
) -> std::result::Result<Resolved, Unknown> {
    let mut resolution = Review::new(input, status, gathered.blockers);
    if let Err(error) = resolution.ensure_known() {
        return Err(Unknown {
            users: resolution.unknown_users,
            teams: resolution.unknown_teams,
            error,
        });
    }
    resolution.resolve_ownage(&gathered.diff);
    for (sha, files) in &gathered.commits {
        resolution.add_changes(sha, files);
    }
    for (approved, childs) in gathered.children {
        resolution.add_breakers(&approved, childs);
    }
    let result = resolution.resolve_approval(head, random);
    Ok(Resolved {
        approved: resolution.is_approved(review),
        watchers: resolution.watchers(),
        accepters: resolution.accepters(),
        status: resolution.status,
        result,
    })
}

/// Full resolution pass, then queue, normalize and maybe merge
async fn update_review(ctx: &mut Context, mode: Mode) -> Result<Done> {
    let review = open_review(ctx, true).await?;
    let mut session = Session::load(ctx).await?;
    if review.is_closed() {
        return close(ctx, session, &review).await;
    }
    let iid = review.iid;
    if mode == Mode::Accept && !session.assets.queue.is_first(iid, &review.target_branch) {
        debug!(review = iid, "not first in queue");
        return Ok(Done::new(true, BTreeSet::new()));
    }

    let kind = ctx.profile.fusion.make_kind(&review.source_branch)?;
    let head = review.head()?;
    ensure_fresh(ctx, &review, &head).await?;

    let created = !session.assets.statuses.contains_key(&iid);
    let status = match session.assets.statuses.remove(&iid) {
        Some(status) => status,
        None => {
            let authors = match kind.merge() {
                None => BTreeSet::from([review.author.username.clone()]),
                Some(merge) => {
                    resolve_authors(
                        ctx.git.as_ref(),
                        ctx.platform.as_ref(),
                        merge,
                        ctx.trigger.user(),
                    )
                    .await?
                }
            };
            ApprovalStatus::new(iid, &review.target_branch, authors)
        }
    };

    let gathered = gather(ctx, &kind, &review, &head, &status).await?;
    let problems = gathered.problems.clone();
    let normalized = gathered.normalized;
    let awarded = gathered.awarded;
    let ownage = gathered.ownage.clone();
    let before = status.clone();
    let was_queued = session.assets.queue.is_queued(iid);

    let input = ReviewInput {
        bot: &ctx.profile.gitlab.bot,
        rules: &ctx.rules,
        approvers: &session.assets.approvers,
        haters: &ctx.haters,
        ownage: &ownage,
        proposition: kind.is_proposition(),
        source: &review.source_branch,
        target: &review.target_branch,
    };
    let resolved = match resolve(input, status, gathered, &review, &head, &mut *ctx.random) {
        Ok(resolved) => resolved,
        Err(unknown) => {
            report(
                ctx,
                &review,
                Event::ReviewStopped {
                    problems,
                    unknown_users: unknown.users,
                    unknown_teams: unknown.teams,
                },
            );
            return Err(unknown.error);
        }
    };
    let result = &resolved.result;
    info!(review = iid, state = %result.state, problems = problems.len(), "resolved review");

    if created || resolved.status != before {
        report(
            ctx,
            &review,
            Event::ReviewUpdated {
                state: result.state,
                blockers: result.blockers.clone(),
                slackers: result.slackers.clone(),
                holders: result.holders.clone(),
                outdaters: result
                    .outdaters
                    .iter()
                    .map(|(sha, users)| (sha.to_string(), users.clone()))
                    .collect(),
                unapprovable: result.unapprovable.clone(),
                watchers: resolved.watchers.clone(),
            },
        );
    }
    if !problems.is_empty() {
        report(
            ctx,
            &review,
            Event::ReviewStopped {
                problems: problems.clone(),
                unknown_users: BTreeSet::new(),
                unknown_teams: BTreeSet::new(),
            },
        );
    }
    if resolved.approved && problems.is_empty() && !was_queued {
        report(
            ctx,
            &review,
            Event::ReviewApproved {
                accepters: resolved.accepters.clone(),
            },
        );
    }

    let labels: BTreeSet<String> = review.labels.iter().cloned().collect();
    let plan = create_update_plan(&UpdateFacts {
        mode,
        problems: &problems,
        result,
        approved: resolved.approved,
        labels: &labels,
        award: ctx.profile.approval.award.as_deref(),
        awarded,
        normalized,
    });
    debug!(review = iid, phase = ?plan.phase, steps = plan.steps.len(), "planned update");

    let was_first = session.assets.queue.is_first(iid, &review.target_branch);
    let mut status = resolved.status;
    let execution = execute_update(
        &plan,
        &UpdateTarget {
            kind: &kind,
            review: &review,
            head: &head,
        },
        &mut status,
        &mut session.assets.queue,
        ctx.git.as_ref(),
        ctx.platform.as_ref(),
    )
    .await?;

    if execution.first && !was_first {
        report(ctx, &review, Event::ReviewQueued);
    }
    if execution.conflicts {
        report(ctx, &review, Event::MergeConflicts);
    }

    let reason;
    let success;
    if execution.is_merged() {
        let sha = execution.merge.as_ref().and_then(|m| m.sha.clone());
        session.assets.queue.dequeue(iid);
        report(ctx, &review, Event::ReviewMerged { sha });
        if let Kind::Replication(merge) = &kind {
            shift_replication(ctx, &mut session, merge).await?;
        }
        reason = Reason::Merge;
        success = true;
    } else {
        if let Some(merge) = &execution.merge {
            report(
                ctx,
                &review,
                Event::ReviewMergeError {
                    error: merge.message.clone().unwrap_or_default(),
                },
            );
        }
        session.assets.statuses.insert(iid, status);
        reason = if created {
            Reason::Create
        } else if session.assets.queue.is_changed() {
            if session.assets.queue.is_queued(iid) {
                Reason::Enqueue
            } else {
                Reason::Dequeue
            }
        } else {
            Reason::Update
        };
        success = match mode {
            Mode::Enqueue => !execution.conflicts,
            Mode::Accept => execution.pushed.is_some(),
        };
    }

    session.store(ctx, reason, Some(iid)).await?;
    Ok(Done::new(success, session.triggers(Some(iid))))
}

/// Open the replication of the source commit following a merged fork
async fn shift_replication(ctx: &mut Context, session: &mut Session, merge: &Merge) -> Result<()> {
    let next = ctx
        .git
        .list_commits(
            &[GitRef::Remote(merge.source.clone())],
            &[GitRef::Sha(merge.fork.clone())],
            true,
        )
        .await?
        .pop();
    let Some(next) = next else {
        debug!(source = %merge.source, "replication caught up");
        return Ok(());
    };
    let merge = merge.with_fork(next)?;
    create_review(ctx, session, &merge, true).await?;
    Ok(())
}

/// Push a supply branch and open its review
///
/// Returns false when a review for the same target is already running or
/// the fork cannot be merged.
async fn create_review(
    ctx: &mut Context,
    session: &mut Session,
    merge: &Merge,
    replication: bool,
) -> Result<bool> {
    let git = Arc::clone(&ctx.git);
    let platform = Arc::clone(&ctx.platform);
    if git.fetch_branch(&merge.supply).await?.is_some() {
        warn!(supply = %merge.supply, "merge already in progress");
        return Ok(false);
    }
    let problems = perform_all(git.as_ref(), &stopper_checks(merge, replication)).await?;
    if !problems.is_empty() {
        warn!(supply = %merge.supply, ?problems, "merge stopped");
        return Ok(false);
    }

    git.push(&merge.supply, &merge.fork, false).await?;
    let review = platform
        .create_review(&merge.supply, &merge.target, &Kind::title(merge, replication))
        .await?;
    let authors = resolve_authors(git.as_ref(), platform.as_ref(), merge, ctx.trigger.user()).await?;
    session.assets.statuses.insert(
        review.iid,
        ApprovalStatus::new(review.iid, &merge.target, authors.clone()),
    );
    info!(review = review.iid, supply = %merge.supply, "created review");
    report(ctx, &review, Event::ReviewCreated { authors });
    Ok(true)
}

async fn dequeue(ctx: &mut Context) -> Result<Done> {
    let review = open_review(ctx, false).await?;
    let mut session = Session::load(ctx).await?;
    if review.is_closed() {
        return close(ctx, session, &review).await;
    }
    let iid = review.iid;
    if !session.assets.queue.is_queued(iid) {
        return Ok(Done::new(true, BTreeSet::new()));
    }
    session.assets.queue.dequeue(iid);
    session.store(ctx, Reason::Dequeue, Some(iid)).await?;
    let mut triggers = session.triggers(None);
    triggers.insert(iid);
    Ok(Done::new(true, triggers))
}

/// Review plus loaded assets for operations editing one status
struct Editing {
    review: ReviewState,
    session: Session,
    head: Sha,
}

/// Common prelude of status-editing operations
///
/// Closed reviews are cleaned up and end the operation early.
async fn edit(ctx: &mut Context) -> Result<std::result::Result<Editing, Done>> {
    let review = open_review(ctx, true).await?;
    let session = Session::load(ctx).await?;
    if review.is_closed() {
        return close(ctx, session, &review).await.map(Err);
    }
    if !session.assets.statuses.contains_key(&review.iid) {
        return Err(Error::NoStatus(review.iid));
    }
    let head = review.head()?;
    Ok(Ok(Editing {
        review,
        session,
        head,
    }))
}

fn status_of<'a>(session: &'a mut Session, review: &ReviewState) -> Result<&'a mut ApprovalStatus> {
    session
        .assets
        .statuses
        .get_mut(&review.iid)
        .ok_or(Error::NoStatus(review.iid))
}

/// The job user must be a registered approver
fn known_user(ctx: &Context, session: &Session) -> Result<String> {
    let user = ctx.trigger.user();
    if !session.assets.approvers.contains_key(user) {
        return Err(Error::UnknownUsers(vec![user.to_string()]));
    }
    Ok(user.to_string())
}

async fn approve(ctx: &mut Context, decision: Decision) -> Result<Done> {
    let mut editing = match edit(ctx).await? {
        Ok(editing) => editing,
        Err(done) => return Ok(done),
    };
    let review = &editing.review;
    if editing
        .session
        .assets
        .queue
        .is_first(review.iid, &review.target_branch)
    {
        warn!(review = review.iid, "review is being merged");
        return Ok(Done::refused());
    }
    let user = known_user(ctx, &editing.session)?;
    let status = status_of(&mut editing.session, review)?;
    if status.target != review.target_branch {
        return Err(Error::TargetChanged);
    }
    status.approve(&user, editing.head.clone(), decision.resolution());
    info!(review = review.iid, user = %user, ?decision, sha = %editing.head, "recorded decision");
    editing
        .session
        .store(ctx, Reason::Approve, Some(review.iid))
        .await?;
    Ok(Done::new(true, BTreeSet::from([review.iid])))
}

async fn own(ctx: &mut Context) -> Result<Done> {
    let mut editing = match edit(ctx).await? {
        Ok(editing) => editing,
        Err(done) => return Ok(done),
    };
    let review = &editing.review;
    if editing.session.assets.queue.is_queued(review.iid) {
        warn!(review = review.iid, "review is queued");
        return Ok(Done::refused());
    }
    let user = known_user(ctx, &editing.session)?;
    if !status_of(&mut editing.session, review)?.set_author(&user) {
        return Ok(Done::new(true, BTreeSet::new()));
    }
    editing.session.store(ctx, Reason::Own, Some(review.iid)).await?;
    Ok(Done::new(true, BTreeSet::from([review.iid])))
}

async fn unown(ctx: &mut Context) -> Result<Done> {
    let mut editing = match edit(ctx).await? {
        Ok(editing) => editing,
        Err(done) => return Ok(done),
    };
    let review = &editing.review;
    if editing
        .session
        .assets
        .queue
        .is_first(review.iid, &review.target_branch)
    {
        warn!(review = review.iid, "review is being merged");
        return Ok(Done::refused());
    }
    let user = ctx.trigger.user().to_string();
    if !status_of(&mut editing.session, review)?.unset_author(&user) {
        warn!(review = review.iid, user = %user, "cannot remove author");
        return Ok(Done::refused());
    }
    editing
        .session
        .store(ctx, Reason::Unown, Some(review.iid))
        .await?;
    Ok(Done::new(true, BTreeSet::from([review.iid])))
}

async fn skip_commit(ctx: &mut Context, sha: &Sha) -> Result<Done> {
    let mut editing = match edit(ctx).await? {
        Ok(editing) => editing,
        Err(done) => return Ok(done),
    };
    let review = &editing.review;
    let commit = GitRef::Sha(sha.clone());
    let in_review = ctx
        .git
        .is_ancestor(&commit, &GitRef::Sha(editing.head.clone()))
        .await?
        && !ctx
            .git
            .is_ancestor(&commit, &GitRef::Remote(review.target_branch.clone()))
            .await?;
    if !in_review {
        warn!(review = review.iid, sha = %sha, "commit is not part of the review");
        return Ok(Done::refused());
    }
    if !status_of(&mut editing.session, review)?.skip.insert(sha.clone()) {
        return Ok(Done::new(true, BTreeSet::new()));
    }
    editing.session.store(ctx, Reason::Skip, Some(review.iid)).await?;
    Ok(Done::new(true, BTreeSet::from([review.iid])))
}

async fn emergent(ctx: &mut Context) -> Result<Done> {
    let mut editing = match edit(ctx).await? {
        Ok(editing) => editing,
        Err(done) => return Ok(done),
    };
    let review = &editing.review;
    let status = status_of(&mut editing.session, review)?;
    status.emergent = Some(editing.head.clone());
    warn!(review = review.iid, user = ctx.trigger.user(), sha = %editing.head, "emergent bypass");
    editing
        .session
        .store(ctx, Reason::Emergent, Some(review.iid))
        .await?;
    Ok(Done::new(true, BTreeSet::from([review.iid])))
}

async fn start_replication(ctx: &mut Context) -> Result<Done> {
    ctx.git.fetch().await?;
    let pipeline = &ctx.trigger.job.pipeline;
    let source = pipeline
        .git_ref
        .clone()
        .ok_or_else(|| Error::Config(format!("pipeline {} has no ref", pipeline.id)))?;
    let fork = Sha::new(&pipeline.sha)?;
    let merge = ctx.profile.fusion.make_replication(&source, fork)?;
    start_merge(ctx, &merge, true).await
}

async fn start_integration(ctx: &mut Context, source: &str, target: &str, fork: &Sha) -> Result<Done> {
    ctx.git.fetch().await?;
    let merge = ctx
        .profile
        .fusion
        .make_integration(source, target, fork.clone())?;
    start_merge(ctx, &merge, false).await
}

async fn start_merge(ctx: &mut Context, merge: &Merge, replication: bool) -> Result<Done> {
    let mut session = Session::load(ctx).await?;
    if !create_review(ctx, &mut session, merge, replication).await? {
        return Ok(Done::refused());
    }
    session.store(ctx, Reason::Create, None).await?;
    Ok(Done::new(true, BTreeSet::new()))
}

async fn clean(ctx: &mut Context) -> Result<Done> {
    ctx.git.fetch().await?;
    let mut session = Session::load(ctx).await?;
    let reviews: BTreeSet<u64> = session
        .assets
        .statuses
        .keys()
        .copied()
        .chain(session.assets.queue.all_reviews())
        .collect();
    for iid in reviews {
        let review = ctx.platform.get_review(iid).await?;
        if review.is_closed() {
            info!(review = iid, state = %review.state, "dropping finished review");
            session.assets.statuses.remove(&iid);
            session.assets.queue.dequeue(iid);
        }
    }
    session.store(ctx, Reason::Clean, None).await?;
    Ok(Done::new(true, session.triggers(None)))
}
