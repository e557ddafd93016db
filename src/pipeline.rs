use crate::error::{RepoStatsError, Result};
use crate::github::{RepositoryMetadataService, MAX_PAGE_SIZE};
use crate::models::{
    Issue, PageRequestSet, RepoName, RepoStats, RunOutcome, RunRecord, RunTrigger, Summary,
};
use crate::policy::{InvocationPolicy, TaskRunner};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const FETCH_REPO_INFO: &str = "fetch_repo_info";
const FETCH_ISSUE_PAGE: &str = "fetch_issue_page";

/// Page size and per-stage invocation policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub page_size: u32,
    pub repo_info_policy: InvocationPolicy,
    pub issue_page_policy: InvocationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            repo_info_policy: InvocationPolicy::default().with_cache_ttl(None),
            issue_page_policy: InvocationPolicy::default().with_cache_ttl(Some(Duration::from_secs(3600))),
        }
    }
}

/// Everything a stage needs to know about the run it belongs to
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub repo: RepoName,
    pub page_size: u32,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(repo: RepoName, page_size: u32, trigger: RunTrigger) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repo,
            page_size,
            trigger,
            started_at: Utc::now(),
        }
    }

    /// Close the run with its result.
    pub fn finish(&self, result: &Result<Summary>) -> RunRecord {
        let outcome = match result {
            Ok(summary) => RunOutcome::Succeeded {
                summary: summary.clone(),
            },
            Err(RepoStatsError::Cancelled(_)) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed { error: e.to_string() },
        };

        RunRecord {
            run_id: self.run_id,
            repo: self.repo.clone(),
            trigger: self.trigger,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome,
        }
    }
}

/// Fetch repository metadata for `ctx.repo`.
pub async fn fetch_repo_info(
    ctx: &RunContext,
    service: &dyn RepositoryMetadataService,
    runner: &TaskRunner,
    policy: &InvocationPolicy,
) -> Result<RepoStats> {
    let repo = &ctx.repo;
    let stats = runner
        .invoke(FETCH_REPO_INFO, repo, policy, move || service.get_repository(repo))
        .await?;

    debug!(
        stars = stats.stars,
        forks = stats.forks,
        open_issues = stats.open_issues_count,
        "Fetched repository info"
    );
    Ok(stats)
}

/// Fetch every page of open issues needed to cover `open_issues_count`.
///
/// Pages are requested concurrently. The result is the concatenation of the
/// pages in page order, whatever order they complete in. The first page that
/// still fails after its retry budget fails the whole collection and the
/// remaining in-flight requests are dropped.
pub async fn collect_issues(
    ctx: &RunContext,
    service: &dyn RepositoryMetadataService,
    runner: &TaskRunner,
    policy: &InvocationPolicy,
    open_issues_count: u64,
) -> Result<Vec<Issue>> {
    let page_set = PageRequestSet::new(open_issues_count, ctx.page_size)?;

    if page_set.is_empty() {
        info!("No open issues, skipping collection");
        return Ok(Vec::new());
    }

    info!(
        pages = page_set.num_pages(),
        page_size = page_set.page_size(),
        "Collecting open issues"
    );

    let requests = page_set
        .pages()
        .map(|page| fetch_issue_page(ctx, service, runner, policy, page));
    let pages = try_join_all(requests).await?;

    let issues: Vec<Issue> = pages.into_iter().flatten().collect();

    if issues.len() as u64 != open_issues_count {
        warn!(
            expected = open_issues_count,
            collected = issues.len(),
            "Open issue count changed during collection"
        );
    }

    Ok(issues)
}

async fn fetch_issue_page(
    ctx: &RunContext,
    service: &dyn RepositoryMetadataService,
    runner: &TaskRunner,
    policy: &InvocationPolicy,
    page: u32,
) -> Result<Vec<Issue>> {
    let repo = &ctx.repo;
    let per_page = ctx.page_size;
    let inputs = (repo, page, per_page);

    let issues = runner
        .invoke(FETCH_ISSUE_PAGE, &inputs, policy, move || {
            service.list_open_issues(repo, page, per_page)
        })
        .await
        .map_err(|e| RepoStatsError::PartialCollectionFailure {
            page,
            source: Box::new(e),
        })?;

    debug!(page, count = issues.len(), "Fetched issue page");
    Ok(issues)
}

/// Reduce repository metadata and collected issues to a [`Summary`].
pub fn aggregate(repo: &RepoName, stats: &RepoStats, issues: &[Issue]) -> Result<Summary> {
    let distinct_users: HashSet<u64> = issues.iter().map(|issue| issue.reporter_user_id).collect();

    if distinct_users.is_empty() {
        return Err(RepoStatsError::NoIssuesToAggregate(repo.full_name()));
    }

    Ok(Summary {
        repo: repo.clone(),
        stars: stats.stars,
        forks: stats.forks,
        open_issues_count: stats.open_issues_count,
        issues_collected: issues.len(),
        distinct_users: distinct_users.len(),
        avg_issues_per_user: issues.len() as f64 / distinct_users.len() as f64,
    })
}

/// Repo info, issue collection and aggregation wired to one service and runner
pub struct Pipeline {
    service: Arc<dyn RepositoryMetadataService>,
    runner: TaskRunner,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        service: Arc<dyn RepositoryMetadataService>,
        runner: TaskRunner,
        config: PipelineConfig,
    ) -> Result<Self> {
        if config.page_size == 0 || config.page_size > MAX_PAGE_SIZE {
            return Err(RepoStatsError::InvalidPageSize(config.page_size));
        }

        Ok(Self {
            service,
            runner,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// New context for a run of `repo` using the configured page size.
    pub fn context(&self, repo: RepoName, trigger: RunTrigger) -> RunContext {
        RunContext::new(repo, self.config.page_size, trigger)
    }

    /// Repository metadata only, without collecting issues.
    pub async fn repo_info(&self, ctx: &RunContext) -> Result<RepoStats> {
        fetch_repo_info(ctx, self.service.as_ref(), &self.runner, &self.config.repo_info_policy).await
    }

    pub async fn run(&self, ctx: &RunContext) -> Result<Summary> {
        let span = info_span!(
            "pipeline_run",
            run_id = %ctx.run_id,
            repo = %ctx.repo,
            trigger = %ctx.trigger
        );

        async move {
            info!("Pipeline run started");

            let service = self.service.as_ref();
            let stats = self.repo_info(ctx).await?;
            let issues = collect_issues(
                ctx,
                service,
                &self.runner,
                &self.config.issue_page_policy,
                stats.open_issues_count,
            )
            .await?;
            let summary = aggregate(&ctx.repo, &stats, &issues)?;

            info!(
                issues = summary.issues_collected,
                users = summary.distinct_users,
                avg = summary.avg_issues_per_user,
                "Pipeline run finished"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }

    /// Like [`Pipeline::run`], but gives up as soon as `shutdown` resolves.
    /// In-flight requests are dropped and no partial summary is returned.
    pub async fn run_until<S>(&self, ctx: &RunContext, shutdown: S) -> Result<Summary>
    where
        S: Future<Output = ()>,
    {
        tokio::select! {
            result = self.run(ctx) => result,
            _ = shutdown => {
                warn!(run_id = %ctx.run_id, "Pipeline run cancelled");
                Err(RepoStatsError::Cancelled(format!("run {} for {}", ctx.run_id, ctx.repo)))
            }
        }
    }
}

/// Shutdown future for [`Pipeline::run_until`] driven by a signal listener
/// such as `tokio::signal::ctrl_c()`. If the listener fails it is logged and
/// the returned future never resolves, so the run is not cancelled.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
