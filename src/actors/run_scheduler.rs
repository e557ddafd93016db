use crate::models::{RepoName, RunRecord, RunTrigger};
use crate::pipeline::Pipeline;
use anyhow::Result;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Number of finished runs kept for reporting
pub const RUN_HISTORY_LIMIT: usize = 20;

/// Runs the pipeline for one repository on a fixed interval and on demand
pub struct RunScheduler;

/// Configuration for the run scheduler
#[derive(Debug, Clone)]
pub struct RunSchedulerConfig {
    pub repo: RepoName,
    /// Time between scheduled runs. `None` only runs on demand.
    pub interval: Option<Duration>,
    /// Whether the first scheduled run fires immediately on start
    pub run_on_start: bool,
}

/// Arguments for starting the scheduler
pub struct RunSchedulerArgs {
    pub pipeline: Arc<Pipeline>,
    pub config: RunSchedulerConfig,
}

/// State for the run scheduler
pub struct RunSchedulerState {
    pipeline: Arc<Pipeline>,
    repo: RepoName,
    ticker: Option<JoinHandle<()>>,
    current_run: Option<JoinHandle<()>>,
    history: VecDeque<RunRecord>,
    runs_started: u64,
    runs_succeeded: u64,
    runs_failed: u64,
    runs_skipped: u64,
}

/// Messages the scheduler can handle
#[derive(Debug)]
pub enum RunSchedulerMessage {
    /// Interval elapsed
    Tick,
    /// Start a run now; replies whether one was started
    TriggerNow(RpcReplyPort<bool>),
    /// A spawned run completed
    RunFinished(RunRecord),
    GetStats(RpcReplyPort<SchedulerStats>),
    GetLatest(RpcReplyPort<Option<RunRecord>>),
    GetHistory(RpcReplyPort<Vec<RunRecord>>),
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub repo: RepoName,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub runs_skipped: u64,
    pub run_in_progress: bool,
    pub last_run_succeeded: Option<bool>,
}

impl RunScheduler {
    pub async fn spawn(pipeline: Arc<Pipeline>, config: RunSchedulerConfig) -> Result<ActorRef<RunSchedulerMessage>> {
        let (actor_ref, _handle) = Self::spawn_with_handle(pipeline, config).await?;
        Ok(actor_ref)
    }

    /// Like `spawn`, also returning the handle that resolves once the actor
    /// has stopped and `post_stop` has run.
    pub async fn spawn_with_handle(
        pipeline: Arc<Pipeline>,
        config: RunSchedulerConfig,
    ) -> Result<(ActorRef<RunSchedulerMessage>, JoinHandle<()>)> {
        let args = RunSchedulerArgs { pipeline, config };

        match Actor::spawn(None, RunScheduler, args).await {
            Ok((actor_ref, handle)) => {
                info!("Run scheduler spawned successfully");
                Ok((actor_ref, handle))
            }
            Err(spawn_err) => {
                error!("Failed to spawn run scheduler: {:?}", spawn_err);
                Err(anyhow::anyhow!("Failed to spawn run scheduler: {:?}", spawn_err))
            }
        }
    }
}

impl RunSchedulerState {
    fn run_in_progress(&self) -> bool {
        self.current_run.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn a pipeline run unless one is already going. Returns whether a
    /// run was started.
    fn start_run(&mut self, myself: &ActorRef<RunSchedulerMessage>, trigger: RunTrigger) -> bool {
        if self.run_in_progress() {
            self.runs_skipped += 1;
            warn!(%trigger, repo = %self.repo, "Run already in progress, skipping trigger");
            return false;
        }

        let pipeline = self.pipeline.clone();
        let ctx = pipeline.context(self.repo.clone(), trigger);
        let myself = myself.clone();

        self.runs_started += 1;
        info!(run_id = %ctx.run_id, %trigger, repo = %self.repo, "Starting pipeline run");

        self.current_run = Some(tokio::spawn(async move {
            let result = pipeline.run(&ctx).await;
            if let Err(e) = &result {
                error!(run_id = %ctx.run_id, "Pipeline run failed: {}", e);
            }

            if let Err(e) = myself.send_message(RunSchedulerMessage::RunFinished(ctx.finish(&result))) {
                error!("Failed to report finished run: {}", e);
            }
        }));

        true
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            repo: self.repo.clone(),
            runs_started: self.runs_started,
            runs_succeeded: self.runs_succeeded,
            runs_failed: self.runs_failed,
            runs_skipped: self.runs_skipped,
            run_in_progress: self.run_in_progress(),
            last_run_succeeded: self.history.back().map(RunRecord::succeeded),
        }
    }
}

#[ractor::async_trait]
impl Actor for RunScheduler {
    type Msg = RunSchedulerMessage;
    type State = RunSchedulerState;
    type Arguments = RunSchedulerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> std::result::Result<Self::State, ActorProcessingErr> {
        info!(repo = %args.config.repo, interval = ?args.config.interval, "Starting run scheduler");

        let ticker = args.config.interval.map(|period| {
            let myself = myself.clone();
            let run_on_start = args.config.run_on_start;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                if !run_on_start {
                    // First tick completes immediately
                    interval.tick().await;
                }

                loop {
                    interval.tick().await;
                    if myself.send_message(RunSchedulerMessage::Tick).is_err() {
                        debug!("Run scheduler gone, stopping ticker");
                        break;
                    }
                }
            })
        });

        Ok(RunSchedulerState {
            pipeline: args.pipeline,
            repo: args.config.repo,
            ticker,
            current_run: None,
            history: VecDeque::with_capacity(RUN_HISTORY_LIMIT),
            runs_started: 0,
            runs_succeeded: 0,
            runs_failed: 0,
            runs_skipped: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        match message {
            RunSchedulerMessage::Tick => {
                state.start_run(&myself, RunTrigger::Scheduled);
            }

            RunSchedulerMessage::TriggerNow(reply) => {
                let started = state.start_run(&myself, RunTrigger::Manual);
                if !reply.is_closed() {
                    let _ = reply.send(started);
                }
            }

            RunSchedulerMessage::RunFinished(record) => {
                if record.succeeded() {
                    state.runs_succeeded += 1;
                } else {
                    state.runs_failed += 1;
                }
                info!(run_id = %record.run_id, succeeded = record.succeeded(), "Pipeline run recorded");

                if state.history.len() == RUN_HISTORY_LIMIT {
                    state.history.pop_front();
                }
                state.history.push_back(record);
            }

            RunSchedulerMessage::GetStats(reply) => {
                if !reply.is_closed() {
                    let _ = reply.send(state.stats());
                }
            }

            RunSchedulerMessage::GetLatest(reply) => {
                if !reply.is_closed() {
                    let _ = reply.send(state.history.back().cloned());
                }
            }

            RunSchedulerMessage::GetHistory(reply) => {
                if !reply.is_closed() {
                    let _ = reply.send(state.history.iter().rev().cloned().collect());
                }
            }

            RunSchedulerMessage::Shutdown => {
                info!("Shutting down run scheduler");
                myself.stop(Some("Shutdown requested".to_string()));
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> std::result::Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        if let Some(run) = state.current_run.take() {
            if !run.is_finished() {
                warn!("Aborting in-flight pipeline run");
            }
            run.abort();
        }

        info!(
            runs_started = state.runs_started,
            runs_succeeded = state.runs_succeeded,
            runs_failed = state.runs_failed,
            "Run scheduler stopped"
        );
        Ok(())
    }
}
