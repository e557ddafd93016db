use clap::Parser;
use colored::*;
use repo_stats::actors::{RunScheduler, RunSchedulerConfig, RunSchedulerMessage};
use repo_stats::cli::{Cli, Command};
use repo_stats::error::{RepoStatsError, Result};
use repo_stats::github::{GitHubClient, RepositoryMetadataService};
use repo_stats::models::RunTrigger;
use repo_stats::pipeline::{shutdown_on, Pipeline};
use repo_stats::policy::TaskRunner;
use repo_stats::report;
use repo_stats::server::{start_server, AppState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SCHEDULER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    let client: Arc<dyn RepositoryMetadataService> =
        Arc::new(GitHubClient::with_base_url(&cli.api_url, cli.github_token.clone())?);
    let runner = TaskRunner::new(cli.concurrency);

    match &cli.command {
        Command::Info { repo } => {
            let pipeline = Pipeline::new(client, runner, cli.pipeline_config(100))?;
            let ctx = pipeline.context(repo.clone(), RunTrigger::Manual);
            let stats = pipeline.repo_info(&ctx).await?;

            println!("{}", report::render_repo_info(repo, &stats));
        }

        Command::Run { repo, page_size } => {
            let pipeline = Pipeline::new(client, runner, cli.pipeline_config(*page_size))?;
            let ctx = pipeline.context(repo.clone(), RunTrigger::Manual);

            let summary = pipeline.run_until(&ctx, shutdown_on(tokio::signal::ctrl_c())).await?;

            println!("{}", report::render_summary(&summary));
        }

        Command::Serve {
            repo,
            page_size,
            interval_secs,
            port,
            skip_initial_run,
        } => {
            let pipeline = Arc::new(Pipeline::new(client, runner, cli.pipeline_config(*page_size))?);

            println!("{}", "Repository Statistics Server".bold().green());
            println!("{}\n", "=".repeat(50).dimmed());

            let (scheduler, scheduler_handle) = RunScheduler::spawn_with_handle(
                pipeline.clone(),
                RunSchedulerConfig {
                    repo: repo.clone(),
                    interval: Some(Duration::from_secs((*interval_secs).max(1))),
                    run_on_start: !skip_initial_run,
                },
            )
            .await
            .map_err(|e| RepoStatsError::Internal(format!("Failed to start scheduler: {}", e)))?;

            println!("✅ Scheduled {} every {} seconds", repo, interval_secs);

            let app_state = AppState {
                scheduler: scheduler.clone(),
                pipeline,
                start_time: Instant::now(),
            };
            let server = tokio::spawn(start_server(app_state, *port));

            println!("📡 Serving results on port {}", port);
            println!("\nPress Ctrl+C to stop the server\n");

            tokio::select! {
                _ = shutdown_on(tokio::signal::ctrl_c()) => {
                    println!("\n🛑 Shutting down server...");
                }
                result = server => {
                    match result {
                        Ok(Ok(())) => info!("HTTP server exited"),
                        Ok(Err(e)) => error!("HTTP server failed: {}", e),
                        Err(e) => error!("HTTP server task panicked: {}", e),
                    }
                }
            }

            match scheduler
                .call(RunSchedulerMessage::GetStats, Some(Duration::from_secs(5)))
                .await
            {
                Ok(ractor::rpc::CallResult::Success(stats)) => {
                    println!("\n📊 Final Statistics:");
                    println!("Runs started: {}", stats.runs_started);
                    println!("Runs succeeded: {}", stats.runs_succeeded);
                    println!("Runs failed: {}", stats.runs_failed);
                    println!("Triggers skipped: {}", stats.runs_skipped);
                }
                Ok(_) => eprintln!("Timeout getting final statistics"),
                Err(e) => eprintln!("Failed to get final statistics: {}", e),
            }

            scheduler
                .send_message(RunSchedulerMessage::Shutdown)
                .map_err(|e| RepoStatsError::Internal(format!("Failed to shutdown scheduler: {:?}", e)))?;

            match tokio::time::timeout(SCHEDULER_STOP_TIMEOUT, scheduler_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Run scheduler task failed: {}", e),
                Err(_) => error!("Run scheduler did not stop within {:?}", SCHEDULER_STOP_TIMEOUT),
            }

            println!("✅ Server stopped");
        }
    }

    Ok(())
}
