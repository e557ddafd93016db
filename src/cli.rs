use crate::github::DEFAULT_API_URL;
use crate::models::RepoName;
use crate::pipeline::PipelineConfig;
use crate::policy::{InvocationPolicy, RetryDelay};
use clap::{Parser, Subcommand};
use std::time::Duration;

const DEFAULT_REPO: &str = "rust-lang/rust";

#[derive(Parser)]
#[command(name = "repo-stats")]
#[command(about = "Repository statistics from the GitHub API - stars, forks and open issues per user")]
#[command(version)]
pub struct Cli {
    /// Base URL of the GitHub REST API
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,

    /// GitHub token, sent as a bearer token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    pub github_token: Option<String>,

    /// Additional attempts for a failed API call
    #[arg(long, env = "REPO_STATS_RETRIES", default_value_t = 3, global = true)]
    pub retries: u32,

    /// Seconds to wait before retrying a failed API call
    #[arg(long, env = "REPO_STATS_RETRY_DELAY_SECS", default_value_t = 2, global = true)]
    pub retry_delay_secs: u64,

    /// Double the retry delay after every attempt
    #[arg(long, global = true)]
    pub exponential_backoff: bool,

    /// Seconds an issue page stays cached (0 disables caching)
    #[arg(long, env = "REPO_STATS_CACHE_TTL_SECS", default_value_t = 3600, global = true)]
    pub cache_ttl_secs: u64,

    /// Maximum API calls in flight
    #[arg(long, env = "REPO_STATS_CONCURRENCY", default_value_t = 8, global = true)]
    pub concurrency: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print stars and forks of a repository
    Info {
        /// Repository in owner/name form
        #[arg(default_value = DEFAULT_REPO)]
        repo: RepoName,
    },

    /// Run the full pipeline once and print the summary
    Run {
        /// Repository in owner/name form
        #[arg(default_value = DEFAULT_REPO)]
        repo: RepoName,

        /// Issues requested per page
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=100))]
        page_size: u32,
    },

    /// Run the pipeline on an interval and serve results over HTTP
    Serve {
        /// Repository in owner/name form
        #[arg(default_value = DEFAULT_REPO)]
        repo: RepoName,

        /// Issues requested per page
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=100))]
        page_size: u32,

        /// Seconds between scheduled runs
        #[arg(long, env = "REPO_STATS_INTERVAL_SECS", default_value_t = 3600)]
        interval_secs: u64,

        /// HTTP port
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Wait one interval before the first scheduled run
        #[arg(long)]
        skip_initial_run: bool,
    },
}

impl Cli {
    pub fn retry_delay(&self) -> RetryDelay {
        let delay = Duration::from_secs(self.retry_delay_secs);
        if self.exponential_backoff {
            RetryDelay::Exponential {
                initial: delay,
                max: delay.saturating_mul(16),
            }
        } else {
            RetryDelay::Fixed(delay)
        }
    }

    /// Pipeline configuration for the given page size.
    pub fn pipeline_config(&self, page_size: u32) -> PipelineConfig {
        let base = InvocationPolicy::none().with_retries(self.retries, self.retry_delay());
        let cache_ttl = Some(Duration::from_secs(self.cache_ttl_secs));

        PipelineConfig {
            page_size,
            repo_info_policy: base,
            issue_page_policy: base.with_cache_ttl(cache_ttl),
        }
    }
}
