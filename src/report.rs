use crate::models::{RepoName, RepoStats, Summary};
use std::fmt::Write;

/// Stars and forks only.
pub fn render_repo_info(repo: &RepoName, stats: &RepoStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} repository statistics 🤓:", repo);
    let _ = writeln!(out, "Stars 🌠 : {}", stats.stars);
    let _ = write!(out, "Forks 🍴 : {}", stats.forks);
    out
}

pub fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} repository statistics 🤓:", summary.repo);
    let _ = writeln!(out, "Stars 🌠 : {}", summary.stars);
    let _ = writeln!(out, "Forks 🍴 : {}", summary.forks);
    let _ = writeln!(
        out,
        "Average open issues per user 💌 : {:.2}",
        summary.avg_issues_per_user
    );
    let _ = write!(
        out,
        "({} open issues from {} users)",
        summary.issues_collected, summary.distinct_users
    );
    out
}
