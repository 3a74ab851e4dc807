//! CLI for the column finder
//!
//! Run `column-finder --help` for usage information.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use column_finder::{
    ColumnNameFinder, Config, FinderOptions, GitHubClient, Issue, ProjectIdentity, RemoteClient,
    RemoteSearchSpaceType,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Upper bound on extra label pages fetched per issue.
const MAX_LABEL_PAGES: usize = 10;

#[derive(Parser)]
#[command(name = "column-finder")]
#[command(about = "Find the GitHub Projects columns that issues sit in")]
#[command(version)]
struct Cli {
    /// Output format: json, text
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// GitHub token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Issues searched concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the columns of a single issue
    Find {
        /// Repository in owner/repo format
        #[arg(short, long)]
        repo: String,

        /// Issue number
        #[arg(short, long)]
        issue: u64,

        /// Only look for this project (owner/number)
        #[arg(short, long)]
        project: Option<ProjectIdentity>,
    },

    /// Find the columns of every open issue in a repository
    Scan {
        /// Repository in owner/repo format
        #[arg(short, long)]
        repo: String,

        /// Only look for this project (owner/number)
        #[arg(short, long)]
        project: Option<ProjectIdentity>,

        /// Stop after this many issues
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Outcome of one issue search, as printed.
#[derive(Debug, Serialize)]
struct IssueReport {
    issue_id: String,
    number: Option<u64>,
    title: Option<String>,
    labels: Option<Vec<String>>,
    columns: Vec<String>,
    best_effort: bool,
    remote_requests: usize,
    access_errors: Vec<AccessErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct AccessErrorReport {
    search_space: RemoteSearchSpaceType,
    parent_id: String,
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = Config::default();
    let token = cli
        .token
        .clone()
        .or_else(|| config.github_token.clone())
        .context("No GitHub token: pass --token or set GITHUB_TOKEN")?;
    let client = Arc::new(
        GitHubClient::new(&token)?
            .with_api_url(config.graphql_url.clone())
            .with_page_sizes(config.page_sizes()),
    );
    let concurrency = cli
        .concurrency
        .filter(|n| *n > 0)
        .unwrap_or(config.concurrency);

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight searches");
            signal_token.cancel();
        }
    });

    let options = config.finder_options();
    let reports = match cli.command {
        Commands::Find {
            repo,
            issue,
            project,
        } => {
            let (owner, repo_name) = parse_repo(&repo)?;
            let issue = client
                .fetch_issue(owner, repo_name, issue)
                .await
                .with_context(|| format!("Failed to fetch issue {repo}#{issue}"))?;
            vec![search_issue(client, issue, project.as_ref(), options, cancel).await]
        }
        Commands::Scan {
            repo,
            project,
            limit,
        } => {
            let (owner, repo_name) = parse_repo(&repo)?;
            let issues = fetch_issues(client.as_ref(), owner, repo_name, limit).await?;
            info!(count = issues.len(), concurrency, "Searching issues");

            let mut reports: Vec<IssueReport> = stream::iter(issues)
                .map(|issue| {
                    search_issue(
                        Arc::clone(&client),
                        issue,
                        project.as_ref(),
                        options,
                        cancel.clone(),
                    )
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
            reports.sort_by_key(|report| report.number);
            reports
        }
    };

    print_reports(&reports, cli.format)?;
    Ok(())
}

/// Split `owner/repo`.
fn parse_repo(repo: &str) -> Result<(&str, &str)> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => anyhow::bail!("Invalid repository '{repo}' (expected owner/repo)"),
    }
}

/// Page through a repository's open issues.
async fn fetch_issues<C: RemoteClient + ?Sized>(
    client: &C,
    owner: &str,
    repo: &str,
    limit: Option<usize>,
) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = client
            .fetch_issue_page(owner, repo, cursor.as_deref())
            .await
            .with_context(|| format!("Failed to fetch issues for {owner}/{repo}"))?;

        let has_next_page = page.page_info.has_next_page;
        cursor = page.page_info.end_cursor;
        issues.extend(page.edges.into_iter().map(|edge| edge.node));

        let limit_reached = limit.is_some_and(|limit| issues.len() >= limit);
        if !has_next_page || cursor.is_none() || limit_reached {
            break;
        }
    }

    if let Some(limit) = limit {
        issues.truncate(limit);
    }
    Ok(issues)
}

/// Fetch the label pages the issue payload did not include.
async fn complete_labels<C: RemoteClient + ?Sized>(client: &C, issue: &mut Issue) {
    for _ in 0..MAX_LABEL_PAGES {
        let cursor = match issue.labels() {
            Some(labels) if !labels.is_last_page() => labels.end_cursor().map(str::to_owned),
            _ => return,
        };

        match client.fetch_label_page(issue.id(), cursor.as_deref()).await {
            Ok(page) => issue.append_labels(page),
            Err(e) => {
                warn!(
                    issue_id = %issue.id(),
                    error = %e,
                    "Failed to fetch labels, keeping partial list"
                );
                return;
            }
        }
    }
}

async fn search_issue<C: RemoteClient + ?Sized>(
    client: Arc<C>,
    mut issue: Issue,
    project: Option<&ProjectIdentity>,
    options: FinderOptions,
    cancel: CancellationToken,
) -> IssueReport {
    complete_labels(client.as_ref(), &mut issue).await;

    let mut finder = ColumnNameFinder::new(client, issue)
        .with_options(options)
        .with_cancellation(cancel);

    let (columns, error) = match finder.find_column_names(project).await {
        Ok(columns) => (columns, None),
        Err(e) => {
            // Partial results stay valid after a cancelled or failed search.
            let cache = finder.cached_column_names();
            let partial = match project {
                Some(project) => cache.get(project).cloned().into_iter().collect(),
                None => cache.values().cloned().collect(),
            };
            (partial, Some(e.to_string()))
        }
    };

    let access_errors = finder
        .remote_search_space_access_errors()
        .iter()
        .map(|e| AccessErrorReport {
            search_space: e.search_space,
            parent_id: e.parent_id.clone(),
            message: e.source.to_string(),
        })
        .collect();

    let issue = finder.issue();
    IssueReport {
        issue_id: issue.id().to_string(),
        number: issue.number(),
        title: issue.title().map(str::to_owned),
        labels: issue
            .labels()
            .map(|labels| labels.iter().map(|label| label.name.clone()).collect()),
        columns,
        best_effort: finder.is_best_effort(),
        remote_requests: finder.remote_requests(),
        access_errors,
        error,
    }
}

fn print_reports(reports: &[IssueReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(reports)?);
        }
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("No issues found");
            }
            for report in reports {
                let number = report
                    .number
                    .map_or_else(|| report.issue_id.clone(), |n| format!("#{n}"));
                println!("{number} {}", report.title.as_deref().unwrap_or(""));

                if report.columns.is_empty() {
                    println!("  columns: (none found)");
                } else {
                    println!("  columns: {}", report.columns.join(", "));
                }

                match &report.labels {
                    Some(labels) if !labels.is_empty() => {
                        println!("  labels: {}", labels.join(", "));
                    }
                    Some(_) => println!("  labels: (none)"),
                    None => println!("  labels: (unavailable)"),
                }

                if let Some(error) = &report.error {
                    println!("  ❌ {error}");
                }

                if report.best_effort {
                    println!(
                        "  ⚠️ best-effort result after {} remote request(s)",
                        report.remote_requests
                    );
                    for access_error in &report.access_errors {
                        println!(
                            "    {} {}: {}",
                            access_error.search_space,
                            access_error.parent_id,
                            access_error.message
                        );
                    }
                }
                println!();
            }
        }
    }

    Ok(())
}
