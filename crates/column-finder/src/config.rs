//! Configuration for the column finder.

use std::env;

use crate::finder::{FinderOptions, DEFAULT_MAX_REMOTE_REQUESTS};
use crate::github::{PageSizes, GITHUB_GRAPHQL_URL};

/// Largest `first:` argument GitHub accepts on a connection.
const MAX_PAGE_SIZE: u32 = 100;

/// Column finder configuration, read from the environment.
#[derive(Clone)]
pub struct Config {
    /// GitHub token for API calls.
    pub github_token: Option<String>,
    /// GraphQL endpoint.
    pub graphql_url: String,
    /// Issues per repository page.
    pub issue_page_size: u32,
    /// Project items per page when continuing an issue.
    pub project_item_page_size: u32,
    /// Field values per page when continuing a project item.
    pub field_value_page_size: u32,
    /// Project items fetched by the one-time expanded search.
    pub expanded_project_item_page_size: u32,
    /// Field values per item fetched by the one-time expanded search.
    pub expanded_field_value_page_size: u32,
    /// Labels per page.
    pub label_page_size: u32,
    /// Remote requests one issue search may issue.
    pub max_remote_requests: usize,
    /// Issues searched concurrently.
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github_token: env::var("GITHUB_TOKEN").ok().filter(|s| !s.is_empty()),
            graphql_url: env::var("GITHUB_GRAPHQL_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| GITHUB_GRAPHQL_URL.to_string()),
            issue_page_size: page_size_var("COLUMN_FINDER_ISSUE_PAGE_SIZE", 25),
            project_item_page_size: page_size_var("COLUMN_FINDER_PROJECT_ITEM_PAGE_SIZE", 10),
            field_value_page_size: page_size_var("COLUMN_FINDER_FIELD_VALUE_PAGE_SIZE", 10),
            expanded_project_item_page_size: page_size_var(
                "COLUMN_FINDER_EXPANDED_PROJECT_ITEM_PAGE_SIZE",
                50,
            ),
            expanded_field_value_page_size: page_size_var(
                "COLUMN_FINDER_EXPANDED_FIELD_VALUE_PAGE_SIZE",
                50,
            ),
            label_page_size: page_size_var("COLUMN_FINDER_LABEL_PAGE_SIZE", 20),
            max_remote_requests: env::var("COLUMN_FINDER_MAX_REMOTE_REQUESTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_REMOTE_REQUESTS),
            concurrency: env::var("COLUMN_FINDER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
        }
    }
}

impl Config {
    /// Page sizes for the GitHub client.
    #[must_use]
    pub fn page_sizes(&self) -> PageSizes {
        PageSizes {
            issues: self.issue_page_size,
            project_items: self.project_item_page_size,
            field_values: self.field_value_page_size,
            expanded_project_items: self.expanded_project_item_page_size,
            expanded_field_values: self.expanded_field_value_page_size,
            labels: self.label_page_size,
        }
    }

    /// Limits applied to every finder.
    #[must_use]
    pub fn finder_options(&self) -> FinderOptions {
        FinderOptions {
            max_remote_requests: self.max_remote_requests,
        }
    }
}

fn page_size_var(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .map_or(default, |n| n.clamp(1, MAX_PAGE_SIZE))
}
