//! Remote adapter boundary.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::issue::Issue;
use crate::models::{FieldValue, Label, ProjectItem};
use crate::pagination::Page;

/// Source of remote pages for the column search.
///
/// Implementations only report "succeeded with data" or "failed"; the search
/// engine never interprets status codes.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// First project-item page of an issue, fetched with expanded page sizes.
    /// Every item carries its first field-value page.
    async fn fetch_expanded_search_space(
        &self,
        issue_id: &str,
    ) -> Result<Page<ProjectItem>, RemoteError>;

    /// Next field-value page of a project item.
    async fn fetch_field_value_page(
        &self,
        project_item_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<FieldValue>, RemoteError>;

    /// Next project-item page of an issue.
    async fn fetch_project_item_page(
        &self,
        issue_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<ProjectItem>, RemoteError>;

    /// One page of a repository's open issues.
    async fn fetch_issue_page(
        &self,
        owner: &str,
        repo: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Issue>, RemoteError>;

    /// A single issue by number.
    async fn fetch_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue, RemoteError>;

    /// Next label page of an issue.
    async fn fetch_label_page(
        &self,
        issue_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Label>, RemoteError>;
}
