//! Column search driver.
//!
//! [`ColumnNameFinder`] alternates between a local scan of the [`Issue`] and
//! a remote expansion step that fetches more pages through a
//! [`RemoteClient`]. Remote failures never abort a search: each one is
//! recorded with the kind of search space it hit, the affected sub-tree stops
//! fetching, and the search carries on with what is held locally.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{RemoteError, SearchError};
use crate::issue::{
    ColumnNameLookup, Issue, RemoteWorkItem, RemoteWorkTarget, ResolvedColumn, SearchMode,
};
use crate::models::ProjectIdentity;
use crate::remote::RemoteClient;

/// Default number of remote requests one finder may issue.
pub const DEFAULT_MAX_REMOTE_REQUESTS: usize = 64;

/// Kind of remote search space a fetch targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteSearchSpaceType {
    ExpandedSearchSpace,
    FieldValuePage,
    ProjectItemPage,
}

impl fmt::Display for RemoteSearchSpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpandedSearchSpace => write!(f, "EXPANDED_SEARCH_SPACE"),
            Self::FieldValuePage => write!(f, "FIELD_VALUE_PAGE"),
            Self::ProjectItemPage => write!(f, "PROJECT_ITEM_PAGE"),
        }
    }
}

impl From<RemoteWorkTarget> for RemoteSearchSpaceType {
    fn from(target: RemoteWorkTarget) -> Self {
        match target {
            RemoteWorkTarget::FieldValuePage => Self::FieldValuePage,
            RemoteWorkTarget::ProjectItemPage => Self::ProjectItemPage,
        }
    }
}

/// A remote fetch that failed during a search.
#[derive(Debug, Error)]
#[error("{search_space} fetch for {parent_id} failed: {source}")]
pub struct RemoteSearchSpaceAccessError {
    pub search_space: RemoteSearchSpaceType,
    /// Issue id or project item id the fetch continued.
    pub parent_id: String,
    #[source]
    pub source: RemoteError,
}

/// Where a finder is in its search loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinderState {
    Idle,
    LocalScan,
    RemoteExpand,
    Done,
}

/// Per-finder limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinderOptions {
    /// Remote requests allowed before the remote search space is disabled.
    pub max_remote_requests: usize,
}

impl Default for FinderOptions {
    fn default() -> Self {
        Self {
            max_remote_requests: DEFAULT_MAX_REMOTE_REQUESTS,
        }
    }
}

/// Searches one issue for the project columns it sits in.
///
/// One finder owns one issue and issues one remote request at a time.
/// Independent issues get independent finders and may run concurrently.
pub struct ColumnNameFinder<C: RemoteClient + ?Sized> {
    client: Arc<C>,
    issue: Issue,
    options: FinderOptions,
    cancellation: CancellationToken,
    cache: BTreeMap<ProjectIdentity, String>,
    state: FinderState,
    expanded_search_space_fetched: bool,
    remote_search_space_disabled: bool,
    remote_requests: usize,
    access_errors: Vec<RemoteSearchSpaceAccessError>,
}

impl<C: RemoteClient + ?Sized> ColumnNameFinder<C> {
    pub fn new(client: Arc<C>, issue: Issue) -> Self {
        Self {
            client,
            issue,
            options: FinderOptions::default(),
            cancellation: CancellationToken::new(),
            cache: BTreeMap::new(),
            state: FinderState::Idle,
            expanded_search_space_fetched: false,
            remote_search_space_disabled: false,
            remote_requests: 0,
            access_errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: FinderOptions) -> Self {
        self.options = options;
        self
    }

    /// Abandon the search once `token` is cancelled.
    ///
    /// Checked between the local scan and the remote expansion of every
    /// round; a cancelled search keeps its cache and partially drained issue.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Find column names for `project`, or for every project when `None`.
    ///
    /// With a target the result holds at most one name. Without one it holds
    /// one name per resolved project, in project order. The first call fixes
    /// the issue's search mode; a later call in the other mode fails with
    /// [`SearchError::SearchModeMismatch`].
    #[instrument(skip(self), fields(issue_id = %self.issue.id()))]
    pub async fn find_column_names(
        &mut self,
        project: Option<&ProjectIdentity>,
    ) -> Result<Vec<String>, SearchError> {
        self.issue.lock_search_mode(project)?;

        if let Some(names) = self.cached_answer(project) {
            debug!(count = names.len(), "Answered from cache");
            self.state = FinderState::Done;
            return Ok(names);
        }

        loop {
            self.state = FinderState::LocalScan;
            let scan = self.issue.find_column_name(project)?;
            self.cache_resolved(scan.resolved);

            let work = match scan.lookup {
                ColumnNameLookup::Found(name) => {
                    self.state = FinderState::Done;
                    return Ok(vec![name]);
                }
                ColumnNameLookup::Exhausted => break,
                ColumnNameLookup::Pending(work) => work,
            };

            if self.cancellation.is_cancelled() {
                info!(cached = self.cache.len(), "Column search cancelled");
                self.state = FinderState::Idle;
                return Err(SearchError::Cancelled);
            }

            self.state = FinderState::RemoteExpand;
            self.expand_remote_search_space(work).await;
        }

        self.state = FinderState::Done;
        let names = self.answer(project);
        info!(
            found = names.len(),
            remote_requests = self.remote_requests,
            access_errors = self.access_errors.len(),
            "Column search finished"
        );
        Ok(names)
    }

    /// Whether the whole remote search space was switched off.
    #[must_use]
    pub fn has_disabled_remote_search_space(&self) -> bool {
        self.remote_search_space_disabled
    }

    /// Remote fetches that failed, in the order they happened.
    #[must_use]
    pub fn remote_search_space_access_errors(&self) -> &[RemoteSearchSpaceAccessError] {
        &self.access_errors
    }

    /// Whether results may be incomplete because remote data was unreachable.
    #[must_use]
    pub fn is_best_effort(&self) -> bool {
        self.remote_search_space_disabled || !self.access_errors.is_empty()
    }

    #[must_use]
    pub fn cached_column_names(&self) -> &BTreeMap<ProjectIdentity, String> {
        &self.cache
    }

    #[must_use]
    pub fn state(&self) -> FinderState {
        self.state
    }

    #[must_use]
    pub fn remote_requests(&self) -> usize {
        self.remote_requests
    }

    #[must_use]
    pub fn issue(&self) -> &Issue {
        &self.issue
    }

    pub fn into_issue(self) -> Issue {
        self.issue
    }

    fn cached_answer(&self, target: Option<&ProjectIdentity>) -> Option<Vec<String>> {
        match target {
            Some(target) => self.cache.get(target).map(|name| vec![name.clone()]),
            None if !self.cache.is_empty() && self.issue.is_search_space_exhausted() => {
                Some(self.cache.values().cloned().collect())
            }
            None => None,
        }
    }

    fn answer(&self, target: Option<&ProjectIdentity>) -> Vec<String> {
        match self.issue.search_mode() {
            SearchMode::SingleTarget => target
                .and_then(|target| self.cache.get(target))
                .map(|name| vec![name.clone()])
                .unwrap_or_default(),
            _ => self.cache.values().cloned().collect(),
        }
    }

    fn cache_resolved(&mut self, resolved: Vec<ResolvedColumn>) {
        for ResolvedColumn { project, column_name } in resolved {
            self.cache.entry(project).or_insert(column_name);
        }
    }

    /// Run one remote expansion step.
    ///
    /// The first step fetches the expanded search space and drops the queued
    /// work, whose cursors the merge may have invalidated. Later steps drain
    /// the queue last-in first-out.
    async fn expand_remote_search_space(&mut self, mut work: Vec<RemoteWorkItem>) {
        if !self.expanded_search_space_fetched {
            self.expanded_search_space_fetched = true;
            if self.reserve_remote_request() {
                self.fetch_expanded_search_space().await;
            }
            return;
        }

        debug!(queued = work.len(), "Draining remote work queue");
        while let Some(item) = work.pop() {
            if !self.reserve_remote_request() {
                return;
            }
            match item.target {
                RemoteWorkTarget::FieldValuePage => self.fetch_field_value_page(item).await,
                RemoteWorkTarget::ProjectItemPage => self.fetch_project_item_page(item).await,
            }
        }
    }

    async fn fetch_expanded_search_space(&mut self) {
        let issue_id = self.issue.id().to_owned();
        let result = match self.client.fetch_expanded_search_space(&issue_id).await {
            Ok(page) => self
                .issue
                .merge_project_items(page)
                .map_err(RemoteError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => debug!(
                appended = summary.appended,
                overwritten = summary.overwritten,
                skipped = summary.skipped,
                "Merged expanded search space"
            ),
            Err(e) => {
                self.record_access_error(RemoteSearchSpaceType::ExpandedSearchSpace, issue_id, e);
                self.disable_remote_search_space();
            }
        }
    }

    async fn fetch_field_value_page(&mut self, item: RemoteWorkItem) {
        let result = self
            .client
            .fetch_field_value_page(&item.parent_id, item.cursor.as_deref())
            .await;

        match result {
            Ok(page) => {
                let fetched = page.len();
                if self.issue.append_field_values(&item.parent_id, page) {
                    debug!(project_item_id = %item.parent_id, fetched, "Appended field values");
                } else {
                    debug!(
                        project_item_id = %item.parent_id,
                        "Project item no longer held, discarding field values"
                    );
                }
            }
            Err(e) => {
                self.issue.disable_field_value_pages(&item.parent_id);
                self.record_access_error(item.target.into(), item.parent_id, e);
            }
        }
    }

    async fn fetch_project_item_page(&mut self, item: RemoteWorkItem) {
        let result = match self
            .client
            .fetch_project_item_page(&item.parent_id, item.cursor.as_deref())
            .await
        {
            Ok(page) => self
                .issue
                .merge_project_items(page)
                .map_err(RemoteError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(summary) => debug!(
                appended = summary.appended,
                overwritten = summary.overwritten,
                skipped = summary.skipped,
                "Merged project item page"
            ),
            Err(e) => {
                self.issue.disable_project_item_pages();
                self.record_access_error(item.target.into(), item.parent_id, e);
            }
        }
    }

    /// Count one remote request against the budget. Once the budget is spent
    /// the remote search space is disabled.
    fn reserve_remote_request(&mut self) -> bool {
        if self.remote_requests >= self.options.max_remote_requests {
            if !self.remote_search_space_disabled {
                warn!(
                    issue_id = %self.issue.id(),
                    max_remote_requests = self.options.max_remote_requests,
                    "Remote request budget exhausted, disabling remote search"
                );
            }
            self.disable_remote_search_space();
            return false;
        }
        self.remote_requests += 1;
        true
    }

    fn disable_remote_search_space(&mut self) {
        self.issue.disable_column_name_remote_search_space();
        self.remote_search_space_disabled = true;
    }

    fn record_access_error(
        &mut self,
        search_space: RemoteSearchSpaceType,
        parent_id: String,
        source: RemoteError,
    ) {
        warn!(
            issue_id = %self.issue.id(),
            search_space = %search_space,
            parent_id = %parent_id,
            error = %source,
            "Remote search space unavailable"
        );
        self.access_errors.push(RemoteSearchSpaceAccessError {
            search_space,
            parent_id,
            source,
        });
    }
}
