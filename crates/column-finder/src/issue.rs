//! The issue aggregate and its local column search.

use std::fmt;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{CollectionError, PayloadError, SearchError};
use crate::models::{decode_secondary_page, FieldValue, Label, ProjectIdentity, ProjectItem};
use crate::pagination::{MergeSummary, MergeablePaginatedCollection, Page, PaginatedCollection};

/// How an issue is being searched. Fixed by the first search call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    /// No search has run yet.
    #[default]
    Uninitialized,
    /// Resolve the column of one specific project.
    SingleTarget,
    /// Resolve the column of every project.
    Aggregate,
}

impl SearchMode {
    fn for_target(target: Option<&ProjectIdentity>) -> Self {
        if target.is_some() {
            Self::SingleTarget
        } else {
            Self::Aggregate
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::SingleTarget => write!(f, "single-target"),
            Self::Aggregate => write!(f, "aggregate"),
        }
    }
}

/// Which remote collection a work item continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteWorkTarget {
    /// Next field-value page of a project item; the parent is the item id.
    FieldValuePage,
    /// Next project-item page of an issue; the parent is the issue id.
    ProjectItemPage,
}

/// A queued remote continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteWorkItem {
    pub parent_id: String,
    pub target: RemoteWorkTarget,
    /// Cursor of the owning collection when the item was queued.
    pub cursor: Option<String>,
}

impl RemoteWorkItem {
    pub fn field_values(project_item_id: impl Into<String>, cursor: Option<&str>) -> Self {
        Self {
            parent_id: project_item_id.into(),
            target: RemoteWorkTarget::FieldValuePage,
            cursor: cursor.map(str::to_owned),
        }
    }

    pub fn project_items(issue_id: impl Into<String>, cursor: Option<&str>) -> Self {
        Self {
            parent_id: issue_id.into(),
            target: RemoteWorkTarget::ProjectItemPage,
            cursor: cursor.map(str::to_owned),
        }
    }
}

/// A column name read off a consumed project item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub project: ProjectIdentity,
    pub column_name: String,
}

/// Result of a local scan with respect to the requested target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnNameLookup {
    /// The targeted project resolved.
    Found(String),
    /// More remote data may exist; continue with these work items.
    Pending(Vec<RemoteWorkItem>),
    /// Nothing left locally or remotely.
    Exhausted,
}

/// Everything one local scan produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalScan {
    /// Columns resolved during this scan, for any project.
    pub resolved: Vec<ResolvedColumn>,
    pub lookup: ColumnNameLookup,
}

/// A GitHub issue and the project items fetched for it.
///
/// Created once from a fetched payload and then mutated in place: project
/// items are drained as their columns are consumed and extended as remote
/// pages arrive. Never copied.
#[derive(Debug, Deserialize)]
#[serde(try_from = "IssuePayload")]
pub struct Issue {
    id: String,
    number: Option<u64>,
    title: Option<String>,
    labels: Option<PaginatedCollection<Label>>,
    project_items: MergeablePaginatedCollection<ProjectItem>,
    search_mode: SearchMode,
}

impl Issue {
    /// Build an issue from its first page of project items.
    pub fn new(
        id: impl Into<String>,
        project_items: Page<ProjectItem>,
    ) -> Result<Self, CollectionError> {
        Ok(Self {
            id: id.into(),
            number: None,
            title: None,
            labels: None,
            project_items: MergeablePaginatedCollection::new(project_items)?,
            search_mode: SearchMode::Uninitialized,
        })
    }

    #[must_use]
    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: PaginatedCollection<Label>) -> Self {
        self.labels = Some(labels);
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn number(&self) -> Option<u64> {
        self.number
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Labels on the issue, or `None` when they could not be read.
    #[must_use]
    pub fn labels(&self) -> Option<&PaginatedCollection<Label>> {
        self.labels.as_ref()
    }

    /// Append a fetched label page. Ignored when labels are unavailable.
    pub fn append_labels(&mut self, page: Page<Label>) {
        if let Some(labels) = self.labels.as_mut() {
            labels.append(page);
        }
    }

    #[must_use]
    pub fn project_items(&self) -> &MergeablePaginatedCollection<ProjectItem> {
        &self.project_items
    }

    #[must_use]
    pub fn search_mode(&self) -> SearchMode {
        self.search_mode
    }

    /// Whether the project-item connection has unfetched pages.
    #[must_use]
    pub fn has_more_project_items(&self) -> bool {
        !self.project_items.is_last_page()
    }

    /// Whether every project item has been consumed and none remain remotely.
    #[must_use]
    pub fn is_search_space_exhausted(&self) -> bool {
        self.project_items.is_empty() && self.project_items.is_last_page()
    }

    /// Fix the search mode on first use and reject mismatched calls after.
    pub fn lock_search_mode(
        &mut self,
        target: Option<&ProjectIdentity>,
    ) -> Result<SearchMode, SearchError> {
        let requested = SearchMode::for_target(target);
        match self.search_mode {
            SearchMode::Uninitialized => {
                self.search_mode = requested;
                Ok(requested)
            }
            established if established == requested => Ok(established),
            established => Err(SearchError::SearchModeMismatch {
                established,
                requested,
            }),
        }
    }

    /// Drain locally held project items looking for column names.
    ///
    /// With a target, the scan stops as soon as that project resolves and
    /// only the target's items are queued for remote continuation. Without
    /// one, every unresolved item with more field values is queued.
    ///
    /// Items are visited by decreasing position and only the current
    /// position is ever deleted, so positions not yet visited stay valid.
    /// Resolved items are dropped (consumed) as are unresolved items with no
    /// further field values (dead ends); both are tombstoned.
    pub fn find_column_name(
        &mut self,
        target: Option<&ProjectIdentity>,
    ) -> Result<LocalScan, SearchError> {
        let mode = self.lock_search_mode(target)?;
        let mut resolved = Vec::new();
        let mut pending = Vec::new();
        let mut target_held = false;

        for index in (0..self.project_items.len()).rev() {
            let Some(item) = self.project_items.get_mut(index) else {
                continue;
            };
            let targeted = target.map_or(true, |t| *t == item.project);

            if let Some(column_name) = item.take_column_name()? {
                let item = self.project_items.delete_at(index)?;
                debug!(
                    issue_id = %self.id,
                    project = %item.project,
                    column = %column_name,
                    "Resolved project column"
                );
                resolved.push(ResolvedColumn {
                    project: item.project,
                    column_name: column_name.clone(),
                });
                if mode == SearchMode::SingleTarget && targeted {
                    return Ok(LocalScan {
                        resolved,
                        lookup: ColumnNameLookup::Found(column_name),
                    });
                }
            } else if item.has_more_field_values() {
                if targeted {
                    target_held = true;
                    pending.push(RemoteWorkItem::field_values(
                        item.id.clone(),
                        item.field_values.end_cursor(),
                    ));
                }
            } else {
                let item = self.project_items.delete_at(index)?;
                debug!(
                    issue_id = %self.id,
                    project = %item.project,
                    "Dropped project item without a column"
                );
            }
        }

        // A held target item only needs its own field values.
        let needs_project_items = mode == SearchMode::Aggregate || !target_held;
        if needs_project_items && self.has_more_project_items() {
            pending.insert(
                0,
                RemoteWorkItem::project_items(self.id.clone(), self.project_items.end_cursor()),
            );
        }

        let lookup = if pending.is_empty() {
            ColumnNameLookup::Exhausted
        } else {
            ColumnNameLookup::Pending(pending)
        };
        Ok(LocalScan { resolved, lookup })
    }

    /// Merge a fetched project-item page.
    pub fn merge_project_items(
        &mut self,
        page: Page<ProjectItem>,
    ) -> Result<MergeSummary, CollectionError> {
        self.project_items.merge(page)
    }

    /// Append a fetched field-value page to a held project item.
    ///
    /// Returns `false` when the item is no longer held.
    pub fn append_field_values(&mut self, project_item_id: &str, page: Page<FieldValue>) -> bool {
        match self.project_items.get_by_id_mut(project_item_id) {
            Some(item) => {
                item.field_values.append(page);
                true
            }
            None => false,
        }
    }

    /// Stop fetching field values for one project item.
    pub fn disable_field_value_pages(&mut self, project_item_id: &str) -> bool {
        match self.project_items.get_by_id_mut(project_item_id) {
            Some(item) => {
                item.field_values.disable_remote_pages();
                true
            }
            None => false,
        }
    }

    /// Stop fetching further project-item pages.
    pub fn disable_project_item_pages(&mut self) {
        self.project_items.disable_remote_pages();
    }

    /// Mark the project-item connection and every held field-value
    /// connection as having no more pages. Fetched data is kept.
    pub fn disable_column_name_remote_search_space(&mut self) {
        self.project_items.disable_remote_pages();
        for item in self.project_items.iter_mut() {
            item.field_values.disable_remote_pages();
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuePayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    labels: Option<serde_json::Value>,
    #[serde(default)]
    project_items: Option<Page<ProjectItem>>,
}

impl TryFrom<IssuePayload> for Issue {
    type Error = PayloadError;

    fn try_from(payload: IssuePayload) -> Result<Self, Self::Error> {
        let id = payload
            .id
            .filter(|id| !id.is_empty())
            .ok_or(PayloadError::MissingField("id"))?;
        let project_items = payload
            .project_items
            .ok_or(PayloadError::MissingField("projectItems"))?;
        let project_items = MergeablePaginatedCollection::new(project_items)
            .map_err(|e| PayloadError::Invalid {
                field: "projectItems",
                message: e.to_string(),
            })?;

        let labels = match payload.labels {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => match decode_secondary_page::<Label>(raw) {
                Ok(page) => Some(PaginatedCollection::new(page)),
                Err(e) => {
                    warn!(issue_id = %id, error = %e, "Malformed label page, labels unavailable");
                    None
                }
            },
        };

        Ok(Self {
            id,
            number: payload.number,
            title: payload.title,
            labels,
            project_items,
            search_mode: SearchMode::Uninitialized,
        })
    }
}
