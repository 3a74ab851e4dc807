//! Column search driver tests against a scripted remote.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use column_finder::{
    ColumnNameFinder, FieldValue, FinderOptions, FinderState, Issue, Label, Page,
    PaginatedCollection, ProjectIdentity, ProjectItem, RemoteClient, RemoteError,
    RemoteSearchSpaceType, SearchError, SearchMode,
};
use tokio_util::sync::CancellationToken;

type Responses<T> = VecDeque<Result<Page<T>, RemoteError>>;
type Script<T> = Mutex<Responses<T>>;

/// Remote that replays queued responses and logs every call.
#[derive(Default)]
struct ScriptedRemote {
    expanded: Script<ProjectItem>,
    field_values: Mutex<HashMap<String, Responses<FieldValue>>>,
    project_items: Script<ProjectItem>,
    calls: Mutex<Vec<String>>,
    request_count: AtomicUsize,
}

impl ScriptedRemote {
    fn expect_expanded(&self, response: Result<Page<ProjectItem>, RemoteError>) -> &Self {
        self.expanded.lock().unwrap().push_back(response);
        self
    }

    fn expect_field_values(
        &self,
        item_id: &str,
        response: Result<Page<FieldValue>, RemoteError>,
    ) -> &Self {
        self.field_values
            .lock()
            .unwrap()
            .entry(item_id.to_string())
            .or_default()
            .push_back(response);
        self
    }

    fn expect_project_items(&self, response: Result<Page<ProjectItem>, RemoteError>) -> &Self {
        self.project_items.lock().unwrap().push_back(response);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn requests(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);
    }
}

fn unscripted(what: &str) -> RemoteError {
    RemoteError::MissingData(format!("unscripted {what}"))
}

fn next<T>(script: &Script<T>, what: &str) -> Result<Page<T>, RemoteError> {
    script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(unscripted(what)))
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn fetch_expanded_search_space(
        &self,
        issue_id: &str,
    ) -> Result<Page<ProjectItem>, RemoteError> {
        self.record(format!("expanded:{issue_id}"));
        next(&self.expanded, "expanded search space")
    }

    async fn fetch_field_value_page(
        &self,
        item_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<FieldValue>, RemoteError> {
        let cursor = cursor.unwrap_or("");
        self.record(format!("field_values:{item_id}@{cursor}"));

        let mut scripts = self.field_values.lock().unwrap();
        let response = scripts.get_mut(item_id).and_then(VecDeque::pop_front);
        response.unwrap_or_else(|| Err(unscripted(item_id)))
    }

    async fn fetch_project_item_page(
        &self,
        issue_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<ProjectItem>, RemoteError> {
        let cursor = cursor.unwrap_or("");
        self.record(format!("project_items:{issue_id}@{cursor}"));
        next(&self.project_items, "project items")
    }

    async fn fetch_issue_page(
        &self,
        _owner: &str,
        _repo: &str,
        _cursor: Option<&str>,
    ) -> Result<Page<Issue>, RemoteError> {
        Err(unscripted("issue pages"))
    }

    async fn fetch_issue(
        &self,
        _owner: &str,
        _repo: &str,
        _number: u64,
    ) -> Result<Issue, RemoteError> {
        Err(unscripted("issues"))
    }

    async fn fetch_label_page(
        &self,
        _issue_id: &str,
        _cursor: Option<&str>,
    ) -> Result<Page<Label>, RemoteError> {
        Err(unscripted("labels"))
    }
}

fn project(owner: &str, number: u64) -> ProjectIdentity {
    ProjectIdentity::new(owner, number)
}

/// Project item whose field values continue after `cursor` when one is given.
fn item(id: &str, number: u64, values: Vec<FieldValue>, cursor: Option<&str>) -> ProjectItem {
    let page = Page::new(values, cursor.map(str::to_owned), cursor.is_some());
    let field_values = PaginatedCollection::new(page);
    ProjectItem::new(id, project("octo", number), field_values)
}

fn issue(items: Vec<ProjectItem>, cursor: Option<&str>) -> Issue {
    let page = Page::new(items, cursor.map(str::to_owned), cursor.is_some());
    Issue::new("I_1", page).unwrap()
}

/// Final field-value page naming a column.
fn column(name: &str) -> Page<FieldValue> {
    Page::last(vec![FieldValue::named(name)])
}

/// Empty project-item page that continues after `cursor`.
fn more_items(cursor: &str) -> Page<ProjectItem> {
    Page::new(vec![], Some(cursor.to_string()), true)
}

fn bad_gateway() -> RemoteError {
    RemoteError::Api {
        status: 502,
        message: "bad gateway".to_string(),
    }
}

fn finder(remote: &Arc<ScriptedRemote>, issue: Issue) -> ColumnNameFinder<ScriptedRemote> {
    ColumnNameFinder::new(Arc::clone(remote), issue)
}

#[tokio::test]
async fn test_resolves_locally_held_column() {
    let remote = Arc::new(ScriptedRemote::default());
    let items = vec![
        item("A", 1, vec![FieldValue::named("Done")], None),
        item("B", 2, vec![], None),
    ];
    let mut finder = finder(&remote, issue(items, None));

    let names = finder.find_column_names(None).await.unwrap();

    assert_eq!(names, ["Done"]);
    assert_eq!(finder.state(), FinderState::Done);
    assert!(finder.issue().project_items().is_empty());
    assert!(finder.issue().project_items().is_tombstoned("A"));
    assert!(finder.issue().project_items().is_tombstoned("B"));
    assert_eq!(remote.requests(), 0);
    assert!(!finder.is_best_effort());
}

#[tokio::test]
async fn test_target_not_found_without_remote_calls() {
    let remote = Arc::new(ScriptedRemote::default());
    let items = vec![item("A", 1, vec![FieldValue::unnamed()], None)];
    let mut finder = finder(&remote, issue(items, None));
    let target = project("octo", 2);

    let names = finder.find_column_names(Some(&target)).await.unwrap();

    assert!(names.is_empty());
    assert_eq!(remote.requests(), 0);
    assert_eq!(finder.issue().search_mode(), SearchMode::SingleTarget);
}

#[tokio::test]
async fn test_repeated_searches_are_answered_from_cache() {
    let remote = Arc::new(ScriptedRemote::default());
    let items = vec![
        item("A", 1, vec![FieldValue::named("Todo")], None),
        item("B", 2, vec![FieldValue::named("Done")], None),
    ];
    let mut finder = finder(&remote, issue(items, None));
    let first = project("octo", 1);
    let second = project("octo", 2);

    // B is visited first and cached on the way to A.
    let names = finder.find_column_names(Some(&first)).await.unwrap();
    assert_eq!(names, ["Todo"]);
    assert_eq!(finder.cached_column_names().len(), 2);

    let names = finder.find_column_names(Some(&second)).await.unwrap();
    assert_eq!(names, ["Done"]);
    let names = finder.find_column_names(Some(&first)).await.unwrap();
    assert_eq!(names, ["Todo"]);
    assert_eq!(remote.requests(), 0);
}

#[tokio::test]
async fn test_cached_target_skips_remote_after_fetching_it() {
    let remote = Arc::new(ScriptedRemote::default());
    remote
        .expect_expanded(Ok(Page::last(vec![])))
        .expect_field_values("A", Ok(column("Doing")));

    let items = vec![item("A", 1, vec![], Some("fa"))];
    let mut finder = finder(&remote, issue(items, None));
    let target = project("octo", 1);

    let names = finder.find_column_names(Some(&target)).await.unwrap();
    assert_eq!(names, ["Doing"]);
    let requests = remote.requests();
    assert_eq!(requests, 2);

    let names = finder.find_column_names(Some(&target)).await.unwrap();
    assert_eq!(names, ["Doing"]);
    assert_eq!(remote.requests(), requests);
    assert_eq!(finder.remote_requests(), requests);
}

#[tokio::test]
async fn test_aggregate_cache_requires_exhausted_issue() {
    let remote = Arc::new(ScriptedRemote::default());
    let items = vec![item("A", 1, vec![FieldValue::named("Done")], None)];
    let mut finder = finder(&remote, issue(items, None));

    let first = finder.find_column_names(None).await.unwrap();
    let second = finder.find_column_names(None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(remote.requests(), 0);
}

#[tokio::test]
async fn test_search_mode_is_locked_by_first_call() {
    let remote = Arc::new(ScriptedRemote::default());
    let mut finder = finder(&remote, issue(vec![], None));
    let target = project("octo", 1);

    finder.find_column_names(None).await.unwrap();
    let result = finder.find_column_names(Some(&target)).await;

    assert_eq!(
        result,
        Err(SearchError::SearchModeMismatch {
            established: SearchMode::Aggregate,
            requested: SearchMode::SingleTarget,
        })
    );
}

#[tokio::test]
async fn test_field_value_failure_is_isolated() {
    let remote = Arc::new(ScriptedRemote::default());
    remote
        .expect_expanded(Ok(Page::last(vec![])))
        .expect_field_values("A", Ok(column("Todo")))
        .expect_field_values("B", Err(bad_gateway()))
        .expect_field_values("C", Ok(column("Done")));

    let items = vec![
        item("A", 1, vec![], Some("fa")),
        item("B", 2, vec![], Some("fb")),
        item("C", 3, vec![], Some("fc")),
    ];
    let mut finder = finder(&remote, issue(items, None));

    let names = finder.find_column_names(None).await.unwrap();

    assert_eq!(names, ["Todo", "Done"]);
    let expected = [
        "expanded:I_1",
        "field_values:A@fa",
        "field_values:B@fb",
        "field_values:C@fc",
    ];
    assert_eq!(remote.calls(), expected);

    let errors = finder.remote_search_space_access_errors();
    assert_eq!(errors.len(), 1);
    let space = errors[0].search_space;
    assert_eq!(space, RemoteSearchSpaceType::FieldValuePage);
    assert_eq!(errors[0].parent_id, "B");
    assert!(finder.is_best_effort());
    assert!(!finder.has_disabled_remote_search_space());
    assert_eq!(finder.remote_requests(), 4);
}

#[tokio::test]
async fn test_field_value_failure_alongside_project_item_page() {
    let remote = Arc::new(ScriptedRemote::default());
    let next_items = Page::last(vec![item("B", 2, vec![FieldValue::named("Done")], None)]);
    remote
        .expect_expanded(Ok(more_items("items-1")))
        .expect_field_values("A", Err(bad_gateway()))
        .expect_project_items(Ok(next_items));

    let items = vec![item("A", 1, vec![], Some("fa"))];
    let mut finder = finder(&remote, issue(items, Some("items-1")));

    let names = finder.find_column_names(None).await.unwrap();

    assert_eq!(names, ["Done"]);
    let expected = [
        "expanded:I_1",
        "field_values:A@fa",
        "project_items:I_1@items-1",
    ];
    assert_eq!(remote.calls(), expected);

    let errors = finder.remote_search_space_access_errors();
    assert_eq!(errors.len(), 1);
    let space = errors[0].search_space;
    assert_eq!(space, RemoteSearchSpaceType::FieldValuePage);
    assert_eq!(errors[0].parent_id, "A");

    // A had no field values left to fetch, so it was dropped without a column.
    let cached = finder.cached_column_names();
    assert!(!cached.contains_key(&project("octo", 1)));
    assert!(finder.issue().project_items().is_tombstoned("A"));
    assert!(finder.issue().is_search_space_exhausted());
    assert!(!finder.has_disabled_remote_search_space());
}

#[tokio::test]
async fn test_expanded_failure_disables_remote_search() {
    let remote = Arc::new(ScriptedRemote::default());
    remote.expect_expanded(Err(bad_gateway()));

    let items = vec![item("A", 1, vec![], Some("fa"))];
    let mut finder = finder(&remote, issue(items, Some("items-1")));

    let names = finder.find_column_names(None).await.unwrap();

    assert!(names.is_empty());
    assert!(finder.has_disabled_remote_search_space());
    assert_eq!(remote.calls(), ["expanded:I_1"]);

    let errors = finder.remote_search_space_access_errors();
    assert_eq!(errors.len(), 1);
    let space = errors[0].search_space;
    assert_eq!(space, RemoteSearchSpaceType::ExpandedSearchSpace);
    assert_eq!(errors[0].parent_id, "I_1");
}

#[tokio::test]
async fn test_unmergeable_page_is_an_access_error() {
    let remote = Arc::new(ScriptedRemote::default());
    let anonymous = Page::last(vec![item("", 9, vec![], None)]);
    remote.expect_expanded(Ok(anonymous));

    let items = vec![item("A", 1, vec![], Some("fa"))];
    let mut finder = finder(&remote, issue(items, None));

    finder.find_column_names(None).await.unwrap();

    let errors = finder.remote_search_space_access_errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0].source, RemoteError::Payload(_)));
    assert!(finder.has_disabled_remote_search_space());
}

#[tokio::test]
async fn test_request_budget_disables_remote_search() {
    let remote = Arc::new(ScriptedRemote::default());
    let unnamed = Page::new(vec![FieldValue::unnamed()], Some("fa2".into()), true);
    remote
        .expect_expanded(Ok(Page::last(vec![])))
        .expect_field_values("A", Ok(unnamed));

    let items = vec![
        item("A", 1, vec![], Some("fa")),
        item("B", 2, vec![], Some("fb")),
    ];
    let options = FinderOptions {
        max_remote_requests: 2,
    };
    let mut finder = finder(&remote, issue(items, None)).with_options(options);

    let names = finder.find_column_names(None).await.unwrap();

    assert!(names.is_empty());
    assert_eq!(remote.calls(), ["expanded:I_1", "field_values:A@fa"]);
    assert_eq!(finder.remote_requests(), 2);
    assert!(finder.has_disabled_remote_search_space());
    assert!(finder.remote_search_space_access_errors().is_empty());
    assert!(finder.is_best_effort());
}

#[tokio::test]
async fn test_cancellation_keeps_partial_results() {
    let remote = Arc::new(ScriptedRemote::default());
    let token = CancellationToken::new();
    token.cancel();

    let items = vec![
        item("A", 1, vec![FieldValue::named("Done")], None),
        item("B", 2, vec![], Some("fb")),
    ];
    let mut finder = ColumnNameFinder::new(Arc::clone(&remote), issue(items, None))
        .with_cancellation(token);

    let result = finder.find_column_names(None).await;

    assert_eq!(result, Err(SearchError::Cancelled));
    assert_eq!(finder.state(), FinderState::Idle);
    let cached = finder.cached_column_names();
    assert_eq!(cached[&project("octo", 1)], "Done");
    assert_eq!(finder.issue().project_items().len(), 1);
    assert_eq!(remote.requests(), 0);
}

#[tokio::test]
async fn test_consumed_items_are_not_resurrected_by_later_pages() {
    let remote = Arc::new(ScriptedRemote::default());
    let expanded = Page::new(
        vec![
            item("A", 1, vec![FieldValue::named("Stale")], None),
            item("B", 2, vec![FieldValue::named("Done")], None),
        ],
        Some("items-2".into()),
        true,
    );
    let next_items = Page::last(vec![item("C", 3, vec![FieldValue::named("Review")], None)]);
    remote
        .expect_expanded(Ok(expanded))
        .expect_project_items(Ok(next_items));

    let items = vec![item("A", 1, vec![FieldValue::named("Todo")], None)];
    let mut finder = finder(&remote, issue(items, Some("items-1")));

    let names = finder.find_column_names(None).await.unwrap();

    assert_eq!(names, ["Todo", "Done", "Review"]);
    assert_eq!(remote.calls(), ["expanded:I_1", "project_items:I_1@items-2"]);
    assert!(finder.issue().is_search_space_exhausted());
}

#[tokio::test]
async fn test_work_queue_drains_last_in_first_out() {
    let remote = Arc::new(ScriptedRemote::default());
    remote
        .expect_expanded(Ok(more_items("items-1")))
        .expect_field_values("A", Ok(column("Done")))
        .expect_project_items(Err(bad_gateway()));

    let items = vec![item("A", 1, vec![], Some("fa"))];
    let mut finder = finder(&remote, issue(items, Some("items-1")));

    let names = finder.find_column_names(None).await.unwrap();

    // The project-item continuation sits at the bottom of the queue.
    assert_eq!(names, ["Done"]);
    let expected = [
        "expanded:I_1",
        "field_values:A@fa",
        "project_items:I_1@items-1",
    ];
    assert_eq!(remote.calls(), expected);

    let errors = finder.remote_search_space_access_errors();
    assert_eq!(errors.len(), 1);
    let space = errors[0].search_space;
    assert_eq!(space, RemoteSearchSpaceType::ProjectItemPage);
    assert!(!finder.has_disabled_remote_search_space());
}

#[tokio::test]
async fn test_single_target_only_fetches_target_field_values() {
    let remote = Arc::new(ScriptedRemote::default());
    remote
        .expect_expanded(Ok(more_items("items-1")))
        .expect_field_values("A", Ok(column("Doing")));

    let items = vec![
        item("A", 1, vec![], Some("fa")),
        item("B", 2, vec![], Some("fb")),
    ];
    let mut finder = finder(&remote, issue(items, Some("items-1")));
    let target = project("octo", 1);

    let names = finder.find_column_names(Some(&target)).await.unwrap();

    assert_eq!(names, ["Doing"]);
    assert_eq!(remote.calls(), ["expanded:I_1", "field_values:A@fa"]);
    assert_eq!(finder.issue().project_items().len(), 1);
}
