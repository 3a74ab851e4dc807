//! GraphQL client for GitHub Projects.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::RemoteError;
use crate::issue::Issue;
use crate::models::{FieldValue, Label, ProjectItem};
use crate::pagination::Page;
use crate::remote::RemoteClient;

/// GitHub GraphQL endpoint
pub const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

macro_rules! field_value_connection {
    () => {
        r"
                edges {
                    node {
                        ... on ProjectV2ItemFieldSingleSelectValue {
                            name
                        }
                    }
                }
                pageInfo {
                    endCursor
                    hasNextPage
                }
        "
    };
}

macro_rules! project_item_fields {
    () => {
        concat!(
            r"
            fragment ProjectItemFields on ProjectV2Item {
                id
                project {
                    number
                    owner {
                        ... on Organization {
                            login
                        }
                        ... on User {
                            login
                        }
                    }
                }
                fieldValues(first: $fieldValuesFirst) {
            ",
            field_value_connection!(),
            r"
                }
            }
            "
        )
    };
}

macro_rules! issue_fields {
    () => {
        r"
            fragment IssueFields on Issue {
                id
                number
                title
                labels(first: $labelsFirst) {
                    edges {
                        node {
                            name
                        }
                    }
                    pageInfo {
                        endCursor
                        hasNextPage
                    }
                }
                projectItems(first: $itemsFirst) {
                    edges {
                        node {
                            ...ProjectItemFields
                        }
                    }
                    pageInfo {
                        endCursor
                        hasNextPage
                    }
                }
            }
        "
    };
}

const PROJECT_ITEMS_QUERY: &str = concat!(
    r"
    query ProjectItemPage($issueId: ID!, $first: Int!, $after: String, $fieldValuesFirst: Int!) {
        node(id: $issueId) {
            ... on Issue {
                projectItems(first: $first, after: $after) {
                    edges {
                        node {
                            ...ProjectItemFields
                        }
                    }
                    pageInfo {
                        endCursor
                        hasNextPage
                    }
                }
            }
        }
    }
    ",
    project_item_fields!()
);

const FIELD_VALUES_QUERY: &str = concat!(
    r"
    query FieldValuePage($itemId: ID!, $first: Int!, $after: String) {
        node(id: $itemId) {
            ... on ProjectV2Item {
                fieldValues(first: $first, after: $after) {
    ",
    field_value_connection!(),
    r"
                }
            }
        }
    }
    "
);

const ISSUE_PAGE_QUERY: &str = concat!(
    r"
    query IssuePage(
        $owner: String!
        $repo: String!
        $first: Int!
        $after: String
        $labelsFirst: Int!
        $itemsFirst: Int!
        $fieldValuesFirst: Int!
    ) {
        repository(owner: $owner, name: $repo) {
            issues(first: $first, after: $after, states: [OPEN], orderBy: { field: CREATED_AT, direction: ASC }) {
                edges {
                    node {
                        ...IssueFields
                    }
                }
                pageInfo {
                    endCursor
                    hasNextPage
                }
            }
        }
    }
    ",
    issue_fields!(),
    project_item_fields!()
);

const ISSUE_QUERY: &str = concat!(
    r"
    query Issue(
        $owner: String!
        $repo: String!
        $number: Int!
        $labelsFirst: Int!
        $itemsFirst: Int!
        $fieldValuesFirst: Int!
    ) {
        repository(owner: $owner, name: $repo) {
            issue(number: $number) {
                ...IssueFields
            }
        }
    }
    ",
    issue_fields!(),
    project_item_fields!()
);

const LABELS_QUERY: &str = r"
    query LabelPage($issueId: ID!, $first: Int!, $after: String) {
        node(id: $issueId) {
            ... on Issue {
                labels(first: $first, after: $after) {
                    edges {
                        node {
                            name
                        }
                    }
                    pageInfo {
                        endCursor
                        hasNextPage
                    }
                }
            }
        }
    }
";

/// Page sizes used for each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub issues: u32,
    pub project_items: u32,
    pub field_values: u32,
    pub expanded_project_items: u32,
    pub expanded_field_values: u32,
    pub labels: u32,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            issues: 25,
            project_items: 10,
            field_values: 10,
            expanded_project_items: 50,
            expanded_field_values: 50,
            labels: 20,
        }
    }
}

/// GitHub GraphQL client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    page_sizes: PageSizes,
}

/// GraphQL request body
#[derive(Debug, Serialize)]
struct GraphQLRequest<V: Serialize> {
    query: &'static str,
    variables: V,
}

/// GraphQL response wrapper
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

/// GraphQL error
#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct NodeResponse<T> {
    node: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItemsNode {
    project_items: Option<Page<ProjectItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldValuesNode {
    field_values: Option<Page<FieldValue>>,
}

#[derive(Debug, Deserialize)]
struct LabelsNode {
    labels: Option<Page<Label>>,
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse<T> {
    repository: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RepositoryIssues {
    issues: Page<Issue>,
}

#[derive(Debug, Deserialize)]
struct RepositoryIssue {
    issue: Option<Issue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItemVariables<'a> {
    issue_id: &'a str,
    first: u32,
    after: Option<&'a str>,
    field_values_first: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionVariables<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    issue_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    item_id: Option<&'a str>,
    first: u32,
    after: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueVariables<'a> {
    owner: &'a str,
    repo: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<&'a str>,
    labels_first: u32,
    items_first: u32,
    field_values_first: u32,
}

impl GitHubClient {
    /// Create a new GitHub client with a token.
    ///
    /// # Errors
    /// Returns error if headers or the HTTP client cannot be constructed
    pub fn new(token: &str) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RemoteError::Config(format!("invalid token: {e}")))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("column-finder/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_url: GITHUB_GRAPHQL_URL.to_string(),
            page_sizes: PageSizes::default(),
        })
    }

    /// Point the client at another GraphQL endpoint (GHES or a test server).
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    #[must_use]
    pub fn with_page_sizes(mut self, page_sizes: PageSizes) -> Self {
        self.page_sizes = page_sizes;
        self
    }

    #[must_use]
    pub fn page_sizes(&self) -> PageSizes {
        self.page_sizes
    }

    /// Execute a GraphQL query
    async fn execute<V: Serialize, R: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: V,
    ) -> Result<R, RemoteError> {
        let request = GraphQLRequest { query, variables };

        let response = self.client.post(&self.api_url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let text = response.text().await?;
        let gql_response: GraphQLResponse<R> = serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, "Failed to parse GitHub GraphQL response");
            RemoteError::Serialization(e)
        })?;

        if let Some(errors) = gql_response.errors.filter(|errors| !errors.is_empty()) {
            let error_messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
            return Err(RemoteError::GraphQl(error_messages.join(", ")));
        }

        gql_response
            .data
            .ok_or_else(|| RemoteError::MissingData("no data in GraphQL response".to_string()))
    }

    async fn project_items(
        &self,
        issue_id: &str,
        cursor: Option<&str>,
        first: u32,
        field_values_first: u32,
    ) -> Result<Page<ProjectItem>, RemoteError> {
        let response: NodeResponse<ProjectItemsNode> = self
            .execute(
                PROJECT_ITEMS_QUERY,
                ProjectItemVariables {
                    issue_id,
                    first,
                    after: cursor,
                    field_values_first,
                },
            )
            .await?;

        let page = response
            .node
            .and_then(|node| node.project_items)
            .ok_or_else(|| {
                RemoteError::MissingData(format!("issue {issue_id} has no project items"))
            })?;
        debug!(
            issue_id,
            fetched = page.len(),
            has_next_page = page.page_info.has_next_page,
            "Fetched project items"
        );
        Ok(page)
    }
}

#[async_trait]
impl RemoteClient for GitHubClient {
    #[instrument(skip(self))]
    async fn fetch_expanded_search_space(
        &self,
        issue_id: &str,
    ) -> Result<Page<ProjectItem>, RemoteError> {
        self.project_items(
            issue_id,
            None,
            self.page_sizes.expanded_project_items,
            self.page_sizes.expanded_field_values,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn fetch_field_value_page(
        &self,
        project_item_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<FieldValue>, RemoteError> {
        let response: NodeResponse<FieldValuesNode> = self
            .execute(
                FIELD_VALUES_QUERY,
                ConnectionVariables {
                    issue_id: None,
                    item_id: Some(project_item_id),
                    first: self.page_sizes.field_values,
                    after: cursor,
                },
            )
            .await?;

        let page = response
            .node
            .and_then(|node| node.field_values)
            .ok_or_else(|| {
                RemoteError::MissingData(format!("item {project_item_id} has no field values"))
            })?;
        debug!(project_item_id, fetched = page.len(), "Fetched field values");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn fetch_project_item_page(
        &self,
        issue_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<ProjectItem>, RemoteError> {
        self.project_items(
            issue_id,
            cursor,
            self.page_sizes.project_items,
            self.page_sizes.field_values,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn fetch_issue_page(
        &self,
        owner: &str,
        repo: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Issue>, RemoteError> {
        let response: RepositoryResponse<RepositoryIssues> = self
            .execute(
                ISSUE_PAGE_QUERY,
                IssueVariables {
                    owner,
                    repo,
                    number: None,
                    first: Some(self.page_sizes.issues),
                    after: cursor,
                    labels_first: self.page_sizes.labels,
                    items_first: self.page_sizes.project_items,
                    field_values_first: self.page_sizes.field_values,
                },
            )
            .await?;

        let page = response
            .repository
            .map(|repository| repository.issues)
            .ok_or_else(|| {
                RemoteError::MissingData(format!("repository {owner}/{repo} not found"))
            })?;
        debug!(owner, repo, fetched = page.len(), "Fetched issues");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn fetch_issue(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<Issue, RemoteError> {
        let response: RepositoryResponse<RepositoryIssue> = self
            .execute(
                ISSUE_QUERY,
                IssueVariables {
                    owner,
                    repo,
                    number: Some(number),
                    first: None,
                    after: None,
                    labels_first: self.page_sizes.labels,
                    items_first: self.page_sizes.project_items,
                    field_values_first: self.page_sizes.field_values,
                },
            )
            .await?;

        response
            .repository
            .and_then(|repository| repository.issue)
            .ok_or_else(|| {
                RemoteError::MissingData(format!("issue {owner}/{repo}#{number} not found"))
            })
    }

    #[instrument(skip(self))]
    async fn fetch_label_page(
        &self,
        issue_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Label>, RemoteError> {
        let response: NodeResponse<LabelsNode> = self
            .execute(
                LABELS_QUERY,
                ConnectionVariables {
                    issue_id: Some(issue_id),
                    item_id: None,
                    first: self.page_sizes.labels,
                    after: cursor,
                },
            )
            .await?;

        response
            .node
            .and_then(|node| node.labels)
            .ok_or_else(|| RemoteError::MissingData(format!("issue {issue_id} has no labels")))
    }
}
