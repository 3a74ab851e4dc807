//! GitHub Projects entity types.
//!
//! Records are deserialized straight from GraphQL connection payloads. Project
//! items are validated on the way in: a missing id or project is fatal for the
//! item, while a malformed field-value page only makes that item's field
//! values unavailable.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CollectionError, PayloadError};
use crate::pagination::{Identified, Page, PaginatedCollection};

/// Separator between owner and number in a project key.
pub const PROJECT_KEY_SEPARATOR: char = '/';

/// Identity of a GitHub project board.
///
/// Ordered by owner name, then number. Two identities are equal exactly when
/// their [`key`](Self::key)s are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectIdentity {
    /// Login of the user or organization owning the project.
    pub owner_name: String,
    /// Project number within the owner.
    pub number: u64,
}

impl ProjectIdentity {
    pub fn new(owner_name: impl Into<String>, number: u64) -> Self {
        Self {
            owner_name: owner_name.into(),
            number,
        }
    }

    /// Canonical string key, e.g. `octo-org/5`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}{PROJECT_KEY_SEPARATOR}{}", self.owner_name, self.number)
    }
}

impl fmt::Display for ProjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{PROJECT_KEY_SEPARATOR}{}", self.owner_name, self.number)
    }
}

impl FromStr for ProjectIdentity {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| PayloadError::Invalid {
            field: "project",
            message: format!("{message} (expected owner{PROJECT_KEY_SEPARATOR}number, got '{s}')"),
        };

        let (owner, number) = s
            .rsplit_once(PROJECT_KEY_SEPARATOR)
            .ok_or_else(|| invalid("missing separator"))?;
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(invalid("empty owner"));
        }
        let number = number
            .trim()
            .parse()
            .map_err(|_| invalid("number is not a non-negative integer"))?;

        Ok(Self::new(owner, number))
    }
}

/// A project item field value. A present name is the item's column.
///
/// Only single-select values carry a name; every other field type
/// deserializes to an unnamed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    #[serde(default)]
    pub name: Option<String>,
}

impl FieldValue {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    pub fn unnamed() -> Self {
        Self::default()
    }
}

/// Issue label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
}

/// Link between an issue and one project board.
#[derive(Debug, Deserialize)]
#[serde(try_from = "ProjectItemPayload")]
pub struct ProjectItem {
    /// GraphQL node ID of the item.
    pub id: String,
    /// Board the item belongs to.
    pub project: ProjectIdentity,
    /// Field values fetched so far.
    pub field_values: PaginatedCollection<FieldValue>,
}

impl ProjectItem {
    pub fn new(
        id: impl Into<String>,
        project: ProjectIdentity,
        field_values: PaginatedCollection<FieldValue>,
    ) -> Self {
        Self {
            id: id.into(),
            project,
            field_values,
        }
    }

    /// Take the column name out of the fetched field values.
    ///
    /// The first named value wins and is removed. When nothing is named, all
    /// fetched values are consumed so the next page starts from a clean slate.
    pub fn take_column_name(&mut self) -> Result<Option<String>, CollectionError> {
        let named = self.field_values.iter().position(|v| v.name.is_some());
        if let Some(index) = named {
            return Ok(self.field_values.delete_at(index)?.name);
        }
        for index in (0..self.field_values.len()).rev() {
            self.field_values.delete_at(index)?;
        }
        Ok(None)
    }

    #[must_use]
    pub fn has_more_field_values(&self) -> bool {
        !self.field_values.is_last_page()
    }
}

impl Identified for ProjectItem {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectItemPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    project: Option<ProjectPayload>,
    #[serde(default)]
    field_values: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProjectPayload {
    #[serde(default)]
    number: Option<u64>,
    #[serde(default)]
    owner: Option<OwnerPayload>,
}

#[derive(Debug, Deserialize)]
struct OwnerPayload {
    #[serde(default)]
    login: Option<String>,
}

impl TryFrom<ProjectItemPayload> for ProjectItem {
    type Error = PayloadError;

    fn try_from(payload: ProjectItemPayload) -> Result<Self, Self::Error> {
        let id = payload
            .id
            .filter(|id| !id.is_empty())
            .ok_or(PayloadError::MissingField("id"))?;
        let project = payload.project.ok_or(PayloadError::MissingField("project"))?;
        let owner_name = project
            .owner
            .and_then(|owner| owner.login)
            .filter(|login| !login.is_empty())
            .ok_or(PayloadError::MissingField("project.owner.login"))?;

        let field_values = match payload.field_values {
            None => PaginatedCollection::unfetched(),
            Some(raw) => match decode_secondary_page::<FieldValue>(raw) {
                Ok(page) => PaginatedCollection::new(page),
                Err(e) => {
                    warn!(
                        project_item_id = %id,
                        error = %e,
                        "Malformed field value page, field values unavailable for this item"
                    );
                    PaginatedCollection::exhausted()
                }
            },
        };

        Ok(Self {
            id,
            project: ProjectIdentity::new(owner_name, project.number.unwrap_or(0)),
            field_values,
        })
    }
}

/// Decode a nested page whose failure must not take its parent down.
pub(crate) fn decode_secondary_page<T: DeserializeOwned>(
    raw: serde_json::Value,
) -> Result<Page<T>, serde_json::Error> {
    serde_json::from_value(raw)
}
