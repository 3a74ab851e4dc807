//! Paginated collections mirroring GraphQL connections.
//!
//! A [`PaginatedCollection`] holds the nodes fetched so far plus the
//! continuation state of the remote connection. A
//! [`MergeablePaginatedCollection`] additionally reconciles freshly fetched
//! pages by node identity and remembers the ids the caller has consumed, so
//! that later pages never resurrect them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CollectionError;

/// Continuation state of a GraphQL connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Cursor to resume after the last fetched node.
    #[serde(default)]
    pub end_cursor: Option<String>,
    /// Whether the remote connection has more nodes.
    #[serde(default)]
    pub has_next_page: bool,
}

/// Connection edge wrapping a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub node: T,
}

/// One page of a remote connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default)]
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Build a page from nodes and continuation state.
    pub fn new(nodes: Vec<T>, end_cursor: Option<String>, has_next_page: bool) -> Self {
        Self {
            edges: nodes.into_iter().map(|node| Edge { node }).collect(),
            page_info: PageInfo {
                end_cursor,
                has_next_page,
            },
        }
    }

    /// Build the final page of a connection.
    pub fn last(nodes: Vec<T>) -> Self {
        Self::new(nodes, None, false)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Ordered nodes fetched from a remote connection plus its continuation state.
///
/// Nodes are kept in fetch order. `has_next_page == false` means no further
/// remote fetch is attempted for this collection.
#[derive(Debug)]
pub struct PaginatedCollection<T> {
    edges: Vec<Edge<T>>,
    page_info: PageInfo,
}

impl<T> PaginatedCollection<T> {
    /// Start a collection from its first fetched page.
    pub fn new(page: Page<T>) -> Self {
        Self {
            edges: page.edges,
            page_info: page.page_info,
        }
    }

    /// A collection whose first page has not been fetched yet.
    pub fn unfetched() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo {
                end_cursor: None,
                has_next_page: true,
            },
        }
    }

    /// An empty collection with nothing left to fetch.
    pub fn exhausted() -> Self {
        Self {
            edges: Vec::new(),
            page_info: PageInfo::default(),
        }
    }

    /// Append a fetched page and adopt its continuation state.
    pub fn append(&mut self, page: Page<T>) {
        self.edges.extend(page.edges);
        self.page_info = page.page_info;
    }

    /// Remove and return the node at `index`.
    pub fn delete_at(&mut self, index: usize) -> Result<T, CollectionError> {
        if index >= self.edges.len() {
            return Err(CollectionError::IndexOutOfRange {
                index,
                len: self.edges.len(),
            });
        }
        Ok(self.edges.remove(index).node)
    }

    /// Stop all further remote fetching for this collection.
    pub fn disable_remote_pages(&mut self) {
        self.page_info.has_next_page = false;
    }

    #[must_use]
    pub fn is_last_page(&self) -> bool {
        !self.page_info.has_next_page
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn end_cursor(&self) -> Option<&str> {
        self.page_info.end_cursor.as_deref()
    }

    #[must_use]
    pub fn page_info(&self) -> &PageInfo {
        &self.page_info
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.edges.get(index).map(|edge| &edge.node)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.edges.get_mut(index).map(|edge| &mut edge.node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|edge| &edge.node)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.edges.iter_mut().map(|edge| &mut edge.node)
    }
}

/// Nodes with a stable remote identity.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Outcome of merging one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Existing nodes replaced by incoming data.
    pub overwritten: usize,
    /// New nodes appended.
    pub appended: usize,
    /// Incoming nodes dropped because their id was deleted earlier.
    pub skipped: usize,
}

impl MergeSummary {
    /// Whether the merge changed any held node.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.overwritten + self.appended > 0
    }
}

/// A paginated collection reconciled by node identity.
///
/// The backing vector is the single owner of the nodes; `slots` maps each
/// live id to its position and is purely a lookup aid. Ids deleted through
/// [`delete_at`](Self::delete_at) are tombstoned for the lifetime of the
/// collection and never re-admitted by [`merge`](Self::merge).
#[derive(Debug)]
pub struct MergeablePaginatedCollection<T> {
    inner: PaginatedCollection<T>,
    slots: HashMap<String, usize>,
    tombstones: HashSet<String>,
}

impl<T: Identified> MergeablePaginatedCollection<T> {
    /// Start a collection from its first fetched page.
    ///
    /// Duplicate ids within the page collapse onto the last occurrence.
    pub fn new(page: Page<T>) -> Result<Self, CollectionError> {
        let mut collection = Self {
            inner: PaginatedCollection::exhausted(),
            slots: HashMap::new(),
            tombstones: HashSet::new(),
        };
        collection.merge(page)?;
        Ok(collection)
    }

    /// Reconcile a fetched page into the collection.
    ///
    /// Incoming nodes overwrite held nodes with the same id, new ids are
    /// appended and tombstoned ids are skipped. The page's continuation state
    /// is adopted afterwards. The page is validated before anything is
    /// mutated, so a failed merge leaves the collection untouched.
    pub fn merge(&mut self, page: Page<T>) -> Result<MergeSummary, CollectionError> {
        if let Some(position) = page.edges.iter().position(|edge| edge.node.id().is_empty()) {
            return Err(CollectionError::MissingIdentity { position });
        }

        let mut summary = MergeSummary::default();
        for edge in page.edges {
            let id = edge.node.id().to_owned();
            if self.tombstones.contains(&id) {
                summary.skipped += 1;
                continue;
            }
            if let Some(&slot) = self.slots.get(&id) {
                self.inner.edges[slot] = edge;
                summary.overwritten += 1;
            } else {
                self.slots.insert(id, self.inner.edges.len());
                self.inner.edges.push(edge);
                summary.appended += 1;
            }
        }
        self.inner.page_info = page.page_info;
        Ok(summary)
    }

    /// Remove the node at `index` and tombstone its id.
    pub fn delete_at(&mut self, index: usize) -> Result<T, CollectionError> {
        let node = self.inner.delete_at(index)?;
        let id = node.id().to_owned();
        self.slots.remove(&id);
        for slot in self.slots.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        self.tombstones.insert(id);
        Ok(node)
    }

    #[must_use]
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.slots.get(id).copied()
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&T> {
        self.position_of(id).and_then(|slot| self.inner.get(slot))
    }

    pub fn get_by_id_mut(&mut self, id: &str) -> Option<&mut T> {
        let slot = self.position_of(id)?;
        self.inner.get_mut(slot)
    }

    #[must_use]
    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }
}

impl<T> MergeablePaginatedCollection<T> {
    pub fn disable_remote_pages(&mut self) {
        self.inner.disable_remote_pages();
    }

    #[must_use]
    pub fn is_last_page(&self) -> bool {
        self.inner.is_last_page()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn end_cursor(&self) -> Option<&str> {
        self.inner.end_cursor()
    }

    #[must_use]
    pub fn page_info(&self) -> &PageInfo {
        self.inner.page_info()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.inner.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.inner.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.inner.iter_mut()
    }
}
