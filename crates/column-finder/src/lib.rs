//! Project column discovery for GitHub issues.
//!
//! This crate provides:
//! - Paginated and identity-mergeable collections mirroring GraphQL connections
//! - The `Issue` aggregate with its mode-locked local column search
//! - `ColumnNameFinder`, which drives local scans and remote page fetches
//! - A GitHub GraphQL implementation of the remote adapter
//! - Environment-driven configuration

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Every remote call can fail

pub mod config;
pub mod error;
pub mod finder;
pub mod github;
pub mod issue;
pub mod models;
pub mod pagination;
pub mod remote;

pub use config::Config;
pub use error::{CollectionError, PayloadError, RemoteError, SearchError};
pub use finder::{
    ColumnNameFinder, FinderOptions, FinderState, RemoteSearchSpaceAccessError,
    RemoteSearchSpaceType,
};
pub use github::{GitHubClient, PageSizes};
pub use issue::{
    ColumnNameLookup, Issue, LocalScan, RemoteWorkItem, RemoteWorkTarget, ResolvedColumn,
    SearchMode,
};
pub use models::{FieldValue, Label, ProjectIdentity, ProjectItem};
pub use pagination::{
    Edge, Identified, MergeSummary, MergeablePaginatedCollection, Page, PageInfo,
    PaginatedCollection,
};
pub use remote::RemoteClient;
