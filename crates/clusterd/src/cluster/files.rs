//! File-sync status aggregation.
//!
//! Pages through each manager's tracked-file table in the coordination store
//! and folds the rows into `{manager -> {status -> [filenames]}}`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use fleet_common::constants::store::FILE_PAGE_SIZE;
use fleet_common::{ClusterError, FileStatusReport, FileSyncEntry};

use super::discovery::{Discovery, NodeQuery};
use super::store::Session;

static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap());
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w.-]+$").unwrap());

/// Filters for a file status query; empty means "all"
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileStatusQuery {
    /// Exact filenames to report
    pub files: Vec<String>,
    /// Manager addresses or node names
    pub managers: Vec<String>,
}

/// Every tracked file of one manager, fetched page by page
pub async fn list_manager_files(
    session: &mut Session<'_>,
    manager: &str,
) -> Result<Vec<FileSyncEntry>, ClusterError> {
    let total = session.count_files(manager).await?;
    let mut entries = Vec::new();

    let mut offset = 0;
    while offset < total {
        let page = session.select_files(manager, FILE_PAGE_SIZE, offset).await?;
        if page.is_empty() {
            tracing::warn!(manager = %manager, total, offset, "File count overstates stored rows");
            break;
        }
        entries.extend(page.into_iter().map(|(filename, status)| FileSyncEntry {
            manager: manager.to_string(),
            filename,
            status,
        }));
        offset = offset.saturating_add(FILE_PAGE_SIZE);
    }

    tracing::debug!(manager = %manager, files = entries.len(), "Fetched file status");
    Ok(entries)
}

/// Turn manager filters into addresses. IPv4 literals pass through, names
/// are looked up in the store; names without a binding are dropped.
pub async fn resolve_managers(
    session: &mut Session<'_>,
    managers: &[String],
) -> Result<Vec<String>, ClusterError> {
    let mut resolved = Vec::with_capacity(managers.len());
    for manager in managers {
        if IPV4_RE.is_match(manager) {
            resolved.push(manager.clone());
        } else if NAME_RE.is_match(manager) {
            if let Some(ip) = session.get_ip(manager).await? {
                resolved.push(ip);
            }
        } else {
            return Err(ClusterError::validation(
                "managers",
                format!("invalid manager '{manager}'"),
            ));
        }
    }
    Ok(resolved)
}

/// `{manager -> {status -> [filenames]}}`
pub fn fold(entries: impl IntoIterator<Item = FileSyncEntry>) -> FileStatusReport {
    let mut report = FileStatusReport::new();
    for entry in entries {
        report
            .entry(entry.manager)
            .or_default()
            .entry(entry.status)
            .or_default()
            .push(entry.filename);
    }
    report
}

/// File status across the fleet. Without a manager filter, every reachable
/// remote node from a fresh discovery pass is queried.
pub async fn get_file_status(
    discovery: &Discovery,
    session: &mut Session<'_>,
    query: &FileStatusQuery,
) -> Result<FileStatusReport, ClusterError> {
    let wanted = resolve_managers(session, &query.managers).await?;

    let nodes = discovery
        .scan(
            NodeQuery {
                include_localhost: true,
                ..Default::default()
            },
            session,
        )
        .await?;
    let targets: Vec<String> = nodes
        .into_iter()
        .filter(|n| !n.localhost && n.is_connected())
        .map(|n| n.url)
        .filter(|url| wanted.is_empty() || wanted.contains(url))
        .collect();

    let file_filter: HashSet<&str> = query.files.iter().map(String::as_str).collect();
    let mut entries = Vec::new();
    for manager in &targets {
        let files = list_manager_files(session, manager).await?;
        entries.extend(
            files
                .into_iter()
                .filter(|e| file_filter.is_empty() || file_filter.contains(e.filename.as_str())),
        );
    }

    Ok(fold(entries))
}
