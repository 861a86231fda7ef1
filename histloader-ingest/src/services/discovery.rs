//! File discovery and item building
//!
//! Walks the session's root directory, matches root-relative paths fully
//! against the session's pattern, and builds one item per matching file
//! with its derived metric, tag map and functional id.

use crate::models::{Item, Session, SessionStatus};
use histloader_common::{Error, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Compile a path pattern, anchored for full matching
///
/// A pattern without a `metric` named group is a fatal configuration
/// error, raised before any file is scanned.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let anchored = format!("^(?:{})$", pattern);
    let regex = Regex::new(&anchored)
        .map_err(|e| Error::Config(format!("invalid path pattern '{}': {}", pattern, e)))?;
    if !regex.capture_names().flatten().any(|name| name == "metric") {
        return Err(Error::Config(format!(
            "path pattern '{}' has no named group 'metric'",
            pattern
        )));
    }
    Ok(regex)
}

/// Substitute `${group}` tokens in the functional-id template
///
/// `${metric}` is always available; unknown tokens are left verbatim.
pub fn build_functional_id(template: &str, values: &HashMap<String, String>) -> String {
    let mut id = template.to_string();
    for (name, value) in values {
        id = id.replace(&format!("${{{}}}", name), value);
    }
    id
}

/// Walk the root and populate the session's `to_import` collection
///
/// Files that do not match the pattern are silently skipped. An IO error
/// under a subtree is logged on the session and discovery continues. On
/// success the session advances to ANALYSED and its stats record the
/// initial item count.
pub async fn analyse_session(session: &mut Session) -> Result<()> {
    session.status = SessionStatus::Analysing;
    let pattern = compile_pattern(&session.path_pattern)?;

    tracing::info!(
        session_id = %session.session_id,
        root = %session.root_path.display(),
        pattern = %session.path_pattern,
        "analysing dataset root"
    );

    let root = session.root_path.clone();
    let mut items = Vec::new();
    let mut symlink_visited = HashSet::new();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            // symlink loop detection, same policy as the rest of the project
            if entry.file_type().is_symlink() {
                if let Ok(canonical) = entry.path().canonicalize() {
                    if !symlink_visited.insert(canonical) {
                        tracing::warn!("symlink loop detected: {}", entry.path().display());
                        return false;
                    }
                }
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e, "error walking subtree, skipping");
                session.add_error(format!("discovery: {}", e));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(item) = build_item(session, &pattern, &root, entry.path()) {
            items.push(item);
        }
    }

    tracing::info!(
        session_id = %session.session_id,
        items = items.len(),
        "analysis complete"
    );

    session.add_items(items);
    session.mark_analysed().await;
    Ok(())
}

/// Match one file against the pattern and derive its item, if any
fn build_item(session: &Session, pattern: &Regex, root: &Path, path: &Path) -> Option<Item> {
    let relative = path.strip_prefix(root).ok()?;
    let relative = normalize(relative);

    let captures = pattern.captures(&relative)?;
    let metric = captures.name("metric")?.as_str().to_string();

    let mut tags = HashMap::new();
    for name in pattern.capture_names().flatten() {
        if name == "metric" {
            continue;
        }
        if let Some(value) = captures.name(name) {
            tags.insert(name.to_string(), value.as_str().to_string());
        }
    }

    let mut values = tags.clone();
    values.insert("metric".to_string(), metric.clone());
    let functional_id = build_functional_id(&session.func_id_pattern, &values);

    tracing::debug!(
        session_id = %session.session_id,
        file = %relative,
        metric = %metric,
        functional_id = %functional_id,
        "file matched"
    );

    Some(Item::new(
        session.session_id,
        path.to_path_buf(),
        metric,
        tags,
        functional_id,
    ))
}

/// Root-relative path with `/` separators regardless of platform
fn normalize(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
