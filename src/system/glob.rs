//! Glob expansion over a [`System`], one path component at a time.
use std::collections::BTreeSet;
use std::path::Path;

use glob::Pattern;

use super::{FileType, System, lstat_opt};
use crate::error::SystemError;
use crate::pattern::MATCH_OPTIONS;

/// Expand a slash-separated `pattern` relative to `root`.
///
/// Supports `*`, `?`, `[...]` within a component and `**` for any number of
/// directories. Symlinked directories are not descended into. Returns sorted,
/// slash-separated paths relative to `root`.
///
/// # Errors
///
/// Returns [`SystemError`] for failures other than missing paths.
pub fn expand(system: &dyn System, root: &Path, pattern: &str) -> Result<Vec<String>, SystemError> {
    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    let mut found = BTreeSet::new();
    if !components.is_empty() {
        walk(system, root, "", &components, &mut found)?;
    }
    Ok(found.into_iter().collect())
}

fn join(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{rel}/{name}")
    }
}

fn is_literal(component: &str) -> bool {
    !component.contains(['*', '?', '['])
}

fn walk(
    system: &dyn System,
    root: &Path,
    rel: &str,
    components: &[&str],
    found: &mut BTreeSet<String>,
) -> Result<(), SystemError> {
    let Some((&first, rest)) = components.split_first() else {
        if !rel.is_empty() {
            found.insert(rel.to_string());
        }
        return Ok(());
    };
    let dir = root.join(rel);

    if first == "**" {
        walk(system, root, rel, rest, found)?;
        for name in list_dir(system, &dir)? {
            let child = join(rel, &name);
            if lstat_opt(system, &root.join(&child))?.is_some_and(|i| i.file_type == FileType::Dir)
            {
                walk(system, root, &child, components, found)?;
            }
        }
        return Ok(());
    }

    if is_literal(first) {
        let child = join(rel, first);
        if let Some(info) = lstat_opt(system, &root.join(&child))?
            && (rest.is_empty() || info.file_type == FileType::Dir)
        {
            walk(system, root, &child, rest, found)?;
        }
        return Ok(());
    }

    let Ok(compiled) = Pattern::new(first) else {
        return Ok(());
    };
    for name in list_dir(system, &dir)? {
        if !compiled.matches_with(&name, MATCH_OPTIONS) {
            continue;
        }
        let child = join(rel, &name);
        if rest.is_empty() {
            found.insert(child);
        } else if lstat_opt(system, &root.join(&child))?.is_some_and(|i| i.file_type == FileType::Dir)
        {
            walk(system, root, &child, rest, found)?;
        }
    }
    Ok(())
}

/// List a directory, treating a missing or non-directory path as empty.
fn list_dir(system: &dyn System, dir: &Path) -> Result<Vec<String>, SystemError> {
    match lstat_opt(system, dir)? {
        Some(info) if info.file_type == FileType::Dir => system.read_dir(dir),
        _ => Ok(Vec::new()),
    }
}
