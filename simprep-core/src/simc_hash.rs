//! Build identifier of the SimulationCraft checkout next to the executable.
//!
//! The hash is read from git metadata rather than by running git: first
//! `.git/FETCH_HEAD` (line mentioning the tracked branch), then
//! `.git/shallow`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_BRANCH: &str = "shadowlands";

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Root of the engine checkout for an executable path.
///
/// `/opt/simc/engine/simc` and `/opt/simc/simc` both resolve to `/opt/simc`;
/// `C:\simc\simc.exe` resolves to `C:\simc`.
#[must_use]
pub fn checkout_root(executable: &Path) -> PathBuf {
    let dir = executable
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if dir.file_name().is_some_and(|name| name == "engine") {
        dir.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

/// Hash from `FETCH_HEAD` contents: first token of the last line naming
/// `'branch'`.
#[must_use]
pub fn parse_fetch_head(contents: &str, branch: &str) -> Option<String> {
    let marker = format!("'{branch}'");
    contents
        .lines()
        .filter(|line| line.contains(&marker))
        .filter_map(|line| line.split_whitespace().next())
        .last()
        .map(str::to_string)
}

/// Hash from a `shallow` file: its last non-empty line.
#[must_use]
pub fn parse_shallow(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

fn read_optional(path: &Path) -> Result<Option<String>, HashError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(HashError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Recover the engine build hash for `executable`.
///
/// Missing metadata is not an error: it logs a warning and yields `None`.
///
/// # Errors
///
/// Returns [`HashError::Io`] when a metadata file exists but cannot be read.
pub fn resolve_simc_hash(executable: &Path, branch: &str) -> Result<Option<String>, HashError> {
    let git_dir = checkout_root(executable).join(".git");

    let fetch_head = git_dir.join("FETCH_HEAD");
    if let Some(contents) = read_optional(&fetch_head)? {
        let hash = parse_fetch_head(&contents, branch);
        if hash.is_none() {
            log::warn!(
                "{} has no entry for branch '{branch}'. Result files won't contain a build hash.",
                fetch_head.display()
            );
        }
        return Ok(hash);
    }

    let shallow = git_dir.join("shallow");
    if let Some(contents) = read_optional(&shallow)? {
        return Ok(parse_shallow(&contents));
    }

    log::warn!(
        "Couldn't find SimulationCraft git metadata under {}. Result files won't contain a build hash.",
        git_dir.display()
    );
    Ok(None)
}
