//! Pre-install filesystem steps shipped inside an archive.
//!
//! The archive root may contain `update_script.txt`, one command per line:
//!
//! ```text
//! move <src> <dst>
//! copy <src> <dst>
//! delete <path>
//! mkdir <path>
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. Paths are relative
//! to the installation target directory and may not leave it.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::logger::Logger;

pub const ACTION_SCRIPT_NAME: &str = "update_script.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move { from: String, to: String },
    Copy { from: String, to: String },
    Delete(String),
    Mkdir(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{command} expects {expected} argument(s), found {found}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        found: usize,
    },
}

impl Action {
    /// Parse one script line. Returns `Ok(None)` for blank and comment lines.
    ///
    /// # Errors
    /// Returns an error for unknown commands or a wrong number of arguments.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ActionParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = parts.collect();

        let action = match command.to_ascii_lowercase().as_str() {
            "move" => {
                let [from, to] = expect_args::<2>("move", &args)?;
                Self::Move { from, to }
            }
            "copy" => {
                let [from, to] = expect_args::<2>("copy", &args)?;
                Self::Copy { from, to }
            }
            "delete" => {
                let [path] = expect_args::<1>("delete", &args)?;
                Self::Delete(path)
            }
            "mkdir" => {
                let [path] = expect_args::<1>("mkdir", &args)?;
                Self::Mkdir(path)
            }
            _ => return Err(ActionParseError::UnknownCommand(command.to_string())),
        };
        Ok(Some(action))
    }

    /// Apply the action below `root`.
    ///
    /// # Errors
    /// Returns an error when a path escapes `root` or the filesystem
    /// operation fails.
    pub fn execute(&self, root: &Path) -> std::io::Result<()> {
        match self {
            Self::Move { from, to } => {
                let from = resolve_inside(root, from)?;
                let to = resolve_inside(root, to)?;
                ensure_parent(&to)?;
                std::fs::rename(&from, &to)
            }
            Self::Copy { from, to } => {
                let from = resolve_inside(root, from)?;
                let to = resolve_inside(root, to)?;
                if from.is_dir() {
                    copy_dir(&from, &to)
                } else {
                    ensure_parent(&to)?;
                    std::fs::copy(&from, &to).map(|_| ())
                }
            }
            Self::Delete(path) => {
                let path = resolve_inside(root, path)?;
                let result = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                match result {
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                }
            }
            Self::Mkdir(path) => std::fs::create_dir_all(resolve_inside(root, path)?),
        }
    }
}

fn expect_args<const N: usize>(
    command: &'static str,
    args: &[&str],
) -> Result<[String; N], ActionParseError> {
    <[&str; N]>::try_from(args)
        .map(|args| args.map(ToString::to_string))
        .map_err(|_| ActionParseError::WrongArity {
            command,
            expected: N,
            found: args.len(),
        })
}

/// Parse a whole script, logging and skipping bad lines.
pub fn parse_script(script: &str, logger: &dyn Logger) -> Vec<Action> {
    script
        .split('\n')
        .enumerate()
        .filter_map(|(index, line)| match Action::parse_line(line) {
            Ok(action) => action,
            Err(error) => {
                crate::log_warn!(
                    logger,
                    "Skipping line {} of {ACTION_SCRIPT_NAME}: {error}",
                    index + 1
                );
                None
            }
        })
        .collect()
}

/// Parse and execute `script` below `root`. Failing actions are logged and
/// the rest still run. Returns how many actions succeeded.
pub fn run_script(script: &str, root: &Path, logger: &dyn Logger) -> usize {
    let mut succeeded = 0;
    for action in parse_script(script, logger) {
        match action.execute(root) {
            Ok(()) => {
                crate::log_debug!(logger, "Ran {action:?}");
                succeeded += 1;
            }
            Err(error) => crate::log_warn!(logger, "Action {action:?} failed: {error}"),
        }
    }
    succeeded
}

fn resolve_inside(root: &Path, relative: &str) -> std::io::Result<PathBuf> {
    let normalized = relative.replace('\\', "/");
    let path = Path::new(&normalized);
    let escapes = path.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || normalized.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path {relative:?} is outside the installation directory"),
        ));
    }
    Ok(root.join(path))
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let destination = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            ensure_parent(&destination)?;
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}
