//! Path confinement under a canonical root directory.
//!
//! Resolution happens in two steps. The caller's path is first normalized as
//! a string, so it is always relative and never climbs above the root. The
//! joined path is then checked against the real filesystem: its deepest
//! existing ancestor is canonicalized and must still lie under the root.
//! String normalization alone cannot see symlinks, and canonicalizing raw
//! caller input would let it resolve anywhere.
//!
//! ## Known Limitations
//!
//! The result is a snapshot. Between resolution and the eventual open,
//! another process can replace a path component with a symlink. Callers
//! re-check the leaf with `lstat` to narrow that window.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Errors produced by sandbox resolution.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A `..` segment would climb above the root.
    #[error("path '{0}' traverses above the sandbox root")]
    Traversal(String),
    /// The path contains a byte that cannot appear in a file name.
    #[error("path '{0}' contains an invalid segment")]
    InvalidSegment(String),
    /// The canonical path lies outside the root.
    #[error("path '{path}' escapes sandbox root '{root}'")]
    Escape {
        /// The requested path.
        path: String,
        /// The root it was confined to.
        root: PathBuf,
    },
    /// The filesystem could not be queried.
    #[error("cannot resolve '{path}': {source}")]
    Io {
        /// The requested path.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// A path confined to a sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical existing ancestor joined with any not-yet-existing suffix.
    pub path: PathBuf,
    /// Root joined with the normalized request, before symlink resolution.
    pub lexical: PathBuf,
    /// Whether the full path exists (following symlinks).
    pub exists: bool,
}

impl Resolved {
    /// Whether the request named the root itself.
    pub fn is_root(&self, root: &Path) -> bool {
        self.lexical == root
    }
}

/// Normalize an untrusted relative path.
///
/// Empty and `.` segments are dropped, which also strips leading separators.
/// `..` pops the previous segment.
///
/// # Errors
///
/// Returns [`SandboxError::Traversal`] when `..` would climb above the start
/// and [`SandboxError::InvalidSegment`] for segments containing NUL.
pub fn normalize(requested: &str) -> Result<PathBuf, SandboxError> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in requested.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(SandboxError::Traversal(requested.to_owned()));
                }
            }
            s if s.contains('\0') => {
                return Err(SandboxError::InvalidSegment(requested.to_owned()));
            }
            s => segments.push(s),
        }
    }
    Ok(segments.iter().collect())
}

/// Resolve `requested` under `root`.
///
/// `root` must already be canonical; [`crate::acl::PermissionRecord`] roots
/// are canonicalized at load time.
///
/// # Errors
///
/// Returns an error when normalization fails, when the canonical path is not
/// under `root`, or when the filesystem cannot be queried.
pub fn resolve(root: &Path, requested: &str) -> Result<Resolved, SandboxError> {
    let relative = normalize(requested)?;
    let lexical = root.join(&relative);

    let escape = || SandboxError::Escape {
        path: requested.to_owned(),
        root: root.to_path_buf(),
    };

    let mut ancestor = lexical.as_path();
    loop {
        // Anything that fails to stat (missing, a file where a directory
        // was expected, unreadable) is treated as not existing yet.
        if std::fs::metadata(ancestor).is_ok() {
            break;
        }
        ancestor = ancestor.parent().ok_or_else(escape)?;
    }

    let canonical_ancestor = ancestor.canonicalize().map_err(|source| SandboxError::Io {
        path: requested.to_owned(),
        source,
    })?;
    if !canonical_ancestor.starts_with(root) {
        return Err(escape());
    }

    let exists = ancestor == lexical.as_path();
    let suffix = lexical.strip_prefix(ancestor).map_err(|_| escape())?;
    let path = if suffix.as_os_str().is_empty() {
        canonical_ancestor
    } else {
        canonical_ancestor.join(suffix)
    };

    if path.components().any(|c| matches!(c, Component::ParentDir)) || !path.starts_with(root) {
        return Err(escape());
    }

    Ok(Resolved {
        path,
        lexical,
        exists,
    })
}
