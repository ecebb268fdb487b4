//! Per-request authorization.
//!
//! Every request is checked against the caller's [`PermissionRecord`] before
//! any I/O happens. The result is either an [`Authorized`] target with fully
//! resolved paths, or a [`Denial`] carrying the HTTP status to send. Sandbox
//! violations and missing grants both map to 403 so a refused traversal looks
//! the same as a permission gap.

use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::acl::PermissionRecord;
use crate::sandbox::{self, Resolved, SandboxError};

/// The four operations a peer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read a file under `fs_root`.
    Read,
    /// Create or overwrite a file under `fs_root`.
    Write,
    /// Feed the request body to a shell interpreter.
    RunShell,
    /// Run an executable under `command_root`.
    RunCommand,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::RunShell => "run_shell",
            Self::RunCommand => "run_command",
        };
        f.write_str(name)
    }
}

/// One decoded request, ready for authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Requested operation.
    pub operation: Operation,
    /// Untrusted relative path (file path or command name).
    pub raw_path: String,
    /// Argument vector for [`Operation::RunCommand`].
    pub command_args: Vec<String>,
    /// Subject of the authenticated connection.
    pub subject: String,
}

/// A permitted operation with its resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorized {
    /// Read this regular file.
    Read(PathBuf),
    /// Write this file; its parent directory exists.
    Write(PathBuf),
    /// Run the shell interpreter.
    RunShell,
    /// Run this executable with these arguments.
    RunCommand {
        /// Canonical executable path under `command_root`.
        program: PathBuf,
        /// Argument vector, passed without shell interpretation.
        args: Vec<String>,
    },
}

/// A refused operation. The reason is for logs only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    /// Authenticated but not permitted, or a sandbox violation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The target, or a write target's parent directory, does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Denial {
    /// HTTP status code for this denial.
    pub fn status(&self) -> u16 {
        match self {
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
        }
    }

    fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound(reason.into())
    }
}

impl From<SandboxError> for Denial {
    fn from(err: SandboxError) -> Self {
        Self::Forbidden(err.to_string())
    }
}

/// Authorization knobs that are not part of the ACL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorizerOptions {
    /// Also require read targets to be world-readable.
    ///
    /// Kept for compatibility with older deployments. It is not a security
    /// boundary: anyone with a shell grant can read the file anyway.
    pub legacy_world_readable: bool,
}

/// Decide whether `record` may perform `request`.
///
/// # Errors
///
/// Returns the [`Denial`] for the first check that fails.
pub fn authorize(
    record: &PermissionRecord,
    request: &AccessRequest,
    opts: AuthorizerOptions,
) -> Result<Authorized, Denial> {
    match request.operation {
        Operation::Read => authorize_read(record, &request.raw_path, opts),
        Operation::Write => authorize_write(record, &request.raw_path),
        Operation::RunShell => authorize_shell(record),
        Operation::RunCommand => {
            authorize_command(record, &request.raw_path, &request.command_args)
        }
    }
}

/// Read: confined, exists, regular file, then the `read_file` grant.
///
/// # Errors
///
/// 403 on escape, non-regular target or missing grant; 404 when absent.
pub fn authorize_read(
    record: &PermissionRecord,
    raw_path: &str,
    opts: AuthorizerOptions,
) -> Result<Authorized, Denial> {
    let root = record
        .fs_root()
        .ok_or_else(|| Denial::forbidden("filesystem root unavailable"))?;
    let resolved = sandbox::resolve(root, raw_path)?;

    if !resolved.exists {
        return Err(Denial::not_found(resolved.path.display().to_string()));
    }
    if !is_regular_leaf(&resolved) {
        return Err(Denial::forbidden(format!(
            "{} is not a regular file",
            resolved.lexical.display()
        )));
    }
    if opts.legacy_world_readable && !is_world_readable(&resolved.path) {
        return Err(Denial::forbidden(format!(
            "{} is not world-readable",
            resolved.path.display()
        )));
    }
    if !record.can_read() {
        return Err(Denial::forbidden("read_file not granted"));
    }

    Ok(Authorized::Read(resolved.path))
}

/// Write: confined, parent exists, existing target is a regular file, then
/// the `write_file` grant.
///
/// # Errors
///
/// 403 on escape, non-regular target or missing grant; 404 when the parent
/// directory is absent.
pub fn authorize_write(record: &PermissionRecord, raw_path: &str) -> Result<Authorized, Denial> {
    let root = record
        .fs_root()
        .ok_or_else(|| Denial::forbidden("filesystem root unavailable"))?;
    let resolved = sandbox::resolve(root, raw_path)?;

    let parent_exists = resolved.path.parent().is_some_and(Path::is_dir);
    if !parent_exists {
        return Err(Denial::not_found(format!(
            "parent of {} does not exist",
            resolved.path.display()
        )));
    }

    // A dangling symlink does not "exist" but still counts here: opening it
    // for writing would create its target.
    let leaf_present = fs::symlink_metadata(&resolved.lexical).is_ok()
        || fs::symlink_metadata(&resolved.path).is_ok();
    if leaf_present && !is_regular_leaf(&resolved) {
        return Err(Denial::forbidden(format!(
            "{} is not a regular file",
            resolved.lexical.display()
        )));
    }
    if !record.can_write() {
        return Err(Denial::forbidden("write_file not granted"));
    }

    Ok(Authorized::Write(resolved.path))
}

/// Shell: only the `exec_shell` grant matters.
///
/// # Errors
///
/// 403 without the grant.
pub fn authorize_shell(record: &PermissionRecord) -> Result<Authorized, Denial> {
    if !record.can_run_shell() {
        return Err(Denial::forbidden("exec_shell not granted"));
    }
    Ok(Authorized::RunShell)
}

/// Command: the `exec_command` grant, then a regular file under
/// `command_root`.
///
/// # Errors
///
/// 403 without the grant, on escape, or for a non-file; 404 when absent.
pub fn authorize_command(
    record: &PermissionRecord,
    name: &str,
    args: &[String],
) -> Result<Authorized, Denial> {
    if !record.can_run_command() {
        return Err(Denial::forbidden("exec_command not granted"));
    }
    let root = record
        .command_root()
        .ok_or_else(|| Denial::forbidden("command root unavailable"))?;
    let resolved = sandbox::resolve(root, name)?;

    if resolved.is_root(root) {
        return Err(Denial::forbidden("empty command name"));
    }
    if !resolved.exists {
        return Err(Denial::not_found(resolved.path.display().to_string()));
    }
    // Commands may be symlinks as long as they land inside the root, so only
    // the canonical target is checked here.
    if !is_regular_file(&resolved.path) {
        return Err(Denial::forbidden(format!(
            "{} is not a regular file",
            resolved.path.display()
        )));
    }

    Ok(Authorized::RunCommand {
        program: resolved.path,
        args: args.to_vec(),
    })
}

/// Both the requested leaf and its canonical target are regular files.
///
/// `lstat` is used so a symlink is never mistaken for its target.
fn is_regular_leaf(resolved: &Resolved) -> bool {
    is_regular_file(&resolved.lexical) && is_regular_file(&resolved.path)
}

fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_file())
}

fn is_world_readable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.permissions().mode() & 0o004 != 0)
}
