//! Access-control list: subject identity to permission record.
//!
//! The ACL is loaded once at startup from a TOML file with one table per
//! subject and never changes afterwards. Workers share it through an `Arc`
//! and only read from it, so no locking is involved.
//!
//! ```toml
//! [alice]
//! read_file = true
//! fs_root = "/data"
//!
//! [bob-laptop]
//! commonName = "bob"
//! exec_command = true
//! command_root = "/data/bin"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

/// Default command root, relative to the home directory.
const DEFAULT_COMMAND_ROOT: &str = "~/bin";

/// Default filesystem root.
const DEFAULT_FS_ROOT: &str = "~";

/// Errors produced while loading the ACL.
#[derive(Debug, thiserror::Error)]
pub enum AclError {
    /// The ACL file exists but could not be read.
    #[error("failed to read ACL at {path}: {source}")]
    Read {
        /// ACL file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The ACL file is not valid TOML or has unknown keys.
    #[error("failed to parse ACL: {0}")]
    Parse(#[from] toml::de::Error),
    /// Two sections resolve to the same subject.
    #[error("duplicate ACL entry for subject '{0}'")]
    DuplicateSubject(String),
    /// A `commonName` override is empty.
    #[error("ACL section '{0}' declares an empty commonName")]
    EmptyCommonName(String),
    /// The home directory is needed to expand `~` but cannot be determined.
    #[error("cannot determine home directory")]
    NoHomeDir,
}

/// Permissions granted to a single subject identity.
///
/// Roots are canonical (absolute, symlink-free) or `None` when the configured
/// directory could not be resolved at load time, in which case every
/// operation under that root is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    subject: String,
    can_read: bool,
    can_write: bool,
    can_run_shell: bool,
    can_run_command: bool,
    fs_root: Option<PathBuf>,
    command_root: Option<PathBuf>,
}

impl PermissionRecord {
    /// Start building a record with every grant off and no roots.
    pub fn builder(subject: impl Into<String>) -> PermissionRecordBuilder {
        PermissionRecordBuilder {
            record: PermissionRecord {
                subject: subject.into(),
                can_read: false,
                can_write: false,
                can_run_shell: false,
                can_run_command: false,
                fs_root: None,
                command_root: None,
            },
        }
    }

    /// Subject identity this record belongs to.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Whether `read_file` is granted.
    pub fn can_read(&self) -> bool {
        self.can_read
    }

    /// Whether `write_file` is granted.
    pub fn can_write(&self) -> bool {
        self.can_write
    }

    /// Whether `exec_shell` is granted.
    pub fn can_run_shell(&self) -> bool {
        self.can_run_shell
    }

    /// Whether `exec_command` is granted.
    pub fn can_run_command(&self) -> bool {
        self.can_run_command
    }

    /// Canonical filesystem root, if it resolved at load time.
    pub fn fs_root(&self) -> Option<&Path> {
        self.fs_root.as_deref()
    }

    /// Canonical command root, if it resolved at load time.
    pub fn command_root(&self) -> Option<&Path> {
        self.command_root.as_deref()
    }
}

/// Builder for [`PermissionRecord`].
///
/// Roots passed to the builder are canonicalized immediately; a root that
/// cannot be canonicalized leaves the record without that root.
#[derive(Debug)]
pub struct PermissionRecordBuilder {
    record: PermissionRecord,
}

impl PermissionRecordBuilder {
    /// Set the `read_file` grant.
    pub fn read(mut self, allowed: bool) -> Self {
        self.record.can_read = allowed;
        self
    }

    /// Set the `write_file` grant.
    pub fn write(mut self, allowed: bool) -> Self {
        self.record.can_write = allowed;
        self
    }

    /// Set the `exec_shell` grant.
    pub fn run_shell(mut self, allowed: bool) -> Self {
        self.record.can_run_shell = allowed;
        self
    }

    /// Set the `exec_command` grant.
    pub fn run_command(mut self, allowed: bool) -> Self {
        self.record.can_run_command = allowed;
        self
    }

    /// Set the filesystem root.
    pub fn fs_root(mut self, root: impl AsRef<Path>) -> Self {
        self.record.fs_root = canonical_root(&self.record.subject, "fs_root", root.as_ref());
        self
    }

    /// Set the command root.
    pub fn command_root(mut self, root: impl AsRef<Path>) -> Self {
        self.record.command_root =
            canonical_root(&self.record.subject, "command_root", root.as_ref());
        self
    }

    /// Finish the record.
    pub fn build(self) -> PermissionRecord {
        self.record
    }
}

fn canonical_root(subject: &str, key: &str, root: &Path) -> Option<PathBuf> {
    match root.canonicalize() {
        Ok(canonical) if canonical.is_dir() => Some(canonical),
        Ok(canonical) => {
            warn!(
                subject,
                key,
                root = %canonical.display(),
                "ACL root is not a directory, operations under it will be refused"
            );
            None
        }
        Err(e) => {
            warn!(
                subject,
                key,
                root = %root.display(),
                error = %e,
                "ACL root cannot be resolved, operations under it will be refused"
            );
            None
        }
    }
}

/// One ACL section as written in the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AclSection {
    #[serde(default)]
    read_file: bool,
    #[serde(default)]
    write_file: bool,
    #[serde(default)]
    exec_shell: bool,
    #[serde(default)]
    exec_command: bool,
    fs_root: Option<String>,
    command_root: Option<String>,
    #[serde(rename = "commonName")]
    common_name: Option<String>,
}

/// Immutable mapping from subject identity to [`PermissionRecord`].
#[derive(Debug, Default)]
pub struct AclStore {
    records: HashMap<String, Arc<PermissionRecord>>,
}

impl AclStore {
    /// An ACL with no entries. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from already-constructed records.
    ///
    /// # Errors
    ///
    /// Returns [`AclError::DuplicateSubject`] if two records share a subject.
    pub fn from_records(
        records: impl IntoIterator<Item = PermissionRecord>,
    ) -> Result<Self, AclError> {
        let mut map = HashMap::new();
        for record in records {
            let subject = record.subject.clone();
            if map.insert(subject.clone(), Arc::new(record)).is_some() {
                return Err(AclError::DuplicateSubject(subject));
            }
        }
        Ok(Self { records: map })
    }

    /// Load the ACL the way the daemon does at startup.
    ///
    /// No path, or a path that does not exist, yields an empty store and a
    /// warning: the daemon will then refuse every connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, AclError> {
        let Some(path) = path else {
            warn!("no ACL file configured");
            return Ok(Self::empty());
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "ACL file not found"
                );
                return Ok(Self::empty());
            }
            Err(source) => {
                return Err(AclError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let home = home_dir();
        let store = Self::from_toml(&contents, home.as_deref())?;
        info!(path = %path.display(), entries = store.len(), "ACL loaded");
        Ok(store)
    }

    /// Parse ACL contents. `home` expands `~` in root paths.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML, unknown keys, duplicate subjects, an
    /// empty `commonName`, or a `~` path when `home` is `None`.
    pub fn from_toml(contents: &str, home: Option<&Path>) -> Result<Self, AclError> {
        let sections: BTreeMap<String, AclSection> = toml::from_str(contents)?;

        let mut records = Vec::with_capacity(sections.len());
        for (name, section) in sections {
            let subject = match section.common_name {
                Some(cn) if cn.is_empty() => return Err(AclError::EmptyCommonName(name)),
                Some(cn) => cn,
                None => name,
            };

            let fs_root = expand_home(section.fs_root.as_deref().unwrap_or(DEFAULT_FS_ROOT), home)?;
            let command_root = expand_home(
                section
                    .command_root
                    .as_deref()
                    .unwrap_or(DEFAULT_COMMAND_ROOT),
                home,
            )?;

            records.push(
                PermissionRecord::builder(subject)
                    .read(section.read_file)
                    .write(section.write_file)
                    .run_shell(section.exec_shell)
                    .run_command(section.exec_command)
                    .fs_root(fs_root)
                    .command_root(command_root)
                    .build(),
            );
        }

        Self::from_records(records)
    }

    /// Look up the record for a subject. `None` means deny everything.
    pub fn lookup(&self, subject: &str) -> Option<Arc<PermissionRecord>> {
        self.records.get(subject).map(Arc::clone)
    }

    /// Number of subjects in the ACL.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the ACL has no entries.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, sorted by subject.
    pub fn records(&self) -> Vec<Arc<PermissionRecord>> {
        let mut records: Vec<_> = self.records.values().map(Arc::clone).collect();
        records.sort_by(|a, b| a.subject.cmp(&b.subject));
        records
    }
}

/// Expand a leading `~` or `~/` to the given home directory.
fn expand_home(raw: &str, home: Option<&Path>) -> Result<PathBuf, AclError> {
    if raw == "~" {
        return home.map(Path::to_path_buf).ok_or(AclError::NoHomeDir);
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        return home.map(|h| h.join(rest)).ok_or(AclError::NoHomeDir);
    }
    Ok(PathBuf::from(raw))
}

/// Home directory of the user running the daemon.
pub fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}
