//! Path confinement tests for the sandbox resolver.

use std::fs;
use std::path::{Path, PathBuf};

use tether::sandbox::{normalize, resolve, SandboxError};

fn root() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let canonical = tmp.path().canonicalize().expect("should canonicalize root");
    (tmp, canonical)
}

// ---------- normalize ----------

#[test]
fn leading_separators_are_stripped() {
    let normalized = normalize("///etc/passwd").expect("should normalize");
    assert_eq!(normalized, PathBuf::from("etc/passwd"));
}

#[test]
fn dot_segments_collapse() {
    let normalized = normalize("a/./b/../c").expect("should normalize");
    assert_eq!(normalized, PathBuf::from("a/c"));
}

#[test]
fn dotdot_above_start_is_traversal() {
    assert!(matches!(
        normalize("../etc/passwd"),
        Err(SandboxError::Traversal(_))
    ));
    assert!(matches!(
        normalize("a/../../b"),
        Err(SandboxError::Traversal(_))
    ));
}

#[test]
fn nul_byte_is_rejected() {
    assert!(matches!(
        normalize("a\0b"),
        Err(SandboxError::InvalidSegment(_))
    ));
}

#[test]
fn empty_path_normalizes_to_nothing() {
    let normalized = normalize("").expect("should normalize");
    assert_eq!(normalized, PathBuf::new());
}

// ---------- resolve ----------

#[test]
fn existing_file_resolves_under_root() {
    let (_tmp, root) = root();
    fs::write(root.join("report.txt"), "data").expect("should write file");

    let resolved = resolve(&root, "report.txt").expect("should resolve");
    assert_eq!(resolved.path, root.join("report.txt"));
    assert!(resolved.exists);
}

#[test]
fn missing_file_resolves_with_exists_false() {
    let (_tmp, root) = root();
    let resolved = resolve(&root, "sub/new.txt").expect("should resolve");
    assert_eq!(resolved.path, root.join("sub/new.txt"));
    assert!(!resolved.exists);
}

#[test]
fn empty_request_resolves_to_root() {
    let (_tmp, root) = root();
    let resolved = resolve(&root, "").expect("should resolve");
    assert_eq!(resolved.path, root);
    assert!(resolved.is_root(&root));
}

#[test]
fn absolute_looking_path_stays_inside() {
    let (_tmp, root) = root();
    let resolved = resolve(&root, "/etc/passwd").expect("should resolve");
    assert!(resolved.path.starts_with(&root));
    assert!(!resolved.exists);
}

#[test]
fn dotdot_escape_is_rejected() {
    let (_tmp, root) = root();
    let result = resolve(&root, "../etc/passwd");
    assert!(matches!(result, Err(SandboxError::Traversal(_))));
}

#[cfg(unix)]
#[test]
fn sibling_with_common_prefix_is_not_inside() {
    let parent = tempfile::tempdir().expect("should create temp dir");
    let base = parent.path().canonicalize().expect("should canonicalize");
    let root = base.join("data");
    let sibling = base.join("data2");
    fs::create_dir(&root).expect("should create root");
    fs::create_dir(&sibling).expect("should create sibling");
    fs::write(sibling.join("secret"), "s").expect("should write secret");

    std::os::unix::fs::symlink(&sibling, root.join("peek")).expect("should symlink");
    let result = resolve(&root, "peek/secret");
    assert!(matches!(result, Err(SandboxError::Escape { .. })));
}

#[cfg(unix)]
#[test]
fn symlink_pointing_outside_is_rejected() {
    let (_tmp, root) = root();
    let outside = tempfile::tempdir().expect("should create outside dir");
    fs::write(outside.path().join("secret.txt"), "secret").expect("should write secret");
    std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("link"))
        .expect("should symlink");

    let result = resolve(&root, "link");
    assert!(matches!(result, Err(SandboxError::Escape { .. })));
}

#[cfg(unix)]
#[test]
fn symlinked_directory_outside_is_rejected_even_for_new_files() {
    let (_tmp, root) = root();
    let outside = tempfile::tempdir().expect("should create outside dir");
    std::os::unix::fs::symlink(outside.path(), root.join("escape")).expect("should symlink");

    let result = resolve(&root, "escape/new.txt");
    assert!(matches!(result, Err(SandboxError::Escape { .. })));
}

#[cfg(unix)]
#[test]
fn symlink_inside_root_resolves_to_target() {
    let (_tmp, root) = root();
    fs::create_dir(root.join("real")).expect("should create dir");
    fs::write(root.join("real/file.txt"), "x").expect("should write file");
    std::os::unix::fs::symlink(root.join("real"), root.join("alias")).expect("should symlink");

    let resolved = resolve(&root, "alias/file.txt").expect("should resolve");
    assert_eq!(resolved.path, root.join("real/file.txt"));
    assert_eq!(resolved.lexical, root.join("alias/file.txt"));
    assert!(resolved.exists);
}

#[cfg(unix)]
#[test]
fn dangling_symlink_is_not_followed() {
    let (_tmp, root) = root();
    std::os::unix::fs::symlink(Path::new("/nonexistent/tether-target"), root.join("dangling"))
        .expect("should symlink");

    let resolved = resolve(&root, "dangling").expect("should resolve");
    assert!(!resolved.exists);
    assert_eq!(resolved.path, root.join("dangling"));
}

#[test]
fn file_used_as_directory_does_not_exist() {
    let (_tmp, root) = root();
    fs::write(root.join("plain"), "x").expect("should write file");
    let resolved = resolve(&root, "plain/child").expect("should resolve");
    assert!(!resolved.exists);
    assert_eq!(resolved.path, root.join("plain/child"));
}
