//! Output guard: script file writes confined to one directory.
//!
//! Names are checked lexically before touching the filesystem, then the
//! resolved parent is canonicalized and must stay under the canonical root.
//! A target that is itself a symlink, live or dangling, must resolve inside
//! the root too.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use scriptgate_types::OutputManifestEntry;

/// Default output directory, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "scriptgate-output";

/// Default cumulative write budget per execution (50 MB).
pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("path traversal rejected: {name}: {reason}")]
    PathTraversal { name: String, reason: String },
    #[error("output budget exceeded: {name} needs {requested} bytes, {remaining} of {limit} remain")]
    BudgetExceeded {
        name: String,
        requested: u64,
        remaining: u64,
        limit: u64,
    },
    #[error("failed to write {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl OutputError {
    pub fn is_traversal(&self) -> bool {
        matches!(self, Self::PathTraversal { .. })
    }
}

/// Where scripts may write and how much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub root: PathBuf,
    pub max_bytes: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Per-execution writer and manifest.
#[derive(Debug)]
pub struct OutputGuard {
    config: OutputConfig,
    canonical_root: Option<PathBuf>,
    written: u64,
    manifest: Vec<OutputManifestEntry>,
}

impl OutputGuard {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            config,
            canonical_root: None,
            written: 0,
            manifest: Vec::new(),
        }
    }

    /// Successful writes so far, in write order.
    pub fn manifest(&self) -> &[OutputManifestEntry] {
        &self.manifest
    }

    pub fn into_manifest(self) -> Vec<OutputManifestEntry> {
        self.manifest
    }

    /// Write `content` to `name` under the root, replacing any existing file.
    ///
    /// Returns the absolute path written.
    pub fn save(&mut self, name: &str, content: &[u8]) -> Result<PathBuf, OutputError> {
        let relative = check_name(name)?;

        let requested = content.len() as u64;
        let remaining = self.config.max_bytes.saturating_sub(self.written);
        if requested > remaining {
            return Err(OutputError::BudgetExceeded {
                name: name.to_string(),
                requested,
                remaining,
                limit: self.config.max_bytes,
            });
        }

        let io_err = |source| OutputError::Io {
            name: name.to_string(),
            source,
        };
        let root = self.root().map_err(io_err)?;
        let target = root.join(&relative);
        let parent = target.parent().unwrap_or(&root).to_path_buf();

        // Check once before creating directories so a symlinked ancestor
        // cannot make create_dir_all build outside the root.
        ensure_inside(name, &root, &existing_ancestor(&parent).map_err(io_err)?)?;
        std::fs::create_dir_all(&parent).map_err(io_err)?;
        let canonical_parent = parent.canonicalize().map_err(io_err)?;
        ensure_inside(name, &root, &canonical_parent)?;

        let file_name = target.file_name().ok_or_else(|| traversal(name, "no file name"))?;
        let mut final_path = canonical_parent.join(file_name);
        if let Ok(meta) = std::fs::symlink_metadata(&final_path) {
            if meta.file_type().is_symlink() {
                final_path = resolve_symlink(name, &root, &canonical_parent, &final_path)
                    .map_err(|e| match e {
                        SymlinkError::Outside => {
                            traversal(name, "symlink resolves outside the output directory")
                        }
                        SymlinkError::Io(source) => io_err(source),
                    })?;
            } else if meta.is_dir() {
                return Err(io_err(io::Error::other("target is a directory")));
            }
        }

        std::fs::write(&final_path, content).map_err(io_err)?;
        self.written += requested;
        self.manifest.push(OutputManifestEntry {
            relative_name: relative.to_string_lossy().replace('\\', "/"),
            byte_count: requested,
        });
        tracing::debug!(path = %final_path.display(), bytes = requested, "script wrote file");
        Ok(final_path)
    }

    fn root(&mut self) -> io::Result<PathBuf> {
        if let Some(root) = &self.canonical_root {
            return Ok(root.clone());
        }
        std::fs::create_dir_all(&self.config.root)?;
        let root = self.config.root.canonicalize()?;
        self.canonical_root = Some(root.clone());
        Ok(root)
    }
}

/// Lexical checks, run before any filesystem access.
fn check_name(name: &str) -> Result<PathBuf, OutputError> {
    if name.is_empty() {
        return Err(traversal(name, "empty name"));
    }
    if name.contains('\0') {
        return Err(traversal(name, "NUL byte in name"));
    }
    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(traversal(name, "parent directory segment")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(traversal(name, "absolute path"));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(traversal(name, "no file name"));
    }
    Ok(relative)
}

enum SymlinkError {
    Outside,
    Io(io::Error),
}

/// Where a write through the symlink at `link` would land, if that is
/// inside `root`.
///
/// A live link is canonicalized. A dangling link has its target resolved
/// against `parent`: the target's own parent must exist inside the root, and
/// the target must not itself be another link.
fn resolve_symlink(name: &str, root: &Path, parent: &Path, link: &Path) -> Result<PathBuf, SymlinkError> {
    let resolved = match link.canonicalize() {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let target = std::fs::read_link(link).map_err(SymlinkError::Io)?;
            let target = normalize(&parent.join(target));
            if std::fs::symlink_metadata(&target).is_ok() {
                tracing::debug!(name, target = %target.display(), "rejecting chained symlink");
                return Err(SymlinkError::Outside);
            }
            let target_parent = target.parent().ok_or(SymlinkError::Outside)?;
            let canonical = existing_ancestor(target_parent).map_err(SymlinkError::Io)?;
            if !canonical.starts_with(root) {
                return Err(SymlinkError::Outside);
            }
            target
        }
        Err(e) => return Err(SymlinkError::Io(e)),
    };
    if resolved.starts_with(root) {
        Ok(resolved)
    } else {
        Err(SymlinkError::Outside)
    }
}

/// Lexically fold `.` and `..` out of an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

/// Canonical form of the deepest ancestor of `path` that exists.
fn existing_ancestor(path: &Path) -> io::Result<PathBuf> {
    let mut current = path;
    loop {
        if current.exists() {
            return current.canonicalize();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "no existing ancestor")),
        }
    }
}

fn ensure_inside(name: &str, root: &Path, resolved: &Path) -> Result<(), OutputError> {
    if resolved.starts_with(root) {
        Ok(())
    } else {
        Err(traversal(name, "resolves outside the output directory"))
    }
}

fn traversal(name: &str, reason: &str) -> OutputError {
    OutputError::PathTraversal {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn guard(dir: &Path, max_bytes: u64) -> OutputGuard {
        OutputGuard::new(OutputConfig {
            root: dir.join("out"),
            max_bytes,
        })
    }

    #[test]
    fn test_save_writes_and_records() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut out = guard(tmp.path(), 1024);
        let path = out.save("reports/summary.txt", b"hello").expect("save");
        assert!(path.is_absolute());
        assert_eq!(std::fs::read(&path).expect("read"), b"hello");
        assert_eq!(
            out.manifest(),
            &[OutputManifestEntry {
                relative_name: "reports/summary.txt".to_string(),
                byte_count: 5
            }]
        );
    }

    #[test]
    fn test_overwrite_same_path() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut out = guard(tmp.path(), 1024);
        out.save("a.txt", b"first").expect("first");
        let path = out.save("./a.txt", b"2nd").expect("second");
        assert_eq!(std::fs::read(path).expect("read"), b"2nd");
        assert_eq!(out.manifest().len(), 2);
    }

    #[rstest]
    #[case("../escape.txt")]
    #[case("nested/../../escape.txt")]
    #[case("/etc/passwd")]
    #[case("")]
    #[case("bad\0name")]
    #[case(".")]
    fn test_traversal_rejected_before_io(#[case] name: &str) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut out = guard(tmp.path(), 1024);
        let err = out.save(name, b"x").expect_err("should reject");
        assert!(err.is_traversal(), "{err}");
        assert!(err.to_string().contains("path traversal"));
        // Nothing was created, not even the root.
        assert!(!tmp.path().join("out").exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("outside");
        std::fs::create_dir_all(tmp.path().join("out")).expect("out");
        std::os::unix::fs::symlink(&outside, tmp.path().join("out/link")).expect("symlink");

        let mut out = guard(tmp.path(), 1024);
        let err = out.save("link/sub/file.txt", b"x").expect_err("should reject");
        assert!(err.is_traversal());
        assert!(!outside.join("sub").exists());

        std::os::unix::fs::symlink(outside.join("target.txt"), tmp.path().join("out/f.txt"))
            .expect("file symlink");
        let err = out.save("f.txt", b"x").expect_err("dangling symlink outside");
        assert!(err.is_traversal(), "{err}");
        assert!(err.to_string().contains("symlink resolves outside"), "{err}");
        assert!(!outside.join("target.txt").exists());
        assert!(out.manifest().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_dangling_symlink_outside_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("out")).expect("out");
        std::os::unix::fs::symlink("../outside.txt", tmp.path().join("out/f.txt")).expect("symlink");

        let mut out = guard(tmp.path(), 1024);
        let err = out.save("f.txt", b"x").expect_err("should reject");
        assert!(err.is_traversal(), "{err}");
        assert!(!tmp.path().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_inside_root_are_followed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("out/data")).expect("out");
        std::os::unix::fs::symlink("data/real.txt", tmp.path().join("out/alias.txt")).expect("dangling");
        std::os::unix::fs::symlink("data/real.txt", tmp.path().join("out/again.txt")).expect("live");

        let mut out = guard(tmp.path(), 1024);
        let written = out.save("alias.txt", b"first").expect("dangling link inside root");
        assert!(written.ends_with("data/real.txt"), "{}", written.display());
        out.save("again.txt", b"second").expect("live link inside root");
        assert_eq!(std::fs::read(tmp.path().join("out/data/real.txt")).expect("read"), b"second");
    }

    #[test]
    fn test_budget_is_cumulative() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut out = guard(tmp.path(), 8);
        out.save("a", b"12345").expect("fits");
        let err = out.save("b", b"12345").expect_err("over budget");
        assert!(matches!(err, OutputError::BudgetExceeded { remaining: 3, .. }));
        assert!(!tmp.path().join("out/b").exists());
    }
}
