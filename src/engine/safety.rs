//! Safe-path policy for file-mutating actions.
//!
//! A path is safe when its absolute, symlink-resolved form lies inside the
//! recipe working directory. Paths are resolved without requiring the
//! target to exist: the deepest existing ancestor is canonicalized and the
//! remaining components are appended.

use std::path::{Component, Path, PathBuf};

/// Join `path` onto `cwd` and fold `.` and `..` lexically.
pub fn absolute(path: &Path, cwd: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    normalize(&joined)
}

/// Lexical normalization; `..` never climbs above the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Resolve symlinks in the existing part of an absolute, normalized path.
pub fn resolve(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return normalize(&out);
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Whether `target` (relative to `cwd`) lies inside `workdir`.
pub fn is_safe(workdir: &Path, cwd: &Path, target: &Path) -> bool {
    let workdir = resolve(&normalize(workdir));
    let target = resolve(&absolute(target, cwd));
    target.starts_with(&workdir)
}
