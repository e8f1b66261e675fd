//! Per-recipe sandbox state shared by every handler.

use crate::engine::output::DEFAULT_CAPACITY;
use crate::engine::safety;
use crate::engine::tempstore::TempStore;
use recipe::Recipe;
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Ownership recorded when a file is backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Sandbox of one recipe run.
///
/// The working directory is tracked here rather than on the engine
/// process: relative paths in actions resolve against [`Session::cwd`] and
/// children are spawned inside it.
pub struct Session {
    /// Absolute recipe working directory
    pub workdir: PathBuf,
    /// Current directory, moved by `chdir`
    pub cwd: PathBuf,
    pub unsafe_actions: bool,
    pub unbuffer: bool,
    /// Output buffer capacity per stream
    pub capacity: usize,
    pub temp: TempStore,
    /// Variables set with `env-set`
    pub env: BTreeMap<String, String>,
    /// Files backed up so far
    pub backups: HashMap<PathBuf, Ownership>,
}

impl Session {
    pub fn new(recipe: &Recipe) -> Self {
        Self {
            workdir: recipe.dir.clone(),
            cwd: recipe.dir.clone(),
            unsafe_actions: recipe.unsafe_actions,
            unbuffer: recipe.unbuffer,
            capacity: DEFAULT_CAPACITY,
            temp: TempStore::new(),
            env: BTreeMap::new(),
            backups: HashMap::new(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Absolute, normalized form of `path` relative to the current directory.
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        safety::absolute(path.as_ref(), &self.cwd)
    }

    /// Whether a mutating action may touch `path`.
    pub fn is_safe(&self, path: &Path) -> bool {
        self.unsafe_actions || safety::is_safe(&self.workdir, &self.cwd, path)
    }

    pub fn reset_cwd(&mut self) {
        self.cwd.clone_from(&self.workdir);
    }

    /// Environment variable as children of this session see it.
    pub fn env_var(&self, name: &str) -> Option<OsString> {
        self.env
            .get(name)
            .map(OsString::from)
            .or_else(|| std::env::var_os(name))
    }

    /// Remove the temporary directory.
    pub fn cleanup(&mut self) -> io::Result<()> {
        self.backups.clear();
        self.temp.cleanup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session(dir: &Path) -> Session {
        Session::new(&Recipe::new(dir))
    }

    #[test]
    fn test_relative_paths_follow_cwd() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path());
        assert_eq!(session.path("a/../b.txt"), dir.path().join("b.txt"));

        session.cwd = dir.path().join("sub");
        assert_eq!(session.path("c.txt"), dir.path().join("sub/c.txt"));
        assert_eq!(session.path("/etc/passwd"), PathBuf::from("/etc/passwd"));

        session.reset_cwd();
        assert_eq!(session.cwd, dir.path());
    }

    #[test]
    fn test_safety_gate() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path());
        assert!(session.is_safe(&dir.path().join("x")));
        assert!(!session.is_safe(Path::new("/etc/passwd")));

        session.unsafe_actions = true;
        assert!(session.is_safe(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_env_overlay_shadows_process_env() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path());
        assert!(session.env_var("VERDICT_UNSET_VARIABLE").is_none());

        session.env.insert("PATH".into(), "/opt/bin".into());
        assert_eq!(session.env_var("PATH"), Some(OsString::from("/opt/bin")));
    }

    #[test]
    fn test_cleanup_removes_temp() {
        let dir = TempDir::new().unwrap();
        let mut session = session(dir.path());
        let temp = session.temp.path().unwrap().to_path_buf();
        session.backups.insert(
            dir.path().join("f"),
            Ownership { uid: 0, gid: 0 },
        );

        session.cleanup().unwrap();
        assert!(!temp.exists());
        assert!(session.backups.is_empty());
    }
}
