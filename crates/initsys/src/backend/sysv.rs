//! SysV init backend.
//!
//! A service is present when its script exists in an init directory,
//! enabled when a runlevel directory holds an `S<NN><name>` link, and
//! working when `<script> status` exits with zero.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::Result;

use super::{Backend, InitSystem};

const INIT_DIRS: &[&str] = &["etc/init.d", "etc/rc.d/init.d"];
const RUNLEVEL_DIRS: &[&str] = &["etc/rc3.d", "etc/rc5.d", "etc/rc.d/rc3.d", "etc/rc.d/rc5.d"];

/// Backend reading SysV init scripts.
pub struct SysvBackend {
    root: PathBuf,
}

impl SysvBackend {
    pub fn new() -> Self {
        Self::with_root("/")
    }

    /// Backend rooted at an alternate filesystem root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn script(&self, name: &str) -> Option<PathBuf> {
        INIT_DIRS
            .iter()
            .map(|dir| self.root.join(dir).join(name))
            .find(|path| path.is_file())
    }
}

impl Default for SysvBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SysvBackend {
    fn init_system(&self) -> InitSystem {
        InitSystem::SysV
    }

    fn is_present(&self, name: &str) -> Result<bool> {
        Ok(self.script(name).is_some())
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        for dir in RUNLEVEL_DIRS {
            let dir = self.root.join(dir);
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let file_name = entry?.file_name();
                if is_start_link(&file_name.to_string_lossy(), name) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn is_working(&self, name: &str) -> Result<bool> {
        let Some(script) = self.script(name) else {
            return Ok(false);
        };
        Ok(run_status(&script))
    }
}

/// Match `S<digits><name>` runlevel links.
fn is_start_link(file_name: &str, name: &str) -> bool {
    file_name
        .strip_prefix('S')
        .map(|rest| rest.trim_start_matches(|c: char| c.is_ascii_digit()))
        .is_some_and(|rest| rest == name)
}

fn run_status(script: &Path) -> bool {
    Command::new(script)
        .arg("status")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
