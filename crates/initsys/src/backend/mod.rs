use std::fmt;
use std::path::Path;

use crate::error::Result;

pub mod systemd;
pub mod sysv;

/// Supported init systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd,
    SysV,
}

impl InitSystem {
    /// Detect the init system of the running host.
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new("/"))
    }

    /// Detect the init system below an alternate root.
    pub fn detect_in(root: &Path) -> Option<Self> {
        if root.join("run/systemd/system").is_dir() {
            Some(Self::Systemd)
        } else if root.join("etc/init.d").is_dir() || root.join("etc/rc.d/init.d").is_dir() {
            Some(Self::SysV)
        } else {
            None
        }
    }
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Systemd => write!(f, "systemd"),
            Self::SysV => write!(f, "sysv"),
        }
    }
}

/// Backend trait for service queries
///
/// Implementations only read state; they never start, stop or
/// reconfigure services.
pub trait Backend: Send + Sync {
    /// Init system this backend talks to
    fn init_system(&self) -> InitSystem;

    /// Check whether the service is installed
    fn is_present(&self, name: &str) -> Result<bool>;

    /// Check whether the service is enabled at boot
    fn is_enabled(&self, name: &str) -> Result<bool>;

    /// Check whether the service is running
    fn is_working(&self, name: &str) -> Result<bool>;
}
