//! systemd backend.
//!
//! Unit state comes from a single `systemctl show` call:
//!
//! ```text
//! LoadState=loaded
//! ActiveState=active
//! UnitFileState=enabled
//! ```

use std::collections::HashMap;
use std::process::Command;

use crate::error::{Error, Result};

use super::{Backend, InitSystem};

/// Unit properties relevant to the service checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitState {
    pub load_state: String,
    pub active_state: String,
    pub unit_file_state: String,
}

impl UnitState {
    /// Parse `Key=Value` lines printed by `systemctl show`.
    pub fn parse(output: &str) -> Self {
        let props: HashMap<&str, &str> = output
            .lines()
            .filter_map(|line| line.trim().split_once('='))
            .collect();

        let get = |key: &str| props.get(key).copied().unwrap_or_default().to_string();

        Self {
            load_state: get("LoadState"),
            active_state: get("ActiveState"),
            unit_file_state: get("UnitFileState"),
        }
    }

    pub fn is_present(&self) -> bool {
        self.load_state == "loaded"
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.unit_file_state.as_str(), "enabled" | "enabled-runtime")
    }

    pub fn is_working(&self) -> bool {
        matches!(self.active_state.as_str(), "active" | "reloading")
    }
}

/// Backend using `systemctl`.
pub struct SystemdBackend;

impl SystemdBackend {
    pub fn new() -> Self {
        Self
    }

    fn unit_state(&self, name: &str) -> Result<UnitState> {
        let output = Command::new("systemctl")
            .args([
                "show",
                name,
                "--property=LoadState,ActiveState,UnitFileState",
            ])
            .output()
            .map_err(|e| Error::CommandFailed {
                command: "systemctl".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: "systemctl".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let state = UnitState::parse(&String::from_utf8_lossy(&output.stdout));
        log::trace!("systemd unit {name}: {state:?}");
        Ok(state)
    }
}

impl Default for SystemdBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for SystemdBackend {
    fn init_system(&self) -> InitSystem {
        InitSystem::Systemd
    }

    fn is_present(&self, name: &str) -> Result<bool> {
        Ok(self.unit_state(name)?.is_present())
    }

    fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.unit_state(name)?.is_enabled())
    }

    fn is_working(&self, name: &str) -> Result<bool> {
        Ok(self.unit_state(name)?.is_working())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_unit() {
        let state = UnitState::parse("LoadState=loaded\nActiveState=active\nUnitFileState=enabled\n");
        assert!(state.is_present());
        assert!(state.is_enabled());
        assert!(state.is_working());
    }

    #[test]
    fn test_parse_missing_unit() {
        let state = UnitState::parse("LoadState=not-found\nActiveState=inactive\nUnitFileState=\n");
        assert!(!state.is_present());
        assert!(!state.is_enabled());
        assert!(!state.is_working());
    }

    #[test]
    fn test_parse_disabled_but_running() {
        let state = UnitState::parse("ActiveState=active\nUnitFileState=disabled\nLoadState=loaded");
        assert!(state.is_working());
        assert!(!state.is_enabled());
    }

    #[test]
    fn test_parse_ignores_garbage() {
        let state = UnitState::parse("garbage\n\nLoadState=loaded\n");
        assert_eq!(state.load_state, "loaded");
        assert_eq!(state.active_state, "");
    }
}
