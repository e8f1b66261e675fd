//! # initsys
//!
//! Read-only service queries against the host init system.
//!
//! Two backends are provided:
//! - `systemd`: asks `systemctl show` for unit properties
//! - `sysv`: inspects `/etc/init.d` scripts and runlevel links
//!
//! ```no_run
//! use initsys::Client;
//!
//! let client = Client::new().expect("no supported init system");
//! if client.is_working("sshd").unwrap_or(false) {
//!     println!("sshd is up ({})", client.init_system());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::all)]

/// Backend implementations.
pub mod backend;
/// Error types.
pub mod error;

pub use backend::{Backend, InitSystem};
pub use error::{Error, Result};

/// High-level client for service queries.
pub struct Client {
    backend: Box<dyn Backend>,
}

impl Client {
    /// Create a client for the detected init system.
    pub fn new() -> Result<Self> {
        let backend: Box<dyn Backend> = match InitSystem::detect() {
            Some(InitSystem::Systemd) => Box::new(backend::systemd::SystemdBackend::new()),
            Some(InitSystem::SysV) => Box::new(backend::sysv::SysvBackend::new()),
            None => return Err(Error::Unsupported),
        };
        log::debug!("Using {} backend for service queries", backend.init_system());
        Ok(Self { backend })
    }

    /// Create a client with a custom backend (useful for testing).
    pub fn with_backend(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Init system served by the backend.
    pub fn init_system(&self) -> InitSystem {
        self.backend.init_system()
    }

    /// Whether the service is known to the init system.
    pub fn is_present(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.backend.is_present(name)
    }

    /// Whether the service starts at boot.
    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.backend.is_enabled(name)
    }

    /// Whether the service is currently running.
    pub fn is_working(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        self.backend.is_working(name)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains(char::is_whitespace) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend;

    impl Backend for FakeBackend {
        fn init_system(&self) -> InitSystem {
            InitSystem::Systemd
        }

        fn is_present(&self, name: &str) -> Result<bool> {
            Ok(name == "sshd")
        }

        fn is_enabled(&self, _name: &str) -> Result<bool> {
            Ok(false)
        }

        fn is_working(&self, name: &str) -> Result<bool> {
            Ok(name == "sshd")
        }
    }

    #[test]
    fn test_client_delegates_to_backend() {
        let client = Client::with_backend(Box::new(FakeBackend));
        assert!(client.is_present("sshd").unwrap());
        assert!(!client.is_present("nginx").unwrap());
        assert!(!client.is_enabled("sshd").unwrap());
        assert_eq!(client.init_system(), InitSystem::Systemd);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let client = Client::with_backend(Box::new(FakeBackend));
        assert!(matches!(
            client.is_working("../etc/passwd"),
            Err(Error::InvalidName(_))
        ));
        assert!(client.is_working("").is_err());
        assert!(client.is_working("two words").is_err());
    }
}
