//! Action handlers and the context they run in.
//!
//! Every handler has the same shape: it reads its (already expanded)
//! arguments from the [`Action`], consults or mutates what the
//! [`Context`] exposes, and returns `Ok(())` or a classified
//! [`ActionError`]. Handlers never print; outcomes reach the user through
//! the renderer.

mod control;
mod fs;
mod http;
mod io;
mod libs;
mod process;
pub mod registry;
mod service;
mod users;

use crate::engine::process::ProcessHandle;
use crate::engine::session::Session;
use recipe::{Action, PropertyBag, RuntimeSource, Variables};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

pub use registry::{ActionSpec, Handler, REGISTRY, lookup};

/// Poll period for output assertions.
pub const IO_POLL: Duration = Duration::from_millis(10);

/// Poll period for process and filesystem assertions.
pub const PROCESS_POLL: Duration = Duration::from_millis(25);

/// Poll period for service assertions.
pub const SERVICE_POLL: Duration = Duration::from_millis(500);

/// Failure class of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Usage,
    Policy,
    Environment,
    Assertion,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Usage => "usage",
            Self::Policy => "policy",
            Self::Environment => "environment",
            Self::Assertion => "assertion",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Why an action failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Malformed use of an action
    #[error("{0}")]
    Usage(String),

    /// Refused by a recipe policy (safe paths, privileges)
    #[error("{0}")]
    Policy(String),

    /// Something the action needs is missing from the system
    #[error("{0}")]
    Environment(String),

    /// The observed state contradicts the action
    #[error("{0}")]
    Assertion(String),

    /// Spawn, I/O, transport or polling failure
    #[error("{0}")]
    Runtime(String),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_) => ErrorKind::Usage,
            Self::Policy(_) => ErrorKind::Policy,
            Self::Environment(_) => ErrorKind::Environment,
            Self::Assertion(_) => ErrorKind::Assertion,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Usage(m)
            | Self::Policy(m)
            | Self::Environment(m)
            | Self::Assertion(m)
            | Self::Runtime(m) => m,
        }
    }
}

pub type ActionResult = Result<(), ActionError>;

/// What a handler can see and touch.
pub struct Context<'a> {
    pub session: &'a mut Session,
    pub variables: &'a mut Variables,
    /// Scratch state of the current command
    pub props: &'a mut PropertyBag,
    /// Child of the current command, absent for hollow commands
    pub process: Option<&'a mut ProcessHandle>,
    pub runtime: &'a dyn RuntimeSource,
}

impl Context<'_> {
    /// The current child, or a runtime error for hollow commands.
    pub fn process(&mut self, action: &Action) -> Result<&mut ProcessHandle, ActionError> {
        self.process.as_deref_mut().ok_or_else(|| {
            ActionError::Runtime(format!("{}: no process in a hollow command", action.name))
        })
    }

    /// Absolute form of a path argument.
    pub fn path(&self, arg: &str) -> PathBuf {
        self.session.path(arg)
    }

    /// Absolute form of a path argument a mutating action is about to touch.
    pub fn safe_path(&self, arg: &str) -> Result<PathBuf, ActionError> {
        let path = self.session.path(arg);
        if self.session.is_safe(&path) {
            Ok(path)
        } else {
            Err(ActionError::Policy(format!(
                "unsafe path {} is outside of working directory {}",
                path.display(),
                self.session.workdir.display()
            )))
        }
    }
}

/// Argument `index`, which arity validation guarantees to exist.
pub(crate) fn arg(action: &Action, index: usize) -> &str {
    action.args.get(index).map_or("", String::as_str)
}

/// Timeout argument in seconds, `default` when absent.
pub(crate) fn timeout_arg(
    action: &Action,
    index: usize,
    default: f64,
) -> Result<(f64, Duration), ActionError> {
    let secs = match action.args.get(index) {
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| {
                ActionError::Usage(format!("{}: invalid timeout {raw:?}", action.name))
            })?,
        None => default,
    };
    let timeout = Duration::try_from_secs_f64(secs).map_err(|_| {
        ActionError::Usage(format!("{}: timeout {secs} out of range", action.name))
    })?;
    Ok((secs, timeout))
}

pub(crate) fn timeout_error(secs: f64, what: impl fmt::Display) -> ActionError {
    ActionError::Assertion(format!("Timeout ({secs} sec) reached {what}"))
}

/// Call `probe` every `period` until it returns true or `timeout` elapses.
///
/// The probe always runs at least once and once more at the deadline. A
/// timeout too large to represent as an instant never expires.
pub(crate) fn poll(timeout: Duration, period: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if probe() {
            return true;
        }
        let Some(deadline) = deadline else {
            thread::sleep(period);
            continue;
        };
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(period.min(deadline - now));
    }
}

/// Succeed when `holds` matches the action's polarity.
///
/// `failure` describes a failed positive check, `negated` a failed
/// negative one.
pub(crate) fn expect_state(
    action: &Action,
    holds: bool,
    failure: impl FnOnce() -> String,
    negated: impl FnOnce() -> String,
) -> ActionResult {
    match (holds, action.negative) {
        (true, false) | (false, true) => Ok(()),
        (false, false) => Err(ActionError::Assertion(failure())),
        (true, true) => Err(ActionError::Assertion(negated())),
    }
}

/// Like [`expect_state`] for lookups: a missing object is an environment
/// problem, an unexpectedly present one an assertion failure.
pub(crate) fn expect_found(
    action: &Action,
    found: bool,
    missing: impl FnOnce() -> String,
    present: impl FnOnce() -> String,
) -> ActionResult {
    match (found, action.negative) {
        (true, false) | (false, true) => Ok(()),
        (false, false) => Err(ActionError::Environment(missing())),
        (true, true) => Err(ActionError::Assertion(present())),
    }
}

/// Dispatch `action` to its handler.
pub fn run(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let spec = lookup(&action.name)
        .ok_or_else(|| ActionError::Usage(format!("unknown action {}", action.name)))?;
    let handler = spec.handler.ok_or_else(|| {
        ActionError::Usage(format!("{} is a global directive, not an action", action.name))
    })?;
    log::debug!("running {action}");
    handler(action, ctx)
}
