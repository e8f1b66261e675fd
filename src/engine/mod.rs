//! Execution engine
//!
//! The engine runs a recipe:
//! 1. Validating - Reject unknown actions, bad arity, missing privileges
//! 2. Spawning - Start each command's child and capture its output
//! 3. Executing - Dispatch every action and report the outcome

pub mod executor;
pub mod output;
pub mod privilege;
pub mod process;
pub mod runtime;
pub mod safety;
pub mod session;
pub mod signal;
pub mod tempstore;
pub mod validator;

pub use executor::{ExecuteOptions, ExecuteSummary, execute};
pub use validator::{ValidationError, validate};
