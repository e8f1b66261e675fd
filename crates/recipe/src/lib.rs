//! # recipe
//!
//! In-memory model and parser for acceptance-test recipes.
//!
//! A recipe names child processes to launch and, for each, an ordered
//! list of actions asserting something about the process or the system:
//!
//! ```text
//! var greeting hello
//!
//! command "echo {greeting}"
//!   expect "{greeting}"
//!   exit 0
//! ```
//!
//! ## Example
//!
//! ```
//! use recipe::{NoRuntime, parse_string};
//!
//! let recipe = parse_string("var who world\ncommand \"echo hi {who}\"\n  exit 0\n").unwrap();
//! let scope = recipe.variables.scope(&NoRuntime);
//! assert_eq!(scope.expand(&recipe.commands[0].cmdline), "echo hi world");
//! ```
//!
//! Runtime variables (`WORKDIR`, `TIMESTAMP`, ...) are supplied by the
//! engine through [`RuntimeSource`].

#![warn(clippy::all)]

pub mod error;
pub mod parser;
pub mod types;
pub mod variables;

pub use error::{Error, Result};
pub use parser::{parse_file, parse_string};
pub use types::{Action, Command, HOLLOW_CMDLINE, Property, PropertyBag, Recipe};
pub use variables::{
    MAX_SUBSTITUTION_DEPTH, NoRuntime, RuntimeSource, Scope, Variable, Variables, references,
    substitute,
};
