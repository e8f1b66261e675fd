//! Variable scope and `{name}` substitution.
//!
//! Recipes see two layers of variables:
//! - **Runtime** variables computed on every read (`WORKDIR`, `TIMESTAMP`, ...),
//!   supplied by the caller through [`RuntimeSource`]
//! - **Declared** variables, either read-only (`var` directives) or writable
//!   (assigned by actions such as `checksum-read`)
//!
//! Lookups visit the runtime layer first. Expansion is a bounded fixed-point
//! so self-referencing definitions always terminate.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Upper bound on expansion passes.
pub const MAX_SUBSTITUTION_DEPTH: usize = 32;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_-]+)\}").expect("valid reference regex"));

/// Source of dynamically computed variables.
pub trait RuntimeSource {
    /// Value of a runtime variable, `None` if `name` is not a runtime variable.
    fn lookup(&self, name: &str) -> Option<String>;

    /// Whether `name` is provided by this source.
    fn provides(&self, name: &str) -> bool;
}

/// Runtime source that provides nothing.
pub struct NoRuntime;

impl RuntimeSource for NoRuntime {
    fn lookup(&self, _name: &str) -> Option<String> {
        None
    }

    fn provides(&self, _name: &str) -> bool {
        false
    }
}

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub value: String,
    pub read_only: bool,
}

/// Declared variables of a recipe.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    vars: BTreeMap<String, Variable>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read-only variable. Redeclaring an existing name fails.
    pub fn declare(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        check_name(name)?;
        if self.vars.get(name).is_some_and(|v| v.read_only) {
            return Err(Error::ReadOnlyVariable(name.to_string()));
        }
        self.vars.insert(
            name.to_string(),
            Variable {
                value: value.into(),
                read_only: true,
            },
        );
        Ok(())
    }

    /// Assign a writable variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        check_name(name)?;
        if self.vars.get(name).is_some_and(|v| v.read_only) {
            return Err(Error::ReadOnlyVariable(name.to_string()));
        }
        self.vars.insert(
            name.to_string(),
            Variable {
                value: value.into(),
                read_only: false,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.vars.get(name).is_some_and(|v| v.read_only)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Pair this layer with a runtime source for lookups and expansion.
    pub fn scope<'a>(&'a self, runtime: &'a dyn RuntimeSource) -> Scope<'a> {
        Scope {
            variables: self,
            runtime,
        }
    }
}

/// Layered view used for lookups: runtime first, then declared.
pub struct Scope<'a> {
    variables: &'a Variables,
    runtime: &'a dyn RuntimeSource,
}

impl Scope<'_> {
    /// Resolve a single variable.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if self.runtime.provides(name) {
            return self.runtime.lookup(name);
        }
        self.variables.get(name).map(str::to_string)
    }

    /// Whether `name` is known to either layer.
    pub fn is_known(&self, name: &str) -> bool {
        self.runtime.provides(name) || self.variables.contains(name)
    }

    /// Expand every `{name}` reference in `text`.
    pub fn expand(&self, text: &str) -> String {
        substitute(text, |name| self.resolve(name))
    }
}

/// Replace `{name}` references until nothing changes or the pass limit is hit.
///
/// Names whose lookup is missing or empty are left untouched.
pub fn substitute(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut current = text.to_string();

    for _ in 0..MAX_SUBSTITUTION_DEPTH {
        if !current.contains('{') {
            break;
        }

        let next = REFERENCE
            .replace_all(&current, |caps: &regex::Captures<'_>| {
                match lookup(&caps[1]) {
                    Some(value) if !value.is_empty() => value,
                    _ => caps[0].to_string(),
                }
            })
            .into_owned();

        if next == current {
            break;
        }
        current = next;
    }

    current
}

/// Names referenced as `{name}` in `text`, in order of appearance.
pub fn references(text: &str) -> Vec<String> {
    REFERENCE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Whether `name` is a valid variable name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn check_name(name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(Error::InvalidVariableName(name.to_string()))
    }
}
