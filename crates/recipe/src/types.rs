//! Recipe tree: recipe → commands → actions.

use crate::variables::Variables;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Cmdline marking a command without a process.
pub const HOLLOW_CMDLINE: &str = "-";

/// A parsed recipe.
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    /// File the recipe was read from
    pub file: Option<PathBuf>,
    /// Working directory (absolute after validation)
    pub dir: PathBuf,
    /// Allow file-mutating actions outside `dir`
    pub unsafe_actions: bool,
    /// Refuse to run unless the engine runs as root
    pub require_root: bool,
    /// Stop after the first failed command
    pub fast_finish: bool,
    /// Reset the process working directory before every command
    pub lock_workdir: bool,
    /// Capture stdout through a pseudo-terminal
    pub unbuffer: bool,
    /// Packages the recipe expects to be installed
    pub packages: Vec<String>,
    pub variables: Variables,
    pub commands: Vec<Command>,
}

impl Recipe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Append a command, fixing up its back-references.
    pub fn add_command(&mut self, mut command: Command) {
        command.index = self.commands.len();
        for action in &mut command.actions {
            action.command = command.index;
        }
        if command.user.is_some() {
            self.require_root = true;
        }
        self.commands.push(command);
    }

    /// Total number of actions across all commands.
    pub fn action_count(&self) -> usize {
        self.commands.iter().map(|c| c.actions.len()).sum()
    }

    /// Distinct command tags, in order of first appearance.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = Vec::new();
        for tag in self.commands.iter().filter_map(|c| c.tag.as_deref()) {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

/// One process-plus-assertions unit.
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// Position in [`Recipe::commands`]
    pub index: usize,
    /// Command line, or `-` for a hollow command
    pub cmdline: String,
    /// Run the command as this user (through `runuser`)
    pub user: Option<String>,
    pub tag: Option<String>,
    pub description: Option<String>,
    /// Environment overlay as `NAME=VALUE` entries
    pub env: Vec<String>,
    pub actions: Vec<Action>,
    /// Line number in the recipe (1-indexed)
    pub line: usize,
    /// Handler-local scratch state
    pub props: PropertyBag,
}

impl Command {
    pub fn new(cmdline: impl Into<String>) -> Self {
        Self {
            cmdline: cmdline.into(),
            ..Default::default()
        }
    }

    /// Hollow commands run no process, only assertions.
    pub fn is_hollow(&self) -> bool {
        self.cmdline == HOLLOW_CMDLINE
    }

    pub fn add_action(&mut self, mut action: Action) {
        action.command = self.index;
        self.actions.push(action);
    }

    /// Environment overlay split into `(name, value)` pairs.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|e| e.split_once('='))
    }

    /// Label shown to the user: description, else cmdline.
    pub fn title(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.cmdline)
    }
}

/// A single assertion or mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub args: Vec<String>,
    /// Assert the complement of the default predicate
    pub negative: bool,
    /// Index of the owning command in [`Recipe::commands`]
    pub command: usize,
    /// Line number in the recipe (1-indexed)
    pub line: usize,
}

impl Action {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            ..Default::default()
        }
    }

    pub fn negated(mut self) -> Self {
        self.negative = true;
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "!")?;
        }
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// A value kept in a command's property bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    Text(String),
    Credentials { user: String, password: String },
    Map(BTreeMap<String, String>),
}

/// Per-command scratch state owned by handlers.
#[derive(Debug, Clone, Default)]
pub struct PropertyBag {
    props: BTreeMap<String, Property>,
}

impl PropertyBag {
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.props.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Property) {
        self.props.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Property> {
        self.props.remove(key)
    }

    /// Insert `name → value` into the map stored under `key`, creating it when needed.
    pub fn insert_into_map(&mut self, key: &str, name: impl Into<String>, value: impl Into<String>) {
        let entry = self
            .props
            .entry(key.to_string())
            .or_insert_with(|| Property::Map(BTreeMap::new()));
        if !matches!(entry, Property::Map(_)) {
            *entry = Property::Map(BTreeMap::new());
        }
        if let Property::Map(map) = entry {
            map.insert(name.into(), value.into());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}
