//! Pre-run checks on a parsed recipe.
//!
//! Every problem is collected so a single run reports them all. The
//! working directory is made absolute as a side effect.

use crate::action::{ErrorKind, lookup};
use crate::engine::{privilege, safety};
use recipe::{Recipe, RuntimeSource, references};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;

/// Action that assigns a writable variable at run time.
const ASSIGNING_ACTION: &str = "checksum-read";

/// A problem that prevents the recipe from running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub kind: ErrorKind,
    /// Recipe line the problem was found on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationError {
    fn new(kind: ErrorKind, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Validate `recipe` for a run selecting `tags`.
pub fn validate(
    recipe: &mut Recipe,
    tags: &[String],
    runtime: &dyn RuntimeSource,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    check_workdir(recipe, &mut errors);
    check_privileges(recipe, &mut errors);
    check_actions(recipe, &mut errors);
    check_variables(recipe, runtime, &mut errors);
    check_tags(recipe, tags, &mut errors);

    errors
}

fn check_workdir(recipe: &mut Recipe, errors: &mut Vec<ValidationError>) {
    if recipe.dir.as_os_str().is_empty() {
        errors.push(ValidationError::new(
            ErrorKind::Usage,
            None,
            "recipe has no working directory",
        ));
        return;
    }

    let cwd = std::env::current_dir().unwrap_or_default();
    recipe.dir = safety::absolute(&recipe.dir, &cwd);

    if !recipe.dir.is_dir() {
        errors.push(ValidationError::new(
            ErrorKind::Environment,
            None,
            format!("working directory {} does not exist", recipe.dir.display()),
        ));
        return;
    }

    if let Err(e) = fs::read_dir(&recipe.dir) {
        errors.push(ValidationError::new(
            ErrorKind::Environment,
            None,
            format!("working directory {} is not readable: {e}", recipe.dir.display()),
        ));
    }
}

fn check_privileges(recipe: &Recipe, errors: &mut Vec<ValidationError>) {
    if recipe.require_root && !privilege::is_root() {
        errors.push(ValidationError::new(
            ErrorKind::Policy,
            None,
            "recipe requires root privileges",
        ));
    }
}

fn check_actions(recipe: &Recipe, errors: &mut Vec<ValidationError>) {
    for action in recipe.commands.iter().flat_map(|c| &c.actions) {
        let Some(spec) = lookup(&action.name) else {
            errors.push(ValidationError::new(
                ErrorKind::Usage,
                Some(action.line),
                format!("unknown action {}", action.name),
            ));
            continue;
        };

        if let Err(message) = spec.check(action) {
            errors.push(ValidationError::new(ErrorKind::Usage, Some(action.line), message));
            continue;
        }

        if action.name == ASSIGNING_ACTION {
            let target = &action.args[1];
            if recipe.variables.is_read_only(target) {
                errors.push(ValidationError::new(
                    ErrorKind::Usage,
                    Some(action.line),
                    format!("variable {target} is read-only"),
                ));
            } else if !recipe::variables::is_valid_name(target) {
                errors.push(ValidationError::new(
                    ErrorKind::Usage,
                    Some(action.line),
                    format!("invalid variable name {target:?}"),
                ));
            }
        }
    }
}

fn check_variables(
    recipe: &Recipe,
    runtime: &dyn RuntimeSource,
    errors: &mut Vec<ValidationError>,
) {
    let scope = recipe.variables.scope(runtime);
    let assigned: HashSet<&str> = recipe
        .commands
        .iter()
        .flat_map(|c| &c.actions)
        .filter(|a| a.name == ASSIGNING_ACTION)
        .filter_map(|a| a.args.get(1))
        .map(String::as_str)
        .collect();

    let mut report = |text: &str, line: Option<usize>| {
        for name in references(text) {
            if !scope.is_known(&name) && !assigned.contains(name.as_str()) {
                errors.push(ValidationError::new(
                    ErrorKind::Policy,
                    line,
                    format!("unknown variable {{{name}}}"),
                ));
            }
        }
    };

    for (_, variable) in recipe.variables.iter() {
        report(&variable.value, None);
    }

    for command in &recipe.commands {
        report(&command.cmdline, Some(command.line));
        if let Some(description) = &command.description {
            report(description, Some(command.line));
        }
        for entry in &command.env {
            report(entry, Some(command.line));
        }
        for action in &command.actions {
            for arg in &action.args {
                report(arg, Some(action.line));
            }
        }
    }
}

fn check_tags(recipe: &Recipe, tags: &[String], errors: &mut Vec<ValidationError>) {
    let known = recipe.tags();
    for tag in tags {
        if !known.contains(&tag.as_str()) {
            errors.push(ValidationError::new(
                ErrorKind::Usage,
                None,
                format!("tag {tag} matches no command"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recipe::{NoRuntime, parse_string};
    use tempfile::TempDir;

    fn parse(dir: &TempDir, text: &str) -> Recipe {
        let mut recipe = parse_string(text).unwrap();
        recipe.dir = dir.path().to_path_buf();
        recipe
    }

    #[test]
    fn test_valid_recipe() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(
            &dir,
            "var greeting hello\ncommand:greet \"echo {greeting}\"\n  expect {greeting}\n  exit 0\n",
        );
        let errors = validate(&mut recipe, &["greet".to_string()], &NoRuntime);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_collects_every_problem() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(
            &dir,
            "command \"echo hi\"\n  no-such-action\n  exit\n  !input text\n  var a b\n",
        );
        let errors = validate(&mut recipe, &[], &NoRuntime);
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().all(|e| e.kind == ErrorKind::Usage));
        assert_eq!(errors[0].line, Some(2));
        assert_eq!(errors[0].to_string(), "line 2: unknown action no-such-action");
        assert!(errors[2].message.contains("cannot be negated"));
        assert!(errors[3].message.contains("global directive"));
    }

    #[test]
    fn test_missing_workdir() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(&dir, "command \"echo hi\"\n");
        recipe.dir = dir.path().join("missing");
        let errors = validate(&mut recipe, &[], &NoRuntime);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Environment);
        assert!(errors[0].message.contains("missing"));

        recipe.dir = std::path::PathBuf::new();
        let errors = validate(&mut recipe, &[], &NoRuntime);
        assert_eq!(errors[0].kind, ErrorKind::Usage);
    }

    #[test]
    fn test_workdir_becomes_absolute() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(&dir, "command \"echo hi\"\n");
        recipe.dir = dir.path().join("sub/..");
        assert!(validate(&mut recipe, &[], &NoRuntime).is_empty());
        assert_eq!(recipe.dir, dir.path());
    }

    #[test]
    fn test_unknown_variables() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(
            &dir,
            "command \"echo {missing}\"\n  checksum-read f.txt sum\n  output-contains {sum}\n",
        );
        let errors = validate(&mut recipe, &[], &NoRuntime);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Policy);
        assert_eq!(errors[0].message, "unknown variable {missing}");
    }

    #[test]
    fn test_read_only_assignment() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(&dir, "var sum x\ncommand \"-\"\n  checksum-read f.txt sum\n");
        let errors = validate(&mut recipe, &[], &NoRuntime);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("read-only"));
    }

    #[test]
    fn test_unknown_tag() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(&dir, "command:setup \"-\"\n");
        let errors = validate(&mut recipe, &["deploy".to_string()], &NoRuntime);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "tag deploy matches no command");
    }

    #[test]
    fn test_require_root() {
        let dir = TempDir::new().unwrap();
        let mut recipe = parse(&dir, "require-root yes\ncommand \"-\"\n");
        let errors = validate(&mut recipe, &[], &NoRuntime);
        assert_eq!(errors.is_empty(), privilege::is_root());
    }
}
