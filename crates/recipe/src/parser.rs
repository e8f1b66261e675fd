//! Parser for the line-oriented recipe format.
//!
//! ```text
//! # comment
//! var name value
//! dir /srv/app
//! unsafe-actions no
//!
//! command:setup "user:nobody LANG=C app --serve" "Start the app"
//!   expect "Listening"
//!   !output-contains error
//!   exit 0
//! ```
//!
//! Global lines start at column 0; action lines are indented with two
//! spaces or a tab and belong to the most recent `command`.

use crate::error::{Error, Result};
use crate::types::{Action, Command, Recipe};
use crate::variables::is_valid_name;
use std::path::{Path, PathBuf};

/// Parse a recipe from a file path.
///
/// A missing `dir` directive defaults the working directory to the
/// directory holding the recipe; a relative `dir` is resolved against it.
pub fn parse_file(path: &Path) -> Result<Recipe> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let base = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut recipe = parse_string(&content)?;
    recipe.dir = if recipe.dir.as_os_str().is_empty() {
        base
    } else if recipe.dir.is_relative() {
        base.join(&recipe.dir)
    } else {
        recipe.dir
    };
    recipe.file = Some(path.to_path_buf());

    Ok(recipe)
}

/// Parse a recipe from a string.
///
/// The working directory is left empty unless the text sets `dir`.
pub fn parse_string(content: &str) -> Result<Recipe> {
    let mut recipe = Recipe::default();
    let mut current: Option<Command> = None;

    for (line_num, raw) in content.lines().enumerate() {
        let line_num = line_num + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if is_indented(raw) {
            let command = current
                .as_mut()
                .ok_or_else(|| Error::parse(line_num, "action outside of a command"))?;
            command.add_action(parse_action(trimmed, line_num)?);
            continue;
        }

        let tokens = tokenize(trimmed, line_num)?;
        let Some((keyword, args)) = tokens.split_first() else {
            continue;
        };

        if keyword == "command" || keyword.starts_with("command:") {
            if let Some(done) = current.take() {
                recipe.add_command(done);
            }
            current = Some(parse_command(keyword, args, line_num)?);
            continue;
        }

        parse_global(&mut recipe, keyword, args, line_num)?;
    }

    if let Some(done) = current.take() {
        recipe.add_command(done);
    }

    Ok(recipe)
}

fn is_indented(raw: &str) -> bool {
    raw.starts_with('\t') || raw.starts_with("  ")
}

fn parse_global(recipe: &mut Recipe, keyword: &str, args: &[String], line: usize) -> Result<()> {
    match keyword {
        "var" => {
            if args.len() < 2 {
                return Err(Error::parse(line, "var requires a name and a value"));
            }
            let name = &args[0];
            if !is_valid_name(name) {
                return Err(Error::parse(line, format!("invalid variable name {name:?}")));
            }
            if recipe.variables.contains(name) {
                return Err(Error::parse(line, format!("variable {name} is already defined")));
            }
            recipe
                .variables
                .declare(name, args[1..].join(" "))
                .map_err(|e| Error::parse(line, e.to_string()))
        }
        "dir" => {
            let path = single_arg(keyword, args, line)?;
            recipe.dir = PathBuf::from(path);
            Ok(())
        }
        "pkg" => {
            if args.is_empty() {
                return Err(Error::parse(line, "pkg requires at least one package name"));
            }
            recipe.packages.extend(args.iter().cloned());
            Ok(())
        }
        "unsafe-actions" => {
            recipe.unsafe_actions = parse_bool(single_arg(keyword, args, line)?, line)?;
            Ok(())
        }
        "require-root" => {
            // user-bound commands already forced this on
            recipe.require_root |= parse_bool(single_arg(keyword, args, line)?, line)?;
            Ok(())
        }
        "fast-finish" => {
            recipe.fast_finish = parse_bool(single_arg(keyword, args, line)?, line)?;
            Ok(())
        }
        "lock-workdir" => {
            recipe.lock_workdir = parse_bool(single_arg(keyword, args, line)?, line)?;
            Ok(())
        }
        "unbuffer" => {
            recipe.unbuffer = parse_bool(single_arg(keyword, args, line)?, line)?;
            Ok(())
        }
        other => Err(Error::parse(line, format!("unknown keyword {other:?}"))),
    }
}

fn single_arg<'a>(keyword: &str, args: &'a [String], line: usize) -> Result<&'a str> {
    match args {
        [value] => Ok(value),
        _ => Err(Error::parse(line, format!("{keyword} requires exactly one value"))),
    }
}

fn parse_bool(value: &str, line: usize) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        _ => Err(Error::parse(line, format!("invalid boolean value {value:?}"))),
    }
}

/// Parse `command[:tag] "<cmdline>" ["description"]`.
fn parse_command(keyword: &str, args: &[String], line: usize) -> Result<Command> {
    let tag = match keyword.split_once(':') {
        Some((_, "")) => return Err(Error::parse(line, "empty command tag")),
        Some((_, tag)) => Some(tag.to_string()),
        None => None,
    };

    let (cmdline, description) = match args {
        [cmdline] => (cmdline.trim(), None),
        [cmdline, description] => (cmdline.trim(), Some(description.clone())),
        _ => {
            return Err(Error::parse(
                line,
                "command requires a command line and an optional description",
            ));
        }
    };

    if cmdline.is_empty() {
        return Err(Error::parse(line, "empty command line"));
    }

    let mut command = Command {
        tag,
        description,
        line,
        ..Default::default()
    };

    let mut rest = cmdline;

    if let Some(stripped) = rest.strip_prefix("user:") {
        let (user, remainder) = stripped
            .split_once(char::is_whitespace)
            .unwrap_or((stripped, ""));
        if user.is_empty() {
            return Err(Error::parse(line, "empty user name in command"));
        }
        command.user = Some(user.to_string());
        rest = remainder.trim_start();
    }

    // Leading NAME=VALUE tokens form the environment overlay
    while let Some((token, remainder)) = split_first_word(rest) {
        match token.split_once('=') {
            Some((name, _)) if is_env_name(name) => {
                command.env.push(token.to_string());
                rest = remainder;
            }
            _ => break,
        }
    }

    if rest.is_empty() {
        return Err(Error::parse(line, "command line has no program"));
    }

    command.cmdline = rest.to_string();
    Ok(command)
}

fn split_first_word(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => Some((word, rest.trim_start())),
        None => Some((text, "")),
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `[!]<name> [arg…]`.
fn parse_action(text: &str, line: usize) -> Result<Action> {
    let tokens = tokenize(text, line)?;
    let Some((head, args)) = tokens.split_first() else {
        return Err(Error::parse(line, "empty action"));
    };

    let (name, negative) = match head.strip_prefix('!') {
        Some(name) => (name, true),
        None => (head.as_str(), false),
    };

    if name.is_empty() {
        return Err(Error::parse(line, "missing action name after '!'"));
    }

    Ok(Action {
        name: name.to_string(),
        args: args.to_vec(),
        negative,
        command: 0,
        line,
    })
}

/// Split a line into whitespace-separated tokens honouring double quotes.
fn tokenize(text: &str, line: usize) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();

        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some(escaped @ ('"' | '\\')) => token.push(escaped),
                        Some(other) => {
                            token.push('\\');
                            token.push(other);
                        }
                        None => token.push('\\'),
                    },
                    _ => token.push(c),
                }
            }
            if !closed {
                return Err(Error::parse(line, "unclosed quote"));
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
        }

        tokens.push(token);
    }

    Ok(tokens)
}
