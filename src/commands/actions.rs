//! `verdict --list-actions`: print the action registry.

use crate::action::{ActionSpec, REGISTRY};
use colored::Colorize;

fn name_width() -> usize {
    REGISTRY.iter().map(|s| s.name.len()).max().unwrap_or(0)
}

/// One line per registry entry, globals first.
pub fn lines() -> Vec<String> {
    let width = name_width();

    let (globals, actions): (Vec<&ActionSpec>, Vec<&ActionSpec>) =
        REGISTRY.iter().partition(|s| s.global);

    globals
        .into_iter()
        .chain(actions)
        .map(|spec| {
            let mut flags = Vec::new();
            if spec.global {
                flags.push("global");
            }
            if spec.allow_negative {
                flags.push("!");
            }
            format!(
                "{:<width$}  {:<5} {}",
                spec.name,
                spec.arity(),
                flags.join(" ")
            )
            .trim_end()
            .to_string()
        })
        .collect()
}

pub fn run() {
    let width = name_width();
    println!(
        "{}",
        format!("{:<width$}  {:<5} {}", "ACTION", "ARGS", "FLAGS").bold()
    );
    for line in lines() {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_cover_registry() {
        let lines = lines();
        assert_eq!(lines.len(), REGISTRY.len());
        assert!(lines[0].starts_with("var"));
        assert!(lines[0].ends_with("global"));

        let exit = lines.iter().find(|l| l.starts_with("exit ")).unwrap();
        assert!(exit.contains("1-2"));
        assert!(exit.ends_with('!'));

        let input = lines.iter().find(|l| l.starts_with("input ")).unwrap();
        assert!(!input.contains('!'));
    }
}
