//! Coloured line output with an optional spinner on the running action.

use super::Renderer;
use crate::action::ActionError;
use crate::engine::executor::ExecuteSummary;
use crate::engine::validator::ValidationError;
use crate::ui;
use colored::Colorize;
use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use recipe::{Action, Command, Recipe};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(100);

pub struct TerminalRenderer {
    /// Animate running actions
    animate: bool,
    spinner: Option<ProgressBar>,
}

impl TerminalRenderer {
    pub fn new(color: bool) -> Self {
        if !color {
            colored::control::set_override(false);
        }
        Self {
            animate: should_animate(),
            spinner: None,
        }
    }

    fn clear_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

/// Spinners only make sense on an interactive terminal outside CI.
fn should_animate() -> bool {
    std::env::var_os("CI").is_none() && Term::stdout().is_term()
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("  {spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(TICK);
    pb
}

fn location(line: usize) -> String {
    format!("line {line}")
}

impl Renderer for TerminalRenderer {
    fn start(&mut self, recipe: &Recipe) {
        let title = recipe.file.as_ref().map_or_else(
            || "recipe".to_string(),
            |file| file.display().to_string(),
        );
        ui::header(&title);
        ui::dim(&format!(
            "{} commands, {} actions in {}",
            recipe.commands.len(),
            recipe.action_count(),
            recipe.dir.display()
        ));
    }

    fn command_started(&mut self, command: &Command) {
        println!();
        let tag = command
            .tag
            .as_deref()
            .map(|t| format!(" [{t}]"))
            .unwrap_or_default();
        println!(
            "{} {}{} {}",
            "▶".cyan(),
            command.title().bold(),
            tag.cyan(),
            location(command.line).dimmed()
        );
    }

    fn command_skipped(&mut self, command: &Command) {
        println!();
        println!(
            "{} {} {}",
            "⊘".dimmed(),
            command.title().dimmed(),
            "(skipped)".dimmed()
        );
    }

    fn action_started(&mut self, action: &Action) {
        if self.animate {
            self.spinner = Some(spinner(action.to_string()));
        }
    }

    fn action_done(&mut self, action: &Action, elapsed: Duration) {
        self.clear_spinner();
        println!(
            "  {} {} {}",
            "✓".green(),
            action,
            ui::format_duration(elapsed).dimmed()
        );
    }

    fn action_failed(&mut self, action: &Action, error: &ActionError, elapsed: Duration) {
        self.clear_spinner();
        println!(
            "  {} {} {}",
            "✗".red(),
            action.to_string().red(),
            ui::format_duration(elapsed).dimmed()
        );
        println!(
            "      {} {} {}",
            format!("{}:", error.kind()).red().bold(),
            error.message(),
            location(action.line).dimmed()
        );
    }

    fn command_done(&mut self, _command: &Command) {}

    fn command_failed(&mut self, _command: &Command, reason: Option<&str>) {
        if let Some(reason) = reason {
            println!("  {} {}", "✗".red(), reason.red());
        }
    }

    fn result(&mut self, summary: &ExecuteSummary) {
        self.clear_spinner();
        println!();
        let line = format!(
            "{} passed, {} failed, {} skipped",
            summary.passes, summary.fails, summary.skips
        );
        if summary.is_success() {
            ui::success(&line);
        } else {
            ui::error(&line);
        }
    }

    fn bail_out(&mut self, errors: &[ValidationError]) {
        self.clear_spinner();
        ui::error("recipe cannot run:");
        for error in errors {
            eprintln!("    {} {}", format!("{}:", error.kind).red(), error);
        }
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        self.clear_spinner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_without_animation() {
        let mut renderer = TerminalRenderer::new(false);
        renderer.animate = false;
        let action = Action::new("exit", vec!["0".into()]);
        renderer.action_started(&action);
        assert!(renderer.spinner.is_none());
        renderer.action_done(&action, Duration::from_millis(3));
        renderer.result(&ExecuteSummary::default());
    }
}
