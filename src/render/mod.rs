//! Event sinks for a recipe run.
//!
//! The executor reports every step to a [`Renderer`] in a fixed order:
//! `start`, then per command `command_started` or `command_skipped`, per
//! action `action_started` followed by `action_done` or `action_failed`,
//! then `command_done` or `command_failed`, and finally `result`. Setup
//! failures produce a single `bail_out` instead.
//!
//! Renderers only produce output; they never influence the run.

pub mod json;
pub mod quiet;
pub mod recording;
pub mod terminal;

use crate::action::ActionError;
use crate::engine::executor::ExecuteSummary;
use crate::engine::validator::ValidationError;
use recipe::{Action, Command, Recipe};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub use json::JsonRenderer;
pub use quiet::QuietRenderer;
pub use recording::RecordingRenderer;
pub use terminal::TerminalRenderer;

/// Receiver of executor events.
pub trait Renderer {
    fn start(&mut self, recipe: &Recipe);

    fn command_started(&mut self, command: &Command);

    /// Command filtered out by the tag selection
    fn command_skipped(&mut self, command: &Command);

    fn action_started(&mut self, action: &Action);

    fn action_done(&mut self, action: &Action, elapsed: Duration);

    fn action_failed(&mut self, action: &Action, error: &ActionError, elapsed: Duration);

    fn command_done(&mut self, command: &Command);

    /// `reason` is set when the command failed before any action ran
    fn command_failed(&mut self, command: &Command, reason: Option<&str>);

    fn result(&mut self, summary: &ExecuteSummary);

    /// Recipe rejected before anything ran
    fn bail_out(&mut self, errors: &[ValidationError]);
}

/// Output format selectable from the CLI or configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Terminal,
    Json,
    Quiet,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal => write!(f, "terminal"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" => Ok(Self::Terminal),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("unknown format: {s} (terminal, json, quiet)")),
        }
    }
}

/// Renderer for `format`.
pub fn for_format(format: Format, color: bool) -> Box<dyn Renderer> {
    match format {
        Format::Terminal => Box::new(TerminalRenderer::new(color)),
        Format::Json => Box::new(JsonRenderer::default()),
        Format::Quiet => Box::new(QuietRenderer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("TERMINAL".parse::<Format>().unwrap(), Format::Terminal);
        assert!("tap".parse::<Format>().is_err());
        assert_eq!(Format::Quiet.to_string(), "quiet");
    }
}
