//! Renderer that prints nothing; the exit code carries the outcome.

use super::Renderer;
use crate::action::ActionError;
use crate::engine::executor::ExecuteSummary;
use crate::engine::validator::ValidationError;
use recipe::{Action, Command, Recipe};
use std::time::Duration;

pub struct QuietRenderer;

impl Renderer for QuietRenderer {
    fn start(&mut self, _recipe: &Recipe) {}

    fn command_started(&mut self, _command: &Command) {}

    fn command_skipped(&mut self, _command: &Command) {}

    fn action_started(&mut self, _action: &Action) {}

    fn action_done(&mut self, _action: &Action, _elapsed: Duration) {}

    fn action_failed(&mut self, _action: &Action, _error: &ActionError, _elapsed: Duration) {}

    fn command_done(&mut self, _command: &Command) {}

    fn command_failed(&mut self, _command: &Command, _reason: Option<&str>) {}

    fn result(&mut self, _summary: &ExecuteSummary) {}

    fn bail_out(&mut self, _errors: &[ValidationError]) {}
}
