//! Renderer that keeps the event stream for inspection.

use super::Renderer;
use crate::action::ActionError;
use crate::engine::executor::ExecuteSummary;
use crate::engine::validator::ValidationError;
use recipe::{Action, Command, Recipe};
use std::time::Duration;

/// A recorded event. Commands are identified by title, actions by their
/// rendered form (`!exit 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    CommandStarted(String),
    CommandSkipped(String),
    ActionStarted(String),
    ActionDone(String),
    /// Action and failure message
    ActionFailed(String, String),
    CommandDone(String),
    CommandFailed(String),
    Result(ExecuteSummary),
    BailOut(Vec<String>),
}

#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub events: Vec<Event>,
}

impl RecordingRenderer {
    /// Failure messages in order.
    pub fn failures(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::ActionFailed(_, message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn start(&mut self, _recipe: &Recipe) {
        self.events.push(Event::Start);
    }

    fn command_started(&mut self, command: &Command) {
        self.events
            .push(Event::CommandStarted(command.title().to_string()));
    }

    fn command_skipped(&mut self, command: &Command) {
        self.events
            .push(Event::CommandSkipped(command.title().to_string()));
    }

    fn action_started(&mut self, action: &Action) {
        self.events.push(Event::ActionStarted(action.to_string()));
    }

    fn action_done(&mut self, action: &Action, _elapsed: Duration) {
        self.events.push(Event::ActionDone(action.to_string()));
    }

    fn action_failed(&mut self, action: &Action, error: &ActionError, _elapsed: Duration) {
        self.events.push(Event::ActionFailed(
            action.to_string(),
            error.message().to_string(),
        ));
    }

    fn command_done(&mut self, command: &Command) {
        self.events
            .push(Event::CommandDone(command.title().to_string()));
    }

    fn command_failed(&mut self, command: &Command, _reason: Option<&str>) {
        self.events
            .push(Event::CommandFailed(command.title().to_string()));
    }

    fn result(&mut self, summary: &ExecuteSummary) {
        self.events.push(Event::Result(*summary));
    }

    fn bail_out(&mut self, errors: &[ValidationError]) {
        self.events
            .push(Event::BailOut(errors.iter().map(ToString::to_string).collect()));
    }
}
