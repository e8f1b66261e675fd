//! One JSON document per run, printed when the run ends.

use super::Renderer;
use crate::action::{ActionError, ErrorKind};
use crate::engine::executor::ExecuteSummary;
use crate::engine::validator::ValidationError;
use chrono::{DateTime, Utc};
use recipe::{Action, Command, Recipe};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub line: usize,
    pub name: String,
    pub args: Vec<String>,
    pub negative: bool,
    pub status: Status,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub line: usize,
    pub cmdline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub actions: Vec<ActionReport>,
}

/// Everything a run reported.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub commands: Vec<CommandReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExecuteSummary>,
}

#[derive(Default)]
pub struct JsonRenderer {
    report: Report,
}

impl JsonRenderer {
    pub fn report(&self) -> &Report {
        &self.report
    }

    fn print(&self) {
        match serde_json::to_string_pretty(&self.report) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("failed to serialize report: {e}"),
        }
    }

    fn finish_action(&mut self, status: Status, elapsed: Duration, error: Option<ActionFailure>) {
        let action = self
            .report
            .commands
            .last_mut()
            .and_then(|c| c.actions.last_mut());
        if let Some(action) = action {
            action.status = status;
            action.elapsed_ms = elapsed.as_millis() as u64;
            action.error = error;
        }
    }

    fn finish_command(&mut self, status: Status, reason: Option<&str>) {
        if let Some(command) = self.report.commands.last_mut() {
            command.status = status;
            command.reason = reason.map(str::to_string);
        }
    }
}

fn command_report(command: &Command, status: Status) -> CommandReport {
    CommandReport {
        line: command.line,
        cmdline: command.cmdline.clone(),
        description: command.description.clone(),
        tag: command.tag.clone(),
        status,
        reason: None,
        actions: Vec::new(),
    }
}

impl Renderer for JsonRenderer {
    fn start(&mut self, recipe: &Recipe) {
        self.report.recipe = recipe.file.as_ref().map(|f| f.display().to_string());
        self.report.workdir = Some(recipe.dir.display().to_string());
        self.report.started_at = Some(Utc::now());
    }

    fn command_started(&mut self, command: &Command) {
        self.report
            .commands
            .push(command_report(command, Status::Running));
    }

    fn command_skipped(&mut self, command: &Command) {
        self.report
            .commands
            .push(command_report(command, Status::Skipped));
    }

    fn action_started(&mut self, action: &Action) {
        if let Some(command) = self.report.commands.last_mut() {
            command.actions.push(ActionReport {
                line: action.line,
                name: action.name.clone(),
                args: action.args.clone(),
                negative: action.negative,
                status: Status::Running,
                elapsed_ms: 0,
                error: None,
            });
        }
    }

    fn action_done(&mut self, _action: &Action, elapsed: Duration) {
        self.finish_action(Status::Passed, elapsed, None);
    }

    fn action_failed(&mut self, _action: &Action, error: &ActionError, elapsed: Duration) {
        let failure = ActionFailure {
            kind: error.kind(),
            message: error.message().to_string(),
        };
        self.finish_action(Status::Failed, elapsed, Some(failure));
    }

    fn command_done(&mut self, _command: &Command) {
        self.finish_command(Status::Passed, None);
    }

    fn command_failed(&mut self, _command: &Command, reason: Option<&str>) {
        self.finish_command(Status::Failed, reason);
    }

    fn result(&mut self, summary: &ExecuteSummary) {
        self.report.summary = Some(*summary);
        self.report.finished_at = Some(Utc::now());
        self.print();
    }

    fn bail_out(&mut self, errors: &[ValidationError]) {
        self.report.errors = errors.to_vec();
        self.report.summary = Some(ExecuteSummary {
            bailed_out: true,
            ..ExecuteSummary::default()
        });
        self.print();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_follows_events() {
        let mut renderer = JsonRenderer::default();
        let mut recipe = Recipe::new("/srv");
        let command = Command::new("echo hi");
        recipe.add_command(command.clone());

        let ok = Action::new("expect", vec!["hi".into()]).at_line(2);
        let bad = Action::new("exit", vec!["1".into()]);

        renderer.start(&recipe);
        renderer.command_started(&command);
        renderer.action_started(&ok);
        renderer.action_done(&ok, Duration::from_millis(12));
        renderer.action_started(&bad);
        renderer.action_failed(
            &bad,
            &ActionError::Assertion("exit code mismatch (0 ≠ 1)".into()),
            Duration::from_millis(3),
        );
        renderer.command_failed(&command, None);
        renderer.command_skipped(&Command::new("-"));
        renderer.result(&ExecuteSummary {
            passes: 1,
            fails: 1,
            ..ExecuteSummary::default()
        });

        let value = serde_json::to_value(renderer.report()).unwrap();
        assert_eq!(value["workdir"], "/srv");
        assert!(value["started_at"].is_string());
        assert!(value["finished_at"].is_string());
        assert_eq!(value["commands"][0]["status"], "failed");
        assert_eq!(value["commands"][0]["actions"][0]["status"], "passed");
        assert_eq!(value["commands"][0]["actions"][0]["elapsed_ms"], 12);
        assert_eq!(value["commands"][0]["actions"][0]["line"], 2);
        assert_eq!(value["commands"][0]["actions"][1]["error"]["kind"], "assertion");
        assert_eq!(value["commands"][1]["status"], "skipped");
        assert_eq!(value["summary"]["passes"], 1);
        assert!(value.get("errors").is_none());
    }

    #[test]
    fn test_bail_out_lists_errors() {
        let mut renderer = JsonRenderer::default();
        renderer.bail_out(&[ValidationError {
            kind: ErrorKind::Usage,
            line: Some(3),
            message: "unknown action bogus".into(),
        }]);
        let value = serde_json::to_value(renderer.report()).unwrap();
        assert_eq!(value["errors"][0]["line"], 3);
        assert_eq!(value["errors"][0]["kind"], "usage");
        assert_eq!(value["summary"]["bailed_out"], true);
    }
}
