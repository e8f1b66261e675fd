//! Executor loop: validate, then run every command and its actions in order.

use crate::action::{self, Context};
use crate::engine::output::DEFAULT_CAPACITY;
use crate::engine::process::{ProcessHandle, SpawnOptions};
use crate::engine::runtime::RuntimeVars;
use crate::engine::session::Session;
use crate::engine::validator;
use crate::render::Renderer;
use recipe::{Action, Command, Recipe, Scope};
use serde::Serialize;
use std::time::Instant;

/// Options for a recipe run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Run only commands carrying one of these tags (and untagged ones)
    pub tags: Vec<String>,
    /// Output buffer capacity per stream
    pub capacity: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Action counts of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecuteSummary {
    pub passes: usize,
    pub fails: usize,
    pub skips: usize,
    /// Setup failed and nothing ran
    pub bailed_out: bool,
}

impl ExecuteSummary {
    pub fn is_success(&self) -> bool {
        !self.bailed_out && self.fails == 0
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandOutcome {
    Passed,
    Failed,
    Skipped,
}

/// Whether `command` is selected by the tag filter.
///
/// An empty filter selects everything; untagged commands always run.
pub fn is_selected(command: &Command, tags: &[String]) -> bool {
    match command.tag.as_deref() {
        Some(tag) if !tags.is_empty() => tags.iter().any(|t| t == tag),
        _ => true,
    }
}

/// Validate and run `recipe`, reporting every event to `renderer`.
pub fn execute(
    recipe: &mut Recipe,
    options: &ExecuteOptions,
    renderer: &mut dyn Renderer,
) -> ExecuteSummary {
    let errors = {
        let runtime = RuntimeVars::new(&recipe.dir);
        validator::validate(recipe, &options.tags, &runtime)
    };
    if !errors.is_empty() {
        renderer.bail_out(&errors);
        return ExecuteSummary {
            bailed_out: true,
            ..ExecuteSummary::default()
        };
    }

    let runtime = RuntimeVars::new(&recipe.dir);
    let mut session = Session::new(recipe).with_capacity(options.capacity);
    let mut summary = ExecuteSummary::default();

    renderer.start(recipe);

    for index in 0..recipe.commands.len() {
        if recipe.lock_workdir {
            session.reset_cwd();
        }

        let outcome = run_command(
            recipe,
            index,
            &options.tags,
            &mut session,
            &runtime,
            renderer,
            &mut summary,
        );

        if outcome == CommandOutcome::Failed && recipe.fast_finish {
            let remaining: usize = recipe.commands[index + 1..]
                .iter()
                .map(|c| c.actions.len())
                .sum();
            summary.skips += remaining;
            log::debug!("fast-finish: stopping after command {}", index + 1);
            break;
        }
    }

    if let Err(e) = session.cleanup() {
        log::warn!("failed to remove temporary directory: {e}");
    }

    renderer.result(&summary);
    summary
}

fn run_command(
    recipe: &mut Recipe,
    index: usize,
    tags: &[String],
    session: &mut Session,
    runtime: &RuntimeVars,
    renderer: &mut dyn Renderer,
    summary: &mut ExecuteSummary,
) -> CommandOutcome {
    let Recipe {
        variables,
        commands,
        ..
    } = recipe;
    let command = &mut commands[index];

    let shown = expand_command(command, &variables.scope(runtime));

    if !is_selected(command, tags) {
        summary.skips += command.actions.len();
        renderer.command_skipped(&shown);
        return CommandOutcome::Skipped;
    }

    renderer.command_started(&shown);

    let mut process = None;
    if !shown.is_hollow() {
        let options = SpawnOptions {
            cwd: &session.cwd,
            env: &session.env,
            unbuffer: session.unbuffer,
            capacity: session.capacity,
        };
        match ProcessHandle::start(&shown, &options) {
            Ok(handle) => process = Some(handle),
            Err(e) => {
                summary.fails += 1;
                summary.skips += command.actions.len();
                renderer.command_failed(&shown, Some(&e.to_string()));
                return CommandOutcome::Failed;
            }
        }
    }

    let mut failed = false;
    {
        let Command { actions, props, .. } = &mut *command;
        for (position, template) in actions.iter().enumerate() {
            let action = expand_action(template, &variables.scope(runtime));
            renderer.action_started(&action);
            let started = Instant::now();

            let mut ctx = Context {
                session: &mut *session,
                variables: &mut *variables,
                props: &mut *props,
                process: process.as_mut(),
                runtime,
            };
            let result = action::run(&action, &mut ctx);
            let elapsed = started.elapsed();

            match result {
                Ok(()) => {
                    summary.passes += 1;
                    renderer.action_done(&action, elapsed);
                }
                Err(e) => {
                    log::debug!("line {}: {} failed: {e}", action.line, action.name);
                    summary.fails += 1;
                    summary.skips += actions.len() - position - 1;
                    renderer.action_failed(&action, &e, elapsed);
                    failed = true;
                    break;
                }
            }
        }
    }

    if let Some(mut handle) = process.take() {
        handle.stop();
    }

    if failed {
        renderer.command_failed(&shown, None);
        CommandOutcome::Failed
    } else {
        renderer.command_done(&shown);
        CommandOutcome::Passed
    }
}

/// Copy of `command` with variables expanded, as it is run and shown.
fn expand_command(command: &Command, scope: &Scope<'_>) -> Command {
    Command {
        index: command.index,
        cmdline: scope.expand(&command.cmdline),
        user: command.user.clone(),
        tag: command.tag.clone(),
        description: command.description.as_deref().map(|d| scope.expand(d)),
        env: command.env.iter().map(|e| scope.expand(e)).collect(),
        actions: Vec::new(),
        line: command.line,
        props: Default::default(),
    }
}

fn expand_action(action: &Action, scope: &Scope<'_>) -> Action {
    Action {
        args: action.args.iter().map(|a| scope.expand(a)).collect(),
        ..action.clone()
    }
}
