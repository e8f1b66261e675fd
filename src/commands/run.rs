//! `verdict <RECIPE>`: validate and run a recipe.

use crate::Context;
use crate::config::Config;
use crate::engine::runtime::RuntimeVars;
use crate::engine::{ExecuteOptions, execute, validate};
use crate::render::{self, Format};
use crate::ui;
use anyhow::{Context as _, Result};
use recipe::Recipe;
use std::path::PathBuf;

/// Resolved options of a run.
pub struct RunArgs {
    pub recipe: PathBuf,
    pub dir: Option<PathBuf>,
    pub tags: Vec<String>,
    pub format: Option<Format>,
    pub no_color: bool,
    pub dry_run: bool,
}

/// Run the recipe, returning whether it passed.
pub fn run(ctx: &Context, args: RunArgs, config: &Config) -> Result<bool> {
    let mut recipe = recipe::parse_file(&args.recipe)
        .with_context(|| format!("Could not load recipe {}", args.recipe.display()))?;

    if let Some(dir) = args.dir {
        log::debug!("Overriding working directory with {}", dir.display());
        recipe.dir = dir;
    }

    let tags = if args.tags.is_empty() {
        default_tags(&recipe, &config.default_tags)
    } else {
        args.tags
    };
    let format = args.format.unwrap_or(config.format);
    let color = config.color && !args.no_color;
    let mut renderer = render::for_format(format, color);

    log::info!(
        "Loaded {}: {} commands, {} actions",
        args.recipe.display(),
        recipe.commands.len(),
        recipe.action_count()
    );

    if args.dry_run {
        let runtime = RuntimeVars::new(&recipe.dir);
        let errors = validate(&mut recipe, &tags, &runtime);
        if !errors.is_empty() {
            renderer.bail_out(&errors);
            return Ok(false);
        }
        if !ctx.quiet && format == Format::Terminal {
            ui::success(&format!(
                "{} is valid ({} commands, {} actions)",
                args.recipe.display(),
                recipe.commands.len(),
                recipe.action_count()
            ));
        }
        return Ok(true);
    }

    let options = ExecuteOptions {
        tags,
        capacity: config.output_buffer_size,
    };
    log::debug!(
        "Output buffer capacity: {}",
        ui::format_size(options.capacity as u64)
    );

    let summary = execute(&mut recipe, &options, renderer.as_mut());
    Ok(summary.is_success())
}

/// Configured default tags that select something in `recipe`.
///
/// Unlike tags given on the command line, a default that matches no
/// command is dropped instead of rejecting the recipe.
fn default_tags(recipe: &Recipe, defaults: &[String]) -> Vec<String> {
    let known = recipe.tags();
    defaults
        .iter()
        .filter(|tag| {
            let matched = known.contains(&tag.as_str());
            if !matched {
                log::debug!("Default tag {tag} matches no command, ignoring it");
            }
            matched
        })
        .cloned()
        .collect()
}
