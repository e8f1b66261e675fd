use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use verdict::cli::Cli;
use verdict::commands::run::RunArgs;
use verdict::config::Config;
use verdict::{Context, commands, ui};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match dispatch(&ctx, cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn dispatch(ctx: &Context, cli: Cli) -> Result<bool> {
    if cli.list_actions {
        commands::actions::run();
        return Ok(true);
    }

    let Some(recipe) = cli.recipe else {
        anyhow::bail!("no recipe given");
    };

    let config = Config::load()?;
    let args = RunArgs {
        recipe,
        dir: cli.dir,
        tags: cli.tags,
        format: cli.format.map(Into::into),
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };
    commands::run::run(ctx, args, &config)
}
