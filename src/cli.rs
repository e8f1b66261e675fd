use crate::render::Format;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "verdict")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(
    about = "Black-box acceptance tests for command-line programs",
    long_about = None
)]
pub struct Cli {
    /// Recipe to run
    #[arg(required_unless_present = "list_actions")]
    pub recipe: Option<PathBuf>,

    /// Override the recipe working directory
    #[arg(short, long, value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Run only commands with these tags (repeatable, comma-separated)
    #[arg(short, long = "tag", value_name = "TAG", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<FormatArg>,

    /// Disable coloured output
    #[arg(short, long)]
    pub no_color: bool,

    /// Parse and validate the recipe without running it
    #[arg(short = 'D', long)]
    pub dry_run: bool,

    /// Print every known action and exit
    #[arg(short = 'L', long)]
    pub list_actions: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Terminal,
    Json,
    Quiet,
}

impl From<FormatArg> for Format {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Terminal => Self::Terminal,
            FormatArg::Json => Self::Json,
            FormatArg::Quiet => Self::Quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_full() {
        let cli = Cli::try_parse_from([
            "verdict", "-d", "/srv", "-t", "a,b", "--tag", "c", "-f", "json", "-n", "-vv",
            "run.rcp",
        ])
        .unwrap();
        assert_eq!(cli.recipe, Some(PathBuf::from("run.rcp")));
        assert_eq!(cli.dir, Some(PathBuf::from("/srv")));
        assert_eq!(cli.tags, vec!["a", "b", "c"]);
        assert!(matches!(cli.format, Some(FormatArg::Json)));
        assert!(cli.no_color);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_recipe_required_unless_listing() {
        assert!(Cli::try_parse_from(["verdict"]).is_err());
        let cli = Cli::try_parse_from(["verdict", "-L"]).unwrap();
        assert!(cli.list_actions);
        assert!(cli.recipe.is_none());
    }
}
