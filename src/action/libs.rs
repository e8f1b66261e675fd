//! Shared library, header, pkg-config and Python module checks.

use super::{ActionError, ActionResult, Context, arg, expect_found};
use crate::runner;
use glob::Pattern;
use recipe::Action;
use std::path::{Path, PathBuf};

const INCLUDE_DIRS: &[&str] = &["/usr/include", "/usr/local/include"];

const LIB_DIRS: &[&str] = &[
    "/lib",
    "/lib64",
    "/usr/lib",
    "/usr/lib64",
    "/usr/local/lib",
    "/usr/local/lib64",
];

const LDCONFIG: &[&str] = &["ldconfig", "/sbin/ldconfig", "/usr/sbin/ldconfig"];

fn pattern(action: &Action, raw: &str) -> Result<Pattern, ActionError> {
    Pattern::new(raw)
        .map_err(|e| ActionError::Usage(format!("{}: invalid pattern {raw:?}: {e}", action.name)))
}

fn tool(name: &str, candidates: &[&'static str]) -> Result<&'static str, ActionError> {
    runner::find_command(candidates)
        .ok_or_else(|| ActionError::Environment(format!("{name} not found")))
}

/// Library names from `ldconfig -p` output.
pub(crate) fn parse_ldconfig(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("=>"))
        .filter_map(|line| line.trim_start().split(" (").next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// `NEEDED` entries from `readelf -d` output.
pub(crate) fn parse_readelf(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("Shared library:"))
        .filter_map(|line| {
            let start = line.find('[')?;
            let end = line[start..].find(']')?;
            Some(line[start + 1..start + end].to_string())
        })
        .collect()
}

/// Library directories, multiarch ones included.
fn lib_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = LIB_DIRS.iter().map(PathBuf::from).collect();
    for multiarch in ["/lib/*-linux-gnu*", "/usr/lib/*-linux-gnu*"] {
        if let Ok(paths) = glob::glob(multiarch) {
            dirs.extend(paths.flatten().filter(|p| p.is_dir()));
        }
    }
    dirs
}

pub fn lib_loaded(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let raw = arg(action, 0);
    let pattern = pattern(action, raw)?;
    let ldconfig = tool("ldconfig", LDCONFIG)?;
    let output = runner::run_capture(ldconfig, &["-p"])
        .map_err(|e| ActionError::Runtime(format!("cannot list loaded libraries: {e:#}")))?;

    let found = parse_ldconfig(&output)
        .iter()
        .any(|name| pattern.matches(name));

    expect_found(
        action,
        found,
        || format!("no library matching {raw:?} is in the linker cache"),
        || format!("a library matching {raw:?} is in the linker cache"),
    )
}

pub fn lib_header(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let found = INCLUDE_DIRS.iter().find_map(|dir| {
        let base = Path::new(dir).join(name);
        let header = Path::new(dir).join(format!("{name}.h"));
        [base, header].into_iter().find(|p| p.exists())
    });

    expect_found(
        action,
        found.is_some(),
        || format!("header {name} not found"),
        || {
            format!(
                "header {name} found at {}",
                found.as_deref().unwrap_or(Path::new("")).display()
            )
        },
    )
}

pub fn lib_config(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let found = lib_dirs()
        .into_iter()
        .map(|dir| dir.join("pkgconfig").join(format!("{name}.pc")))
        .find(|p| p.is_file());

    expect_found(
        action,
        found.is_some(),
        || format!("pkg-config file for {name} not found"),
        || {
            format!(
                "pkg-config file for {name} found at {}",
                found.as_deref().unwrap_or(Path::new("")).display()
            )
        },
    )
}

pub fn lib_exist(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let found = lib_dirs()
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|p| p.exists());

    expect_found(
        action,
        found.is_some(),
        || format!("library {name} not found"),
        || {
            format!(
                "library {name} found at {}",
                found.as_deref().unwrap_or(Path::new("")).display()
            )
        },
    )
}

pub fn lib_linked(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let binary = arg(action, 0);
    let raw = arg(action, 1);
    let pattern = pattern(action, raw)?;

    let local = ctx.path(binary);
    let path = if local.is_file() {
        local
    } else {
        which::which_in(binary, ctx.session.env_var("PATH"), &ctx.session.cwd).map_err(|_| {
            ActionError::Environment(format!("binary {binary} not found"))
        })?
    };

    let readelf = tool("readelf", &["readelf"])?;
    let path_arg = path.to_string_lossy();
    let output = runner::run_capture(readelf, &["-d", &path_arg]).map_err(|e| {
        ActionError::Runtime(format!("cannot read dynamic section of {path_arg}: {e:#}"))
    })?;

    let linked = parse_readelf(&output)
        .iter()
        .any(|name| pattern.matches(name));

    super::expect_state(
        action,
        linked,
        || format!("{path_arg} is not linked with {raw:?}"),
        || format!("{path_arg} is linked with {raw:?}"),
    )
}

fn python_module_check(action: &Action, python: &str) -> ActionResult {
    let module = arg(action, 0);
    if module.is_empty()
        || !module
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return Err(ActionError::Usage(format!("invalid module name {module:?}")));
    }
    if !runner::command_exists(python) {
        return Err(ActionError::Environment(format!("{python} not found")));
    }

    let import = format!("import {module}");
    expect_found(
        action,
        runner::run_quiet(python, &["-c", &import]),
        || format!("{python} module {module} cannot be imported"),
        || format!("{python} module {module} is importable"),
    )
}

pub fn python_module(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    python_module_check(action, "python")
}

pub fn python3_module(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    python_module_check(action, "python3")
}

#[cfg(test)]
mod tests {
    use super::super::ErrorKind;
    use super::super::testing::{Fixture, action};
    use super::*;
    use tempfile::TempDir;

    const LDCONFIG_OUTPUT: &str = "\
1234 libs found in cache `/etc/ld.so.cache'
\tlibz.so.1 (libc6,x86-64) => /lib/x86_64-linux-gnu/libz.so.1
\tlibc.so.6 (libc6,x86-64, OS ABI: Linux 3.2.0) => /lib/x86_64-linux-gnu/libc.so.6
";

    const READELF_OUTPUT: &str = "
Dynamic section at offset 0x2dd8 contains 27 entries:
  Tag        Type                         Name/Value
 0x0000000000000001 (NEEDED)             Shared library: [libz.so.1]
 0x0000000000000001 (NEEDED)             Shared library: [libc.so.6]
 0x000000000000000c (INIT)               0x1000
";

    #[test]
    fn test_parse_ldconfig() {
        assert_eq!(parse_ldconfig(LDCONFIG_OUTPUT), vec!["libz.so.1", "libc.so.6"]);
    }

    #[test]
    fn test_parse_readelf() {
        let libs = parse_readelf(READELF_OUTPUT);
        assert_eq!(libs, vec!["libz.so.1", "libc.so.6"]);
        let pattern = Pattern::new("libz.so*").unwrap();
        assert!(libs.iter().any(|l| pattern.matches(l)));
    }

    #[test]
    fn test_missing_header() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let err = fixture
            .run(&action("lib-header", &["verdict-no-such-header"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Environment);
        fixture
            .run(&action("lib-config", &["verdict-no-such-lib"]).negated())
            .unwrap();
        fixture
            .run(&action("lib-exist", &["libverdict-none.so"]).negated())
            .unwrap();
    }

    #[test]
    fn test_invalid_patterns_and_modules() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let err = fixture.run(&action("lib-loaded", &["[oops"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = fixture
            .run(&action("python3-module", &["os; import sys"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
