//! Table of every known action and global directive.

use super::{ActionResult, Context, control, fs, http, io, libs, process, service, users};
use recipe::Action;

/// Uniform handler signature.
pub type Handler = fn(&Action, &mut Context<'_>) -> ActionResult;

/// Registry entry.
#[derive(Debug)]
pub struct ActionSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// Upper bound on arguments, `None` for unbounded
    pub max_args: Option<usize>,
    /// Top-level directive rather than a per-command action
    pub global: bool,
    /// Accepts the `!` prefix
    pub allow_negative: bool,
    /// Absent for global directives
    pub handler: Option<Handler>,
}

impl ActionSpec {
    /// Check arity, negation and placement of `action`.
    pub fn check(&self, action: &Action) -> Result<(), String> {
        if self.global {
            return Err(format!(
                "{} is a global directive and cannot be used inside a command",
                self.name
            ));
        }

        let count = action.args.len();
        if count < self.min_args || self.max_args.is_some_and(|max| count > max) {
            return Err(format!(
                "{} takes {} arguments, got {count}",
                self.name,
                self.arity()
            ));
        }

        if action.negative && !self.allow_negative {
            return Err(format!("{} cannot be negated", self.name));
        }

        Ok(())
    }

    /// Human-readable argument range (`1`, `1-2`, `2+`).
    pub fn arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{}-{max}", self.min_args),
            None => format!("{}+", self.min_args),
        }
    }
}

const fn global(name: &'static str, min_args: usize, max_args: Option<usize>) -> ActionSpec {
    ActionSpec {
        name,
        min_args,
        max_args,
        global: true,
        allow_negative: false,
        handler: None,
    }
}

const fn action(name: &'static str, min_args: usize, max_args: usize, handler: Handler) -> ActionSpec {
    ActionSpec {
        name,
        min_args,
        max_args: Some(max_args),
        global: false,
        allow_negative: false,
        handler: Some(handler),
    }
}

const fn negatable(
    name: &'static str,
    min_args: usize,
    max_args: usize,
    handler: Handler,
) -> ActionSpec {
    ActionSpec {
        allow_negative: true,
        ..action(name, min_args, max_args, handler)
    }
}

pub static REGISTRY: &[ActionSpec] = &[
    // Global directives
    global("var", 2, None),
    global("command", 1, Some(2)),
    global("unsafe-actions", 1, Some(1)),
    global("require-root", 1, Some(1)),
    global("fast-finish", 1, Some(1)),
    global("lock-workdir", 1, Some(1)),
    global("unbuffer", 1, Some(1)),
    // `dir` at column 0 sets the working directory; indented, it is the
    // filesystem assertion below.
    global("pkg", 1, None),
    // Output
    action("expect", 1, 2, io::expect),
    action("wait-output", 1, 1, io::wait_output),
    negatable("output-match", 1, 1, io::output_match),
    negatable("output-contains", 1, 1, io::output_contains),
    negatable("output-empty", 0, 0, io::output_empty),
    negatable("output-length", 1, 1, io::output_length),
    action("output-trim", 0, 0, io::output_trim),
    action("input", 1, 1, io::input),
    // Processes and environment
    negatable("exit", 1, 2, process::exit),
    negatable("wait-pid", 1, 2, process::wait_pid),
    negatable("wait-fs", 1, 2, process::wait_fs),
    negatable("wait-connect", 2, 3, process::wait_connect),
    negatable("process-works", 1, 1, process::process_works),
    negatable("connect", 2, 2, process::connect),
    action("signal", 1, 2, process::signal),
    negatable("env", 2, 2, process::env),
    action("env-set", 2, 2, process::env_set),
    negatable("app", 1, 1, process::app),
    // Filesystem
    action("chdir", 1, 1, fs::chdir),
    action("copy", 2, 2, fs::copy),
    action("move", 2, 2, fs::move_path),
    action("touch", 1, 1, fs::touch),
    action("mkdir", 1, 1, fs::mkdir),
    action("remove", 1, 1, fs::remove),
    action("chmod", 2, 2, fs::chmod),
    action("template", 2, 3, fs::template),
    action("backup", 1, 1, fs::backup),
    action("backup-restore", 1, 1, fs::backup_restore),
    negatable("file-contains", 2, 2, fs::file_contains),
    negatable("checksum", 2, 2, fs::checksum),
    action("checksum-read", 2, 2, fs::checksum_read),
    negatable("mode", 2, 2, fs::mode),
    negatable("owner", 2, 2, fs::owner),
    negatable("exist", 1, 1, fs::exist),
    negatable("empty", 1, 1, fs::empty),
    negatable("empty-dir", 1, 1, fs::empty_dir),
    negatable("dir", 1, 1, fs::dir),
    negatable("readable", 2, 2, fs::readable),
    negatable("writable", 2, 2, fs::writable),
    negatable("executable", 2, 2, fs::executable),
    // Users and groups
    negatable("user-exist", 1, 1, users::user_exist),
    negatable("user-id", 2, 2, users::user_id),
    negatable("user-gid", 2, 2, users::user_gid),
    negatable("user-group", 2, 2, users::user_group),
    negatable("user-shell", 2, 2, users::user_shell),
    negatable("user-home", 2, 2, users::user_home),
    negatable("group-exist", 1, 1, users::group_exist),
    negatable("group-id", 2, 2, users::group_id),
    // Services
    negatable("service-present", 1, 1, service::service_present),
    negatable("service-enabled", 1, 1, service::service_enabled),
    negatable("service-works", 1, 1, service::service_works),
    negatable("wait-service", 1, 2, service::wait_service),
    // Libraries
    negatable("lib-loaded", 1, 1, libs::lib_loaded),
    negatable("lib-header", 1, 1, libs::lib_header),
    negatable("lib-config", 1, 1, libs::lib_config),
    negatable("lib-exist", 1, 1, libs::lib_exist),
    negatable("lib-linked", 2, 2, libs::lib_linked),
    negatable("python-module", 1, 1, libs::python_module),
    negatable("python3-module", 1, 1, libs::python3_module),
    // HTTP
    negatable("http-status", 3, 4, http::http_status),
    negatable("http-header", 4, 5, http::http_header),
    negatable("http-contains", 3, 4, http::http_contains),
    action("http-set-auth", 2, 2, http::http_set_auth),
    action("http-set-header", 2, 2, http::http_set_header),
    // Control
    action("wait", 1, 1, control::wait),
];

/// Registry entry for `name`.
pub fn lookup(name: &str) -> Option<&'static ActionSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn act(name: &str, args: usize) -> Action {
        Action::new(name, vec!["x".to_string(); args])
    }

    #[test]
    fn test_names_are_unique() {
        let mut seen = HashSet::new();
        for spec in REGISTRY {
            assert!(seen.insert(spec.name), "duplicate entry {}", spec.name);
        }
    }

    #[test]
    fn test_globals_have_no_handler() {
        for spec in REGISTRY {
            assert_eq!(spec.global, spec.handler.is_none(), "{}", spec.name);
        }
    }

    #[test]
    fn test_arity_check() {
        let expect = lookup("expect").unwrap();
        assert!(expect.check(&act("expect", 1)).is_ok());
        assert!(expect.check(&act("expect", 2)).is_ok());
        assert!(expect.check(&act("expect", 0)).is_err());
        assert!(expect.check(&act("expect", 3)).is_err());
        assert_eq!(expect.arity(), "1-2");
        assert_eq!(lookup("var").unwrap().arity(), "2+");
        assert_eq!(lookup("output-trim").unwrap().arity(), "0");
    }

    #[test]
    fn test_negation_check() {
        assert!(
            lookup("exit")
                .unwrap()
                .check(&act("exit", 1).negated())
                .is_ok()
        );
        let err = lookup("expect")
            .unwrap()
            .check(&act("expect", 1).negated())
            .unwrap_err();
        assert!(err.contains("cannot be negated"));
    }

    #[test]
    fn test_global_inside_command() {
        let err = lookup("var").unwrap().check(&act("var", 2)).unwrap_err();
        assert!(err.contains("global directive"));
    }
}
