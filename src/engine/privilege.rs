//! Privilege checks and user switching.
//!
//! The engine never escalates on its own. A recipe that needs root states
//! so up front and the run is refused otherwise; commands assigned to a
//! user are launched through `runuser`, which only root may call.

use nix::unistd::{Group, Uid, User};

/// Binary used to run a command as another user.
pub const RUNUSER: &str = "runuser";

/// Shell handed to `runuser -s`.
pub const RUNUSER_SHELL: &str = "/bin/bash";

/// Whether the engine runs with effective uid 0.
pub fn is_root() -> bool {
    Uid::effective().is_root()
}

/// Look up a user by name.
pub fn user(name: &str) -> Option<User> {
    User::from_name(name).ok().flatten()
}

/// Look up a group by name.
pub fn group(name: &str) -> Option<Group> {
    Group::from_name(name).ok().flatten()
}

/// Argument vector running `cmdline` as `user` through a login-less shell.
pub fn runuser_argv(user: &str, cmdline: &str) -> Vec<String> {
    vec![
        RUNUSER.to_string(),
        "-s".to_string(),
        RUNUSER_SHELL.to_string(),
        user.to_string(),
        "-c".to_string(),
        cmdline.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_user_exists() {
        let root = user("root").unwrap();
        assert!(root.uid.is_root());
        assert!(group("root").is_some());
    }

    #[test]
    fn test_missing_user() {
        assert!(user("verdict-no-such-user").is_none());
        assert!(group("verdict-no-such-group").is_none());
    }

    #[test]
    fn test_runuser_argv() {
        let argv = runuser_argv("nobody", "id -u");
        assert_eq!(
            argv,
            vec!["runuser", "-s", "/bin/bash", "nobody", "-c", "id -u"]
        );
    }
}
