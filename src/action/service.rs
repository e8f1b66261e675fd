//! Service assertions through the host init system.

use super::{
    ActionError, ActionResult, Context, SERVICE_POLL, arg, expect_found, expect_state, poll,
    timeout_arg, timeout_error,
};
use initsys::Client;
use recipe::Action;

const WAIT_SERVICE_TIMEOUT: f64 = 15.0;

fn client() -> Result<Client, ActionError> {
    Client::new().map_err(|e| ActionError::Environment(e.to_string()))
}

fn query_error(name: &str, err: initsys::Error) -> ActionError {
    match err {
        initsys::Error::InvalidName(_) => ActionError::Usage(err.to_string()),
        other => ActionError::Runtime(format!("cannot query service {name}: {other}")),
    }
}

fn present(action: &Action, client: &Client) -> ActionResult {
    let name = arg(action, 0);
    let found = client.is_present(name).map_err(|e| query_error(name, e))?;
    expect_found(
        action,
        found,
        || format!("service {name} is not present ({})", client.init_system()),
        || format!("service {name} is present ({})", client.init_system()),
    )
}

fn enabled(action: &Action, client: &Client) -> ActionResult {
    let name = arg(action, 0);
    let enabled = client.is_enabled(name).map_err(|e| query_error(name, e))?;
    expect_state(
        action,
        enabled,
        || format!("service {name} is not enabled"),
        || format!("service {name} is enabled"),
    )
}

fn working(action: &Action, client: &Client) -> ActionResult {
    let name = arg(action, 0);
    let working = client.is_working(name).map_err(|e| query_error(name, e))?;
    expect_state(
        action,
        working,
        || format!("service {name} is not running"),
        || format!("service {name} is running"),
    )
}

fn wait(action: &Action, client: &Client) -> ActionResult {
    let name = arg(action, 0);
    let (secs, timeout) = timeout_arg(action, 1, WAIT_SERVICE_TIMEOUT)?;
    let want = !action.negative;

    let mut failure = None;
    let reached = poll(timeout, SERVICE_POLL, || match client.is_working(name) {
        Ok(working) => working == want,
        Err(e) => {
            failure = Some(query_error(name, e));
            true
        }
    });

    if let Some(e) = failure {
        return Err(e);
    }
    if reached {
        return Ok(());
    }

    let what = if want { "start" } else { "stop" };
    Err(timeout_error(
        secs,
        format!("waiting for service {name} to {what}"),
    ))
}

pub fn service_present(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    present(action, &client()?)
}

pub fn service_enabled(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    enabled(action, &client()?)
}

pub fn service_works(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    working(action, &client()?)
}

pub fn wait_service(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    wait(action, &client()?)
}

#[cfg(test)]
mod tests {
    use super::super::ErrorKind;
    use super::super::testing::action;
    use super::*;
    use initsys::{Backend, InitSystem};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// `sshd` is present, enabled and starts working on the third query.
    struct FakeBackend {
        queries: AtomicUsize,
    }

    impl Backend for FakeBackend {
        fn init_system(&self) -> InitSystem {
            InitSystem::Systemd
        }

        fn is_present(&self, name: &str) -> initsys::Result<bool> {
            Ok(name == "sshd")
        }

        fn is_enabled(&self, name: &str) -> initsys::Result<bool> {
            Ok(name == "sshd")
        }

        fn is_working(&self, name: &str) -> initsys::Result<bool> {
            let n = self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(name == "sshd" && n >= 2)
        }
    }

    fn fake() -> Client {
        Client::with_backend(Box::new(FakeBackend {
            queries: AtomicUsize::new(0),
        }))
    }

    #[test]
    fn test_present_and_enabled() {
        let client = fake();
        present(&action("service-present", &["sshd"]), &client).unwrap();
        enabled(&action("service-enabled", &["sshd"]), &client).unwrap();

        let err = present(&action("service-present", &["cups"]), &client).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Environment);
        assert!(err.message().contains("cups"));
        present(&action("service-present", &["cups"]).negated(), &client).unwrap();
    }

    #[test]
    fn test_wait_service_polls() {
        let client = fake();
        let err = working(&action("service-works", &["sshd"]), &client).unwrap_err();
        assert_eq!(err.message(), "service sshd is not running");
        wait(&action("wait-service", &["sshd", "5"]), &client).unwrap();
    }

    #[test]
    fn test_wait_service_timeout() {
        let client = fake();
        let err = wait(&action("wait-service", &["cups", "0.1"]), &client).unwrap_err();
        assert!(err.message().starts_with("Timeout (0.1 sec) reached"));
    }

    #[test]
    fn test_invalid_name_is_usage() {
        let client = fake();
        let err = enabled(&action("service-enabled", &["a/b"]), &client).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
