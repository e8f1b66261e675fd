//! Process, network and environment assertions.

use super::{
    ActionError, ActionResult, Context, PROCESS_POLL, arg, expect_found, expect_state, poll,
    timeout_arg, timeout_error,
};
use crate::engine::signal as signals;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use recipe::Action;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const EXIT_TIMEOUT: f64 = 60.0;
const WAIT_TIMEOUT: f64 = 60.0;
const CONNECT_TIMEOUT: f64 = 15.0;
const DIAL_TIMEOUT: Duration = Duration::from_secs(1);
/// Shortest budget a single dial gets, so the probe at the deadline still
/// has a chance to connect.
const MIN_DIAL: Duration = Duration::from_millis(10);

/// PID stored in a pid file.
pub(crate) fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}

/// Whether a process with `pid` exists.
pub(crate) fn is_running(pid: i32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

fn pid_file_alive(path: &Path) -> bool {
    read_pid(path).is_some_and(is_running)
}

pub fn exit(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let raw = arg(action, 0);
    let expected: i32 = raw
        .parse()
        .map_err(|_| ActionError::Usage(format!("invalid exit code {raw:?}")))?;
    let (secs, timeout) = timeout_arg(action, 1, EXIT_TIMEOUT)?;

    let process = ctx.process(action)?;
    let actual = process.wait_exit(timeout).ok_or_else(|| {
        timeout_error(secs, format!("waiting for pid {} to exit", process.pid()))
    })?;

    expect_state(
        action,
        actual == expected,
        || format!("exit code mismatch ({actual} ≠ {expected})"),
        || format!("exit code is {expected}"),
    )
}

pub fn wait_pid(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let (secs, timeout) = timeout_arg(action, 1, WAIT_TIMEOUT)?;

    let want = !action.negative;
    if poll(timeout, PROCESS_POLL, || pid_file_alive(&path) == want) {
        return Ok(());
    }

    Err(if want {
        timeout_error(
            secs,
            format!("waiting for a running process in {}", path.display()),
        )
    } else {
        timeout_error(
            secs,
            format!("waiting for the process in {} to go away", path.display()),
        )
    })
}

pub fn wait_fs(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let (secs, timeout) = timeout_arg(action, 1, WAIT_TIMEOUT)?;

    let want = !action.negative;
    if poll(timeout, PROCESS_POLL, || {
        path.symlink_metadata().is_ok() == want
    }) {
        return Ok(());
    }

    let what = if want { "appear" } else { "disappear" };
    Err(timeout_error(
        secs,
        format!("waiting for {} to {what}", path.display()),
    ))
}

pub fn process_works(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let pid = read_pid(&path);

    expect_state(
        action,
        pid.is_some_and(is_running),
        || match pid {
            Some(pid) => format!("process {pid} from {} is not running", path.display()),
            None => format!("cannot read a pid from {}", path.display()),
        },
        || {
            format!(
                "process {} from {} is running",
                pid.unwrap_or_default(),
                path.display()
            )
        },
    )
}

/// Resolve `address`, giving up after `budget`.
fn resolve(address: &str, budget: Duration) -> Result<Vec<SocketAddr>, String> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(vec![addr]);
    }

    let (tx, rx) = mpsc::channel();
    let owned = address.to_string();
    thread::Builder::new()
        .name("verdict-resolve".to_string())
        .spawn(move || {
            let _ = tx.send(owned.to_socket_addrs().map(|addrs| addrs.collect::<Vec<_>>()));
        })
        .map_err(|e| e.to_string())?;

    match rx.recv_timeout(budget) {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("resolving {address} timed out")),
    }
}

/// Open and immediately close a connection, spending at most `budget`.
fn dial(
    ctx: &Context<'_>,
    network: &str,
    address: &str,
    budget: Duration,
) -> Result<Result<(), String>, ActionError> {
    let deadline = Instant::now() + budget;
    let inet = |want_v4: Option<bool>| -> Result<Vec<SocketAddr>, String> {
        let addrs: Vec<SocketAddr> = resolve(address, budget)?
            .into_iter()
            .filter(|a| want_v4.is_none_or(|v4| a.is_ipv4() == v4))
            .collect();
        if addrs.is_empty() {
            Err(format!("no usable address for {address}"))
        } else {
            Ok(addrs)
        }
    };

    let outcome = match network {
        "tcp" | "tcp4" | "tcp6" => {
            let family = match network {
                "tcp4" => Some(true),
                "tcp6" => Some(false),
                _ => None,
            };
            inet(family).and_then(|addrs| {
                let mut last = format!("timed out connecting to {address}");
                for addr in addrs {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match TcpStream::connect_timeout(&addr, remaining) {
                        Ok(_) => return Ok(()),
                        Err(e) => last = e.to_string(),
                    }
                }
                Err(last)
            })
        }
        "udp" | "udp4" | "udp6" => {
            let family = match network {
                "udp4" => Some(true),
                "udp6" => Some(false),
                _ => None,
            };
            inet(family).and_then(|addrs| {
                let addr = addrs[0];
                let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                UdpSocket::bind(local)
                    .and_then(|socket| socket.connect(addr))
                    .map_err(|e| e.to_string())
            })
        }
        "unix" => UnixStream::connect(ctx.path(address))
            .map(drop)
            .map_err(|e| e.to_string()),
        other => {
            return Err(ActionError::Usage(format!(
                "unsupported network {other:?} (tcp, tcp4, tcp6, udp, udp4, udp6, unix)"
            )));
        }
    };

    Ok(outcome)
}

pub fn connect(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let network = arg(action, 0);
    let address = arg(action, 1);
    let outcome = dial(ctx, network, address, DIAL_TIMEOUT)?;

    expect_state(
        action,
        outcome.is_ok(),
        || {
            format!(
                "cannot connect to {network} {address}: {}",
                outcome.as_ref().err().map_or("", String::as_str)
            )
        },
        || format!("connected to {network} {address}"),
    )
}

pub fn wait_connect(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let network = arg(action, 0);
    let address = arg(action, 1);
    let (secs, timeout) = timeout_arg(action, 2, CONNECT_TIMEOUT)?;

    let want = !action.negative;
    let mut failed = None;
    let deadline = Instant::now().checked_add(timeout);
    let reached = poll(timeout, PROCESS_POLL, || {
        let budget = deadline.map_or(DIAL_TIMEOUT, |d| {
            d.saturating_duration_since(Instant::now())
                .clamp(MIN_DIAL, DIAL_TIMEOUT)
        });
        match dial(ctx, network, address, budget) {
            Ok(outcome) => outcome.is_ok() == want,
            Err(e) => {
                failed = Some(e);
                true
            }
        }
    });

    if let Some(e) = failed {
        return Err(e);
    }
    if reached {
        return Ok(());
    }

    let what = if want {
        "waiting for a connection to"
    } else {
        "waiting for connections to be refused by"
    };
    Err(timeout_error(secs, format!("{what} {network} {address}")))
}

pub fn signal(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let spec = arg(action, 0);
    let sig = signals::parse(spec)
        .ok_or_else(|| ActionError::Usage(format!("unknown signal {spec:?}")))?;

    if let Some(file) = action.args.get(1) {
        let path = ctx.path(file);
        let pid = read_pid(&path).ok_or_else(|| {
            ActionError::Runtime(format!("cannot read a pid from {}", path.display()))
        })?;
        log::debug!("sending {sig} to pid {pid} from {}", path.display());
        return kill(Pid::from_raw(pid), sig)
            .map_err(|e| ActionError::Runtime(format!("failed to send {sig} to pid {pid}: {e}")));
    }

    let process = ctx.process(action)?;
    process.signal(sig).map_err(|e| {
        ActionError::Runtime(format!(
            "failed to send {sig} to pid {}: {e}",
            process.pid()
        ))
    })
}

pub fn env(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let expected = arg(action, 1);
    let actual = ctx
        .session
        .env_var(name)
        .map(|v| v.to_string_lossy().into_owned());

    expect_state(
        action,
        actual.as_deref() == Some(expected),
        || match &actual {
            Some(actual) => {
                format!("environment variable {name} mismatch ({actual:?} ≠ {expected:?})")
            }
            None => format!("environment variable {name} is not set"),
        },
        || format!("environment variable {name} is {expected:?}"),
    )
}

pub fn env_set(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    if name.is_empty() || name.contains('=') || name.contains('\0') {
        return Err(ActionError::Usage(format!(
            "invalid environment variable name {name:?}"
        )));
    }
    ctx.session
        .env
        .insert(name.to_string(), arg(action, 1).to_string());
    Ok(())
}

pub fn app(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let path = ctx.session.env_var("PATH");
    let found = which::which_in(name, path, &ctx.session.cwd);

    expect_found(
        action,
        found.is_ok(),
        || format!("application {name} not found in PATH"),
        || {
            format!(
                "application {name} found at {}",
                found
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::super::ErrorKind;
    use super::super::testing::{Fixture, action};
    use super::resolve;
    use std::net::{SocketAddr, TcpListener};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_exit_codes() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fixture.spawn("false");

        fixture.run(&action("exit", &["1"])).unwrap();
        fixture.run(&action("exit", &["0"]).negated()).unwrap();
        let err = fixture.run(&action("exit", &["0"])).unwrap_err();
        assert_eq!(err.message(), "exit code mismatch (1 ≠ 0)");
    }

    #[test]
    fn test_exit_timeout() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fixture.spawn("sleep 5");

        let err = fixture.run(&action("exit", &["0", "0.05"])).unwrap_err();
        assert!(err.message().starts_with("Timeout (0.05 sec) reached"));
    }

    #[test]
    fn test_signal_current_child() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fixture.spawn("sleep 30");

        fixture.run(&action("signal", &["TERM"])).unwrap();
        fixture.run(&action("exit", &["143", "5"])).unwrap();

        let err = fixture.run(&action("signal", &["BOGUS"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_signal_without_child_or_pidfile() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let err = fixture.run(&action("signal", &["TERM"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_wait_pid_and_process_works() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        std::fs::write(dir.path().join("self.pid"), std::process::id().to_string()).unwrap();

        fixture.run(&action("wait-pid", &["self.pid", "1"])).unwrap();
        fixture.run(&action("process-works", &["self.pid"])).unwrap();

        std::fs::remove_file(dir.path().join("self.pid")).unwrap();
        fixture
            .run(&action("wait-pid", &["self.pid", "1"]).negated())
            .unwrap();
        let err = fixture.run(&action("process-works", &["self.pid"])).unwrap_err();
        assert!(err.message().contains("cannot read a pid"));
    }

    #[test]
    fn test_wait_fs_sees_late_file() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let target = dir.path().join("late.txt");
        let writer = {
            let target = target.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                std::fs::write(target, "x").unwrap();
            })
        };

        fixture.run(&action("wait-fs", &["late.txt", "5"])).unwrap();
        writer.join().unwrap();

        let err = fixture
            .run(&action("wait-fs", &["late.txt", "0.05"]).negated())
            .unwrap_err();
        assert!(err.message().contains("to disappear"));
    }

    #[test]
    fn test_connect_tcp() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap().to_string();

        fixture.run(&action("connect", &["tcp", &open])).unwrap();
        fixture.run(&action("wait-connect", &["tcp4", &open, "1"])).unwrap();

        drop(listener);
        fixture
            .run(&action("connect", &["tcp", &open]).negated())
            .unwrap();

        let err = fixture.run(&action("connect", &["sctp", &open])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_wait_connect_respects_timeout() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let closed = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();

        for target in [closed.as_str(), "10.255.255.1:9"] {
            let start = Instant::now();
            let err = fixture
                .run(&action("wait-connect", &["tcp", target, "0.2"]))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Assertion, "{target}");
            assert!(
                start.elapsed() < Duration::from_millis(200 + 2 * 25 + 100),
                "{target} took {:?}",
                start.elapsed()
            );
        }
    }

    #[test]
    fn test_resolve_literal_and_timeout() {
        let addrs = resolve("127.0.0.1:80", Duration::ZERO).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:80".parse::<SocketAddr>().unwrap()]);
        assert!(resolve("not an address", Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_env_overlay() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());

        fixture
            .run(&action("env", &["VERDICT_TEST_VALUE", "x"]).negated())
            .unwrap();
        fixture
            .run(&action("env-set", &["VERDICT_TEST_VALUE", "x"]))
            .unwrap();
        fixture
            .run(&action("env", &["VERDICT_TEST_VALUE", "x"]))
            .unwrap();
        assert!(std::env::var_os("VERDICT_TEST_VALUE").is_none());

        let err = fixture.run(&action("env-set", &["A=B", "x"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_app_lookup() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fixture.run(&action("app", &["sh"])).unwrap();

        let err = fixture
            .run(&action("app", &["verdict-no-such-app"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Environment);
        fixture
            .run(&action("app", &["verdict-no-such-app"]).negated())
            .unwrap();
    }
}
