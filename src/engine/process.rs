//! Child process lifecycle: spawn, capture, signal, reap.
//!
//! A started child is owned by a detached waiter thread that reaps it as
//! soon as it exits, so [`ProcessHandle::exit_code`] always reflects the
//! real state. Two reader threads drain stdout and stderr into a shared
//! [`OutputStore`] until EOF.

use crate::engine::output::{OutputStore, Stream};
use crate::engine::privilege;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use recipe::Command;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ChildStdin, ExitStatus, Stdio};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Time a child gets to exit after SIGTERM before SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Time readers get to hit EOF once the child is gone.
const READER_GRACE: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8192;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("empty command line")]
    EmptyCommandLine,

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("failed to allocate a pseudo-terminal: {0}")]
    Pty(#[from] nix::Error),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to start capture thread: {0}")]
    Thread(#[source] io::Error),
}

/// How a command is launched.
pub struct SpawnOptions<'a> {
    pub cwd: &'a Path,
    /// Session environment overlay, applied before the command's own
    pub env: &'a BTreeMap<String, String>,
    /// Attach stdout to a pseudo-terminal
    pub unbuffer: bool,
    /// Output buffer capacity per stream
    pub capacity: usize,
}

/// Argument vector for a command.
///
/// Commands with a user run through `runuser`; everything else is a plain
/// whitespace split with no shell evaluation.
pub fn argv(command: &Command) -> Result<Vec<String>, SpawnError> {
    if let Some(user) = command.user.as_deref() {
        if privilege::user(user).is_none() {
            return Err(SpawnError::UserNotFound(user.to_string()));
        }
        return Ok(privilege::runuser_argv(user, &command.cmdline));
    }

    let argv: Vec<String> = command
        .cmdline
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if argv.is_empty() {
        return Err(SpawnError::EmptyCommandLine);
    }
    Ok(argv)
}

#[derive(Default)]
struct ExitState {
    code: Mutex<Option<i32>>,
    exited: Condvar,
}

impl ExitState {
    fn set(&self, code: i32) {
        *self.code.lock().unwrap_or_else(PoisonError::into_inner) = Some(code);
        self.exited.notify_all();
    }

    fn get(&self) -> Option<i32> {
        *self.code.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self, timeout: Duration) -> Option<i32> {
        let guard = self.code.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .exited
            .wait_timeout_while(guard, timeout, |code| code.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Exit code with shell conventions: signalled children report 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// A running (or finished) child and its captured output.
pub struct ProcessHandle {
    pid: Pid,
    stdin: Option<ChildStdin>,
    output: Arc<OutputStore>,
    exit: Arc<ExitState>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn `command` and start capturing its output.
    pub fn start(command: &Command, options: &SpawnOptions<'_>) -> Result<Self, SpawnError> {
        let argv = argv(command)?;
        let (program, args) = argv.split_first().ok_or(SpawnError::EmptyCommandLine)?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .current_dir(options.cwd)
            .envs(options.env)
            .envs(command.env_pairs())
            .stdin(Stdio::piped())
            .stderr(Stdio::piped());

        let master = if options.unbuffer {
            let pty = nix::pty::openpty(None, None)?;
            disable_output_processing(&pty.slave)?;
            cmd.stdout(Stdio::from(pty.slave));
            Some(File::from(pty.master))
        } else {
            cmd.stdout(Stdio::piped());
            None
        };

        let mut child = cmd.spawn().map_err(|source| SpawnError::Spawn {
            program: program.clone(),
            source,
        })?;
        // Release our copy of the pty slave so the master sees EOF.
        drop(cmd);

        let pid = Pid::from_raw(child.id() as i32);
        log::debug!("spawned {argv:?} as pid {pid}");

        let output = Arc::new(OutputStore::new(options.capacity));
        let stdin = child.stdin.take();
        let stdout: Option<Box<dyn Read + Send>> = match master {
            Some(master) => Some(Box::new(master)),
            None => child
                .stdout
                .take()
                .map(|s| Box::new(s) as Box<dyn Read + Send>),
        };
        let stderr = child.stderr.take();

        let mut readers = Vec::with_capacity(2);
        let start_readers = || -> io::Result<()> {
            if let Some(stdout) = stdout {
                readers.push(spawn_reader(stdout, Stream::Stdout, &output)?);
            }
            if let Some(stderr) = stderr {
                readers.push(spawn_reader(Box::new(stderr), Stream::Stderr, &output)?);
            }
            Ok(())
        };

        if let Err(e) = start_readers() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SpawnError::Thread(e));
        }

        let exit = Arc::new(ExitState::default());
        let waiter_exit = Arc::clone(&exit);
        let waiter = thread::Builder::new()
            .name(format!("verdict-wait-{pid}"))
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => exit_code(status),
                    Err(e) => {
                        log::warn!("failed to wait for pid {pid}: {e}");
                        -1
                    }
                };
                log::debug!("pid {pid} exited with {code}");
                waiter_exit.set(code);
            });

        if let Err(e) = waiter {
            let _ = kill(pid, Signal::SIGKILL);
            return Err(SpawnError::Thread(e));
        }

        Ok(Self {
            pid,
            stdin,
            output,
            exit,
            readers,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn output(&self) -> &OutputStore {
        &self.output
    }

    /// Exit code if the child has been reaped.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.get()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Block until the child exits or `timeout` elapses.
    pub fn wait_exit(&self, timeout: Duration) -> Option<i32> {
        self.exit.wait(timeout)
    }

    /// Write `text` to the child's stdin.
    pub fn write_input(&mut self, text: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin is closed"))?;
        stdin.write_all(text.as_bytes())?;
        stdin.flush()
    }

    /// Send `signal` to the child.
    pub fn signal(&self, signal: Signal) -> nix::Result<()> {
        if self.has_exited() {
            return Err(nix::Error::ESRCH);
        }
        log::debug!("sending {signal} to pid {}", self.pid);
        kill(self.pid, signal)
    }

    /// Terminate the child if still running and drain its readers.
    pub fn stop(&mut self) {
        self.stdin.take();

        if !self.has_exited() {
            if let Err(e) = kill(self.pid, Signal::SIGTERM) {
                log::debug!("SIGTERM to pid {} failed: {e}", self.pid);
            }
            if self.wait_exit(STOP_GRACE).is_none() {
                if let Err(e) = kill(self.pid, Signal::SIGKILL) {
                    log::warn!("failed to kill pid {}: {e}", self.pid);
                }
                self.wait_exit(STOP_GRACE);
            }
        }

        let deadline = Instant::now() + READER_GRACE;
        for reader in self.readers.drain(..) {
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                log::debug!("reader for pid {} still open, detaching", self.pid);
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader(
    mut source: Box<dyn Read + Send>,
    stream: Stream,
    output: &Arc<OutputStore>,
) -> io::Result<JoinHandle<()>> {
    let output = Arc::clone(output);
    thread::Builder::new()
        .name(format!("verdict-{}", stream.as_str()))
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => output.write(stream, &buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    // A pty master reports EIO once the slave side closes.
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                    Err(e) => {
                        log::debug!("{} reader stopped: {e}", stream.as_str());
                        break;
                    }
                }
            }
        })
}

/// Keep `\n` as-is on the pty instead of translating it to `\r\n`.
fn disable_output_processing(slave: &std::os::fd::OwnedFd) -> nix::Result<()> {
    use nix::sys::termios::{OutputFlags, SetArg, tcgetattr, tcsetattr};

    let mut termios = tcgetattr(slave)?;
    termios.output_flags.remove(OutputFlags::OPOST);
    tcsetattr(slave, SetArg::TCSANOW, &termios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options<'a>(cwd: &'a Path, env: &'a BTreeMap<String, String>) -> SpawnOptions<'a> {
        SpawnOptions {
            cwd,
            env,
            unbuffer: false,
            capacity: 4096,
        }
    }

    fn wait_for_output(handle: &ProcessHandle, needle: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if handle.output().contains(needle) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_argv_whitespace_split() {
        let command = Command::new("  echo   hello  world ");
        assert_eq!(argv(&command).unwrap(), vec!["echo", "hello", "world"]);
        assert!(matches!(
            argv(&Command::new("   ")),
            Err(SpawnError::EmptyCommandLine)
        ));
    }

    #[test]
    fn test_argv_unknown_user() {
        let mut command = Command::new("id");
        command.user = Some("verdict-no-such-user".into());
        assert!(matches!(argv(&command), Err(SpawnError::UserNotFound(_))));
    }

    #[test]
    fn test_echo_is_captured_and_reaped() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let mut handle =
            ProcessHandle::start(&Command::new("echo hello"), &options(dir.path(), &env)).unwrap();

        assert_eq!(handle.wait_exit(Duration::from_secs(5)), Some(0));
        assert!(wait_for_output(&handle, "hello"));
        handle.stop();
        assert_eq!(handle.output().stdout(), b"hello\n");
    }

    #[test]
    fn test_stderr_is_captured() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("warn.sh"), "echo oops >&2\n").unwrap();
        let env = BTreeMap::new();
        let mut handle =
            ProcessHandle::start(&Command::new("sh warn.sh"), &options(dir.path(), &env)).unwrap();

        assert_eq!(handle.wait_exit(Duration::from_secs(5)), Some(0));
        assert!(wait_for_output(&handle, "oops"));
        handle.stop();
        assert!(handle.output().stdout().is_empty());
    }

    #[test]
    fn test_exit_code_reported() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let handle =
            ProcessHandle::start(&Command::new("false"), &options(dir.path(), &env)).unwrap();
        assert_eq!(handle.wait_exit(Duration::from_secs(5)), Some(1));
    }

    #[test]
    fn test_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let result = ProcessHandle::start(
            &Command::new("verdict-no-such-binary"),
            &options(dir.path(), &env),
        );
        assert!(matches!(result, Err(SpawnError::Spawn { .. })));
    }

    #[test]
    fn test_stdin_round_trip() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let mut handle =
            ProcessHandle::start(&Command::new("cat"), &options(dir.path(), &env)).unwrap();

        handle.write_input("ping\n").unwrap();
        assert!(wait_for_output(&handle, "ping"));
        handle.stop();
        assert!(handle.has_exited());
    }

    #[test]
    fn test_signal_terminates() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let handle =
            ProcessHandle::start(&Command::new("sleep 30"), &options(dir.path(), &env)).unwrap();

        handle.signal(Signal::SIGKILL).unwrap();
        assert_eq!(handle.wait_exit(Duration::from_secs(5)), Some(128 + 9));
        assert!(handle.signal(Signal::SIGTERM).is_err());
    }

    #[test]
    fn test_stop_kills_running_child() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let mut handle =
            ProcessHandle::start(&Command::new("sleep 30"), &options(dir.path(), &env)).unwrap();
        handle.stop();
        assert_eq!(handle.exit_code(), Some(128 + 15));
    }

    #[test]
    fn test_environment_overlay() {
        let dir = TempDir::new().unwrap();
        let mut env = BTreeMap::new();
        env.insert("VERDICT_SESSION".to_string(), "session".to_string());
        env.insert("VERDICT_SHARED".to_string(), "session".to_string());

        let mut command = Command::new("env");
        command.env = vec!["VERDICT_SHARED=command".into()];

        let mut handle = ProcessHandle::start(&command, &options(dir.path(), &env)).unwrap();
        handle.wait_exit(Duration::from_secs(5));
        handle.stop();

        let out = handle.output().string();
        assert!(out.contains("VERDICT_SESSION=session"));
        assert!(out.contains("VERDICT_SHARED=command"));
    }

    #[test]
    fn test_unbuffered_stdout_through_pty() {
        let dir = TempDir::new().unwrap();
        let env = BTreeMap::new();
        let mut opts = options(dir.path(), &env);
        opts.unbuffer = true;

        let mut handle = ProcessHandle::start(&Command::new("echo pty"), &opts).unwrap();
        assert!(wait_for_output(&handle, "pty\n"));
        handle.stop();
    }
}
