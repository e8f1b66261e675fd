//! Signal name table.
//!
//! Signals are accepted as `SIGTERM`, `TERM`, `term` or `15`.

use nix::sys::signal::Signal;

const SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("IOT", libc::SIGIOT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("SYS", libc::SIGSYS),
];

/// Resolve a signal by symbolic name or decimal number.
pub fn parse(spec: &str) -> Option<Signal> {
    let spec = spec.trim();

    if let Ok(number) = spec.parse::<i32>() {
        return Signal::try_from(number).ok();
    }

    let upper = spec.to_ascii_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);

    SIGNALS
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, number)| Signal::try_from(*number).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!(parse("SIGTERM"), Some(Signal::SIGTERM));
        assert_eq!(parse("TERM"), Some(Signal::SIGTERM));
        assert_eq!(parse("term"), Some(Signal::SIGTERM));
        assert_eq!(parse("sigusr1"), Some(Signal::SIGUSR1));
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse("15"), Some(Signal::SIGTERM));
        assert_eq!(parse("9"), Some(Signal::SIGKILL));
        assert_eq!(parse("0"), None);
        assert_eq!(parse("999"), None);
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(parse("SIGNOPE"), None);
        assert_eq!(parse(""), None);
    }
}
