//! Flow control actions.

use super::{ActionError, ActionResult, Context, arg};
use recipe::Action;
use std::thread;
use std::time::Duration;

const MIN_WAIT: f64 = 0.01;
const MAX_WAIT: f64 = 3600.0;

/// Sleep duration for a `wait` argument, clamped to a sane range.
pub(crate) fn wait_duration(raw: &str) -> Result<Duration, ActionError> {
    let secs: f64 = raw
        .parse()
        .ok()
        .filter(|s: &f64| !s.is_nan())
        .ok_or_else(|| ActionError::Usage(format!("wait: invalid duration {raw:?}")))?;
    Ok(Duration::from_secs_f64(secs.clamp(MIN_WAIT, MAX_WAIT)))
}

pub fn wait(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let duration = wait_duration(arg(action, 0))?;
    log::debug!("sleeping {duration:?}");
    thread::sleep(duration);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::ErrorKind;
    use super::super::testing::{Fixture, action};
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_wait_duration_is_clamped() {
        assert_eq!(wait_duration("0").unwrap(), Duration::from_millis(10));
        assert_eq!(wait_duration("-3").unwrap(), Duration::from_millis(10));
        assert_eq!(wait_duration("1.5").unwrap(), Duration::from_millis(1500));
        assert_eq!(wait_duration("99999").unwrap(), Duration::from_secs(3600));
        assert_eq!(wait_duration("inf").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_wait_rejects_garbage() {
        assert_eq!(wait_duration("soon").unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(wait_duration("NaN").unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_wait_sleeps() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let start = Instant::now();
        fixture.run(&action("wait", &["0.05"])).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
