//! Assertions over the child's captured output and its stdin.

use super::{
    ActionError, ActionResult, Context, IO_POLL, arg, expect_state, poll, timeout_arg,
    timeout_error,
};
use recipe::Action;
use regex::Regex;

const EXPECT_TIMEOUT: f64 = 5.0;

pub fn expect(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let needle = arg(action, 0);
    let (secs, timeout) = timeout_arg(action, 1, EXPECT_TIMEOUT)?;
    let output = ctx.process(action)?.output();

    let found = poll(timeout, IO_POLL, || output.contains(needle));
    output.request_clear();

    if found {
        Ok(())
    } else {
        Err(timeout_error(secs, format!("waiting for {needle:?}")))
    }
}

pub fn wait_output(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let (secs, timeout) = timeout_arg(action, 0, EXPECT_TIMEOUT)?;
    let output = ctx.process(action)?.output();

    if poll(timeout, IO_POLL, || output.has_data()) {
        Ok(())
    } else {
        Err(timeout_error(secs, "waiting for any output"))
    }
}

pub fn output_match(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let pattern = arg(action, 0);
    let re = Regex::new(pattern)
        .map_err(|e| ActionError::Usage(format!("invalid pattern {pattern:?}: {e}")))?;
    let output = ctx.process(action)?.output();

    expect_state(
        action,
        output.is_match(&re),
        || format!("output does not match {pattern:?}"),
        || format!("output matches {pattern:?}"),
    )
}

pub fn output_contains(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let needle = arg(action, 0);
    let output = ctx.process(action)?.output();

    expect_state(
        action,
        output.contains(needle),
        || format!("output does not contain {needle:?}"),
        || format!("output contains {needle:?}"),
    )
}

pub fn output_empty(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let output = ctx.process(action)?.output();
    let len = output.len();

    expect_state(
        action,
        len == 0,
        || format!("output is not empty ({len} bytes)"),
        || "output is empty".to_string(),
    )
}

pub fn output_length(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let raw = arg(action, 0);
    let expected: usize = raw
        .parse()
        .map_err(|_| ActionError::Usage(format!("invalid output length {raw:?}")))?;
    let actual = ctx.process(action)?.output().len();

    expect_state(
        action,
        actual == expected,
        || format!("output length mismatch ({actual} ≠ {expected})"),
        || format!("output length is {expected}"),
    )
}

pub fn output_trim(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    ctx.process(action)?.output().request_clear();
    Ok(())
}

pub fn input(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let mut text = arg(action, 0).to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }

    let process = ctx.process(action)?;
    process.output().request_clear();
    process.write_input(&text).map_err(|e| {
        ActionError::Runtime(format!(
            "failed to write to stdin of pid {}: {e}",
            process.pid()
        ))
    })
}
