//! User and group assertions backed by the system account databases.

use super::{ActionError, ActionResult, Context, arg, expect_found, expect_state};
use crate::engine::privilege;
use nix::unistd::{Group, User};
use recipe::Action;

fn require_user(name: &str) -> Result<User, ActionError> {
    privilege::user(name).ok_or_else(|| ActionError::Environment(format!("user {name} not found")))
}

fn require_group(name: &str) -> Result<Group, ActionError> {
    privilege::group(name)
        .ok_or_else(|| ActionError::Environment(format!("group {name} not found")))
}

fn parse_id(action: &Action, index: usize) -> Result<u32, ActionError> {
    let raw = arg(action, index);
    raw.parse()
        .map_err(|_| ActionError::Usage(format!("{}: invalid id {raw:?}", action.name)))
}

/// Compare one attribute of an account with its expected value.
fn expect_attr(
    action: &Action,
    object: &str,
    attr: &str,
    actual: &str,
    expected: &str,
) -> ActionResult {
    expect_state(
        action,
        actual == expected,
        || format!("{object} {attr} mismatch ({actual} ≠ {expected})"),
        || format!("{object} {attr} is {expected}"),
    )
}

/// Whether `user` belongs to `group`, as primary or supplementary member.
pub(crate) fn is_member(user: &User, group: &Group) -> bool {
    user.gid == group.gid || group.mem.iter().any(|m| *m == user.name)
}

pub fn user_exist(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    expect_found(
        action,
        privilege::user(name).is_some(),
        || format!("user {name} not found"),
        || format!("user {name} exists"),
    )
}

pub fn user_id(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let expected = parse_id(action, 1)?;
    let user = require_user(name)?;
    expect_attr(
        action,
        &format!("user {name}"),
        "uid",
        &user.uid.to_string(),
        &expected.to_string(),
    )
}

pub fn user_gid(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let expected = parse_id(action, 1)?;
    let user = require_user(name)?;
    expect_attr(
        action,
        &format!("user {name}"),
        "gid",
        &user.gid.to_string(),
        &expected.to_string(),
    )
}

pub fn user_group(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let group_name = arg(action, 1);
    let user = require_user(name)?;
    let group = require_group(group_name)?;
    expect_state(
        action,
        is_member(&user, &group),
        || format!("user {name} is not a member of group {group_name}"),
        || format!("user {name} is a member of group {group_name}"),
    )
}

pub fn user_shell(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let user = require_user(name)?;
    expect_attr(
        action,
        &format!("user {name}"),
        "shell",
        &user.shell.to_string_lossy(),
        arg(action, 1),
    )
}

pub fn user_home(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let user = require_user(name)?;
    expect_attr(
        action,
        &format!("user {name}"),
        "home",
        &user.dir.to_string_lossy(),
        arg(action, 1),
    )
}

pub fn group_exist(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    expect_found(
        action,
        privilege::group(name).is_some(),
        || format!("group {name} not found"),
        || format!("group {name} exists"),
    )
}

pub fn group_id(action: &Action, _ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 0);
    let expected = parse_id(action, 1)?;
    let group = require_group(name)?;
    expect_attr(
        action,
        &format!("group {name}"),
        "gid",
        &group.gid.to_string(),
        &expected.to_string(),
    )
}
