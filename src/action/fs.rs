//! Filesystem mutations and assertions.
//!
//! Every mutating handler resolves its target through
//! [`Context::safe_path`] before touching anything.

use super::{ActionError, ActionResult, Context, arg, expect_state};
use crate::engine::privilege;
use crate::engine::runtime::RUNTIME_VARIABLES;
use crate::engine::session::Ownership;
use handlebars::Handlebars;
use nix::unistd::{Gid, Uid, User};
use recipe::Action;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::ffi::CString;
use std::fs::{self, File, Metadata, Permissions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const TEMPLATE_MODE: u32 = 0o644;

fn io_error(what: &str, path: &Path, err: &io::Error) -> ActionError {
    ActionError::Runtime(format!("cannot {what} {}: {err}", path.display()))
}

fn parse_mode(action: &Action, raw: &str) -> Result<u32, ActionError> {
    u32::from_str_radix(raw.trim_start_matches("0o"), 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| ActionError::Usage(format!("{}: invalid octal mode {raw:?}", action.name)))
}

/// Metadata of `path`, or an assertion failure when it is missing.
fn require_metadata(path: &Path) -> Result<Metadata, ActionError> {
    fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            ActionError::Assertion(format!("{} does not exist", path.display()))
        }
        _ => io_error("stat", path, &e),
    })
}

/// SHA-256 of a file's contents, hex-encoded.
pub(crate) fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// `dest`, or `dest/<name of src>` when `dest` is an existing directory.
fn destination(src: &Path, dest: PathBuf) -> PathBuf {
    match src.file_name() {
        Some(name) if dest.is_dir() => dest.join(name),
        _ => dest,
    }
}

pub fn chdir(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    if !path.is_dir() {
        return Err(ActionError::Runtime(format!(
            "cannot change directory to {}: not a directory",
            path.display()
        )));
    }
    log::debug!("changing directory to {}", path.display());
    ctx.session.cwd = path;
    Ok(())
}

pub fn copy(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let src = ctx.path(arg(action, 0));
    let dest = destination(&src, ctx.safe_path(arg(action, 1))?);

    fs::copy(&src, &dest).map_err(|e| {
        ActionError::Runtime(format!(
            "cannot copy {} to {}: {e}",
            src.display(),
            dest.display()
        ))
    })?;
    Ok(())
}

pub fn move_path(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let src = ctx.safe_path(arg(action, 0))?;
    let dest = destination(&src, ctx.safe_path(arg(action, 1))?);

    let moved = match fs::rename(&src, &dest) {
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) && src.is_file() => {
            fs::copy(&src, &dest).and_then(|_| fs::remove_file(&src))
        }
        other => other,
    };

    moved.map_err(|e| {
        ActionError::Runtime(format!(
            "cannot move {} to {}: {e}",
            src.display(),
            dest.display()
        ))
    })
}

pub fn touch(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.safe_path(arg(action, 0))?;
    let file = File::options()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| io_error("touch", &path, &e))?;
    file.set_modified(SystemTime::now())
        .map_err(|e| io_error("touch", &path, &e))
}

pub fn mkdir(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.safe_path(arg(action, 0))?;
    fs::create_dir_all(&path).map_err(|e| io_error("create directory", &path, &e))
}

pub fn remove(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.safe_path(arg(action, 0))?;
    let result = match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
        Ok(_) => fs::remove_file(&path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| io_error("remove", &path, &e))
}

pub fn chmod(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.safe_path(arg(action, 0))?;
    let mode = parse_mode(action, arg(action, 1))?;
    fs::set_permissions(&path, Permissions::from_mode(mode))
        .map_err(|e| io_error("change mode of", &path, &e))
}

/// Every variable visible to the recipe, as template data.
fn template_data(ctx: &Context<'_>) -> Value {
    let mut data = Map::new();
    for (name, var) in ctx.variables.iter() {
        let value = ctx.variables.scope(ctx.runtime).expand(&var.value);
        data.insert(name.to_string(), Value::String(value));
    }
    for name in RUNTIME_VARIABLES {
        if let Some(value) = ctx.runtime.lookup(name) {
            data.insert((*name).to_string(), Value::String(value));
        }
    }
    Value::Object(data)
}

pub fn template(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let src = ctx.path(arg(action, 0));
    let dest = ctx.safe_path(arg(action, 1))?;
    let mode = match action.args.get(2) {
        Some(raw) => parse_mode(action, raw)?,
        None => TEMPLATE_MODE,
    };

    let source = fs::read_to_string(&src).map_err(|e| io_error("read template", &src, &e))?;

    let mut engine = Handlebars::new();
    engine.set_strict_mode(true);
    engine.register_escape_fn(handlebars::no_escape);
    let rendered = engine
        .render_template(&source, &template_data(ctx))
        .map_err(|e| {
            ActionError::Runtime(format!("cannot render template {}: {e}", src.display()))
        })?;

    fs::write(&dest, rendered).map_err(|e| io_error("write", &dest, &e))?;
    fs::set_permissions(&dest, Permissions::from_mode(mode))
        .map_err(|e| io_error("change mode of", &dest, &e))
}

pub fn backup(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let meta = require_metadata(&path)?;
    if !meta.is_file() {
        return Err(ActionError::Runtime(format!(
            "cannot back up {}: not a regular file",
            path.display()
        )));
    }

    let target = ctx
        .session
        .temp
        .backup_path(&path)
        .map_err(|e| ActionError::Runtime(format!("cannot create temporary directory: {e}")))?;
    fs::copy(&path, &target).map_err(|e| io_error("back up", &path, &e))?;

    log::debug!("backed up {} to {}", path.display(), target.display());
    ctx.session.backups.insert(
        path,
        Ownership {
            uid: meta.uid(),
            gid: meta.gid(),
        },
    );
    Ok(())
}

pub fn backup_restore(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.safe_path(arg(action, 0))?;
    let owner = ctx.session.backups.get(&path).copied();
    let backup = ctx.session.temp.existing_backup_path(&path);

    let (Some(owner), Some(backup)) = (owner, backup) else {
        return Err(ActionError::Runtime(format!(
            "no backup of {} to restore",
            path.display()
        )));
    };

    fs::copy(&backup, &path).map_err(|e| io_error("restore", &path, &e))?;
    std::os::unix::fs::chown(&path, Some(owner.uid), Some(owner.gid))
        .map_err(|e| io_error("restore ownership of", &path, &e))?;

    log::debug!("restored {} from {}", path.display(), backup.display());
    Ok(())
}

pub fn file_contains(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let needle = arg(action, 1);
    let content = fs::read(&path).map_err(|e| io_error("read", &path, &e))?;
    let found = needle.is_empty()
        || content
            .windows(needle.len())
            .any(|window| window == needle.as_bytes());

    expect_state(
        action,
        found,
        || format!("{} does not contain {needle:?}", path.display()),
        || format!("{} contains {needle:?}", path.display()),
    )
}

pub fn checksum(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let expected = arg(action, 1);
    let actual = sha256_file(&path).map_err(|e| io_error("hash", &path, &e))?;

    expect_state(
        action,
        actual.eq_ignore_ascii_case(expected),
        || format!("{} checksum mismatch ({actual} ≠ {expected})", path.display()),
        || format!("{} checksum is {expected}", path.display()),
    )
}

pub fn checksum_read(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let name = arg(action, 1);
    let hash = sha256_file(&path).map_err(|e| io_error("hash", &path, &e))?;

    ctx.variables
        .set(name, hash)
        .map_err(|e| ActionError::Policy(e.to_string()))
}

pub fn mode(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let expected = parse_mode(action, arg(action, 1))?;
    let actual = require_metadata(&path)?.permissions().mode() & 0o7777;

    expect_state(
        action,
        actual == expected,
        || format!("{} mode mismatch ({actual:04o} ≠ {expected:04o})", path.display()),
        || format!("{} mode is {expected:04o}", path.display()),
    )
}

fn user_name(uid: u32) -> String {
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map_or_else(|| uid.to_string(), |u| u.name)
}

fn group_name(gid: u32) -> String {
    nix::unistd::Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map_or_else(|| gid.to_string(), |g| g.name)
}

pub fn owner(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let spec = arg(action, 1);
    let (user, group) = match spec.split_once(':') {
        Some((user, group)) => (user, Some(group)),
        None => (spec, None),
    };

    let expected_uid = privilege::user(user)
        .ok_or_else(|| ActionError::Environment(format!("user {user} not found")))?
        .uid
        .as_raw();
    let expected_gid = match group {
        Some(group) => Some(
            privilege::group(group)
                .ok_or_else(|| ActionError::Environment(format!("group {group} not found")))?
                .gid
                .as_raw(),
        ),
        None => None,
    };

    let meta = require_metadata(&path)?;
    let holds = meta.uid() == expected_uid && expected_gid.is_none_or(|gid| meta.gid() == gid);
    let actual = match group {
        Some(_) => format!("{}:{}", user_name(meta.uid()), group_name(meta.gid())),
        None => user_name(meta.uid()),
    };

    expect_state(
        action,
        holds,
        || format!("{} owner mismatch ({actual} ≠ {spec})", path.display()),
        || format!("{} is owned by {spec}", path.display()),
    )
}

pub fn exist(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    expect_state(
        action,
        path.symlink_metadata().is_ok(),
        || format!("{} does not exist", path.display()),
        || format!("{} exists", path.display()),
    )
}

pub fn empty(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    let size = require_metadata(&path)?.len();
    expect_state(
        action,
        size == 0,
        || format!("{} is not empty ({size} bytes)", path.display()),
        || format!("{} is empty", path.display()),
    )
}

pub fn empty_dir(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    if !require_metadata(&path)?.is_dir() {
        return Err(ActionError::Assertion(format!(
            "{} is not a directory",
            path.display()
        )));
    }
    let mut entries = fs::read_dir(&path).map_err(|e| io_error("list", &path, &e))?;
    expect_state(
        action,
        entries.next().is_none(),
        || format!("directory {} is not empty", path.display()),
        || format!("directory {} is empty", path.display()),
    )
}

pub fn dir(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let path = ctx.path(arg(action, 0));
    expect_state(
        action,
        path.is_dir(),
        || format!("{} is not a directory", path.display()),
        || format!("{} is a directory", path.display()),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    /// Owner permission bit; group and other bits are shifted right.
    fn owner_bit(self) -> u32 {
        match self {
            Self::Read => 0o400,
            Self::Write => 0o200,
            Self::Execute => 0o100,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Self::Read => "readable",
            Self::Write => "writable",
            Self::Execute => "executable",
        }
    }
}

/// Groups `user` belongs to, primary group included.
fn user_groups(user: &User) -> Vec<u32> {
    CString::new(user.name.as_str())
        .ok()
        .and_then(|name| nix::unistd::getgrouplist(&name, user.gid).ok())
        .map_or_else(
            || vec![user.gid.as_raw()],
            |groups| groups.into_iter().map(Gid::as_raw).collect(),
        )
}

/// Whether `user` has `access` to a file with `meta`, from permission bits.
fn has_access(user: &User, groups: &[u32], meta: &Metadata, access: Access) -> bool {
    let mode = meta.mode();
    let any = access.owner_bit() | (access.owner_bit() >> 3) | (access.owner_bit() >> 6);

    if user.uid.is_root() {
        return match access {
            Access::Read | Access::Write => true,
            Access::Execute => meta.is_dir() || mode & any != 0,
        };
    }

    let bit = if meta.uid() == user.uid.as_raw() {
        access.owner_bit()
    } else if groups.contains(&meta.gid()) {
        access.owner_bit() >> 3
    } else {
        access.owner_bit() >> 6
    };
    mode & bit != 0
}

fn check_access(action: &Action, ctx: &Context<'_>, access: Access) -> ActionResult {
    let name = arg(action, 0);
    let path = ctx.path(arg(action, 1));
    let user = privilege::user(name)
        .ok_or_else(|| ActionError::Environment(format!("user {name} not found")))?;
    let meta = require_metadata(&path)?;

    expect_state(
        action,
        has_access(&user, &user_groups(&user), &meta, access),
        || format!("{} is not {} by {name}", path.display(), access.verb()),
        || format!("{} is {} by {name}", path.display(), access.verb()),
    )
}

pub fn readable(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    check_access(action, ctx, Access::Read)
}

pub fn writable(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    check_access(action, ctx, Access::Write)
}

pub fn executable(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    check_access(action, ctx, Access::Execute)
}

#[cfg(test)]
mod tests {
    use super::super::ErrorKind;
    use super::super::testing::{Fixture, action};
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_touch_mkdir_remove() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());

        fixture.run(&action("mkdir", &["a/b"])).unwrap();
        fixture.run(&action("touch", &["a/b/f.txt"])).unwrap();
        fixture.run(&action("exist", &["a/b/f.txt"])).unwrap();
        fixture.run(&action("empty", &["a/b/f.txt"])).unwrap();
        fixture.run(&action("dir", &["a/b"])).unwrap();
        fixture.run(&action("empty-dir", &["a/b"]).negated()).unwrap();

        fixture.run(&action("remove", &["a"])).unwrap();
        fixture.run(&action("exist", &["a"]).negated()).unwrap();
        fixture.run(&action("remove", &["a"])).unwrap();
    }

    #[test]
    fn test_unsafe_paths_are_refused() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("work");
        fs::create_dir(&work).unwrap();
        let mut fixture = Fixture::new(&work);

        let outside = dir.path().join("outside.txt");
        let err = fixture
            .run(&action("touch", &[outside.to_str().unwrap()]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert!(err.message().contains("unsafe"));
        assert!(!outside.exists());

        let err = fixture.run(&action("mkdir", &["../escape"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Policy);
        assert!(!dir.path().join("escape").exists());

        fixture.session.unsafe_actions = true;
        fixture
            .run(&action("touch", &[outside.to_str().unwrap()]))
            .unwrap();
        assert!(outside.exists());
    }

    #[test]
    fn test_copy_move_chmod_mode() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fs::write(dir.path().join("src.txt"), "payload").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        fixture.run(&action("copy", &["src.txt", "sub"])).unwrap();
        fixture
            .run(&action("file-contains", &["sub/src.txt", "pay"]))
            .unwrap();

        fixture.run(&action("move", &["src.txt", "moved.txt"])).unwrap();
        fixture.run(&action("exist", &["src.txt"]).negated()).unwrap();

        fixture.run(&action("chmod", &["moved.txt", "0600"])).unwrap();
        fixture.run(&action("mode", &["moved.txt", "600"])).unwrap();
        let err = fixture.run(&action("mode", &["moved.txt", "0644"])).unwrap_err();
        assert!(err.message().contains("mode mismatch (0600 ≠ 0644)"));

        let err = fixture.run(&action("chmod", &["moved.txt", "999"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_chdir_moves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fs::create_dir(dir.path().join("sub")).unwrap();

        fixture.run(&action("chdir", &["sub"])).unwrap();
        fixture.run(&action("touch", &["here.txt"])).unwrap();
        assert!(dir.path().join("sub/here.txt").exists());

        let err = fixture.run(&action("chdir", &["missing"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_backup_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let file = dir.path().join("t.txt");
        fs::write(&file, "original").unwrap();
        let before = fs::metadata(&file).unwrap();

        fixture.run(&action("backup", &["t.txt"])).unwrap();
        fs::write(&file, "modified").unwrap();
        fixture.run(&action("remove", &["t.txt"])).unwrap();
        fixture.run(&action("backup-restore", &["t.txt"])).unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "original");
        let after = fs::metadata(&file).unwrap();
        assert_eq!((after.uid(), after.gid()), (before.uid(), before.gid()));

        let temp = fixture.session.temp.path().unwrap().to_path_buf();
        fixture.session.cleanup().unwrap();
        assert!(!temp.exists());
    }

    #[test]
    fn test_restore_without_backup() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let err = fixture
            .run(&action("backup-restore", &["nothing.txt"]))
            .unwrap_err();
        assert!(err.message().contains("no backup"));
    }

    #[test]
    fn test_checksum_and_read() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fs::write(dir.path().join("abc.txt"), "abc").unwrap();
        let sha = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

        fixture.run(&action("checksum", &["abc.txt", sha])).unwrap();
        fixture
            .run(&action("checksum", &["abc.txt", "00"]).negated())
            .unwrap();
        fixture
            .run(&action("checksum-read", &["abc.txt", "hash"]))
            .unwrap();
        assert_eq!(fixture.variables.get("hash"), Some(sha));

        fixture.variables.declare("fixed", "x").unwrap();
        let err = fixture
            .run(&action("checksum-read", &["abc.txt", "fixed"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Policy);
    }

    #[test]
    fn test_template_renders_variables() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        fixture.variables.declare("name", "world").unwrap();
        fs::write(dir.path().join("in.tpl"), "hello {{name}} <&>\n").unwrap();

        fixture
            .run(&action("template", &["in.tpl", "out.txt", "0600"]))
            .unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hello world <&>\n"
        );
        let mode = fs::metadata(dir.path().join("out.txt"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);

        fs::write(dir.path().join("bad.tpl"), "{{missing}}").unwrap();
        let err = fixture
            .run(&action("template", &["bad.tpl", "out.txt"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_owner_and_access() {
        let dir = TempDir::new().unwrap();
        let mut fixture = Fixture::new(dir.path());
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, Permissions::from_mode(0o640)).unwrap();

        let me = User::from_uid(Uid::effective()).unwrap().unwrap();
        fixture.run(&action("owner", &["f", &me.name])).unwrap();
        fixture.run(&action("readable", &[&me.name, "f"])).unwrap();
        fixture
            .run(&action("executable", &[&me.name, "f"]).negated())
            .unwrap();

        let err = fixture
            .run(&action("owner", &["f", "verdict-no-such-user"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Environment);
    }

    #[test]
    fn test_access_bits() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, Permissions::from_mode(0o604)).unwrap();
        let meta = fs::metadata(&file).unwrap();

        let root = User::from_name("root").unwrap().unwrap();
        assert!(has_access(&root, &[0], &meta, Access::Write));
        assert!(!has_access(&root, &[0], &meta, Access::Execute));

        let mut stranger = root.clone();
        stranger.uid = Uid::from_raw(meta.uid() + 4242);
        stranger.gid = Gid::from_raw(meta.gid() + 4242);
        let groups = [stranger.gid.as_raw()];
        assert!(has_access(&stranger, &groups, &meta, Access::Read));
        assert!(!has_access(&stranger, &groups, &meta, Access::Write));
    }
}
