//! Runtime variables computed on every read.

use recipe::RuntimeSource;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

/// Names provided by [`RuntimeVars`].
pub const RUNTIME_VARIABLES: &[&str] = &[
    "WORKDIR",
    "TIMESTAMP",
    "DATE",
    "HOSTNAME",
    "IP",
    "LIBDIR",
    "PYTHON_SITELIB",
    "PYTHON_SITEARCH",
    "PYTHON3_SITELIB",
    "PYTHON3_SITEARCH",
];

/// Runtime layer bound to a working directory.
pub struct RuntimeVars {
    workdir: PathBuf,
}

impl RuntimeVars {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl RuntimeSource for RuntimeVars {
    fn lookup(&self, name: &str) -> Option<String> {
        let value = match name {
            "WORKDIR" => self.workdir.display().to_string(),
            "TIMESTAMP" => chrono::Utc::now().timestamp().to_string(),
            "DATE" => chrono::Local::now().format("%Y/%m/%d %H:%M:%S").to_string(),
            "HOSTNAME" => hostname(),
            "IP" => primary_ipv4().map(|ip| ip.to_string()).unwrap_or_default(),
            "LIBDIR" => libdir(),
            "PYTHON_SITELIB" => python_path(Python::Default, "purelib"),
            "PYTHON_SITEARCH" => python_path(Python::Default, "platlib"),
            "PYTHON3_SITELIB" => python_path(Python::Three, "purelib"),
            "PYTHON3_SITEARCH" => python_path(Python::Three, "platlib"),
            _ => return None,
        };
        Some(value)
    }

    fn provides(&self, name: &str) -> bool {
        RUNTIME_VARIABLES.contains(&name)
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First non-loopback IPv4 address of the host.
pub fn primary_ipv4() -> Option<Ipv4Addr> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    addrs
        .filter_map(|ifaddr| ifaddr.address)
        .filter_map(|addr| addr.as_sockaddr_in().map(|sin| *SocketAddrV4::from(*sin).ip()))
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
}

/// Platform library directory: `/usr/lib64` where it exists, else `/usr/lib`.
pub fn libdir() -> String {
    if cfg!(target_pointer_width = "64") && Path::new("/usr/lib64").is_dir() {
        "/usr/lib64".to_string()
    } else {
        "/usr/lib".to_string()
    }
}

#[derive(Clone, Copy)]
enum Python {
    Default,
    Three,
}

impl Python {
    fn binary(self) -> &'static str {
        match self {
            Self::Default => "python",
            Self::Three => "python3",
        }
    }
}

type PythonPaths = Option<(String, String)>;

static PYTHON_PATHS: OnceLock<PythonPaths> = OnceLock::new();
static PYTHON3_PATHS: OnceLock<PythonPaths> = OnceLock::new();

/// `sysconfig` path for the given interpreter, empty when unavailable.
fn python_path(python: Python, key: &str) -> String {
    let cell = match python {
        Python::Default => &PYTHON_PATHS,
        Python::Three => &PYTHON3_PATHS,
    };

    let paths = cell.get_or_init(|| query_python(python.binary()));

    match (paths, key) {
        (Some((purelib, _)), "purelib") => purelib.clone(),
        (Some((_, platlib)), "platlib") => platlib.clone(),
        _ => String::new(),
    }
}

fn query_python(binary: &str) -> PythonPaths {
    let output = Command::new(binary)
        .args([
            "-c",
            "import sysconfig; p = sysconfig.get_paths(); print(p['purelib']); print(p['platlib'])",
        ])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines().map(str::trim);
    let purelib = lines.next()?.to_string();
    let platlib = lines.next()?.to_string();
    log::debug!("{binary} site paths: {purelib}, {platlib}");
    Some((purelib, platlib))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provides_only_known_names() {
        let vars = RuntimeVars::new("/srv/work");
        assert!(vars.provides("WORKDIR"));
        assert!(vars.provides("PYTHON3_SITEARCH"));
        assert!(!vars.provides("workdir"));
        assert_eq!(vars.lookup("UNKNOWN"), None);
    }

    #[test]
    fn test_workdir_and_timestamp() {
        let vars = RuntimeVars::new("/srv/work");
        assert_eq!(vars.lookup("WORKDIR").as_deref(), Some("/srv/work"));

        let ts: i64 = vars.lookup("TIMESTAMP").unwrap().parse().unwrap();
        assert!(ts > 1_600_000_000);
    }

    #[test]
    fn test_libdir_is_absolute() {
        assert!(libdir().starts_with("/usr/lib"));
    }

    #[test]
    fn test_expansion_with_runtime_layer() {
        let mut variables = recipe::Variables::new();
        variables.declare("data", "{WORKDIR}/data").unwrap();
        let runtime = RuntimeVars::new("/srv/work");
        let scope = variables.scope(&runtime);
        assert_eq!(scope.expand("ls {data}"), "ls /srv/work/data");
    }
}
