//! Host facts exposed to templates under the `dotstate` data key.
use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Detected operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Linux.
    Linux,
    /// macOS.
    Darwin,
    /// Windows.
    Windows,
    /// Any other Unix-like system.
    Other,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Darwin => write!(f, "darwin"),
            Self::Windows => write!(f, "windows"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Facts about the machine dotstate is running on.
#[derive(Debug, Clone, Serialize)]
pub struct Platform {
    /// Operating system family.
    pub os: Os,
    /// CPU architecture as reported by the compiler target.
    pub arch: String,
    /// Short host name.
    pub hostname: String,
    /// Fully qualified host name when known.
    pub fqdn_hostname: String,
    /// Login name of the current user.
    pub username: String,
    /// Primary group of the current user.
    pub group: String,
    /// Home directory.
    pub home_dir: String,
    /// Kernel facts from `/proc/sys/kernel` (Linux only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<Kernel>,
    /// Fields from `/etc/os-release` (Linux only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_release: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Kernel identification read from procfs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Kernel {
    /// `/proc/sys/kernel/osrelease`.
    pub osrelease: String,
    /// `/proc/sys/kernel/ostype`.
    pub ostype: String,
    /// `/proc/sys/kernel/version`.
    pub version: String,
}

impl Platform {
    /// Detect the current platform.
    #[must_use]
    pub fn detect(home_dir: &Path) -> Self {
        let fqdn_hostname = detect_hostname();
        let hostname = fqdn_hostname
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            os: detect_os(),
            arch: std::env::consts::ARCH.to_string(),
            hostname,
            fqdn_hostname,
            username: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
            group: detect_group(),
            home_dir: home_dir.display().to_string(),
            kernel: detect_kernel(Path::new("/proc/sys/kernel")),
            os_release: std::fs::read_to_string("/etc/os-release")
                .ok()
                .map(|s| parse_os_release(&s)),
        }
    }

    /// Create a platform with explicit values (for testing).
    #[cfg(test)]
    #[must_use]
    pub fn new(os: Os, hostname: &str) -> Self {
        Self {
            os,
            arch: "x86_64".to_string(),
            hostname: hostname.to_string(),
            fqdn_hostname: hostname.to_string(),
            username: "user".to_string(),
            group: "users".to_string(),
            home_dir: "/home/user".to_string(),
            kernel: None,
            os_release: None,
        }
    }
}

const fn detect_os() -> Os {
    if cfg!(target_os = "linux") {
        Os::Linux
    } else if cfg!(target_os = "macos") {
        Os::Darwin
    } else if cfg!(target_os = "windows") {
        Os::Windows
    } else {
        Os::Other
    }
}

fn detect_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.is_empty()
    {
        return name;
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| command_line("hostname", &[]))
        .unwrap_or_default()
}

fn detect_group() -> String {
    command_line("id", &["-gn"]).unwrap_or_default()
}

/// First line of a command's output, if it succeeds.
fn command_line(program: &str, args: &[&str]) -> Option<String> {
    let spec = crate::exec::CommandSpec::new(program).args(args.iter().copied());
    let result = crate::exec::run(&spec).ok()?;
    String::from_utf8_lossy(&result.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
}

fn detect_kernel(dir: &Path) -> Option<Kernel> {
    let read = |name: &str| {
        std::fs::read_to_string(dir.join(name))
            .ok()
            .map(|s| s.trim().to_string())
    };
    Some(Kernel {
        osrelease: read("osrelease")?,
        ostype: read("ostype")?,
        version: read("version")?,
    })
}

/// Parse `KEY=value` lines of an os-release file, unquoting values.
fn parse_os_release(contents: &str) -> serde_json::Map<String, serde_json::Value> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| {
            let v = v.trim().trim_matches('"').trim_matches('\'');
            (k.trim().to_ascii_lowercase(), serde_json::Value::from(v))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn platform_detect_fills_arch() {
        let p = Platform::detect(Path::new("/home/test"));
        assert_eq!(p.arch, std::env::consts::ARCH);
        assert_eq!(p.home_dir, "/home/test");
    }

    #[test]
    fn os_display() {
        assert_eq!(Os::Linux.to_string(), "linux");
        assert_eq!(Os::Darwin.to_string(), "darwin");
        assert_eq!(Os::Windows.to_string(), "windows");
    }

    #[test]
    fn os_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Os::Linux).unwrap(), "linux");
    }

    #[test]
    fn parse_os_release_unquotes() {
        let parsed = parse_os_release("NAME=\"Arch Linux\"\nID=arch\n# comment\n\nBAD\n");
        assert_eq!(parsed.get("name").unwrap(), "Arch Linux");
        assert_eq!(parsed.get("id").unwrap(), "arch");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn kernel_reads_procfs_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("osrelease"), "6.1.0\n").unwrap();
        std::fs::write(dir.path().join("ostype"), "Linux\n").unwrap();
        std::fs::write(dir.path().join("version"), "#1 SMP\n").unwrap();
        let k = detect_kernel(dir.path()).unwrap();
        assert_eq!(k.osrelease, "6.1.0");
        assert_eq!(k.ostype, "Linux");
    }

    #[test]
    fn kernel_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(detect_kernel(dir.path()).is_none());
    }

    #[test]
    fn test_platform_has_no_kernel() {
        let p = Platform::new(Os::Linux, "box");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["hostname"], "box");
        assert!(v.get("kernel").is_none());
    }
}
