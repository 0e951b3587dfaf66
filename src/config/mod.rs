//! User configuration loaded from `dotstate.toml`.
pub mod auto_bool;
pub mod toml_loader;
pub mod validation;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub use auto_bool::AutoBool;

use crate::exec::CommandSpec;

/// Configuration file name inside the config directory.
pub const CONFIG_FILE: &str = "dotstate.toml";
/// Persistent state file name inside the config directory.
pub const STATE_FILE: &str = "dotstatestate.json";

/// Settings from `dotstate.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Source directory, default `~/.local/share/dotstate`.
    pub source_dir: Option<PathBuf>,
    /// Destination directory, default the home directory.
    pub dest_dir: Option<PathBuf>,
    /// Umask applied to computed permissions.
    pub umask: u32,
    /// Colored output.
    pub color: AutoBool,
    /// Continue past per-target failures.
    pub keep_going: bool,
    /// Template data, above the source data file and below `--override-data`.
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Encryption tool.
    pub encryption: Encryption,
    /// Credential provider behind `secret` and `secret_json`.
    pub secret: Option<Tool>,
    /// Merge tool.
    pub merge: Tool,
    /// Script interpreters by extension, on top of the defaults.
    pub interpreters: BTreeMap<String, Tool>,
    /// `diff` settings.
    pub diff: DiffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: None,
            dest_dir: None,
            umask: 0o022,
            color: AutoBool::Auto,
            keep_going: false,
            data: serde_json::Map::new(),
            encryption: Encryption::default(),
            secret: None,
            merge: Tool {
                command: "vimdiff".to_string(),
                args: Vec::new(),
            },
            interpreters: BTreeMap::new(),
            diff: DiffConfig::default(),
        }
    }
}

/// An external program and its leading arguments.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Tool {
    /// Program name or path.
    pub command: String,
    /// Arguments placed before any added by dotstate.
    #[serde(default)]
    pub args: Vec<String>,
}

impl Tool {
    /// Invocation of this tool.
    #[must_use]
    pub fn spec(&self) -> CommandSpec {
        CommandSpec::new(&self.command).args(&self.args)
    }
}

/// gpg-compatible encryption settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Encryption {
    /// Program, default `gpg`.
    pub command: String,
    /// Extra leading arguments.
    pub args: Vec<String>,
    /// Recipient for `add --encrypt`; the default key when unset.
    pub recipient: Option<String>,
}

impl Default for Encryption {
    fn default() -> Self {
        Self {
            command: "gpg".to_string(),
            args: Vec::new(),
            recipient: None,
        }
    }
}

impl Encryption {
    /// Command that decrypts stdin to stdout.
    #[must_use]
    pub fn decrypt(&self) -> CommandSpec {
        CommandSpec::new(&self.command)
            .args(&self.args)
            .args(["--decrypt", "--quiet"])
    }

    /// Command that encrypts stdin to stdout.
    #[must_use]
    pub fn encrypt(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.command)
            .args(&self.args)
            .args(["--armor", "--encrypt"]);
        match &self.recipient {
            Some(r) => spec.args(["--recipient", r.as_str()]),
            None => spec.args(["--default-recipient-self"]),
        }
    }
}

/// `[diff]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiffConfig {
    /// Entry types left out of `diff`, e.g. `"scripts"`.
    pub exclude: String,
}

impl Config {
    /// Load `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        toml_loader::load_config(path)
            .with_context(|| format!("loading config {}", path.display()))
    }

    /// Source directory with `~` expanded.
    #[must_use]
    pub fn source_dir(&self, home: &Path) -> PathBuf {
        self.source_dir.as_ref().map_or_else(
            || home.join(".local").join("share").join("dotstate"),
            |p| expand_tilde(p, home),
        )
    }

    /// Destination directory with `~` expanded.
    #[must_use]
    pub fn dest_dir(&self, home: &Path) -> PathBuf {
        self.dest_dir
            .as_ref()
            .map_or_else(|| home.to_path_buf(), |p| expand_tilde(p, home))
    }

    /// Interpreters by extension: `py` runs with `python3` and `ps1` with
    /// `pwsh` unless the config says otherwise.
    #[must_use]
    pub fn interpreters(&self) -> BTreeMap<String, CommandSpec> {
        let mut out = BTreeMap::from([
            ("py".to_string(), CommandSpec::new("python3")),
            ("ps1".to_string(), CommandSpec::new("pwsh").args(["-NoLogo", "-File"])),
        ]);
        for (ext, tool) in &self.interpreters {
            out.insert(ext.trim_start_matches('.').to_string(), tool.spec());
        }
        out
    }
}

/// Replace a leading `~` with `home`.
#[must_use]
pub fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// The user's home directory.
///
/// # Errors
///
/// Returns an error if neither `HOME` nor `USERPROFILE` is set.
pub fn home_dir() -> Result<PathBuf> {
    let home = if cfg!(target_os = "windows") {
        std::env::var("USERPROFILE").or_else(|_| std::env::var("HOME"))
    } else {
        std::env::var("HOME")
    };
    home.map(PathBuf::from)
        .map_err(|_| anyhow::anyhow!("HOME environment variable is not set"))
}

/// `$XDG_CONFIG_HOME/dotstate`, default `~/.config/dotstate`.
#[must_use]
pub fn config_dir(home: &Path) -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map_or_else(|| home.join(".config"), PathBuf::from)
        .join("dotstate")
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn defaults() {
        let config = parse("");
        assert_eq!(config.umask, 0o022);
        assert_eq!(config.color, AutoBool::Auto);
        assert_eq!(config.merge.command, "vimdiff");
        assert_eq!(
            config.source_dir(Path::new("/home/u")),
            PathBuf::from("/home/u/.local/share/dotstate")
        );
        assert_eq!(config.dest_dir(Path::new("/home/u")), PathBuf::from("/home/u"));
    }

    #[test]
    fn full_file() {
        let config = parse(
            r#"
source_dir = "~/dotfiles"
umask = 0o077
color = "off"
keep_going = true

[data]
email = "a@b.com"

[encryption]
recipient = "me@example.com"

[secret]
command = "pass"
args = ["show"]

[interpreters.rb]
command = "ruby"

[diff]
exclude = "scripts"
"#,
        );
        assert_eq!(config.source_dir(Path::new("/h")), PathBuf::from("/h/dotfiles"));
        assert_eq!(config.umask, 0o077);
        assert_eq!(config.color, AutoBool::False);
        assert!(config.keep_going);
        assert_eq!(config.data["email"], "a@b.com");
        assert_eq!(config.secret.unwrap().spec().to_string(), "pass show");
        assert_eq!(config.diff.exclude, "scripts");
        assert_eq!(
            config.encryption.encrypt().to_string(),
            "gpg --armor --encrypt --recipient me@example.com"
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("sourcedir = \"x\"").is_err());
    }

    #[test]
    fn interpreters_layer_over_defaults() {
        let config = parse("[interpreters.py]\ncommand = \"python3.12\"\n[interpreters.rb]\ncommand = \"ruby\"\n");
        let interpreters = config.interpreters();
        assert_eq!(interpreters["py"].program, "python3.12");
        assert_eq!(interpreters["rb"].program, "ruby");
        assert_eq!(interpreters["ps1"].program, "pwsh");
    }

    #[test]
    fn decrypt_command() {
        assert_eq!(
            Encryption::default().decrypt().to_string(),
            "gpg --decrypt --quiet"
        );
    }

    #[test]
    fn tilde_expansion() {
        let home = Path::new("/home/u");
        assert_eq!(expand_tilde(Path::new("~/x"), home), PathBuf::from("/home/u/x"));
        assert_eq!(expand_tilde(Path::new("/abs"), home), PathBuf::from("/abs"));
    }
}
