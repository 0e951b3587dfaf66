// Shared helpers for integration tests.
//
// Each test gets a temporary directory holding a source tree, a destination
// directory and a config file, and drives the command layer the same way
// the binary does.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use clap::Parser as _;
use dotstate::cli::Cli;
use dotstate::logging::Logger;

/// An isolated source tree, destination and config file backed by a
/// [`tempfile::TempDir`].
pub struct TestEnv {
    /// Temporary root; everything below is removed on drop.
    pub root: tempfile::TempDir,
}

impl TestEnv {
    /// Create empty `src/` and `home/` directories.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir_all(root.path().join("src")).expect("create src");
        std::fs::create_dir_all(root.path().join("home")).expect("create home");
        Self { root }
    }

    /// Source directory.
    pub fn src(&self) -> PathBuf {
        self.root.path().join("src")
    }

    /// Destination directory.
    pub fn dest(&self) -> PathBuf {
        self.root.path().join("home")
    }

    /// Config file path, which may not exist.
    pub fn config(&self) -> PathBuf {
        self.root.path().join("dotstate.toml")
    }

    /// Write `contents` to `rel` below the source directory.
    pub fn source_file(&self, rel: &str, contents: &str) -> &Self {
        write(&self.src().join(rel), contents);
        self
    }

    /// Write `contents` to `rel` below the destination directory.
    pub fn dest_file(&self, rel: &str, contents: &str) -> &Self {
        write(&self.dest().join(rel), contents);
        self
    }

    /// Write the config file.
    pub fn config_file(&self, contents: &str) -> &Self {
        write(&self.config(), contents);
        self
    }

    /// Read a destination file.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dest().join(rel)).expect("read destination file")
    }

    /// Whether `rel` exists below the destination, without following links.
    pub fn exists(&self, rel: &str) -> bool {
        std::fs::symlink_metadata(self.dest().join(rel)).is_ok()
    }

    /// Run `args` after the directory flags, returning what the command
    /// wrote to stdout.
    pub fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let src = self.src();
        let dest = self.dest();
        let config = self.config();
        let mut argv = vec![
            "dotstate",
            "-S",
            src.to_str().expect("utf-8 path"),
            "-D",
            dest.to_str().expect("utf-8 path"),
            "-c",
            config.to_str().expect("utf-8 path"),
            "--color",
            "false",
        ];
        argv.extend_from_slice(args);
        let cli = Cli::parse_from(argv);
        let mut out = Vec::new();
        dotstate::commands::run(&cli, &Logger::new("test"), &mut out)?;
        Ok(String::from_utf8(out).expect("utf-8 output"))
    }

    /// Absolute destination path of `rel`, as a command-line argument.
    pub fn target(&self, rel: &str) -> String {
        self.dest().join(rel).display().to_string()
    }
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, contents).expect("write file");
}

/// Permission bits of `path`.
#[cfg(unix)]
pub fn perm(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt as _;
    std::fs::symlink_metadata(path)
        .expect("stat")
        .permissions()
        .mode()
        & 0o777
}
