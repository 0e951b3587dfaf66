//! Functions available to every template.
//!
//! Each function returns a `Result`; failures become template errors at the
//! call site instead of aborting the process.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use minijinja::value::Rest;
use minijinja::{Environment, Error, ErrorKind, Value};

use crate::exec::{self, CommandSpec};
use crate::system::{FileInfo, FileType, System};

/// Shared inputs of the registered functions.
#[derive(Debug, Clone)]
pub struct FuncContext {
    /// Filesystem and process access.
    pub system: Arc<dyn System>,
    /// Directory `include` resolves relative paths against.
    pub source_dir: PathBuf,
    /// Directory `stat`/`lstat` resolve relative paths against.
    pub dest_dir: PathBuf,
    /// Credential provider invoked by `secret` and `secret_json`.
    pub secrets: Arc<Secrets>,
}

/// A generic credential provider: a command whose output for a given argv
/// is cached for the lifetime of the run.
#[derive(Debug, Default)]
pub struct Secrets {
    command: Option<CommandSpec>,
    cache: Mutex<HashMap<Vec<String>, Vec<u8>>>,
}

impl Secrets {
    /// Provider backed by `command`; lookups append their arguments to it.
    #[must_use]
    pub fn new(command: Option<CommandSpec>) -> Self {
        Self {
            command,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, system: &dyn System, args: &[String]) -> Result<Vec<u8>, Error> {
        let Some(base) = &self.command else {
            return Err(invalid("secret: no secret command configured"));
        };
        let key = args.to_vec();
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(&key).cloned()) {
            return Ok(hit);
        }
        let cmd = base.clone().args(args.iter().cloned());
        let output = system
            .run_capture(&cmd, None)
            .map_err(|e| invalid(format!("secret: {e}")))?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, output.clone());
        }
        Ok(output)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn info_value(path: &str, info: FileInfo) -> Value {
    let kind = match info.file_type {
        FileType::File => "file",
        FileType::Dir => "dir",
        FileType::Symlink => "symlink",
        FileType::Other => "other",
    };
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Value::from_iter([
        ("name", Value::from(name)),
        ("size", Value::from(info.size)),
        ("perm", Value::from(info.perm)),
        ("type", Value::from(kind)),
        ("is_dir", Value::from(info.is_dir())),
    ])
}

/// Register every function on `env`.
pub fn register(env: &mut Environment<'static>, ctx: &FuncContext) {
    let c = ctx.clone();
    env.add_function("include", move |path: String| {
        let bytes = c
            .system
            .read_file(&resolve(&c.source_dir, &path))
            .map_err(|e| invalid(format!("include: {e}")))?;
        String::from_utf8(bytes).map_err(|_| invalid(format!("include: {path}: not valid UTF-8")))
    });

    for (name, follow) in [("stat", true), ("lstat", false)] {
        let c = ctx.clone();
        env.add_function(name, move |path: String| -> Result<Value, Error> {
            let full = resolve(&c.dest_dir, &path);
            let result = if follow {
                c.system.stat(&full)
            } else {
                c.system.lstat(&full)
            };
            match result {
                Ok(info) => Ok(info_value(&path, info)),
                Err(e) if e.is_not_found() => Ok(Value::from(())),
                Err(e) => Err(invalid(format!("{e}"))),
            }
        });
    }

    let c = ctx.clone();
    env.add_function("output", move |program: String, args: Rest<String>| {
        let cmd = CommandSpec::new(program).args(args.0);
        let stdout = c
            .system
            .run_capture_idempotent(&cmd)
            .map_err(|e| invalid(format!("output: {e}")))?;
        Ok::<_, Error>(String::from_utf8_lossy(&stdout).into_owned())
    });

    let c = ctx.clone();
    env.add_function("secret", move |args: Rest<String>| {
        let out = c.secrets.lookup(c.system.as_ref(), &args.0)?;
        Ok::<_, Error>(String::from_utf8_lossy(&out).trim().to_string())
    });

    let c = ctx.clone();
    env.add_function("secret_json", move |args: Rest<String>| {
        let out = c.secrets.lookup(c.system.as_ref(), &args.0)?;
        let parsed: serde_json::Value = serde_json::from_slice(&out)
            .map_err(|e| invalid(format!("secret_json: {e}")))?;
        Ok::<_, Error>(Value::from_serialize(&parsed))
    });

    env.add_function("look_path", |name: String| {
        exec::look_path(&name).map_or_else(|| Value::from(()), |p| Value::from(p.display().to_string()))
    });

    env.add_function("join_path", |parts: Rest<String>| {
        parts
            .0
            .iter()
            .collect::<PathBuf>()
            .display()
            .to_string()
    });

    env.add_function("env", |name: String| std::env::var(name).unwrap_or_default());
}
