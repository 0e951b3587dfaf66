//! Command-line interface: global flags and subcommands.
use std::io::IsTerminal as _;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::AutoBool;
use crate::source::EntryTypeSet;

/// Top-level CLI entry point.
#[derive(Parser, Debug)]
#[command(
    name = "dotstate",
    about = "Manage dotfiles declared by an attribute-encoded source tree",
    version = crate::version()
)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Flags accepted by every subcommand.
    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Source directory
    #[arg(short = 'S', long = "source", global = true, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Destination directory
    #[arg(short = 'D', long = "destination", global = true, value_name = "DIR")]
    pub destination: Option<PathBuf>,

    /// Config file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Preview changes without applying
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,

    /// Overwrite changed destinations without prompting
    #[arg(long, global = true)]
    pub force: bool,

    /// Print a diff of every change
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log every filesystem and process call
    #[arg(long, global = true)]
    pub debug: bool,

    /// Continue past per-target failures
    #[arg(short, long, global = true)]
    pub keep_going: bool,

    /// Entry types to act on (dirs, files, remove, scripts, symlinks, encrypted, templates, all, none)
    #[arg(short, long, global = true, default_value = "all", value_name = "TYPES")]
    pub include: EntryTypeSet,

    /// Entry types to leave alone
    #[arg(short = 'x', long, global = true, default_value = "none", value_name = "TYPES")]
    pub exclude: EntryTypeSet,

    /// Recurse into directories (default)
    #[arg(short, long, global = true, overrides_with = "no_recursive")]
    pub recursive: bool,

    /// Do not recurse into directories
    #[arg(long, global = true, overrides_with = "recursive")]
    pub no_recursive: bool,

    /// Override template data, e.g. `email=me@example.com`
    #[arg(long = "override-data", global = true, value_name = "KEY=VALUE")]
    pub override_data: Vec<String>,

    /// Colored output (auto, true, false)
    #[arg(long, global = true, value_name = "WHEN")]
    pub color: Option<AutoBool>,
}

impl GlobalOpts {
    /// Whether requested directories expand to their contents.
    #[must_use]
    pub const fn recursive(&self) -> bool {
        !self.no_recursive
    }

    /// Color for console output before the config file is read.
    #[must_use]
    pub fn console_color(&self) -> bool {
        self.color.unwrap_or_default().resolve(auto_color())
    }
}

/// Color default: stdout is a terminal and `NO_COLOR` is unset.
#[must_use]
pub fn auto_color() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add destination files to the source tree
    Add(AddOpts),
    /// Bring destination paths to their target state
    Apply(TargetsOpts),
    /// Show what apply would change
    Diff(TargetsOpts),
    /// Show a two-column status of managed paths
    Status(TargetsOpts),
    /// Exit non-zero if any destination differs from its target state
    Verify(TargetsOpts),
    /// Print the target contents of files, scripts and symlinks
    Cat(RequiredTargetsOpts),
    /// Change the attributes of managed entries
    Chattr(ChattrOpts),
    /// List managed targets
    Managed,
    /// List destination paths that are not managed
    Unmanaged,
    /// Three-way merge destination, source and target state
    Merge(RequiredTargetsOpts),
    /// Write the target state as a tar archive
    Archive(ArchiveOpts),
    /// Unpack a tar archive into the source tree
    Import(ImportOpts),
    /// Render templates against the template data
    ExecuteTemplate(ExecuteTemplateOpts),
    /// Print the template data
    Data(DataOpts),
    /// Check the environment for problems
    Doctor,
    /// Inspect or reset the persistent state
    #[command(subcommand)]
    State(StateCommand),
    /// Run git in the source directory
    Git(GitOpts),
    /// Print the source path of targets, or the source directory
    SourcePath(TargetsOpts),
    /// Print a shell completion script
    Completion(CompletionOpts),
    /// Print version information
    Version,
}

impl Command {
    /// Subcommand name, used for the log file.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Apply(_) => "apply",
            Self::Diff(_) => "diff",
            Self::Status(_) => "status",
            Self::Verify(_) => "verify",
            Self::Cat(_) => "cat",
            Self::Chattr(_) => "chattr",
            Self::Managed => "managed",
            Self::Unmanaged => "unmanaged",
            Self::Merge(_) => "merge",
            Self::Archive(_) => "archive",
            Self::Import(_) => "import",
            Self::ExecuteTemplate(_) => "execute-template",
            Self::Data(_) => "data",
            Self::Doctor => "doctor",
            Self::State(_) => "state",
            Self::Git(_) => "git",
            Self::SourcePath(_) => "source-path",
            Self::Completion(_) => "completion",
            Self::Version => "version",
        }
    }
}

/// Destination paths; every managed target when empty.
#[derive(Parser, Debug, Clone, Default)]
pub struct TargetsOpts {
    /// Destination paths
    #[arg(value_name = "TARGET")]
    pub targets: Vec<PathBuf>,
}

/// At least one destination path.
#[derive(Parser, Debug, Clone)]
pub struct RequiredTargetsOpts {
    /// Destination paths
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<PathBuf>,
}

/// Options for the `add` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct AddOpts {
    /// Store files as templates
    #[arg(short = 'T', long)]
    pub template: bool,

    /// Encrypt files
    #[arg(long)]
    pub encrypt: bool,

    /// Only create files that are missing
    #[arg(long)]
    pub create: bool,

    /// Make added directories exact
    #[arg(long)]
    pub exact: bool,

    /// Destination paths
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<PathBuf>,
}

/// Options for the `chattr` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ChattrOpts {
    /// Attribute changes, e.g. `+private,-executable,notemplate`
    #[arg(allow_hyphen_values = true)]
    pub attributes: String,

    /// Destination paths
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<PathBuf>,
}

/// Options for the `archive` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ArchiveOpts {
    /// Write the archive to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Compress with gzip
    #[arg(short = 'z', long)]
    pub gzip: bool,

    /// Destination paths
    #[arg(value_name = "TARGET")]
    pub targets: Vec<PathBuf>,
}

/// Options for the `import` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ImportOpts {
    /// Destination directory the archive represents
    #[arg(long, value_name = "DIR")]
    pub into: Option<PathBuf>,

    /// Drop leading path components from member names
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub strip_components: usize,

    /// Make imported directories exact
    #[arg(long)]
    pub exact: bool,

    /// Archive file (tar or tar.gz)
    pub archive: PathBuf,
}

/// Options for the `execute-template` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ExecuteTemplateOpts {
    /// Templates to render; read from stdin when empty
    pub templates: Vec<String>,
}

/// Output format of the `data` subcommand.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// TOML.
    Toml,
}

/// Options for the `data` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct DataOpts {
    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: DataFormat,
}

/// Options for the `completion` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CompletionOpts {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

/// `state` subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    /// Print the persistent state as JSON
    Dump,
    /// Delete the persistent state
    Reset,
}

/// Options for the `git` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct GitOpts {
    /// Arguments passed to git
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
