//! Commands: print version information and shell completions.
use std::io::Write;

use anyhow::Result;
use clap::CommandFactory as _;
use clap_complete::Shell;

use crate::cli::Cli;

/// Print the dotstate version.
///
/// # Errors
///
/// Returns an error if `out` cannot be written.
pub fn run(out: &mut dyn Write) -> Result<()> {
    writeln!(out, "{}", line())?;
    Ok(())
}

/// Print the completion script for `shell`.
///
/// # Errors
///
/// Returns an error if `out` cannot be written.
pub fn completion(shell: Shell, out: &mut dyn Write) -> Result<()> {
    let mut buf = Vec::new();
    clap_complete::generate(shell, &mut Cli::command(), "dotstate", &mut buf);
    out.write_all(&buf)?;
    Ok(())
}

fn line() -> String {
    if crate::is_dev_build() {
        format!("dotstate {} (dev)", crate::version())
    } else {
        format!("dotstate {}", crate::version())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn prints_name_and_version() {
        let mut out = Vec::new();
        run(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("dotstate "));
        assert!(text.contains(crate::version()));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn bash_completion_lists_subcommands() {
        let mut out = Vec::new();
        completion(Shell::Bash, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("dotstate"));
        assert!(text.contains("execute-template"));
    }
}
