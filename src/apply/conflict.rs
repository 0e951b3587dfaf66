//! Conflict prompting when a destination changed since it was last written.
use std::io::{BufRead, Write};

use anyhow::Result;

/// Answer to a conflict prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Overwrite this target.
    Overwrite,
    /// Overwrite this and every later conflicting target.
    OverwriteAll,
    /// Leave this target alone.
    Skip,
    /// Stop the run.
    Quit,
}

impl Choice {
    const ALL: [Self; 4] = [Self::Overwrite, Self::OverwriteAll, Self::Skip, Self::Quit];

    const fn label(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::OverwriteAll => "all-overwrite",
            Self::Skip => "skip",
            Self::Quit => "quit",
        }
    }
}

/// Asks the user how to resolve a conflict.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter: Send {
    /// Show `diff` and ask what to do with `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt cannot be displayed or answered.
    fn conflict(&mut self, target: &str, diff: &str) -> Result<Choice>;

    /// Ask a yes/no `question`.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt cannot be displayed or answered.
    fn confirm(&mut self, question: &str) -> Result<bool>;
}

/// Prompter on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn conflict(&mut self, target: &str, diff: &str) -> Result<Choice> {
        let mut stderr = std::io::stderr();
        stderr.write_all(diff.as_bytes())?;
        stderr.flush()?;
        let labels: Vec<&str> = Choice::ALL.iter().map(|c| c.label()).collect();
        let selection = dialoguer::Select::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt(format!("{target} has changed since dotstate last wrote it"))
            .items(&labels)
            .default(0)
            .interact()?;
        Ok(Choice::ALL.get(selection).copied().unwrap_or(Choice::Quit))
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        Ok(dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt(question)
            .default(false)
            .interact()?)
    }
}

/// Prompter reading one-word answers from any line source, used when stdin
/// is not a terminal.
#[derive(Debug)]
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    /// Read answers from `input` and write prompts to `output`.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> Prompter for LinePrompter<R, W> {
    fn conflict(&mut self, target: &str, diff: &str) -> Result<Choice> {
        let labels: Vec<&str> = Choice::ALL.iter().map(|c| c.label()).collect();
        loop {
            write!(
                self.output,
                "{diff}{target} has changed since dotstate last wrote it, {}? ",
                labels.join("/")
            )?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(Choice::Quit);
            }
            let answer = line.trim();
            if answer.is_empty() {
                continue;
            }
            if let Some(choice) = Choice::ALL
                .into_iter()
                .find(|c| c.label() == answer || c.label().starts_with(answer))
            {
                return Ok(choice);
            }
        }
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        loop {
            write!(self.output, "{question} [y/N] ")?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "" | "n" | "no" => return Ok(false),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn line_prompter_accepts_prefixes() {
        let mut prompter = LinePrompter::new(&b"bogus\ns\n"[..], Vec::new());
        assert_eq!(prompter.conflict(".bashrc", "").unwrap(), Choice::Skip);
    }

    #[test]
    fn line_prompter_confirm() {
        let mut prompter = LinePrompter::new(&b"maybe\nYes\n"[..], Vec::new());
        assert!(prompter.confirm("reset?").unwrap());
        let mut prompter = LinePrompter::new(&b"\n"[..], Vec::new());
        assert!(!prompter.confirm("reset?").unwrap());
    }

    #[test]
    fn line_prompter_eof_quits() {
        let mut prompter = LinePrompter::new(&b""[..], Vec::new());
        assert_eq!(prompter.conflict(".bashrc", "").unwrap(), Choice::Quit);
    }

    #[test]
    fn line_prompter_writes_question() {
        let mut prompter = LinePrompter::new(&b"all\n"[..], Vec::new());
        assert_eq!(
            prompter.conflict(".vimrc", "diff\n").unwrap(),
            Choice::OverwriteAll
        );
        assert_eq!(
            String::from_utf8(prompter.output).unwrap(),
            "diff\n.vimrc has changed since dotstate last wrote it, \
             overwrite/all-overwrite/skip/quit? "
        );
    }
}
