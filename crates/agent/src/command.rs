//! The session control surface, parsed from input lines.
//!
//! Lines starting with `:` are commands; anything else is a note to the
//! collaborator.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Ask the collaborator for a turn
    Invoke,
    /// Commit pending turns and write the document
    Save,
    /// Rebuild the kernel from the committed text
    Reload,
    Quit,
    /// Evaluate an expression against the live kernel, e.g. `f(2)`
    Call(String),
    /// Print the working document
    Show,
    /// Commit a whole document read from a file
    Submit(PathBuf),
    Status,
    Help,
    /// Plain text, appended as a human turn
    Note(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command ':{0}' (try :help)")]
    Unknown(String),

    #[error(":{command} needs {what}")]
    MissingArgument { command: String, what: &'static str },
}

impl SessionCommand {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        // Same exit words the plain chat loop accepts
        if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
            return Ok(Some(SessionCommand::Quit));
        }

        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Some(SessionCommand::Note(line.to_string())));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "invoke" | "i" => SessionCommand::Invoke,
            "save" | "w" => SessionCommand::Save,
            "reload" | "r" => SessionCommand::Reload,
            "quit" | "q" => SessionCommand::Quit,
            "show" | "s" => SessionCommand::Show,
            "status" => SessionCommand::Status,
            "help" | "h" | "?" => SessionCommand::Help,
            "call" | "c" => SessionCommand::Call(required(name, arg, "an expression")?),
            "submit" => SessionCommand::Submit(PathBuf::from(required(name, arg, "a file path")?)),
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// One line per command, for `:help`.
    pub fn help() -> &'static [(&'static str, &'static str)] {
        &[
            (":invoke, :i", "ask the collaborator for a turn"),
            (":save, :w", "commit notes and write the document"),
            (":reload, :r", "rebuild the kernel from the committed text"),
            (":call, :c EXPR", "evaluate EXPR against the live kernel"),
            (":show, :s", "print the working document"),
            (":submit PATH", "commit a whole document from PATH"),
            (":status", "show kernel and session state"),
            (":quit, :q", "leave (an in-flight reply is discarded)"),
            ("anything else", "added to the conversation as a note"),
        ]
    }
}

fn required(command: &str, arg: &str, what: &'static str) -> Result<String, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument {
            command: command.to_string(),
            what,
        });
    }
    Ok(arg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> SessionCommand {
        SessionCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn control_commands() {
        assert_eq!(parse(":invoke"), SessionCommand::Invoke);
        assert_eq!(parse(":i"), SessionCommand::Invoke);
        assert_eq!(parse(":w"), SessionCommand::Save);
        assert_eq!(parse(":reload"), SessionCommand::Reload);
        assert_eq!(parse(":q"), SessionCommand::Quit);
        assert_eq!(parse("exit"), SessionCommand::Quit);
    }

    #[test]
    fn arguments() {
        assert_eq!(parse(":call f(1, 2)"), SessionCommand::Call("f(1, 2)".into()));
        assert_eq!(
            parse(":submit  edited.dt "),
            SessionCommand::Submit(PathBuf::from("edited.dt"))
        );
        assert!(matches!(
            SessionCommand::parse(":call"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn plain_text_is_a_note() {
        assert_eq!(
            parse("  make f return 2 "),
            SessionCommand::Note("make f return 2".into())
        );
        assert_eq!(SessionCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            SessionCommand::parse(":frobnicate").unwrap_err(),
            CommandError::Unknown("frobnicate".into())
        );
    }
}
